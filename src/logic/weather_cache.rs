use crate::datasources::{DummyForecastSource, ForecastSource};
use crate::db::Database;
use crate::error::{Result, WellcastError};
use crate::models::{metrics, HourlyMetrics, WeatherRegion, WeatherSnapshot};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Outcome of one pass over every region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeatherBatchReport {
    pub regions: usize,
    pub updated: usize,
    /// Regions whose source had nothing for the anchor hour.
    pub empty: usize,
    pub failed: usize,
}

/// Per-region, per-day cache of weather metrics and their recent changes.
#[derive(Clone)]
pub struct WeatherSnapshotCache {
    db: Database,
    source: Arc<dyn ForecastSource>,
    anchor_hour: u32,
    workers: usize,
}

impl WeatherSnapshotCache {
    pub fn new(db: Database, source: Arc<dyn ForecastSource>, anchor_hour: u32, workers: usize) -> Self {
        Self {
            db,
            source,
            anchor_hour: anchor_hour.min(23),
            workers: workers.max(1),
        }
    }

    /// The hour a day's snapshot describes: the current hour for today,
    /// otherwise the configured anchor hour.
    pub fn anchor_for(&self, date: NaiveDate, now: DateTime<Utc>) -> DateTime<Utc> {
        let hour = if date == now.date_naive() {
            now.hour()
        } else {
            self.anchor_hour
        };
        let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
        date.and_time(time).and_utc()
    }

    #[allow(dead_code)]
    pub async fn update_for_region(
        &self,
        region: &WeatherRegion,
        date: NaiveDate,
    ) -> Result<Option<WeatherSnapshot>> {
        let anchor = self.anchor_for(date, Utc::now());
        self.update_for_region_at(region, date, anchor).await
    }

    /// Fetch the anchor hour plus the 6h, 12h and 24h lookbacks, derive deltas
    /// and upsert the region's snapshot for `date`. Returns `None` without
    /// writing anything when the anchor hour has no data.
    ///
    /// Deltas only compare live readings. A synthetic anchor is stored under
    /// the dummy source name and gets no deltas at all.
    pub async fn update_for_region_at(
        &self,
        region: &WeatherRegion,
        date: NaiveDate,
        anchor: DateTime<Utc>,
    ) -> Result<Option<WeatherSnapshot>> {
        let (now, h6, h12, h24) = tokio::join!(
            self.source.fetch_reading(region, anchor),
            self.lookback(region, anchor, 6),
            self.lookback(region, anchor, 12),
            self.lookback(region, anchor, 24),
        );

        let Some(now) = now?.filter(|r| !r.metrics.is_empty()) else {
            debug!(region = %region.id, %anchor, "No metrics for anchor hour");
            return Ok(None);
        };

        let (source, h6, h12, h24) = if now.degraded {
            warn!(region = %region.id, %anchor, "Anchor hour served by the dummy source, deltas skipped");
            (DummyForecastSource::NAME, None, None, None)
        } else {
            (self.source.name(), h6, h12, h24)
        };
        let now = now.metrics;

        let mut snapshot = WeatherSnapshot::new(region.id.clone(), date, source);
        snapshot.set(metrics::TEMPERATURE_C, now.temperature_c);
        snapshot.set(metrics::HUMIDITY_PCT, now.humidity_pct);
        snapshot.set(metrics::PRESSURE_HPA, now.pressure_hpa);

        snapshot.set(
            metrics::PRESSURE_DELTA_6H,
            delta(now.pressure_hpa, h6.and_then(|m| m.pressure_hpa)),
        );
        snapshot.set(
            metrics::PRESSURE_DELTA_24H,
            delta(now.pressure_hpa, h24.and_then(|m| m.pressure_hpa)),
        );
        snapshot.set(
            metrics::TEMP_DELTA_6H,
            delta(now.temperature_c, h6.and_then(|m| m.temperature_c)),
        );
        snapshot.set(
            metrics::TEMP_DELTA_12H,
            delta(now.temperature_c, h12.and_then(|m| m.temperature_c)),
        );

        self.db.upsert_weather_snapshot(&snapshot)?;
        Ok(Some(snapshot))
    }

    /// Auxiliary fetch; failures and synthetic stand-ins only cost the deltas
    /// that depend on it.
    async fn lookback(&self, region: &WeatherRegion, anchor: DateTime<Utc>, hours: i64) -> Option<HourlyMetrics> {
        let at = anchor - Duration::hours(hours);
        match self.source.fetch_reading(region, at).await {
            Ok(Some(reading)) if reading.degraded => {
                debug!(region = %region.id, %at, "Lookback served by the dummy source, ignored");
                None
            }
            Ok(reading) => reading.map(|r| r.metrics),
            Err(e) => {
                warn!(region = %region.id, %at, "Lookback fetch failed: {}", e);
                None
            }
        }
    }

    /// Refresh every known region for `date`, at most `workers` at a time.
    pub async fn update_weather_snapshots(&self, date: NaiveDate) -> Result<WeatherBatchReport> {
        let regions = self.db.list_regions()?;
        let anchor = self.anchor_for(date, Utc::now());
        let mut report = WeatherBatchReport {
            regions: regions.len(),
            ..Default::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set = JoinSet::new();

        for region in regions {
            let cache = self.clone();
            let semaphore = Arc::clone(&semaphore);

            join_set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => cache.update_for_region_at(&region, date, anchor).await,
                    Err(e) => Err(WellcastError::InvalidData(format!("worker pool closed: {}", e))),
                };
                (region.id, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(Some(_)))) => report.updated += 1,
                Ok((region_id, Ok(None))) => {
                    warn!(region = %region_id, %date, "No weather available, snapshot not updated");
                    report.empty += 1;
                }
                Ok((region_id, Err(e))) => {
                    warn!(region = %region_id, %date, "Weather update failed: {}", e);
                    report.failed += 1;
                }
                Err(e) => {
                    warn!("Weather update task panicked: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            %date,
            regions = report.regions,
            updated = report.updated,
            empty = report.empty,
            failed = report.failed,
            "Weather snapshots updated"
        );
        Ok(report)
    }
}

/// `now - earlier`, negative when the value fell.
fn delta(now: Option<f64>, earlier: Option<f64>) -> Option<f64> {
    Some(now? - earlier?)
}
