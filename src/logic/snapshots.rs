use super::context;
use super::rules::{Diversity, RulesEngine};
use super::weather_cache::WeatherSnapshotCache;
use crate::db::Database;
use crate::error::Result;
use crate::models::{Category, SuggestionSnapshot, WeatherRegion};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotBuildReport {
    pub regions: usize,
    pub built: usize,
    /// Regions without weather for the day.
    pub skipped: usize,
    pub rows: usize,
    pub failed: usize,
}

/// Precomputes each region's environment-driven suggestions for a day so the
/// per-user path can read them instead of evaluating env rules again.
pub struct SnapshotBuilder {
    db: Database,
    engine: Arc<RulesEngine>,
    weather: WeatherSnapshotCache,
    limit: usize,
}

impl SnapshotBuilder {
    pub fn new(db: Database, engine: Arc<RulesEngine>, weather: WeatherSnapshotCache, limit: usize) -> Self {
        Self {
            db,
            engine,
            weather,
            limit,
        }
    }

    /// Rebuild one region's rows for `date` from its stored weather snapshot.
    /// Returns the number of rows written, or `None` when the region has no
    /// weather for the day and its rows were left alone.
    pub fn build_for_region(&self, region: &WeatherRegion, date: NaiveDate) -> Result<Option<usize>> {
        let Some(weather) = self
            .db
            .get_weather_snapshot(&region.id, date)?
            .filter(|w| !w.is_empty())
        else {
            debug!(region = %region.id, %date, "No weather snapshot, skipping");
            return Ok(None);
        };

        let ctx = context::environmental(Some(&weather));
        let ranked = self
            .engine
            .run_category(Category::Env, &ctx, None, self.limit, Diversity::Off)?;

        let rows: Vec<SuggestionSnapshot> = ranked
            .iter()
            .enumerate()
            .map(|(rank, suggestion)| {
                SuggestionSnapshot::from_suggestion(date, &region.id, rank, suggestion, &ctx)
            })
            .collect();

        let written = self.db.replace_suggestion_snapshots(date, &region.id, &rows)?;
        Ok(Some(written))
    }

    /// Refresh weather for every region, then rebuild every region's rows.
    /// A failing region is logged and counted; the rest still run.
    pub async fn build_suggestion_snapshots(&self, date: NaiveDate) -> Result<SnapshotBuildReport> {
        let weather = self.weather.update_weather_snapshots(date).await?;
        if weather.failed > 0 {
            warn!(
                failed = weather.failed,
                "Some regions failed to refresh weather; using stored snapshots"
            );
        }

        let regions = self.db.list_regions()?;
        let mut report = SnapshotBuildReport {
            regions: regions.len(),
            ..Default::default()
        };

        for region in &regions {
            match self.build_for_region(region, date) {
                Ok(Some(rows)) => {
                    report.built += 1;
                    report.rows += rows;
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(region = %region.id, %date, "Snapshot build failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            %date,
            regions = report.regions,
            built = report.built,
            skipped = report.skipped,
            rows = report.rows,
            failed = report.failed,
            "Suggestion snapshots built"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasources::ForecastSource;
    use crate::error::WellcastError;
    use crate::logic::rules::RuleRegistry;
    use crate::models::{metrics, HourlyMetrics, WeatherSnapshot};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    const RULES: &str = r#"
rules:
  - key: pressure_drop_strong
    title: Sharp pressure drop
    message: "Pressure fell {pressure_delta_24h} hPa"
    tags: [pressure]
    severity: 80
    category: env
    group: pressure
    condition: "pressure_delta_24h <= -6"
  - key: pressure_drop_mild
    title: Pressure dropping
    message: "Pressure is down {pressure_delta_24h} hPa"
    tags: [pressure]
    severity: 75
    category: env
    group: pressure
    condition: "pressure_delta_24h <= -3"
  - key: humid
    title: Humid
    severity: 40
    category: env
    condition: "humidity_pct >= 80"
  - key: short_sleep
    title: Short sleep
    severity: 60
    category: body
    condition: "sleep_hours < 6"
"#;

    /// Always unavailable, so batch tests run on stored weather only.
    struct Offline;

    #[async_trait]
    impl ForecastSource for Offline {
        fn name(&self) -> &str {
            "offline"
        }

        async fn fetch_hour(&self, _: &WeatherRegion, _: DateTime<Utc>) -> Result<Option<HourlyMetrics>> {
            Err(WellcastError::DataSourceUnavailable("offline".into()))
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn region(id: &str) -> WeatherRegion {
        WeatherRegion {
            id: id.into(),
            name: format!("Region {}", id),
            latitude: 35.0,
            longitude: 139.0,
        }
    }

    fn builder(db: &Database) -> SnapshotBuilder {
        let engine = Arc::new(RulesEngine::new(Arc::new(RuleRegistry::from_yaml(RULES))));
        let weather = WeatherSnapshotCache::new(db.clone(), Arc::new(Offline), 6, 2);
        SnapshotBuilder::new(db.clone(), engine, weather, 20)
    }

    fn store_weather(db: &Database, region_id: &str, delta_24h: f64, humidity: f64) {
        let mut snapshot = WeatherSnapshot::new(region_id, date(), "test");
        snapshot.set(metrics::PRESSURE_DELTA_24H, Some(delta_24h));
        snapshot.set(metrics::HUMIDITY_PCT, Some(humidity));
        db.upsert_weather_snapshot(&snapshot).unwrap();
    }

    #[test]
    fn keeps_every_env_match_ranked_without_diversity() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_region(&region("13")).unwrap();
        store_weather(&db, "13", -7.0, 85.0);

        let written = builder(&db).build_for_region(&region("13"), date()).unwrap();
        assert_eq!(written, Some(3));

        let rows = db.suggestion_snapshots_for(date(), "13").unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r.rule_key.as_str()).collect();
        assert_eq!(keys, vec!["pressure_drop_strong", "pressure_drop_mild", "humid"]);
        assert_eq!(rows[0].rank, 0);
        assert_eq!(rows[0].message, "Pressure fell -7 hPa");
        assert_eq!(rows[0].context["humidity_pct"], crate::logic::expression::Value::Number(85.0));
    }

    #[test]
    fn rebuilding_with_same_weather_is_stable() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_region(&region("13")).unwrap();
        store_weather(&db, "13", -4.0, 50.0);
        let builder = builder(&db);

        builder.build_for_region(&region("13"), date()).unwrap();
        let first = db.suggestion_snapshots_for(date(), "13").unwrap();
        builder.build_for_region(&region("13"), date()).unwrap();
        let second = db.suggestion_snapshots_for(date(), "13").unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn rebuild_drops_rules_that_no_longer_match() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_region(&region("13")).unwrap();
        let builder = builder(&db);

        store_weather(&db, "13", -7.0, 50.0);
        builder.build_for_region(&region("13"), date()).unwrap();
        store_weather(&db, "13", 0.5, 50.0);
        assert_eq!(builder.build_for_region(&region("13"), date()).unwrap(), Some(0));
        assert!(db.suggestion_snapshots_for(date(), "13").unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_skips_regions_without_weather() {
        let db = Database::open_in_memory().unwrap();
        for id in ["01", "13", "27"] {
            db.upsert_region(&region(id)).unwrap();
        }
        store_weather(&db, "13", -7.0, 85.0);
        store_weather(&db, "27", -1.0, 40.0);

        let report = builder(&db).build_suggestion_snapshots(date()).await.unwrap();
        assert_eq!(report.regions, 3);
        assert_eq!(report.built, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.rows, 3);
        assert_eq!(report.failed, 0);
    }
}
