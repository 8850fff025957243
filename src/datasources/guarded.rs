use super::{DummyForecastSource, ForecastSource, Reading};
use crate::error::Result;
use crate::models::{HourlyMetrics, WeatherRegion};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Bounds every call to the primary source by a timeout and never returns an
/// error. Failures degrade to synthetic metrics when the fallback is enabled,
/// otherwise to "no data". Synthetic readings are flagged as degraded by
/// [`fetch_reading`](ForecastSource::fetch_reading).
pub struct GuardedForecastSource {
    primary: Arc<dyn ForecastSource>,
    timeout: Duration,
    fallback: Option<DummyForecastSource>,
}

impl GuardedForecastSource {
    pub fn new(primary: Arc<dyn ForecastSource>, timeout: Duration, fallback_to_dummy: bool) -> Self {
        Self {
            primary,
            timeout,
            fallback: fallback_to_dummy.then_some(DummyForecastSource),
        }
    }

    fn degrade(&self, region: &WeatherRegion, at: DateTime<Utc>) -> Option<Reading> {
        self.fallback
            .map(|_| Reading::degraded(DummyForecastSource::metrics(region, at)))
    }
}

#[async_trait]
impl ForecastSource for GuardedForecastSource {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn fetch_hour(
        &self,
        region: &WeatherRegion,
        at: DateTime<Utc>,
    ) -> Result<Option<HourlyMetrics>> {
        Ok(self.fetch_reading(region, at).await?.map(|r| r.metrics))
    }

    async fn fetch_reading(
        &self,
        region: &WeatherRegion,
        at: DateTime<Utc>,
    ) -> Result<Option<Reading>> {
        match tokio::time::timeout(self.timeout, self.primary.fetch_reading(region, at)).await {
            Ok(Ok(reading)) => Ok(reading),
            Ok(Err(e)) => {
                warn!(
                    source = self.primary.name(),
                    region = %region.id,
                    %at,
                    "Forecast fetch failed: {}",
                    e
                );
                Ok(self.degrade(region, at))
            }
            Err(_) => {
                warn!(
                    source = self.primary.name(),
                    region = %region.id,
                    %at,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Forecast fetch timed out"
                );
                Ok(self.degrade(region, at))
            }
        }
    }
}
