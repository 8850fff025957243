pub mod appdb;
pub mod dummy;
pub mod guarded;
pub mod open_meteo;

pub use appdb::AppDbClient;
pub use dummy::DummyForecastSource;
pub use guarded::GuardedForecastSource;
pub use open_meteo::OpenMeteoClient;

use crate::config::{ForecastConfig, ForecastProvider};
use crate::error::Result;
use crate::models::{HourlyMetrics, WeatherRegion};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Metrics for one hour, marked when they stand in for a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub metrics: HourlyMetrics,
    /// Synthetic metrics served because the real source failed or timed out.
    pub degraded: bool,
}

impl Reading {
    pub fn live(metrics: HourlyMetrics) -> Self {
        Self {
            metrics,
            degraded: false,
        }
    }

    pub fn degraded(metrics: HourlyMetrics) -> Self {
        Self {
            metrics,
            degraded: true,
        }
    }
}

/// Anything that can report weather metrics for a region at a given hour.
#[async_trait]
pub trait ForecastSource: Send + Sync {
    /// Short label stored with snapshots built from this source.
    fn name(&self) -> &str;

    /// Metrics for the hour containing `at`. `Ok(None)` means the source had
    /// nothing for that hour.
    async fn fetch_hour(
        &self,
        region: &WeatherRegion,
        at: DateTime<Utc>,
    ) -> Result<Option<HourlyMetrics>>;

    /// Same as [`fetch_hour`](Self::fetch_hour), but says whether the metrics
    /// were substituted for a failed fetch.
    async fn fetch_reading(
        &self,
        region: &WeatherRegion,
        at: DateTime<Utc>,
    ) -> Result<Option<Reading>> {
        Ok(self.fetch_hour(region, at).await?.map(Reading::live))
    }
}

/// Build the configured provider, wrapped with the timeout and fallback policy.
pub fn from_config(config: &ForecastConfig) -> Arc<dyn ForecastSource> {
    let primary: Arc<dyn ForecastSource> = match config.provider {
        ForecastProvider::OpenMeteo => Arc::new(OpenMeteoClient::new(config.base_url.clone())),
        ForecastProvider::Dummy => Arc::new(DummyForecastSource),
    };

    let fallback = config.fallback_to_dummy && config.provider != ForecastProvider::Dummy;
    Arc::new(GuardedForecastSource::new(primary, config.timeout(), fallback))
}
