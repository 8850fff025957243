use super::ForecastSource;
use crate::error::Result;
use crate::models::{HourlyMetrics, WeatherRegion};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::f64::consts::PI;

/// Synthetic but plausible weather, derived only from the region's centroid
/// and the requested hour. The same inputs always produce the same metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyForecastSource;

impl DummyForecastSource {
    pub const NAME: &'static str = "dummy";

    pub fn metrics(region: &WeatherRegion, at: DateTime<Utc>) -> HourlyMetrics {
        let day = at.ordinal0() as f64;
        let hour = at.hour() as f64;

        // Seasonal swing peaking late July, daily swing peaking mid-afternoon local time
        let seasonal = (2.0 * PI * (day - 20.0) / 365.0).sin();
        let local_hour = (hour + region.longitude / 15.0).rem_euclid(24.0);
        let diurnal = (2.0 * PI * (local_hour - 9.0) / 24.0).sin();
        let latitude_offset = (35.0 - region.latitude) * 0.6;

        let temperature = 15.0 + 10.0 * seasonal + 4.0 * diurnal + latitude_offset;
        let humidity = (65.0 + 15.0 * seasonal - 10.0 * diurnal).clamp(5.0, 100.0);

        // Slow pressure wave, a few days long, offset per region
        let hours_since_epoch = at.timestamp() as f64 / 3600.0;
        let phase = region.longitude.to_radians() + region.latitude.to_radians();
        let pressure = 1013.0 + 6.0 * (2.0 * PI * hours_since_epoch / 96.0 + phase).sin();

        HourlyMetrics {
            temperature_c: Some(round1(temperature)),
            humidity_pct: Some(round1(humidity)),
            pressure_hpa: Some(round1(pressure)),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[async_trait]
impl ForecastSource for DummyForecastSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch_hour(
        &self,
        region: &WeatherRegion,
        at: DateTime<Utc>,
    ) -> Result<Option<HourlyMetrics>> {
        Ok(Some(Self::metrics(region, at)))
    }
}
