use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric names stored in a [`WeatherSnapshot`] and exposed to rule contexts.
pub mod metrics {
    pub const TEMPERATURE_C: &str = "temperature_c";
    pub const HUMIDITY_PCT: &str = "humidity_pct";
    pub const PRESSURE_HPA: &str = "pressure_hpa";
    /// Pressure now minus 6 hours earlier (negative when falling).
    pub const PRESSURE_DELTA_6H: &str = "pressure_delta_6h";
    pub const PRESSURE_DELTA_24H: &str = "pressure_delta_24h";
    /// Temperature now minus 6 hours earlier (negative when falling).
    pub const TEMP_DELTA_6H: &str = "temp_delta_6h";
    pub const TEMP_DELTA_12H: &str = "temp_delta_12h";

    pub const ALL: [&str; 7] = [
        TEMPERATURE_C,
        HUMIDITY_PCT,
        PRESSURE_HPA,
        PRESSURE_DELTA_6H,
        PRESSURE_DELTA_24H,
        TEMP_DELTA_6H,
        TEMP_DELTA_12H,
    ];
}

/// A weather region (prefecture) and its centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRegion {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Metrics reported by a forecast source for one region and hour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlyMetrics {
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
}

impl HourlyMetrics {
    pub fn is_empty(&self) -> bool {
        self.temperature_c.is_none() && self.humidity_pct.is_none() && self.pressure_hpa.is_none()
    }
}

/// Environmental metrics for one region and day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub region_id: String,
    pub date: NaiveDate,
    pub metrics: BTreeMap<String, f64>,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

impl WeatherSnapshot {
    pub fn new(region_id: impl Into<String>, date: NaiveDate, source: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            date,
            metrics: BTreeMap::new(),
            source: source.into(),
            fetched_at: Utc::now(),
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn set(&mut self, name: &str, value: Option<f64>) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.metrics.insert(name.to_string(), v);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
