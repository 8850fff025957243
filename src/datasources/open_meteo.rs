use super::ForecastSource;
use crate::error::{Result, WellcastError};
use crate::models::{HourlyMetrics, WeatherRegion};
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use serde::Deserialize;

const HOURLY_FIELDS: &str = "temperature_2m,relative_humidity_2m,pressure_msl";

/// Client for the Open-Meteo hourly forecast API. No API key required.
pub struct OpenMeteoClient {
    client: reqwest::Client,
    base_url: String,
}

// Open-Meteo API response structures
#[derive(Debug, Deserialize)]
struct OmResponse {
    hourly: Option<OmHourly>,
}

#[derive(Debug, Deserialize)]
struct OmHourly {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    pressure_msl: Vec<Option<f64>>,
}

impl OpenMeteoClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn hour_url(&self, region: &WeatherRegion, at: DateTime<Utc>) -> String {
        let hour = hour_param(at);
        format!(
            "{}?latitude={:.4}&longitude={:.4}&hourly={}&start_hour={}&end_hour={}&timezone=UTC",
            self.base_url, region.latitude, region.longitude, HOURLY_FIELDS, hour, hour
        )
    }

    /// Test connection to the Open-Meteo API
    pub async fn test_connection(&self, region: &WeatherRegion) -> Result<bool> {
        let response = self
            .client
            .get(self.hour_url(region, Utc::now()))
            .send()
            .await
            .map_err(|e| WellcastError::DataSourceUnavailable(format!("Open-Meteo: {}", e)))?;

        Ok(response.status().is_success())
    }
}

#[async_trait]
impl ForecastSource for OpenMeteoClient {
    fn name(&self) -> &str {
        "open_meteo"
    }

    async fn fetch_hour(
        &self,
        region: &WeatherRegion,
        at: DateTime<Utc>,
    ) -> Result<Option<HourlyMetrics>> {
        let response = self
            .client
            .get(self.hour_url(region, at))
            .send()
            .await
            .map_err(|e| WellcastError::DataSourceUnavailable(format!("Open-Meteo: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WellcastError::DataSourceUnavailable(format!(
                "Open-Meteo returned {}: {}",
                status, body
            )));
        }

        let om_response: OmResponse = response.json().await.map_err(|e| {
            WellcastError::DataSourceUnavailable(format!(
                "Failed to parse Open-Meteo response: {}",
                e
            ))
        })?;

        Ok(om_response
            .hourly
            .and_then(|hourly| metrics_at(&hourly, &hour_param(at))))
    }
}

/// `YYYY-MM-DDTHH:00`, the hour format Open-Meteo uses in UTC mode.
fn hour_param(at: DateTime<Utc>) -> String {
    format!("{}T{:02}:00", at.format("%Y-%m-%d"), at.hour())
}

fn metrics_at(hourly: &OmHourly, hour: &str) -> Option<HourlyMetrics> {
    let idx = hourly.time.iter().position(|t| t == hour)?;
    let pick = |series: &[Option<f64>]| series.get(idx).copied().flatten();

    let metrics = HourlyMetrics {
        temperature_c: pick(&hourly.temperature_2m),
        humidity_pct: pick(&hourly.relative_humidity_2m),
        pressure_hpa: pick(&hourly.pressure_msl),
    };
    (!metrics.is_empty()).then_some(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tokyo() -> WeatherRegion {
        WeatherRegion {
            id: "13".into(),
            name: "Tokyo".into(),
            latitude: 35.6895,
            longitude: 139.6917,
        }
    }

    #[test]
    fn builds_single_hour_url() {
        let client = OpenMeteoClient::new("https://api.open-meteo.com/v1/forecast");
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 6, 42, 0).unwrap();
        let url = client.hour_url(&tokyo(), at);
        assert!(url.starts_with("https://api.open-meteo.com/v1/forecast?latitude=35.6895&longitude=139.6917"));
        assert!(url.contains("start_hour=2025-06-01T06:00&end_hour=2025-06-01T06:00"));
        assert!(url.ends_with("timezone=UTC"));
    }

    #[test]
    fn picks_the_requested_hour() {
        let body = r#"{
            "latitude": 35.7,
            "hourly": {
                "time": ["2025-06-01T05:00", "2025-06-01T06:00"],
                "temperature_2m": [20.1, 21.4],
                "relative_humidity_2m": [70, null],
                "pressure_msl": [1011.2, 1010.8]
            }
        }"#;
        let response: OmResponse = serde_json::from_str(body).unwrap();
        let hourly = response.hourly.unwrap();

        let metrics = metrics_at(&hourly, "2025-06-01T06:00").unwrap();
        assert_eq!(metrics.temperature_c, Some(21.4));
        assert_eq!(metrics.humidity_pct, None);
        assert_eq!(metrics.pressure_hpa, Some(1010.8));

        assert!(metrics_at(&hourly, "2025-06-01T07:00").is_none());
    }

    #[test]
    fn all_null_hour_is_absent() {
        let hourly = OmHourly {
            time: vec!["2025-06-01T06:00".into()],
            temperature_2m: vec![None],
            relative_humidity_2m: vec![None],
            pressure_msl: vec![],
        };
        assert!(metrics_at(&hourly, "2025-06-01T06:00").is_none());
    }
}
