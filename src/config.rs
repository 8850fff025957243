use crate::error::{Result, WellcastError};
use dialoguer::{Confirm, Input, Password, Select};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appdb: Option<AppDbConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RulesConfig {
    #[serde(default = "default_rules_path")]
    pub rules_path: PathBuf,
    #[serde(default = "default_triggers_path")]
    pub triggers_path: PathBuf,
}

fn default_rules_path() -> PathBuf {
    PathBuf::from("config/rules.yaml")
}

fn default_triggers_path() -> PathBuf {
    PathBuf::from("config/triggers.yaml")
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            rules_path: default_rules_path(),
            triggers_path: default_triggers_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastProvider {
    #[default]
    OpenMeteo,
    Dummy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForecastConfig {
    #[serde(default)]
    pub provider: ForecastProvider,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Serve synthetic metrics when the provider fails or times out.
    #[serde(default = "default_true")]
    pub fallback_to_dummy: bool,
    /// UTC hour used as "now" when building snapshots for past or future days.
    #[serde(default = "default_anchor_hour")]
    pub anchor_hour: u32,
}

fn default_base_url() -> String {
    "https://api.open-meteo.com/v1/forecast".into()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_anchor_hour() -> u32 {
    6
}

impl ForecastConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            provider: ForecastProvider::default(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            fallback_to_dummy: true,
            anchor_hour: default_anchor_hour(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Regions processed concurrently by batch jobs.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Rows kept per region/day in the suggestion snapshot table.
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: usize,
}

fn default_workers() -> usize {
    4
}

fn default_snapshot_limit() -> usize {
    20
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            snapshot_limit: default_snapshot_limit(),
        }
    }
}

/// Upstream application database that users, regions and daily logs are
/// imported from.
#[derive(Clone, Deserialize, Serialize)]
pub struct AppDbConfig {
    pub host: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    match PortValue::deserialize(deserializer)? {
        PortValue::Number(port) => Ok(port),
        PortValue::Text(value) => value.trim().parse::<u16>().map_err(|_| {
            D::Error::custom(format!(
                "invalid port '{}' - ensure APPDB_PORT environment variable is set",
                value
            ))
        }),
    }
}

impl AppDbConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

impl std::fmt::Debug for AppDbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppDbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Config {
    pub fn load(config_override: Option<&PathBuf>) -> Result<Self> {
        let config_path = match config_override {
            Some(p) => p.clone(),
            None => Self::find_config_path()?,
        };

        if !config_path.exists() {
            return Err(WellcastError::Config(format!(
                "Config file not found at {:?}. Run `wellcast init` to set up.",
                config_path
            )));
        }

        let config_str = std::fs::read_to_string(&config_path)
            .map_err(|e| WellcastError::Config(format!("Failed to read config: {}", e)))?;

        Self::from_yaml_str(&config_str)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        // Substitute environment variables
        let yaml = Self::substitute_env_vars(yaml);

        let config: Config = serde_yaml::from_str(&yaml)
            .map_err(|e| WellcastError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.forecast.anchor_hour > 23 {
            return Err(WellcastError::Config(format!(
                "forecast.anchor_hour must be 0-23, got {}",
                self.forecast.anchor_hour
            )));
        }
        if self.batch.workers == 0 {
            return Err(WellcastError::Config("batch.workers must be at least 1".into()));
        }
        Ok(())
    }

    /// Search for config.yaml in standard locations.
    /// Returns the path of the first found config, or the XDG default path if none found.
    fn find_config_path() -> Result<PathBuf> {
        let local_config = PathBuf::from("config/config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let default_path = Self::default_config_path()?;
        Ok(default_path)
    }

    /// Default path for writing new config files (~/.config/wellcast/config.yaml).
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| WellcastError::Config("Cannot determine config directory".into()))?
            .join("wellcast");
        Ok(config_dir.join("config.yaml"))
    }

    /// Run interactive setup prompts and write config to disk.
    /// Returns the loaded Config and the path it was written to.
    pub fn setup_interactive() -> Result<(Self, PathBuf)> {
        println!();
        println!("Let's set up wellcast!");
        println!();

        println!("Rules");
        let rules_path: String = Input::new()
            .with_prompt("  Rules file")
            .default("config/rules.yaml".into())
            .interact_text()
            .map_err(input_error)?;

        let triggers_path: String = Input::new()
            .with_prompt("  Triggers file")
            .default("config/triggers.yaml".into())
            .interact_text()
            .map_err(input_error)?;

        println!();

        println!("Forecast");
        let providers = ["open_meteo", "dummy"];
        let provider = Select::new()
            .with_prompt("  Provider")
            .items(&providers)
            .default(0)
            .interact()
            .map_err(input_error)?;
        let provider = if provider == 0 {
            ForecastProvider::OpenMeteo
        } else {
            ForecastProvider::Dummy
        };

        let timeout_secs: u64 = Input::new()
            .with_prompt("  Request timeout (seconds)")
            .default(default_timeout_secs())
            .interact_text()
            .map_err(input_error)?;

        let fallback_to_dummy = Confirm::new()
            .with_prompt("  Fall back to synthetic data when the provider fails?")
            .default(true)
            .interact()
            .map_err(input_error)?;

        println!();

        println!("Batch jobs");
        let workers: usize = Input::new()
            .with_prompt("  Concurrent regions")
            .default(default_workers())
            .interact_text()
            .map_err(input_error)?;

        println!();

        let appdb = if Confirm::new()
            .with_prompt("Import users and logs from the application PostgreSQL database?")
            .default(false)
            .interact()
            .map_err(input_error)?
        {
            let host: String = Input::new()
                .with_prompt("  Host")
                .default("localhost".into())
                .interact_text()
                .map_err(input_error)?;

            let port: u16 = Input::new()
                .with_prompt("  Port")
                .default(5432)
                .interact_text()
                .map_err(input_error)?;

            let database: String = Input::new()
                .with_prompt("  Database")
                .default("app".into())
                .interact_text()
                .map_err(input_error)?;

            let user: String = Input::new()
                .with_prompt("  User")
                .default("postgres".into())
                .interact_text()
                .map_err(input_error)?;

            let password: String = Password::new()
                .with_prompt("  Password (leave empty to use ${APPDB_PASSWORD})")
                .allow_empty_password(true)
                .interact()
                .map_err(input_error)?;

            Some(AppDbConfig {
                host,
                port,
                database,
                user,
                password: if password.is_empty() {
                    "${APPDB_PASSWORD}".into()
                } else {
                    password
                },
                enabled: true,
            })
        } else {
            None
        };

        println!();

        let config = Config {
            rules: RulesConfig {
                rules_path: PathBuf::from(rules_path),
                triggers_path: PathBuf::from(triggers_path),
            },
            forecast: ForecastConfig {
                provider,
                timeout_secs,
                fallback_to_dummy,
                ..ForecastConfig::default()
            },
            batch: BatchConfig {
                workers: workers.max(1),
                ..BatchConfig::default()
            },
            appdb,
        };

        let config_path = Self::default_config_path()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml::to_string(&config)
            .map_err(|e| WellcastError::Config(format!("Failed to serialize config: {}", e)))?;

        let content = format!(
            "# wellcast configuration\n# Generated by `wellcast init`\n# Environment variable substitution (${{VAR}}) is supported.\n\n{}",
            yaml
        );
        std::fs::write(&config_path, content)?;

        println!("Configuration saved to {}", config_path.display());
        println!();

        Ok((config, config_path))
    }

    fn substitute_env_vars(content: &str) -> String {
        let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid");

        // Unset variables are left as written
        re.replace_all(content, |caps: &regex_lite::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
    }

    pub fn data_dir(data_dir_override: Option<&PathBuf>) -> Result<PathBuf> {
        // CLI override takes priority
        if let Some(dir) = data_dir_override {
            std::fs::create_dir_all(dir)?;
            return Ok(dir.clone());
        }

        if let Ok(dir) = std::env::var("WELLCAST_DATA_DIR") {
            let p = PathBuf::from(dir);
            std::fs::create_dir_all(&p)?;
            return Ok(p);
        }

        let data_dir = dirs::data_dir()
            .ok_or_else(|| WellcastError::Config("Cannot determine data directory".into()))?
            .join("wellcast");

        std::fs::create_dir_all(&data_dir)?;
        Ok(data_dir)
    }

    pub fn db_path(data_dir_override: Option<&PathBuf>) -> Result<PathBuf> {
        Ok(Self::data_dir(data_dir_override)?.join("wellcast.db"))
    }
}

fn input_error(e: dialoguer::Error) -> WellcastError {
    WellcastError::Config(format!("Input error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_yaml_str("{}").unwrap();
        assert_eq!(config.rules.rules_path, PathBuf::from("config/rules.yaml"));
        assert_eq!(config.forecast.provider, ForecastProvider::OpenMeteo);
        assert!(config.forecast.fallback_to_dummy);
        assert_eq!(config.forecast.anchor_hour, 6);
        assert_eq!(config.batch.snapshot_limit, 20);
        assert!(config.appdb.is_none());
    }

    #[test]
    fn substitutes_environment_variables() {
        std::env::set_var("WELLCAST_TEST_APPDB_PORT", "6543");
        let yaml = r#"
forecast:
  provider: dummy
  timeout_secs: 3
appdb:
  host: db.internal
  port: ${WELLCAST_TEST_APPDB_PORT}
  database: app
  user: reader
  password: ${WELLCAST_TEST_UNSET_PASSWORD}
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        let appdb = config.appdb.unwrap();
        assert_eq!(appdb.port, 6543);
        assert_eq!(appdb.password, "${WELLCAST_TEST_UNSET_PASSWORD}");
        assert_eq!(config.forecast.provider, ForecastProvider::Dummy);
        assert_eq!(config.forecast.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn debug_output_redacts_password() {
        let appdb = AppDbConfig {
            host: "localhost".into(),
            port: 5432,
            database: "app".into(),
            user: "postgres".into(),
            password: "hunter2".into(),
            enabled: true,
        };
        let printed = format!("{:?}", appdb);
        assert!(!printed.contains("hunter2"));
        assert!(appdb.connection_string().ends_with("@localhost:5432/app"));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(Config::from_yaml_str("forecast: { anchor_hour: 24 }").is_err());
        assert!(Config::from_yaml_str("batch: { workers: 0 }").is_err());
    }
}
