use crate::config::Config;
use crate::datasources::AppDbClient;
use crate::db::Database;
use crate::error::{Result, WellcastError};
use crate::models::{DailyLog, User, WeatherRegion};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub regions: usize,
    pub users: usize,
    pub logs: usize,
    /// Users whose topic registrations were replaced.
    pub topic_users: usize,
    /// Logs dropped because their user was not imported.
    pub skipped_logs: usize,
}

/// Everything read from the application database in one pass.
#[derive(Debug, Clone, Default)]
pub struct AppData {
    pub regions: Vec<WeatherRegion>,
    pub users: Vec<User>,
    pub logs: Vec<DailyLog>,
    pub topics: Vec<(i64, String)>,
}

/// Copies users, regions, daily logs and topic registrations from the
/// application database into the local store.
pub struct DataSyncService {
    config: Config,
    db: Database,
}

impl DataSyncService {
    pub fn new(config: Config, db: Database) -> Self {
        Self { config, db }
    }

    pub async fn sync(&self, since: NaiveDate) -> Result<SyncReport> {
        let appdb = self
            .config
            .appdb
            .as_ref()
            .filter(|c| c.enabled)
            .ok_or_else(|| WellcastError::Config("appdb is not configured or disabled".into()))?;

        let client = AppDbClient::connect(appdb).await?;
        info!("Connected to app PostgreSQL");

        let data = AppData {
            regions: client.fetch_regions().await?,
            users: client.fetch_users().await?,
            logs: client.fetch_daily_logs(since).await?,
            topics: client.fetch_user_topics().await?,
        };

        self.apply(data)
    }

    /// Write fetched data to the local store. Regions first, then users, so
    /// logs and topics always find their user.
    pub fn apply(&self, data: AppData) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for region in &data.regions {
            self.db.upsert_region(region)?;
            report.regions += 1;
        }

        let mut known_users = HashSet::new();
        for user in &data.users {
            self.db.upsert_user(user)?;
            known_users.insert(user.id);
            report.users += 1;
        }

        for log in &data.logs {
            if !known_users.contains(&log.user_id) {
                report.skipped_logs += 1;
                continue;
            }
            self.db.upsert_daily_log(log)?;
            report.logs += 1;
        }
        if report.skipped_logs > 0 {
            warn!(skipped = report.skipped_logs, "Daily logs for unknown users were not imported");
        }

        let mut topics: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
        for (user_id, topic) in data.topics {
            topics.entry(user_id).or_default().insert(topic);
        }
        for user_id in &known_users {
            let user_topics = topics.remove(user_id).unwrap_or_default();
            self.db.set_user_topics(*user_id, &user_topics)?;
            report.topic_users += 1;
        }

        info!(
            regions = report.regions,
            users = report.users,
            logs = report.logs,
            topic_users = report.topic_users,
            "App data imported"
        );
        Ok(report)
    }
}
