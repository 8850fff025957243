use super::rule::Category;
use super::trigger::Operator;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// What was observed when a trigger fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMetadata {
    pub observed: f64,
    pub threshold: f64,
    pub metric: String,
    pub operator: Operator,
    #[serde(default)]
    pub trigger_version: u32,
}

/// One trigger firing for one user on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub id: Option<i64>,
    pub user_id: i64,
    pub trigger_key: String,
    pub date: NaiveDate,
    pub category: Category,
    pub level_id: String,
    pub priority: i64,
    pub evaluated_at: DateTime<Utc>,
    pub metadata: SignalMetadata,
}

impl SignalEvent {
    /// Ordinal of the matched level: none 0, attention 1, warning 2, strong 3.
    pub fn level_rank(&self) -> i64 {
        level_rank(&self.level_id)
    }
}

pub fn level_rank(level_id: &str) -> i64 {
    match level_id {
        "attention" => 1,
        "warning" => 2,
        "strong" => 3,
        _ => 0,
    }
}
