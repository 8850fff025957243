use super::context;
use super::rules::{selector, Diversity, RulesEngine};
use crate::db::Database;
use crate::error::{Result, WellcastError};
use crate::models::{Category, Suggestion, SuggestionSnapshot, WeatherSnapshot};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Suggestions shown to a user for one day.
pub const FINAL_LIMIT: usize = 3;

/// Produces a user's ranked suggestions for a day from their region's
/// environmental rules and their own body rules.
pub struct SuggestionEngine {
    db: Database,
    engine: Arc<RulesEngine>,
    env_limit: usize,
}

impl SuggestionEngine {
    pub fn new(db: Database, engine: Arc<RulesEngine>, env_limit: usize) -> Self {
        Self { db, engine, env_limit }
    }

    pub fn run(&self, user_id: i64, date: NaiveDate) -> Result<Vec<Suggestion>> {
        let user = self
            .db
            .get_user(user_id)?
            .ok_or_else(|| WellcastError::NotFound(format!("user {}", user_id)))?;
        let log = self.db.get_daily_log(user_id, date)?.ok_or_else(|| {
            WellcastError::NotFound(format!("daily log for user {} on {}", user_id, date))
        })?;
        let topics = self.db.get_user_topics(user_id)?;

        let weather = match user.region_id.as_deref() {
            Some(region_id) => self.db.get_weather_snapshot(region_id, date)?,
            None => None,
        };

        let mut candidates = match user.region_id.as_deref() {
            Some(region_id) => self.env_suggestions(region_id, date, &topics, weather.as_ref())?,
            None => Vec::new(),
        };

        let signals = self.db.signal_events_for(user_id, date)?;
        let personal = context::personal(&log, weather.as_ref(), &signals);
        candidates.extend(self.engine.evaluate(Category::Body, &personal, Some(&topics))?);

        Ok(selector::select(candidates, FINAL_LIMIT, Diversity::ByGroupOrTags))
    }

    /// Precomputed rows when the region has them for `date`, otherwise a live
    /// run of env rules against the region's stored weather.
    fn env_suggestions(
        &self,
        region_id: &str,
        date: NaiveDate,
        topics: &BTreeSet<String>,
        weather: Option<&WeatherSnapshot>,
    ) -> Result<Vec<Suggestion>> {
        let rows = self.db.suggestion_snapshots_for(date, region_id)?;
        if !rows.is_empty() {
            debug!(region = %region_id, %date, rows = rows.len(), "Using precomputed env suggestions");
            return Ok(rows
                .into_iter()
                .map(SuggestionSnapshot::into_suggestion)
                .filter(|s| s.is_eligible_for(topics))
                .collect());
        }

        let Some(weather) = weather else {
            return Ok(Vec::new());
        };

        let ctx = context::environmental(Some(weather));
        self.engine
            .run_category(Category::Env, &ctx, Some(topics), self.env_limit, Diversity::Off)
    }
}
