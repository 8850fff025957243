use crate::db::Database;
use crate::error::{Result, WellcastError};
use crate::models::{
    Category, SignalEvent, SignalMetadata, Trigger, TriggerSet, User,
};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalSweepReport {
    pub users: usize,
    pub events: usize,
    pub failed: usize,
}

/// Matches users' daily observations against trigger thresholds and records
/// at most one event per user, trigger and day.
pub struct SignalEvaluationService {
    db: Database,
    triggers: Arc<TriggerSet>,
}

impl SignalEvaluationService {
    pub fn new(db: Database, triggers: Arc<TriggerSet>) -> Self {
        Self { db, triggers }
    }

    pub fn triggers(&self) -> &TriggerSet {
        &self.triggers
    }

    /// The value `trigger` watches for this user and day, if it was recorded.
    pub fn observe(&self, user: &User, trigger: &Trigger, date: NaiveDate) -> Result<Option<f64>> {
        let metric = trigger.rule.metric.as_str();
        match trigger.category {
            Category::Env => {
                let Some(region_id) = user.region_id.as_deref() else {
                    return Ok(None);
                };
                Ok(self
                    .db
                    .get_weather_snapshot(region_id, date)?
                    .and_then(|snapshot| snapshot.metric(metric)))
            }
            Category::Body => Ok(self
                .db
                .get_daily_log(user.id, date)?
                .and_then(|log| log.metric(metric))),
        }
    }

    #[allow(dead_code)]
    pub fn evaluate_trigger(&self, user: &User, trigger: &Trigger) -> Result<Option<SignalEvent>> {
        self.evaluate_trigger_on(user, trigger, Utc::now().date_naive())
    }

    /// Evaluate one trigger for one user and day, writing or refreshing the
    /// day's event when a level matches.
    pub fn evaluate_trigger_on(
        &self,
        user: &User,
        trigger: &Trigger,
        date: NaiveDate,
    ) -> Result<Option<SignalEvent>> {
        if !trigger.active {
            return Ok(None);
        }

        let Some(observed) = self.observe(user, trigger, date)? else {
            debug!(user = user.id, trigger = %trigger.key, %date, "No observation");
            return Ok(None);
        };

        let Some(level) = trigger.match_level(observed) else {
            return Ok(None);
        };

        let mut event = SignalEvent {
            id: None,
            user_id: user.id,
            trigger_key: trigger.key.clone(),
            date,
            category: trigger.category,
            level_id: level.id.clone(),
            priority: level.priority,
            evaluated_at: Utc::now(),
            metadata: SignalMetadata {
                observed,
                threshold: level.threshold,
                metric: trigger.rule.metric.clone(),
                operator: trigger.rule.operator,
                trigger_version: trigger.version,
            },
        };

        if let Err(e) = self.save(&mut event) {
            // Conflicts mean another writer recorded this day's event first
            warn!(user = user.id, trigger = %trigger.key, %date, "Signal not recorded: {}", e);
            return Ok(None);
        }

        Ok(Some(event))
    }

    /// Refresh the day's event in place, or insert it when there is none yet.
    fn save(&self, event: &mut SignalEvent) -> Result<()> {
        match self
            .db
            .find_signal_event(event.user_id, &event.trigger_key, event.date)?
        {
            Some(existing) => {
                event.id = existing.id;
                self.db.update_signal_event(event)
            }
            None => {
                event.id = Some(self.db.insert_signal_event(event)?);
                Ok(())
            }
        }
    }

    /// Evaluate every active trigger for one user and day.
    pub fn evaluate(&self, user_id: i64, date: NaiveDate) -> Result<Vec<SignalEvent>> {
        let user = self
            .db
            .get_user(user_id)?
            .ok_or_else(|| WellcastError::NotFound(format!("user {}", user_id)))?;

        let mut events = Vec::new();
        for trigger in self.triggers.active() {
            if let Some(event) = self.evaluate_trigger_on(&user, trigger, date)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Evaluate every user. Per-user failures are logged and counted.
    pub fn evaluate_all(&self, date: NaiveDate) -> Result<SignalSweepReport> {
        let users = self.db.list_users()?;
        let mut report = SignalSweepReport {
            users: users.len(),
            ..Default::default()
        };

        for user in users {
            match self.evaluate(user.id, date) {
                Ok(events) => report.events += events.len(),
                Err(e) => {
                    warn!(user = user.id, %date, "Signal evaluation failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            %date,
            users = report.users,
            events = report.events,
            failed = report.failed,
            "Signal sweep finished"
        );
        Ok(report)
    }
}
