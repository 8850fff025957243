use crate::db::Database;
use crate::error::{Result, WellcastError};
use crate::models::{
    Category, DailyLog, SignalEvent, SuggestionSnapshot, User, WeatherRegion, WeatherSnapshot,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Row};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use tracing::warn;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn date_param(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

// Region and User Queries

impl Database {
    pub fn upsert_region(&self, region: &WeatherRegion) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO weather_regions (id, name, latitude, longitude)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude
                "#,
                params![region.id, region.name, region.latitude, region.longitude],
            )?;
            Ok(())
        })
    }

    pub fn list_regions(&self) -> Result<Vec<WeatherRegion>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM weather_regions ORDER BY id")?;
            let regions = stmt
                .query_map([], row_to_region)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(regions)
        })
    }

    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO users (id, name, region_id, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    region_id = excluded.region_id,
                    updated_at = excluded.updated_at
                "#,
                params![user.id, user.name, user.region_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT * FROM users WHERE id = ?1", [id], row_to_user)
                .optional()
                .map_err(Into::into)
        })
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM users ORDER BY id")?;
            let users = stmt
                .query_map([], row_to_user)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
    }

    pub fn set_user_topics(&self, user_id: i64, topics: &BTreeSet<String>) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM user_concern_topics WHERE user_id = ?1",
                [user_id],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO user_concern_topics (user_id, topic_key) VALUES (?1, ?2)",
                )?;
                for topic in topics {
                    stmt.execute(params![user_id, topic])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_user_topics(&self, user_id: i64) -> Result<BTreeSet<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT topic_key FROM user_concern_topics WHERE user_id = ?1")?;
            let topics = stmt
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<BTreeSet<_>>>()?;
            Ok(topics)
        })
    }
}

fn row_to_region(row: &Row) -> rusqlite::Result<WeatherRegion> {
    Ok(WeatherRegion {
        id: row.get("id")?,
        name: row.get("name")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
    })
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        name: row.get("name")?,
        region_id: row.get("region_id")?,
    })
}

// Daily Log Queries

impl Database {
    pub fn upsert_daily_log(&self, log: &DailyLog) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO daily_logs
                    (user_id, log_date, sleep_hours, mood, fatigue, wellbeing_score, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(user_id, log_date) DO UPDATE SET
                    sleep_hours = excluded.sleep_hours,
                    mood = excluded.mood,
                    fatigue = excluded.fatigue,
                    wellbeing_score = excluded.wellbeing_score,
                    updated_at = excluded.updated_at
                "#,
                params![
                    log.user_id,
                    date_param(log.date),
                    log.sleep_hours,
                    log.mood,
                    log.fatigue,
                    log.wellbeing_score,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_daily_log(&self, user_id: i64, date: NaiveDate) -> Result<Option<DailyLog>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM daily_logs WHERE user_id = ?1 AND log_date = ?2",
                params![user_id, date_param(date)],
                row_to_daily_log,
            )
            .optional()
            .map_err(Into::into)
        })
    }
}

fn row_to_daily_log(row: &Row) -> rusqlite::Result<DailyLog> {
    Ok(DailyLog {
        user_id: row.get("user_id")?,
        date: date_column(row, "log_date")?,
        sleep_hours: row.get("sleep_hours")?,
        mood: row.get("mood")?,
        fatigue: row.get("fatigue")?,
        wellbeing_score: row.get("wellbeing_score")?,
    })
}

// Signal Event Queries

impl Database {
    pub fn find_signal_event(
        &self,
        user_id: i64,
        trigger_key: &str,
        date: NaiveDate,
    ) -> Result<Option<SignalEvent>> {
        self.with_conn(|conn| {
            conn.query_row(
                r#"
                SELECT * FROM signal_events
                WHERE user_id = ?1 AND trigger_key = ?2 AND event_date = ?3
                "#,
                params![user_id, trigger_key, date_param(date)],
                row_to_signal_event,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Inserts a new event. A row already holding the same (user, trigger,
    /// day) surfaces as [`WellcastError::Conflict`].
    pub fn insert_signal_event(&self, event: &SignalEvent) -> Result<i64> {
        let metadata = serde_json::to_string(&event.metadata)?;
        self.with_conn(|conn| {
            let inserted = conn.execute(
                r#"
                INSERT INTO signal_events
                    (user_id, trigger_key, event_date, category, level_id, priority,
                     evaluated_at, metadata)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    event.user_id,
                    event.trigger_key,
                    date_param(event.date),
                    event.category.as_str(),
                    event.level_id,
                    event.priority,
                    event.evaluated_at.to_rfc3339(),
                    metadata,
                ],
            );

            match inserted {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(e) if is_constraint_violation(&e) => Err(WellcastError::Conflict(format!(
                    "signal event for user {} trigger '{}' on {} already exists",
                    event.user_id, event.trigger_key, event.date
                ))),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn update_signal_event(&self, event: &SignalEvent) -> Result<()> {
        let id = event
            .id
            .ok_or_else(|| WellcastError::InvalidData("Signal event has no ID".into()))?;
        let metadata = serde_json::to_string(&event.metadata)?;

        self.with_conn(|conn| {
            let updated = conn.execute(
                r#"
                UPDATE signal_events SET
                    category = ?1, level_id = ?2, priority = ?3,
                    evaluated_at = ?4, metadata = ?5
                WHERE id = ?6
                "#,
                params![
                    event.category.as_str(),
                    event.level_id,
                    event.priority,
                    event.evaluated_at.to_rfc3339(),
                    metadata,
                    id,
                ],
            )?;
            if updated == 0 {
                return Err(WellcastError::NotFound(format!("signal event {}", id)));
            }
            Ok(())
        })
    }

    pub fn signal_events_for(&self, user_id: i64, date: NaiveDate) -> Result<Vec<SignalEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT * FROM signal_events
                WHERE user_id = ?1 AND event_date = ?2
                ORDER BY priority DESC, trigger_key
                "#,
            )?;
            let events = stmt
                .query_map(params![user_id, date_param(date)], row_to_signal_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(events)
        })
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn row_to_signal_event(row: &Row) -> rusqlite::Result<SignalEvent> {
    let evaluated_at_str: String = row.get("evaluated_at")?;

    Ok(SignalEvent {
        id: Some(row.get("id")?),
        user_id: row.get("user_id")?,
        trigger_key: row.get("trigger_key")?,
        date: date_column(row, "event_date")?,
        category: category_column(row, "category")?,
        level_id: row.get("level_id")?,
        priority: row.get("priority")?,
        evaluated_at: DateTime::parse_from_rfc3339(&evaluated_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        metadata: json_column(row, "metadata")?,
    })
}

// Suggestion Snapshot Queries

impl Database {
    /// Replaces every snapshot row of one region and day in a single
    /// transaction, so readers see either the old set or the new one.
    pub fn replace_suggestion_snapshots(
        &self,
        date: NaiveDate,
        region_id: &str,
        rows: &[SuggestionSnapshot],
    ) -> Result<usize> {
        if let Some(stray) = rows
            .iter()
            .find(|r| r.date != date || r.region_id != region_id)
        {
            return Err(WellcastError::InvalidData(format!(
                "snapshot row '{}' belongs to {}/{}, not {}/{}",
                stray.rule_key, stray.region_id, stray.date, region_id, date
            )));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM suggestion_snapshots WHERE snapshot_date = ?1 AND region_id = ?2",
                params![date_param(date), region_id],
            )?;
            {
                let mut stmt = tx.prepare(
                    r#"
                    INSERT INTO suggestion_snapshots
                        (snapshot_date, region_id, rank, rule_key, title, message, tags,
                         severity, category, level, group_key, concerns, triggers, context)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                    "#,
                )?;
                for row in rows {
                    stmt.execute(params![
                        date_param(row.date),
                        row.region_id,
                        row.rank,
                        row.rule_key,
                        row.title,
                        row.message,
                        serde_json::to_string(&row.tags)?,
                        row.severity,
                        row.category.as_str(),
                        row.level,
                        row.group,
                        serde_json::to_string(&row.concerns)?,
                        serde_json::to_string(&row.triggers)?,
                        serde_json::to_string(&row.context)?,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(rows.len())
        })
    }

    pub fn suggestion_snapshots_for(
        &self,
        date: NaiveDate,
        region_id: &str,
    ) -> Result<Vec<SuggestionSnapshot>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT * FROM suggestion_snapshots
                WHERE snapshot_date = ?1 AND region_id = ?2
                ORDER BY rank
                "#,
            )?;
            let rows = stmt
                .query_map(params![date_param(date), region_id], row_to_suggestion_snapshot)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

fn row_to_suggestion_snapshot(row: &Row) -> rusqlite::Result<SuggestionSnapshot> {
    Ok(SuggestionSnapshot {
        date: date_column(row, "snapshot_date")?,
        region_id: row.get("region_id")?,
        rank: row.get("rank")?,
        rule_key: row.get("rule_key")?,
        title: row.get("title")?,
        message: row.get("message")?,
        tags: json_column(row, "tags")?,
        severity: row.get("severity")?,
        category: category_column(row, "category")?,
        level: row.get("level")?,
        group: row.get("group_key")?,
        concerns: json_column(row, "concerns")?,
        triggers: json_column(row, "triggers")?,
        context: json_column(row, "context")?,
    })
}

// Weather Snapshot Queries

impl Database {
    pub fn upsert_weather_snapshot(&self, snapshot: &WeatherSnapshot) -> Result<()> {
        let metrics = serde_json::to_string(&snapshot.metrics)?;
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO weather_snapshots
                    (region_id, snapshot_date, metrics, source, fetched_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(region_id, snapshot_date) DO UPDATE SET
                    metrics = excluded.metrics,
                    source = excluded.source,
                    fetched_at = excluded.fetched_at
                "#,
                params![
                    snapshot.region_id,
                    date_param(snapshot.date),
                    metrics,
                    snapshot.source,
                    snapshot.fetched_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_weather_snapshot(
        &self,
        region_id: &str,
        date: NaiveDate,
    ) -> Result<Option<WeatherSnapshot>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM weather_snapshots WHERE region_id = ?1 AND snapshot_date = ?2",
                params![region_id, date_param(date)],
                row_to_weather_snapshot,
            )
            .optional()
            .map_err(Into::into)
        })
    }
}

fn row_to_weather_snapshot(row: &Row) -> rusqlite::Result<WeatherSnapshot> {
    let fetched_at_str: String = row.get("fetched_at")?;

    Ok(WeatherSnapshot {
        region_id: row.get("region_id")?,
        date: date_column(row, "snapshot_date")?,
        metrics: json_column(row, "metrics")?,
        source: row.get("source")?,
        fetched_at: DateTime::parse_from_rfc3339(&fetched_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

// Column helpers

fn conversion_error(
    row: &Row,
    column: &str,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    let idx = row.as_ref().column_index(column).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn date_column(row: &Row, column: &str) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(column)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(row, column, e))
}

fn json_column<T: DeserializeOwned>(row: &Row, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(row, column, e))
}

fn category_column(row: &Row, column: &str) -> rusqlite::Result<Category> {
    let raw: String = row.get(column)?;
    Ok(raw.parse().unwrap_or_else(|_| {
        warn!(category = %raw, "Unknown category in database, defaulting to env");
        Category::Env
    }))
}

trait OptionalExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
