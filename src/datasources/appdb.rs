use crate::config::AppDbConfig;
use crate::error::{Result, WellcastError};
use crate::models::{DailyLog, User, WeatherRegion};
use chrono::NaiveDate;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

/// Read-only access to the application's PostgreSQL database.
pub struct AppDbClient {
    pool: PgPool,
}

impl AppDbClient {
    pub async fn connect(config: &AppDbConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&config.connection_string())
            .await
            .map_err(|e| WellcastError::DataSourceUnavailable(format!("App PostgreSQL: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn fetch_regions(&self) -> Result<Vec<WeatherRegion>> {
        let rows = sqlx::query(
            r#"
            SELECT code::text AS id, name, latitude::float8 AS latitude, longitude::float8 AS longitude
            FROM prefectures
            ORDER BY code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<WeatherRegion> {
                Ok(WeatherRegion {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    latitude: row.try_get("latitude")?,
                    longitude: row.try_get("longitude")?,
                })
            })
            .collect()
    }

    pub async fn fetch_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(
            r#"
            SELECT id::bigint AS id, COALESCE(display_name, '') AS name, prefecture_code::text AS region_id
            FROM users
            WHERE deleted_at IS NULL
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<User> {
                Ok(User {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    region_id: row.try_get("region_id")?,
                })
            })
            .collect()
    }

    /// Daily logs dated on or after `since`.
    pub async fn fetch_daily_logs(&self, since: NaiveDate) -> Result<Vec<DailyLog>> {
        let rows = sqlx::query(
            r#"
            SELECT
                user_id::bigint AS user_id,
                log_date,
                sleep_hours::float8 AS sleep_hours,
                mood::float8 AS mood,
                fatigue::float8 AS fatigue,
                wellbeing_score::float8 AS wellbeing_score
            FROM daily_logs
            WHERE log_date >= $1
            ORDER BY log_date, user_id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_daily_log).collect()
    }

    /// (user id, topic key) registrations.
    pub async fn fetch_user_topics(&self) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id::bigint AS user_id, topic_key
            FROM user_concern_topics
            ORDER BY user_id, topic_key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(i64, String)> {
                Ok((row.try_get("user_id")?, row.try_get("topic_key")?))
            })
            .collect()
    }

    pub async fn test_connection(&self) -> Result<bool> {
        let result = sqlx::query("SELECT 1").fetch_one(&self.pool).await;
        Ok(result.is_ok())
    }
}

fn row_to_daily_log(row: &PgRow) -> Result<DailyLog> {
    Ok(DailyLog {
        user_id: row.try_get("user_id")?,
        date: row.try_get("log_date")?,
        sleep_hours: row.try_get("sleep_hours")?,
        mood: row.try_get("mood")?,
        fatigue: row.try_get("fatigue")?,
        wellbeing_score: row.try_get("wellbeing_score")?,
    })
}
