use crate::db::Database;
use crate::error::Result;

const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE IF NOT EXISTS weather_regions (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL
    );

    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        region_id TEXT,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS daily_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        log_date TEXT NOT NULL,
        sleep_hours REAL,
        mood REAL,
        fatigue REAL,
        wellbeing_score REAL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(user_id, log_date)
    );

    CREATE TABLE IF NOT EXISTS user_concern_topics (
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        topic_key TEXT NOT NULL,
        PRIMARY KEY (user_id, topic_key)
    );

    CREATE TABLE IF NOT EXISTS signal_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        trigger_key TEXT NOT NULL,
        event_date TEXT NOT NULL,
        category TEXT NOT NULL,
        level_id TEXT NOT NULL,
        priority INTEGER NOT NULL,
        evaluated_at TEXT NOT NULL,
        metadata TEXT NOT NULL,
        UNIQUE(user_id, trigger_key, event_date)
    );

    CREATE TABLE IF NOT EXISTS suggestion_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_date TEXT NOT NULL,
        region_id TEXT NOT NULL,
        rank INTEGER NOT NULL,
        rule_key TEXT NOT NULL,
        title TEXT NOT NULL,
        message TEXT NOT NULL,
        tags TEXT NOT NULL,
        severity INTEGER NOT NULL,
        category TEXT NOT NULL,
        level TEXT,
        group_key TEXT,
        concerns TEXT NOT NULL,
        triggers TEXT NOT NULL,
        context TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(snapshot_date, region_id, rule_key)
    );

    CREATE TABLE IF NOT EXISTS weather_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        region_id TEXT NOT NULL,
        snapshot_date TEXT NOT NULL,
        metrics TEXT NOT NULL,
        source TEXT NOT NULL,
        fetched_at TEXT NOT NULL,
        UNIQUE(region_id, snapshot_date)
    );

    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    "#,
    // Migration 2: Add indexes
    r#"
    CREATE INDEX IF NOT EXISTS idx_users_region_id
        ON users(region_id);
    CREATE INDEX IF NOT EXISTS idx_signal_events_user_date
        ON signal_events(user_id, event_date);
    CREATE INDEX IF NOT EXISTS idx_suggestion_snapshots_date_region
        ON suggestion_snapshots(snapshot_date, region_id);
    "#,
];

pub fn run(db: &Database) -> Result<()> {
    db.with_conn_mut(|conn| {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (i, migration) in MIGRATIONS.iter().enumerate() {
            let version = (i + 1) as i32;
            if version > current_version {
                tracing::info!("Applying migration {}", version);
                let tx = conn.transaction()?;
                tx.execute_batch(migration)?;
                tx.execute(
                    "INSERT INTO schema_migrations (version) VALUES (?1)",
                    [version],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    })
}
