//! Assembly of the flat name → value maps rule conditions run against.
//!
//! A personal context covers one user on one day: their logged body metrics,
//! the weather of their region and four flags per well-known trigger telling
//! whether it fired today. An environmental context covers one region on one
//! day and holds weather metrics only.

use crate::logic::expression::{Context, Value};
use crate::models::{body_metrics, metrics, DailyLog, SignalEvent, WeatherSnapshot};

/// Triggers whose flags are always present in a personal context, so rules
/// can reference them without tripping the missing-variable check.
pub const WELL_KNOWN_TRIGGERS: [&str; 7] = [
    "pressure_drop",
    "temp_drop",
    "heat",
    "humidity_high",
    "sleep_short",
    "fatigue_high",
    "mood_low",
];

pub fn signal_key(trigger_key: &str, suffix: &str) -> String {
    format!("signal_{}_{}", trigger_key, suffix)
}

/// Weather metrics of one region/day. Known metrics the snapshot lacks are
/// set to 0.0; anything extra the snapshot carries is passed through.
pub fn environmental(snapshot: Option<&WeatherSnapshot>) -> Context {
    let mut ctx = Context::new();
    for name in metrics::ALL {
        ctx.insert(name.to_string(), Value::Number(0.0));
    }
    if let Some(snapshot) = snapshot {
        for (name, value) in &snapshot.metrics {
            ctx.insert(name.clone(), Value::Number(*value));
        }
    }
    ctx
}

/// Context for one user and day. `weather` is the snapshot of the user's
/// region; without one no environmental keys are added. `signals` are the
/// user's signal events for the same day.
pub fn personal(log: &DailyLog, weather: Option<&WeatherSnapshot>, signals: &[SignalEvent]) -> Context {
    let mut ctx = match weather {
        Some(snapshot) => environmental(Some(snapshot)),
        None => Context::new(),
    };

    for name in body_metrics::ALL {
        let value = log.metric(name).unwrap_or(0.0);
        ctx.insert(name.to_string(), Value::Number(value));
    }

    for key in WELL_KNOWN_TRIGGERS {
        insert_signal(&mut ctx, key, false, 0, 0, 0);
    }
    for event in signals {
        insert_signal(
            &mut ctx,
            &event.trigger_key,
            true,
            event.level_rank(),
            event.priority,
            event.category.code(),
        );
    }

    ctx
}

fn insert_signal(ctx: &mut Context, key: &str, today: bool, level: i64, priority: i64, category: i64) {
    ctx.insert(signal_key(key, "today"), Value::Bool(today));
    ctx.insert(signal_key(key, "level"), Value::from(level));
    ctx.insert(signal_key(key, "priority"), Value::from(priority));
    ctx.insert(signal_key(key, "category"), Value::from(category));
}
