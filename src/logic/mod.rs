pub mod context;
pub mod data_sync;
pub mod expression;
pub mod rules;
pub mod signals;
pub mod snapshots;
pub mod suggestions;
pub mod weather_cache;

pub use data_sync::DataSyncService;
pub use rules::{RuleRegistry, RulesEngine};
pub use signals::SignalEvaluationService;
pub use snapshots::SnapshotBuilder;
pub use suggestions::SuggestionEngine;
pub use weather_cache::WeatherSnapshotCache;
