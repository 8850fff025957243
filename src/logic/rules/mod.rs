pub mod engine;
pub mod registry;
pub mod selector;

pub use engine::RulesEngine;
pub use registry::RuleRegistry;
pub use selector::Diversity;
