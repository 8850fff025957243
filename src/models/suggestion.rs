use super::rule::{topics_allow, Category};
use crate::logic::expression::{Context, Value};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionSource {
    /// Evaluated just now against a live context.
    Live,
    /// Read back from a precomputed region/day snapshot.
    Snapshot,
}

/// A matched rule, ready for ranking and display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub key: String,
    pub title: String,
    pub message: String,
    pub tags: BTreeSet<String>,
    pub severity: i64,
    pub category: Category,
    pub level: Option<String>,
    pub group: Option<String>,
    pub concerns: BTreeSet<String>,
    /// Context values referenced by the rule's condition.
    pub triggers: BTreeMap<String, Value>,
    pub source: SuggestionSource,
}

impl Suggestion {
    pub fn new(
        key: impl Into<String>,
        category: Category,
        severity: i64,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            message: message.into(),
            tags: BTreeSet::new(),
            severity,
            category,
            level: None,
            group: None,
            concerns: BTreeSet::new(),
            triggers: BTreeMap::new(),
            source: SuggestionSource::Live,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_concerns<I, S>(mut self, concerns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.concerns.extend(concerns.into_iter().map(Into::into));
        self
    }

    pub fn with_trigger(mut self, name: impl Into<String>, value: Value) -> Self {
        self.triggers.insert(name.into(), value);
        self
    }

    pub fn is_eligible_for(&self, topics: &BTreeSet<String>) -> bool {
        topics_allow(&self.concerns, &self.tags, topics)
    }
}

/// A precomputed environment-only suggestion for one region and day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionSnapshot {
    pub date: NaiveDate,
    pub region_id: String,
    /// Position in the region's ranked list, starting at 0.
    pub rank: i64,
    pub rule_key: String,
    pub title: String,
    pub message: String,
    pub tags: BTreeSet<String>,
    pub severity: i64,
    pub category: Category,
    pub level: Option<String>,
    pub group: Option<String>,
    pub concerns: BTreeSet<String>,
    pub triggers: BTreeMap<String, Value>,
    /// Full metric context the rules were evaluated against.
    pub context: Context,
}

impl SuggestionSnapshot {
    pub fn from_suggestion(
        date: NaiveDate,
        region_id: &str,
        rank: usize,
        suggestion: &Suggestion,
        context: &Context,
    ) -> Self {
        Self {
            date,
            region_id: region_id.to_string(),
            rank: rank as i64,
            rule_key: suggestion.key.clone(),
            title: suggestion.title.clone(),
            message: suggestion.message.clone(),
            tags: suggestion.tags.clone(),
            severity: suggestion.severity,
            category: suggestion.category,
            level: suggestion.level.clone(),
            group: suggestion.group.clone(),
            concerns: suggestion.concerns.clone(),
            triggers: suggestion.triggers.clone(),
            context: context.clone(),
        }
    }

    pub fn into_suggestion(self) -> Suggestion {
        Suggestion {
            key: self.rule_key,
            title: self.title,
            message: self.message,
            tags: self.tags,
            severity: self.severity,
            category: self.category,
            level: self.level,
            group: self.group,
            concerns: self.concerns,
            triggers: self.triggers,
            source: SuggestionSource::Snapshot,
        }
    }
}
