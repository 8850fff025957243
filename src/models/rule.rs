use crate::error::{Result, WellcastError};
use crate::logic::expression::{self, CompiledExpr};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Topic every user is implicitly registered for.
pub const GENERAL_TOPIC: &str = "general";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Env,
    Body,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Env => "env",
            Category::Body => "body",
        }
    }

    /// Numeric code used in evaluation contexts.
    pub fn code(&self) -> i64 {
        match self {
            Category::Env => 1,
            Category::Body => 2,
        }
    }
}

impl std::str::FromStr for Category {
    type Err = WellcastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "env" => Ok(Category::Env),
            "body" => Ok(Category::Body),
            other => Err(WellcastError::InvalidData(format!("unknown category '{}'", other))),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether something with the given concerns and tags may be shown to a user
/// registered for `topics`.
pub fn topics_allow(
    concerns: &BTreeSet<String>,
    tags: &BTreeSet<String>,
    topics: &BTreeSet<String>,
) -> bool {
    if concerns.is_empty() || concerns.contains(GENERAL_TOPIC) || tags.contains(GENERAL_TOPIC) {
        return true;
    }
    !concerns.is_disjoint(topics)
}

/// A compiled suggestion rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub key: String,
    pub title: String,
    pub message: String,
    pub tags: BTreeSet<String>,
    pub severity: i64,
    pub category: Category,
    pub level: Option<String>,
    pub group: Option<String>,
    pub concerns: BTreeSet<String>,
    pub condition: CompiledExpr,
    pub enabled: bool,
}

impl Rule {
    pub fn is_eligible_for(&self, topics: &BTreeSet<String>) -> bool {
        topics_allow(&self.concerns, &self.tags, topics)
    }
}

/// Top-level rules document as written in `rules.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

fn default_version() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

/// One rule as written by hand, before coercion and compilation.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDefinition {
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub tags: StringList,
    pub severity: SeverityValue,
    pub category: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub concerns: StringList,
    pub condition: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Accepts either `tags: pressure` or `tags: [pressure, headache]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
pub enum StringList {
    #[default]
    Empty,
    One(String),
    Many(Vec<String>),
}

impl StringList {
    pub fn into_set(self) -> BTreeSet<String> {
        let items = match self {
            StringList::Empty => Vec::new(),
            StringList::One(s) => s.split(',').map(str::to_string).collect(),
            StringList::Many(v) => v,
        };
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Severity as written: `80`, `80.0` or `"80"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SeverityValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl SeverityValue {
    pub fn to_int(&self) -> Option<i64> {
        match self {
            SeverityValue::Int(n) => Some(*n),
            SeverityValue::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            SeverityValue::Float(_) => None,
            SeverityValue::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            }
        }
    }
}

impl RuleDefinition {
    pub fn compile(self) -> Result<Rule> {
        let severity = self.severity.to_int().ok_or_else(|| {
            WellcastError::InvalidData(format!(
                "rule '{}' has a non-numeric severity: {:?}",
                self.key, self.severity
            ))
        })?;

        let category = self.category.parse::<Category>().map_err(|_| {
            WellcastError::InvalidData(format!(
                "rule '{}' has unknown category '{}'",
                self.key, self.category
            ))
        })?;

        let condition =
            expression::compile(&self.condition).map_err(|source| WellcastError::Compile {
                key: self.key.clone(),
                source,
            })?;

        Ok(Rule {
            key: self.key,
            title: self.title,
            message: self.message,
            tags: self.tags.into_set(),
            severity,
            category,
            level: self.level.filter(|l| !l.trim().is_empty()),
            group: self.group.filter(|g| !g.trim().is_empty()),
            concerns: self.concerns.into_set(),
            condition,
            enabled: self.enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn severity_coercion() {
        assert_eq!(SeverityValue::Int(80).to_int(), Some(80));
        assert_eq!(SeverityValue::Float(72.9).to_int(), Some(72));
        assert_eq!(SeverityValue::Text(" 65 ".into()).to_int(), Some(65));
        assert_eq!(SeverityValue::Text("55.5".into()).to_int(), Some(55));
        assert_eq!(SeverityValue::Text("high".into()).to_int(), None);
    }

    #[test]
    fn string_lists_accept_scalars_and_sequences() {
        let one: StringList = serde_yaml::from_str("pressure").unwrap();
        assert_eq!(one.into_set(), set(&["pressure"]));

        let many: StringList = serde_yaml::from_str("[pressure, ' headache ', '']").unwrap();
        assert_eq!(many.into_set(), set(&["headache", "pressure"]));

        let csv: StringList = serde_yaml::from_str("\"heat, sleep\"").unwrap();
        assert_eq!(csv.into_set(), set(&["heat", "sleep"]));
    }

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!(" ENV ".parse::<Category>().unwrap(), Category::Env);
        assert_eq!("body".parse::<Category>().unwrap(), Category::Body);
        assert!("mind".parse::<Category>().is_err());
    }

    #[test]
    fn topic_eligibility() {
        let none = BTreeSet::new();
        let heat = set(&["heatstroke"]);

        // No concerns: always eligible
        assert!(topics_allow(&none, &none, &none));
        // Specific concern requires registration
        assert!(!topics_allow(&heat, &none, &none));
        assert!(!topics_allow(&heat, &none, &set(&["headache"])));
        assert!(topics_allow(&heat, &none, &set(&["headache", "heatstroke"])));
        // General is universal, whether listed as a concern or a tag
        assert!(topics_allow(&set(&["general"]), &none, &none));
        assert!(topics_allow(&heat, &set(&["general"]), &none));
    }

    #[test]
    fn definition_compiles_into_rule() {
        let yaml = r#"
key: heat_high
title: Heat
message: "It is {temperature_c}°C"
tags: [heat]
severity: "70"
category: ENV
group: heat
concerns: heatstroke
condition: "temperature_c >= 31 and temperature_c < 35"
"#;
        let def: RuleDefinition = serde_yaml::from_str(yaml).unwrap();
        let rule = def.compile().unwrap();
        assert_eq!(rule.severity, 70);
        assert_eq!(rule.category, Category::Env);
        assert_eq!(rule.group.as_deref(), Some("heat"));
        assert_eq!(rule.concerns, set(&["heatstroke"]));
        assert!(rule.enabled);
        assert_eq!(
            rule.condition.source(),
            "temperature_c >= 31 AND temperature_c < 35"
        );
    }

    #[test]
    fn definition_with_bad_condition_fails_to_compile() {
        let yaml = r#"
key: broken
title: Broken
severity: 10
category: body
condition: "sleep_hours <"
"#;
        let def: RuleDefinition = serde_yaml::from_str(yaml).unwrap();
        match def.compile() {
            Err(WellcastError::Compile { key, .. }) => assert_eq!(key, "broken"),
            other => panic!("expected compile error, got {:?}", other.map(|r| r.key)),
        }
    }
}
