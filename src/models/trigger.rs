use super::rule::Category;
use crate::error::{Result, WellcastError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Lte,
    Gte,
    Lt,
    Gt,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Lte => "lte",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Gt => "gt",
        }
    }

    pub fn holds(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Operator::Lte => observed <= threshold,
            Operator::Gte => observed >= threshold,
            Operator::Lt => observed < threshold,
            Operator::Gt => observed > threshold,
        }
    }

    /// Orders thresholds so the harder-to-reach one comes first: the lower
    /// value for `lte`/`lt`, the higher value for `gte`/`gt`.
    pub fn stricter_first(&self, a: f64, b: f64) -> Ordering {
        let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        match self {
            Operator::Lte | Operator::Lt => ord,
            Operator::Gte | Operator::Gt => ord.reverse(),
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityLevel {
    pub id: String,
    pub threshold: f64,
    pub priority: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub metric: String,
    pub operator: Operator,
    pub levels: Vec<SeverityLevel>,
}

fn default_active() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

/// Threshold definition that produces at most one signal per user per day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub key: String,
    pub category: Category,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_version")]
    pub version: u32,
    pub rule: TriggerRule,
}

impl Trigger {
    /// Levels in matching order: priority descending, then the stricter
    /// threshold, then declaration order.
    pub fn ranked_levels(&self) -> Vec<&SeverityLevel> {
        let op = self.rule.operator;
        let mut levels: Vec<&SeverityLevel> = self.rule.levels.iter().collect();
        levels.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| op.stricter_first(a.threshold, b.threshold))
        });
        levels
    }

    /// The highest-ranked level whose threshold holds for `observed`.
    pub fn match_level(&self, observed: f64) -> Option<&SeverityLevel> {
        if !observed.is_finite() {
            return None;
        }
        self.ranked_levels()
            .into_iter()
            .find(|level| self.rule.operator.holds(observed, level.threshold))
    }

    fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(WellcastError::InvalidData("trigger with empty key".into()));
        }
        if self.rule.metric.trim().is_empty() {
            return Err(WellcastError::InvalidData(format!(
                "trigger '{}' has no metric",
                self.key
            )));
        }
        if self.rule.levels.is_empty() {
            return Err(WellcastError::InvalidData(format!(
                "trigger '{}' has no levels",
                self.key
            )));
        }

        let mut ids = HashSet::new();
        for level in &self.rule.levels {
            if !ids.insert(level.id.as_str()) {
                return Err(WellcastError::InvalidData(format!(
                    "trigger '{}' repeats level '{}'",
                    self.key, level.id
                )));
            }
            if !level.threshold.is_finite() {
                return Err(WellcastError::InvalidData(format!(
                    "trigger '{}' level '{}' has a non-finite threshold",
                    self.key, level.id
                )));
            }
        }
        Ok(())
    }
}

/// All trigger definitions from one `triggers.yaml` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerSet {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

impl TriggerSet {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let set: TriggerSet = serde_yaml::from_str(yaml)?;

        let mut keys = HashSet::new();
        for trigger in &set.triggers {
            trigger.validate()?;
            if !keys.insert(trigger.key.as_str()) {
                return Err(WellcastError::InvalidData(format!(
                    "duplicate trigger key '{}'",
                    trigger.key
                )));
            }
        }

        Ok(set)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            WellcastError::Config(format!("Failed to read triggers {:?}: {}", path, e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn active(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.iter().filter(|t| t.active)
    }

    pub fn get(&self, key: &str) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pressure_trigger(levels: Vec<SeverityLevel>) -> Trigger {
        Trigger {
            key: "pressure_drop".into(),
            category: Category::Env,
            active: true,
            version: 1,
            rule: TriggerRule {
                metric: "pressure_delta_24h".into(),
                operator: Operator::Lte,
                levels,
            },
        }
    }

    fn level(id: &str, threshold: f64, priority: i64) -> SeverityLevel {
        SeverityLevel {
            id: id.into(),
            threshold,
            priority,
        }
    }

    #[test]
    fn higher_priority_level_wins_when_both_hold() {
        let trigger = pressure_trigger(vec![
            level("attention", -3.0, 50),
            level("strong", -6.0, 80),
        ]);
        assert_eq!(trigger.match_level(-7.0).unwrap().id, "strong");
        assert_eq!(trigger.match_level(-4.0).unwrap().id, "attention");
        assert!(trigger.match_level(-1.0).is_none());
    }

    #[test]
    fn only_satisfied_levels_can_match() {
        let trigger = pressure_trigger(vec![
            level("strong", -8.0, 80),
            level("attention", -3.0, 50),
        ]);
        assert_eq!(trigger.match_level(-7.0).unwrap().id, "attention");

        let unreachable = pressure_trigger(vec![level("strong", -8.0, 80)]);
        assert!(unreachable.match_level(-7.0).is_none());
        assert!(unreachable.match_level(f64::NAN).is_none());
    }

    #[test]
    fn equal_priority_prefers_stricter_threshold() {
        let falling = pressure_trigger(vec![
            level("warning", -4.0, 60),
            level("strong", -6.0, 60),
        ]);
        assert_eq!(falling.match_level(-7.0).unwrap().id, "strong");
        assert_eq!(falling.match_level(-5.0).unwrap().id, "warning");

        let mut rising = falling.clone();
        rising.rule.operator = Operator::Gte;
        rising.rule.levels = vec![level("warning", 30.0, 60), level("strong", 35.0, 60)];
        assert_eq!(rising.match_level(36.0).unwrap().id, "strong");
        assert_eq!(rising.match_level(31.0).unwrap().id, "warning");
    }

    #[test]
    fn strict_operators_exclude_the_threshold() {
        let mut trigger = pressure_trigger(vec![level("attention", -3.0, 50)]);
        assert!(trigger.match_level(-3.0).is_some());
        trigger.rule.operator = Operator::Lt;
        assert!(trigger.match_level(-3.0).is_none());
        trigger.rule.operator = Operator::Gt;
        assert!(trigger.match_level(-2.5).is_some());
    }

    #[test]
    fn parses_and_validates_documents() {
        let yaml = r#"
version: 2
triggers:
  - key: pressure_drop
    category: env
    rule:
      metric: pressure_delta_24h
      operator: lte
      levels:
        - { id: attention, threshold: -3.0, priority: 50 }
        - { id: strong, threshold: -6.0, priority: 80 }
  - key: sleep_short
    category: body
    active: false
    version: 3
    rule:
      metric: sleep_hours
      operator: lt
      levels:
        - { id: warning, threshold: 5, priority: 60 }
"#;
        let set = TriggerSet::from_yaml_str(yaml).unwrap();
        assert_eq!(set.version, 2);
        assert_eq!(set.triggers.len(), 2);
        assert_eq!(set.active().count(), 1);
        assert_eq!(set.get("sleep_short").unwrap().version, 3);
        assert!(set.get("pressure_drop").unwrap().active);
    }

    #[test]
    fn rejects_invalid_documents() {
        let no_levels = r#"
triggers:
  - key: heat
    category: env
    rule: { metric: temperature_c, operator: gte, levels: [] }
"#;
        assert!(TriggerSet::from_yaml_str(no_levels).is_err());

        let duplicate = r#"
triggers:
  - key: heat
    category: env
    rule: { metric: temperature_c, operator: gte, levels: [{ id: a, threshold: 30, priority: 1 }] }
  - key: heat
    category: env
    rule: { metric: temperature_c, operator: gte, levels: [{ id: a, threshold: 30, priority: 1 }] }
"#;
        assert!(TriggerSet::from_yaml_str(duplicate).is_err());

        let bad_operator = r#"
triggers:
  - key: heat
    category: env
    rule: { metric: temperature_c, operator: between, levels: [{ id: a, threshold: 30, priority: 1 }] }
"#;
        assert!(TriggerSet::from_yaml_str(bad_operator).is_err());
    }
}
