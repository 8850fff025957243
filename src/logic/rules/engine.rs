use super::registry::{RuleRegistry, RuleSet};
use super::selector::{self, Diversity};
use crate::error::Result;
use crate::logic::expression::{self, Context};
use crate::models::{Category, Rule, Suggestion};
use regex_lite::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

/// Evaluates rules from a registry against a context and ranks the matches.
pub struct RulesEngine {
    registry: Arc<RuleRegistry>,
}

impl RulesEngine {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self { registry }
    }

    pub fn rules(&self) -> Result<Arc<RuleSet>> {
        self.registry.all()
    }

    /// Every matching rule of `category`, unranked, filtered by topic
    /// registration when `topics` is given.
    pub fn evaluate(
        &self,
        category: Category,
        ctx: &Context,
        topics: Option<&BTreeSet<String>>,
    ) -> Result<Vec<Suggestion>> {
        let set = self.rules()?;
        Ok(eligible(&set, category, topics)
            .filter_map(|rule| evaluate_rule(rule, ctx))
            .collect())
    }

    pub fn run_category(
        &self,
        category: Category,
        ctx: &Context,
        topics: Option<&BTreeSet<String>>,
        limit: usize,
        diversity: Diversity,
    ) -> Result<Vec<Suggestion>> {
        let set = self.rules()?;
        Ok(Self::run(eligible(&set, category, topics), ctx, limit, diversity))
    }

    /// Evaluate `rules` against `ctx` and return the ranked top `limit`.
    pub fn run<'a, I>(rules: I, ctx: &Context, limit: usize, diversity: Diversity) -> Vec<Suggestion>
    where
        I: IntoIterator<Item = &'a Rule>,
    {
        let matches = rules
            .into_iter()
            .filter_map(|rule| evaluate_rule(rule, ctx))
            .collect();
        selector::select(matches, limit, diversity)
    }
}

fn eligible<'a>(
    set: &'a RuleSet,
    category: Category,
    topics: Option<&'a BTreeSet<String>>,
) -> impl Iterator<Item = &'a Rule> + 'a {
    set.by_category(category)
        .into_iter()
        .filter(move |rule| topics.map_or(true, |t| rule.is_eligible_for(t)))
}

/// Turn one rule into a suggestion if it is enabled and its condition holds.
pub fn evaluate_rule(rule: &Rule, ctx: &Context) -> Option<Suggestion> {
    if !rule.enabled || !rule.condition.evaluate(ctx) {
        return None;
    }

    let mut suggestion = Suggestion::new(
        rule.key.clone(),
        rule.category,
        rule.severity,
        rule.title.clone(),
        interpolate(&rule.message, ctx),
    )
    .with_tags(rule.tags.iter().cloned())
    .with_concerns(rule.concerns.iter().cloned());

    if let Some(group) = &rule.group {
        suggestion = suggestion.with_group(group.clone());
    }
    if let Some(level) = &rule.level {
        suggestion = suggestion.with_level(level.clone());
    }

    for name in expression::identifiers(rule.condition.source()) {
        if let Some(value) = ctx.get(&name) {
            suggestion = suggestion.with_trigger(name, value.clone());
        }
    }

    Some(suggestion)
}

/// Replace `{name}` placeholders with context values. Placeholders that do
/// not name a context key are left as written.
pub fn interpolate(template: &str, ctx: &Context) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    });

    re.replace_all(template, |caps: &Captures| match ctx.get(&caps[1]) {
        Some(value) => value.to_string(),
        None => caps[0].to_string(),
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::expression::Value;

    const RULES: &str = r#"
version: 1
rules:
  - key: pressure_drop_strong
    title: Sharp pressure drop
    message: "Pressure fell {pressure_delta_24h} hPa since yesterday"
    tags: [pressure, headache]
    severity: 80
    category: env
    group: pressure
    level: strong
    condition: "pressure_delta_24h <= -6"
  - key: pressure_drop_mild
    title: Pressure dropping
    message: "Pressure is down {pressure_delta_24h} hPa"
    tags: [pressure]
    severity: 75
    category: env
    group: pressure
    condition: "pressure_delta_24h <= -3"
  - key: heat_high
    title: Hot day
    message: "It is {temperature_c}°C with {unknown_key}"
    tags: [heat]
    severity: 70
    category: env
    concerns: [heatstroke]
    condition: "temperature_c >= 31 and temperature_c < 35"
  - key: disabled
    title: Disabled
    severity: 99
    category: env
    enabled: false
    condition: "TRUE"
  - key: short_sleep
    title: Short sleep
    message: "Only {sleep_hours}h of sleep, pressure flag {signal_pressure_drop_today}"
    tags: [sleep]
    severity: 60
    category: body
    group: sleep
    condition: "sleep_hours < 6 && signal_pressure_drop_today == TRUE"
"#;

    fn ctx(pairs: &[(&str, Value)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn engine() -> RulesEngine {
        RulesEngine::new(Arc::new(RuleRegistry::from_yaml(RULES)))
    }

    #[test]
    fn interpolates_known_placeholders_only() {
        let c = ctx(&[
            ("temperature_c", Value::Number(32.0)),
            ("pressure_delta_24h", Value::Number(-6.84)),
            ("flag", Value::Bool(true)),
        ]);
        assert_eq!(interpolate("It is {temperature_c}°C", &c), "It is 32°C");
        assert_eq!(interpolate("Down {pressure_delta_24h}", &c), "Down -6.8");
        assert_eq!(interpolate("{flag} {missing}", &c), "true {missing}");
        assert_eq!(interpolate("no placeholders", &c), "no placeholders");
    }

    #[test]
    fn env_run_ranks_and_suppresses_groups() {
        let c = ctx(&[
            ("pressure_delta_24h", Value::Number(-7.0)),
            ("temperature_c", Value::Number(32.0)),
        ]);
        let engine = engine();

        let ranked = engine
            .run_category(Category::Env, &c, None, 3, Diversity::ByGroup)
            .unwrap();
        let keys: Vec<_> = ranked.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["pressure_drop_strong", "heat_high"]);

        let top = &ranked[0];
        assert_eq!(top.message, "Pressure fell -7 hPa since yesterday");
        assert_eq!(top.level.as_deref(), Some("strong"));
        assert_eq!(top.triggers.get("pressure_delta_24h"), Some(&Value::Number(-7.0)));
        assert_eq!(top.triggers.len(), 1);

        assert_eq!(ranked[1].message, "It is 32°C with {unknown_key}");
    }

    #[test]
    fn disabled_rules_never_match() {
        let c = ctx(&[]);
        let all = engine().evaluate(Category::Env, &c, None).unwrap();
        assert!(all.iter().all(|s| s.key != "disabled"));
    }

    #[test]
    fn topic_filter_applies_to_concerns() {
        let c = ctx(&[("temperature_c", Value::Number(32.0))]);
        let engine = engine();

        let none: BTreeSet<String> = BTreeSet::new();
        let without = engine.evaluate(Category::Env, &c, Some(&none)).unwrap();
        assert!(without.is_empty());

        let heat: BTreeSet<String> = ["heatstroke".to_string()].into_iter().collect();
        let with = engine.evaluate(Category::Env, &c, Some(&heat)).unwrap();
        assert_eq!(with.len(), 1);
    }

    #[test]
    fn body_rule_sees_signal_flags() {
        let c = ctx(&[
            ("sleep_hours", Value::Number(5.5)),
            ("signal_pressure_drop_today", Value::Bool(true)),
        ]);
        let set = engine().rules().unwrap();
        let out = RulesEngine::run(set.by_category(Category::Body), &c, 3, Diversity::Off);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message, "Only 5.5h of sleep, pressure flag true");
        assert_eq!(out[0].triggers.len(), 2);
    }

    #[test]
    fn missing_variable_means_no_match() {
        let c = ctx(&[("sleep_hours", Value::Number(4.0))]);
        let set = engine().rules().unwrap();
        assert!(RulesEngine::run(set.rules(), &c, 10, Diversity::Off)
            .iter()
            .all(|s| s.key != "short_sleep"));
    }
}
