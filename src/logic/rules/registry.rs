use crate::error::{Result, WellcastError};
use crate::models::{Category, Rule, RuleDocument};
use arc_swap::ArcSwapOption;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Where rule definitions are read from.
#[derive(Debug, Clone)]
pub enum RuleSource {
    File(PathBuf),
    Inline(String),
}

impl RuleSource {
    fn read(&self) -> Result<String> {
        match self {
            RuleSource::File(path) => std::fs::read_to_string(path).map_err(|e| {
                WellcastError::Config(format!("Failed to read rules {:?}: {}", path, e))
            }),
            RuleSource::Inline(yaml) => Ok(yaml.clone()),
        }
    }
}

/// One fully compiled, immutable version of the rule definitions.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub version: u32,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let document: RuleDocument = serde_yaml::from_str(yaml)?;

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(document.rules.len());
        for definition in document.rules {
            if !seen.insert(definition.key.clone()) {
                return Err(WellcastError::InvalidData(format!(
                    "duplicate rule key '{}'",
                    definition.key
                )));
            }
            rules.push(definition.compile()?);
        }

        Ok(Self {
            version: document.version,
            rules,
        })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn by_category(&self, category: Category) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|r| r.category == category)
            .collect()
    }

    #[allow(dead_code)]
    pub fn get(&self, key: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.key == key)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Loads rule definitions once and hands out the same compiled set until
/// [`reload`](Self::reload) is called. Readers hold an `Arc` to the set they
/// started with, so a reload never changes rules under an evaluation in flight.
pub struct RuleRegistry {
    source: RuleSource,
    current: ArcSwapOption<RuleSet>,
}

impl RuleRegistry {
    pub fn new(source: RuleSource) -> Self {
        Self {
            source,
            current: ArcSwapOption::empty(),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(RuleSource::File(path.into()))
    }

    #[allow(dead_code)]
    pub fn from_yaml(yaml: impl Into<String>) -> Self {
        Self::new(RuleSource::Inline(yaml.into()))
    }

    /// Read and compile the source without touching the cache.
    pub fn load(&self) -> Result<RuleSet> {
        RuleSet::from_yaml_str(&self.source.read()?)
    }

    pub fn all(&self) -> Result<Arc<RuleSet>> {
        if let Some(set) = self.current.load_full() {
            return Ok(set);
        }

        let fresh = Arc::new(self.load()?);
        info!(
            version = fresh.version,
            rules = fresh.len(),
            "Rule set loaded"
        );

        // First writer wins when several readers race to fill an empty cache
        self.current
            .rcu(|cur| cur.clone().or_else(|| Some(Arc::clone(&fresh))));
        Ok(self.current.load_full().unwrap_or(fresh))
    }

    /// Drop the cached set; the next [`all`](Self::all) reloads from source.
    #[allow(dead_code)]
    pub fn reload(&self) {
        self.current.store(None);
    }

    /// Compile the source and install it only if it compiles. On failure the
    /// currently installed set stays active.
    pub fn refresh(&self) -> Result<Arc<RuleSet>> {
        let fresh = Arc::new(self.load()?);
        self.current.store(Some(Arc::clone(&fresh)));
        info!(
            version = fresh.version,
            rules = fresh.len(),
            "Rule set refreshed"
        );
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RULES: &str = r#"
version: 4
rules:
  - key: pressure_drop_strong
    title: Sharp pressure drop
    message: "Pressure fell {pressure_delta_24h} hPa in 24h"
    tags: [pressure, headache]
    severity: 80
    category: env
    group: pressure
    concerns: [headache]
    condition: "pressure_delta_24h <= -6"
  - key: short_sleep
    title: Short sleep
    message: "You slept {sleep_hours} hours"
    tags: sleep
    severity: 60
    category: body
    condition: "sleep_hours > 0 && sleep_hours < 6"
"#;

    #[test]
    fn loads_and_splits_by_category() {
        let registry = RuleRegistry::from_yaml(RULES);
        let set = registry.all().unwrap();
        assert_eq!(set.version, 4);
        assert_eq!(set.len(), 2);
        assert_eq!(set.by_category(Category::Env).len(), 1);
        assert_eq!(set.by_category(Category::Body)[0].key, "short_sleep");
        assert!(set.get("pressure_drop_strong").is_some());
    }

    #[test]
    fn all_returns_same_set_until_reload() {
        let registry = RuleRegistry::from_yaml(RULES);
        let first = registry.all().unwrap();
        let second = registry.all().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        registry.reload();
        let third = registry.all().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        // The old set is still intact for whoever holds it
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn reload_picks_up_file_changes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RULES.as_bytes()).unwrap();
        let registry = RuleRegistry::from_path(file.path());
        assert_eq!(registry.all().unwrap().len(), 2);

        std::fs::write(
            file.path(),
            "version: 5\nrules:\n  - { key: only, title: Only, severity: 1, category: body, condition: 'TRUE' }\n",
        )
        .unwrap();
        // Cached until reload
        assert_eq!(registry.all().unwrap().len(), 2);
        registry.reload();
        let set = registry.all().unwrap();
        assert_eq!(set.version, 5);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn uncompilable_rule_blocks_the_whole_set() {
        let broken = r#"
rules:
  - { key: ok, title: Ok, severity: 1, category: env, condition: "temperature_c > 30" }
  - { key: bad, title: Bad, severity: 1, category: env, condition: "temperature_c >" }
"#;
        let registry = RuleRegistry::from_yaml(broken);
        match registry.all() {
            Err(WellcastError::Compile { key, .. }) => assert_eq!(key, "bad"),
            other => panic!("expected compile error, got {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn failed_refresh_keeps_current_set() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RULES.as_bytes()).unwrap();
        let registry = RuleRegistry::from_path(file.path());
        let before = registry.all().unwrap();

        std::fs::write(file.path(), "rules:\n  - { key: x, title: X, severity: 1, category: env, condition: '(' }\n").unwrap();
        assert!(registry.refresh().is_err());
        assert!(Arc::ptr_eq(&before, &registry.all().unwrap()));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let dup = r#"
rules:
  - { key: same, title: A, severity: 1, category: env, condition: "TRUE" }
  - { key: same, title: B, severity: 2, category: env, condition: "TRUE" }
"#;
        assert!(RuleRegistry::from_yaml(dup).load().is_err());
    }
}
