//! Top-N selection by severity with optional diversity suppression.
//!
//! Without suppression a single theme (five pressure rules, say) can crowd
//! every other suggestion out of a short list. With it, each group contributes
//! at most one pick.

use crate::models::Suggestion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diversity {
    /// Plain top-N by severity.
    Off,
    /// At most one pick per group. Ungrouped candidates are never suppressed.
    ByGroup,
    /// Grouped candidates are checked by group; ungrouped candidates are
    /// suppressed when their tags overlap any earlier pick.
    ByGroupOrTags,
}

pub fn select(mut candidates: Vec<Suggestion>, limit: usize, diversity: Diversity) -> Vec<Suggestion> {
    // Stable: equal severities keep input order
    candidates.sort_by(|a, b| b.severity.cmp(&a.severity));

    if diversity == Diversity::Off {
        candidates.truncate(limit);
        return candidates;
    }

    let mut picked: Vec<Suggestion> = Vec::with_capacity(limit.min(candidates.len()));
    for candidate in candidates {
        if picked.len() >= limit {
            break;
        }
        if !picked.is_empty() && is_redundant(&candidate, &picked, diversity) {
            continue;
        }
        picked.push(candidate);
    }
    picked
}

fn is_redundant(candidate: &Suggestion, picked: &[Suggestion], diversity: Diversity) -> bool {
    match (&candidate.group, diversity) {
        (Some(group), _) => picked.iter().any(|p| p.group.as_ref() == Some(group)),
        (None, Diversity::ByGroupOrTags) => picked
            .iter()
            .any(|p| !p.tags.is_disjoint(&candidate.tags)),
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn candidate(key: &str, severity: i64, group: Option<&str>) -> Suggestion {
        let s = Suggestion::new(key, Category::Env, severity, key, "");
        match group {
            Some(g) => s.with_group(g),
            None => s,
        }
    }

    fn keys(selected: &[Suggestion]) -> Vec<&str> {
        selected.iter().map(|s| s.key.as_str()).collect()
    }

    fn sample() -> Vec<Suggestion> {
        vec![
            candidate("p80", 80, Some("pressure")),
            candidate("p75", 75, Some("pressure")),
            candidate("s60", 60, Some("sleep")),
        ]
    }

    #[test]
    fn diversity_suppresses_repeated_groups() {
        let selected = select(sample(), 3, Diversity::ByGroup);
        assert_eq!(keys(&selected), vec!["p80", "s60"]);
    }

    #[test]
    fn without_diversity_takes_top_n() {
        let selected = select(sample(), 2, Diversity::Off);
        assert_eq!(keys(&selected), vec!["p80", "p75"]);
    }

    #[test]
    fn sorts_by_severity_and_keeps_ties_in_input_order() {
        let input = vec![
            candidate("low", 10, None),
            candidate("tie_a", 50, None),
            candidate("high", 90, None),
            candidate("tie_b", 50, None),
        ];
        let selected = select(input, 10, Diversity::Off);
        assert_eq!(keys(&selected), vec!["high", "tie_a", "tie_b", "low"]);
    }

    #[test]
    fn first_pick_is_never_suppressed() {
        let input = vec![
            candidate("a", 30, Some("pressure")),
            candidate("b", 20, Some("pressure")),
        ];
        assert_eq!(keys(&select(input, 3, Diversity::ByGroup)), vec!["a"]);
        assert!(select(sample(), 0, Diversity::ByGroup).is_empty());
    }

    #[test]
    fn ungrouped_candidates_fall_back_to_tag_overlap() {
        let input = vec![
            candidate("heat", 70, None).with_tags(["heat", "hydration"]),
            candidate("drink", 65, None).with_tags(["hydration"]),
            candidate("sleep", 60, None).with_tags(["sleep"]),
            candidate("pressure", 55, Some("pressure")).with_tags(["heat"]),
        ];

        let by_tags = select(input.clone(), 3, Diversity::ByGroupOrTags);
        assert_eq!(keys(&by_tags), vec!["heat", "sleep", "pressure"]);

        let by_group = select(input, 3, Diversity::ByGroup);
        assert_eq!(keys(&by_group), vec!["heat", "drink", "sleep"]);
    }

    #[test]
    fn stops_at_limit() {
        let input = (0..10)
            .map(|i| candidate(&format!("r{}", i), 100 - i, Some(&format!("g{}", i))))
            .collect();
        assert_eq!(select(input, 3, Diversity::ByGroup).len(), 3);
    }
}
