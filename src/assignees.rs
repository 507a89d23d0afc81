//! Assignee name resolution.
//!
//! Maps free-form assignee text from the extraction model ("Ivan and Maria",
//! "Иван и/или Петр") onto tracker member ids. The lookup map merges the
//! remote member list with config-provided overrides; an alias map handles
//! nicknames.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

fn split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)[;,/&]|\b(?:и|and)\b").expect("assignee split regex"))
}

fn combined_conjunction_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:и\s*/\s*или|and\s*/\s*or)\b").expect("combined conjunction regex")
    })
}

/// Trim, lowercase and collapse internal whitespace
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize keys of a config-provided assignee map.
///
/// Values may be a single id or a list; non-numeric entries are dropped.
pub fn prepare_assignee_map(
    raw: &HashMap<String, serde_json::Value>,
) -> HashMap<String, Vec<i64>> {
    let mut prepared = HashMap::new();

    for (key, value) in raw {
        let normalized = normalize_name(key);
        if normalized.is_empty() {
            continue;
        }

        let values: Vec<&serde_json::Value> = match value {
            serde_json::Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let ids: Vec<i64> = values.into_iter().filter_map(value_to_id).collect();
        if !ids.is_empty() {
            prepared.insert(normalized, ids);
        }
    }

    prepared
}

fn value_to_id(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalize both sides of the nickname -> canonical name map
pub fn prepare_alias_map(raw: &HashMap<String, String>) -> HashMap<String, String> {
    raw.iter()
        .filter_map(|(alias, canonical)| {
            let alias = normalize_name(alias);
            let canonical = normalize_name(canonical);
            (!alias.is_empty() && !canonical.is_empty()).then_some((alias, canonical))
        })
        .collect()
}

/// Resolve free-form assignee text to member ids.
///
/// The whole string is tried first, then parts split on separators and
/// conjunctions. Results keep first-seen order without duplicates.
pub fn resolve_assignee_ids(
    assignee: &str,
    assignee_map: &HashMap<String, Vec<i64>>,
    alias_map: &HashMap<String, String>,
) -> Vec<i64> {
    if assignee.trim().is_empty() || assignee_map.is_empty() {
        return Vec::new();
    }

    // "and/or" would otherwise split into a dangling "or"/"или" token
    let normalized_text = combined_conjunction_re().replace_all(assignee, " и ");

    let mut candidates: Vec<String> = vec![assignee.to_string()];
    candidates.extend(
        split_re()
            .split(&normalized_text)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
    );

    let mut resolved = Vec::new();
    for candidate in candidates {
        let normalized = normalize_name(&candidate);
        if normalized.is_empty() {
            continue;
        }

        let lookup_key = alias_map.get(&normalized).unwrap_or(&normalized);
        let Some(ids) = assignee_map.get(lookup_key) else {
            continue;
        };

        for id in ids {
            if !resolved.contains(id) {
                resolved.push(*id);
            }
        }
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(entries: &[(&str, &[i64])]) -> HashMap<String, Vec<i64>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    #[test]
    fn test_normalize_name_collapses_whitespace() {
        assert_eq!(normalize_name("  Ivan   Petrov "), "ivan petrov");
        assert_eq!(normalize_name("МАРИЯ"), "мария");
    }

    #[test]
    fn test_prepare_assignee_map_filters_garbage() {
        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(
            r#"{
                "  Иван  ": "101",
                "Мария": ["202", null, "abc", 303],
                "": 505
            }"#,
        )
        .unwrap();

        let prepared = prepare_assignee_map(&raw);

        assert_eq!(prepared["иван"], vec![101]);
        assert_eq!(prepared["мария"], vec![202, 303]);
        assert!(!prepared.contains_key(""));
    }

    #[test]
    fn test_resolve_handles_conjunctions() {
        let map = map_of(&[("иван", &[1]), ("мария", &[2]), ("петр", &[3])]);
        let aliases = HashMap::new();

        assert_eq!(resolve_assignee_ids("Иван и Мария", &map, &aliases), vec![1, 2]);
        assert_eq!(resolve_assignee_ids("Мария, Петр", &map, &aliases), vec![2, 3]);
        assert_eq!(resolve_assignee_ids("Иван и/или Петр", &map, &aliases), vec![1, 3]);
        assert_eq!(resolve_assignee_ids("Иван & Мария", &map, &aliases), vec![1, 2]);
    }

    #[test]
    fn test_resolve_english_conjunctions() {
        let map = map_of(&[("ivan", &[1]), ("maria", &[2])]);
        let aliases = HashMap::new();

        assert_eq!(resolve_assignee_ids("Ivan and Maria", &map, &aliases), vec![1, 2]);
        assert_eq!(resolve_assignee_ids("Ivan and/or Maria", &map, &aliases), vec![1, 2]);
    }

    #[test]
    fn test_resolve_through_aliases() {
        let map = map_of(&[("иван", &[1]), ("мария", &[2])]);
        let raw_aliases: HashMap<String, String> = [
            ("Ваня".to_string(), "Иван".to_string()),
            ("Маша".to_string(), "Мария".to_string()),
        ]
        .into_iter()
        .collect();
        let aliases = prepare_alias_map(&raw_aliases);

        assert_eq!(resolve_assignee_ids("Ваня и Маша", &map, &aliases), vec![1, 2]);
    }

    #[test]
    fn test_resolve_unknown_names_yield_nothing() {
        let map = map_of(&[("ivan", &[1])]);
        assert!(resolve_assignee_ids("Nobody", &map, &HashMap::new()).is_empty());
        assert!(resolve_assignee_ids("", &map, &HashMap::new()).is_empty());
    }

    #[test]
    fn test_resolve_deduplicates_preserving_order() {
        let map = map_of(&[("ivan", &[1, 2]), ("maria", &[2, 3])]);
        assert_eq!(
            resolve_assignee_ids("Ivan, Maria", &map, &HashMap::new()),
            vec![1, 2, 3]
        );
    }
}
