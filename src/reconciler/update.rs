//! Path-addressed edits over decoded YAML trees.
//!
//! A path is a sequence of segments:
//! - a plain string descends into a mapping by key,
//! - `"*"` fans out over every element of a sequence,
//! - `"k=v"` picks the first mapping element of a sequence whose `k` is the
//!   string `v`.
//!
//! Comparison in `k=v` is string-literal: a numeric node never matches, even
//! when it prints the same.
use serde_yaml::Value;

/// Walks `path` down from `node` and invokes `f` on every node the exhausted
/// path lands on. Returns whether any leaf was reached. A type mismatch along
/// the way (for example a scalar where the path expects a mapping) stops that
/// branch without mutating anything.
pub fn find<F>(node: &mut Value, path: &[&str], f: &mut F) -> bool
where
    F: FnMut(&mut Value),
{
    let Some((segment, rest)) = path.split_first() else {
        f(node);
        return true;
    };

    match node {
        Value::Sequence(elements) => {
            if *segment == "*" {
                let mut any = false;
                for element in elements.iter_mut() {
                    any |= find(element, rest, f);
                }
                any
            } else if let Some((key, want)) = segment.split_once('=') {
                let want = Value::String(want.to_owned());
                elements
                    .iter_mut()
                    .find(|element| element.is_mapping() && element.get(key) == Some(&want))
                    .is_some_and(|element| find(element, rest, f))
            } else {
                false
            }
        }
        Value::Mapping(_) => match node.get_mut(*segment) {
            Some(child) => find(child, rest, f),
            None => false,
        },
        _ => false,
    }
}

/// Assigns `node[key] = value` when `node` is a mapping; no-op otherwise.
pub fn set(node: &mut Value, key: &str, value: Value) {
    if let Value::Mapping(mapping) = node {
        mapping.insert(Value::String(key.to_owned()), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn reweights_matching_clusters() {
        let mut doc = parse(
            "resources:
             - virtual_hosts:
               - routes:
                 - route:
                     weighted_clusters:
                       clusters:
                       - name: foo
                         weight: 10
                       - name: bar
                         weight: 90
            ",
        );

        let found = find(
            &mut doc,
            &[
                "resources",
                "*",
                "virtual_hosts",
                "*",
                "routes",
                "*",
                "route",
                "weighted_clusters",
                "clusters",
            ],
            &mut |clusters| {
                find(clusters, &["name=foo"], &mut |cluster| {
                    set(cluster, "weight", Value::Number(80.into()));
                });
                find(clusters, &["name=bar"], &mut |cluster| {
                    set(cluster, "weight", Value::Number(20.into()));
                });
            },
        );

        assert!(found);
        let clusters = &doc["resources"][0]["virtual_hosts"][0]["routes"][0]["route"]
            ["weighted_clusters"]["clusters"];
        assert_eq!(clusters[0]["weight"], Value::Number(80.into()));
        assert_eq!(clusters[1]["weight"], Value::Number(20.into()));
    }

    #[test]
    fn reports_when_no_leaf_matches() {
        let mut doc = parse("routes:\n- name: a\n");
        let mut called = false;
        let found = find(&mut doc, &["routes", "name=b"], &mut |_| called = true);
        assert!(!found);
        assert!(!called);
    }

    #[test]
    fn wildcard_visits_every_element() {
        let mut doc = parse("items:\n- {}\n- {}\n- {}\n");
        let mut visits = 0;
        let found = find(&mut doc, &["items", "*"], &mut |node| {
            visits += 1;
            set(node, "seen", Value::Bool(true));
        });
        assert!(found);
        assert_eq!(visits, 3);
        assert_eq!(doc["items"][2]["seen"], Value::Bool(true));
    }

    #[test]
    fn wildcard_reports_partial_matches() {
        let mut doc = parse("items:\n- inner: {}\n- 3\n");
        let found = find(&mut doc, &["items", "*", "inner"], &mut |_| {});
        assert!(found);
    }

    #[test]
    fn selector_compares_strings_literally() {
        // A numeric node never equals a string literal, even when it prints
        // the same.
        let mut doc = parse("items:\n- name: 10\n");
        let found = find(&mut doc, &["items", "name=10"], &mut |_| {});
        assert!(!found);
    }

    #[test]
    fn selector_picks_the_first_match() {
        let mut doc = parse("items:\n- name: a\n  rank: 1\n- name: a\n  rank: 2\n");
        find(&mut doc, &["items", "name=a"], &mut |node| {
            set(node, "picked", Value::Bool(true));
        });
        assert_eq!(doc["items"][0]["picked"], Value::Bool(true));
        assert_eq!(doc["items"][1]["picked"], Value::Null);
    }

    #[test]
    fn mismatched_types_yield_false() {
        let mut doc = parse("leaf: 42\n");
        assert!(!find(&mut doc, &["leaf", "deeper"], &mut |_| {}));
        assert!(!find(&mut doc, &["leaf", "*"], &mut |_| {}));
        assert!(!find(&mut doc, &["missing"], &mut |_| {}));
    }

    #[test]
    fn set_ignores_non_mappings() {
        let mut doc = parse("- 1\n- 2\n");
        set(&mut doc, "key", Value::Bool(true));
        assert_eq!(doc, parse("- 1\n- 2\n"));
    }
}
