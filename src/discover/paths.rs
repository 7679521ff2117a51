//! Leaf-path extraction
//!
//! Paths use the same notation as field sources: `header.action`,
//! `body.items[].sku`, `tags[]`. Arrays collapse to a single `[]` marker
//! unless indices are requested.

use crate::unfurl::path::{follow_keys, PathExpression};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// The set of leaf paths present in one document
pub type PathSet = BTreeSet<String>;

/// Walks documents and records the leaf paths they contain
#[derive(Debug, Clone, Copy, Default)]
pub struct PathExtractor {
    /// Write `items[0].sku` instead of `items[].sku`
    pub include_array_indices: bool,
}

impl PathExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_array_indices(include_array_indices: bool) -> Self {
        PathExtractor { include_array_indices }
    }

    pub fn extract(&self, doc: &Value) -> PathSet {
        let mut paths = PathSet::new();
        self.walk(doc, "", &mut paths);
        paths
    }

    fn walk(&self, node: &Value, current: &str, paths: &mut PathSet) {
        match node {
            Value::Object(map) => {
                for (key, value) in map {
                    let path = join(current, key);
                    match value {
                        Value::Object(_) | Value::Array(_) => self.walk(value, &path, paths),
                        _ => {
                            paths.insert(path);
                        }
                    }
                }
            }
            Value::Array(items) => {
                let has_compound = items.iter().any(|i| i.is_object() || i.is_array());
                if items.is_empty() || !has_compound {
                    paths.insert(format!("{}[]", current));
                    return;
                }

                for (idx, item) in items.iter().enumerate() {
                    match item {
                        Value::Object(_) | Value::Array(_) => {
                            let path = if self.include_array_indices {
                                format!("{}[{}]", current, idx)
                            } else {
                                format!("{}[]", current)
                            };
                            self.walk(item, &path, paths);
                        }
                        _ => {
                            paths.insert(format!("{}[]", current));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Leaf paths with every scalar observed at each, in document order.
    ///
    /// Keys that cannot be written as a path (empty, or containing `.`, `[`
    /// or `]`) are skipped along with everything beneath them.
    pub fn extract_with_values(&self, doc: &Value) -> BTreeMap<String, Vec<Value>> {
        let mut values = BTreeMap::new();
        walk_values(doc, "", &mut values);
        values
    }

    /// Value at a key-only path; `None` when the path is missing or crosses an array
    pub fn value_at_path<'a>(&self, doc: &'a Value, path: &PathExpression) -> Option<&'a Value> {
        follow_keys(doc, path.steps())
    }
}

fn join(current: &str, key: &str) -> String {
    if current.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", current, key)
    }
}

fn addressable(key: &str) -> bool {
    !key.is_empty() && !key.contains(['.', '[', ']'])
}

fn walk_values(node: &Value, current: &str, values: &mut BTreeMap<String, Vec<Value>>) {
    match node {
        Value::Object(map) => {
            for (key, value) in map {
                if !addressable(key) {
                    debug!(parent = %current, key = %key, "Skipping key that cannot be addressed by a path");
                    continue;
                }
                let path = join(current, key);
                match value {
                    Value::Object(_) | Value::Array(_) => walk_values(value, &path, values),
                    _ => values.entry(path).or_default().push(value.clone()),
                }
            }
        }
        Value::Array(items) => {
            let path = format!("{}[]", current);
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => walk_values(item, &path, values),
                    _ => values.entry(path.clone()).or_default().push(item.clone()),
                }
            }
        }
        _ => {}
    }
}

/// Occurrence counts of leaf paths over a group of documents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSummary {
    counts: BTreeMap<String, usize>,
    documents: usize,
}

impl PathSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sets<'a>(sets: impl IntoIterator<Item = &'a PathSet>) -> Self {
        let mut summary = PathSummary::new();
        for set in sets {
            summary.add(set);
        }
        summary
    }

    /// Count one document's paths
    pub fn add(&mut self, paths: &PathSet) {
        self.documents += 1;
        for path in paths {
            *self.counts.entry(path.clone()).or_insert(0) += 1;
        }
    }

    pub fn documents(&self) -> usize {
        self.documents
    }

    pub fn count(&self, path: &str) -> usize {
        self.counts.get(path).copied().unwrap_or(0)
    }

    /// Fraction of documents containing `path`
    pub fn frequency(&self, path: &str) -> f64 {
        if self.documents == 0 {
            return 0.0;
        }
        self.count(path) as f64 / self.documents as f64
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(p, c)| (p.as_str(), *c))
    }

    /// Paths seen in at least one document
    pub fn paths(&self) -> PathSet {
        self.counts.keys().cloned().collect()
    }

    /// Paths seen in every document
    pub fn common_paths(&self) -> PathSet {
        self.counts
            .iter()
            .filter(|(_, c)| **c == self.documents)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.documents == 0
    }
}
