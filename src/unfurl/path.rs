//! Path expressions such as `body.items[].variants[].sku`
//!
//! A path is parsed once into a sequence of steps. Resolving it against a
//! document forks at every `[]`, so one path can yield many values, each
//! tagged with the array indices taken to reach it.
//!
//! Row expansion does not call [`PathExpression::resolve`] per field. The
//! axis plan splits every source path at its `[]` markers once, and the
//! expander walks each array a single time, reading the key-only pieces
//! with [`follow_keys`]. `resolve` is the general lookup for one path at a
//! time; its index trails match the order in which the expander emits rows.

use crate::error::ConfigError;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// One step of a path expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    /// Descend into a map entry
    Key(String),
    /// Explode the current list, one branch per element
    Iterate,
}

/// A parsed, immutable path expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathExpression {
    steps: Vec<Step>,
}

/// A value reached by resolving a path, with the array indices along the way
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<'a> {
    pub value: &'a Value,
    pub trail: Vec<usize>,
}

impl PathExpression {
    /// Parse a dotted/bracketed expression
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPath {
            path: source.to_string(),
            reason: reason.to_string(),
        };

        if source.trim().is_empty() {
            return Err(invalid("path is empty"));
        }

        let mut steps = Vec::new();
        for segment in source.split('.') {
            let name_end = segment.find('[').unwrap_or(segment.len());
            let (name, mut brackets) = segment.split_at(name_end);

            if name.contains(']') {
                return Err(invalid("unbalanced ']'"));
            }
            if name.is_empty() && brackets.is_empty() {
                return Err(invalid("empty segment"));
            }
            if !name.is_empty() {
                steps.push(Step::Key(name.to_string()));
            }

            while !brackets.is_empty() {
                if let Some(rest) = brackets.strip_prefix("[]") {
                    steps.push(Step::Iterate);
                    brackets = rest;
                } else if brackets.starts_with('[') {
                    return Err(invalid("only empty brackets '[]' are supported"));
                } else {
                    return Err(invalid("unexpected characters after ']'"));
                }
            }
        }

        Ok(PathExpression { steps })
    }

    /// Build a path directly from steps
    pub fn from_steps(steps: Vec<Step>) -> Self {
        PathExpression { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether any step explodes an array
    pub fn has_iterate(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, Step::Iterate))
    }

    /// Number of map-key steps (array markers do not add depth)
    pub fn key_depth(&self) -> usize {
        self.steps.iter().filter(|s| matches!(s, Step::Key(_))).count()
    }

    /// Positions of every `Iterate` step, in order
    pub fn iterate_positions(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Step::Iterate))
            .map(|(i, _)| i)
            .collect()
    }

    /// Resolve against a document, in document array order
    pub fn resolve<'a>(&self, doc: &'a Value) -> Vec<Resolved<'a>> {
        resolve_steps(doc, &self.steps)
    }

    /// First match, if any
    pub fn resolve_first<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.resolve(doc).into_iter().next().map(|r| r.value)
    }
}

/// Resolve a slice of steps starting at `node`
pub fn resolve_steps<'a>(node: &'a Value, steps: &[Step]) -> Vec<Resolved<'a>> {
    let mut out = Vec::new();
    walk(node, steps, &mut Vec::new(), &mut out);
    out
}

/// Follow key steps only; `None` as soon as a key is missing or an array is met
pub fn follow_keys<'a>(node: &'a Value, steps: &[Step]) -> Option<&'a Value> {
    let mut current = node;
    for step in steps {
        match step {
            Step::Key(name) => current = current.as_object()?.get(name)?,
            Step::Iterate => return None,
        }
    }
    Some(current)
}

fn walk<'a>(node: &'a Value, steps: &[Step], trail: &mut Vec<usize>, out: &mut Vec<Resolved<'a>>) {
    let Some((step, rest)) = steps.split_first() else {
        out.push(Resolved {
            value: node,
            trail: trail.clone(),
        });
        return;
    };

    match step {
        Step::Key(name) => {
            if let Some(child) = node.as_object().and_then(|m| m.get(name)) {
                walk(child, rest, trail, out);
            }
        }
        Step::Iterate => {
            if let Value::Array(items) = node {
                for (idx, item) in items.iter().enumerate() {
                    trail.push(idx);
                    walk(item, rest, trail, out);
                    trail.pop();
                }
            }
        }
    }
}

impl FromStr for PathExpression {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathExpression::parse(s)
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for step in &self.steps {
            match step {
                Step::Key(name) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                Step::Iterate => f.write_str("[]")?,
            }
            first = false;
        }
        Ok(())
    }
}

impl Serialize for PathExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
