//! Draft table configurations from a sample corpus
//!
//! Once a splitter is chosen, every group of documents gets a draft table
//! with one field per observed leaf path. Types are guessed from the JSON
//! values seen at each path, with string formats (ISO dates and
//! date-times) promoted to the matching temporal type.

use crate::discover::analyzer::group_key;
use crate::discover::paths::PathExtractor;
use crate::error::ConfigError;
use crate::unfurl::coerce::TypeTag;
use crate::unfurl::config::{FieldSpec, TableConfig, TableConfigs};
use crate::unfurl::path::{follow_keys, PathExpression, Step};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

static ISO_DATETIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$").unwrap()
});

static ISO_DATE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Recognized string formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StringFormat {
    Date,
    DateTime,
}

fn detect_format(value: &str) -> Option<StringFormat> {
    let len = value.len();

    // ISO date - fixed length
    if len == 10 && value.as_bytes()[4] == b'-' && value.as_bytes()[7] == b'-' && ISO_DATE_REGEX.is_match(value) {
        return Some(StringFormat::Date);
    }

    // DateTime - check the T separator before the regex
    if len >= 19 && value.as_bytes()[10] == b'T' && ISO_DATETIME_REGEX.is_match(value) {
        return Some(StringFormat::DateTime);
    }

    None
}

/// JSON kind of an observed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Compound,
}

impl JsonType {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => JsonType::Null,
            Value::Bool(_) => JsonType::Boolean,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    JsonType::Integer
                } else {
                    JsonType::Number
                }
            }
            Value::String(_) => JsonType::String,
            Value::Array(_) | Value::Object(_) => JsonType::Compound,
        }
    }
}

/// Format statistics over the strings seen at one path
#[derive(Debug, Default)]
struct StringStats {
    format_counts: HashMap<StringFormat, usize>,
    total_count: usize,
}

impl StringStats {
    fn add_string(&mut self, s: &str) {
        self.total_count += 1;
        if let Some(format) = detect_format(s) {
            *self.format_counts.entry(format).or_insert(0) += 1;
        }
    }

    /// Only a format shared by every string counts
    fn format(&self) -> Option<StringFormat> {
        if self.format_counts.len() != 1 {
            return None;
        }
        self.format_counts
            .iter()
            .next()
            .filter(|(_, count)| **count == self.total_count)
            .map(|(format, _)| *format)
    }
}

/// Accumulates the values seen at one leaf path and guesses its column type
#[derive(Debug, Default)]
pub struct TypeHintBuilder {
    type_counts: HashMap<JsonType, usize>,
    string_stats: StringStats,
    sample_count: usize,
}

impl TypeHintBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value(&mut self, value: &Value) {
        self.sample_count += 1;
        *self.type_counts.entry(JsonType::from_value(value)).or_insert(0) += 1;
        if let Value::String(s) = value {
            self.string_stats.add_string(s);
        }
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Nulls are ignored; anything mixed falls back to string
    pub fn build(&self) -> TypeTag {
        let seen: Vec<JsonType> = self
            .type_counts
            .keys()
            .copied()
            .filter(|t| *t != JsonType::Null)
            .collect();

        let only = |t: JsonType| seen.iter().all(|s| *s == t);
        let numeric = seen.iter().all(|t| matches!(t, JsonType::Integer | JsonType::Number));

        if seen.is_empty() {
            TypeTag::String
        } else if only(JsonType::Boolean) {
            TypeTag::Boolean
        } else if only(JsonType::Integer) {
            TypeTag::Integer
        } else if numeric {
            TypeTag::Float
        } else if only(JsonType::String) {
            match self.string_stats.format() {
                Some(StringFormat::Date) => TypeTag::Date,
                Some(StringFormat::DateTime) => TypeTag::Timestamp,
                None => TypeTag::String,
            }
        } else {
            TypeTag::String
        }
    }
}

/// One draft table per splitter value
pub fn draft_table_configs(docs: &[Value], splitter: &PathExpression) -> Result<TableConfigs, ConfigError> {
    let extractor = PathExtractor::new();
    let mut groups: BTreeMap<String, BTreeMap<String, TypeHintBuilder>> = BTreeMap::new();

    for doc in docs {
        let Some(key) = follow_keys(doc, splitter.steps()).and_then(group_key) else {
            continue;
        };
        let builders = groups.entry(key).or_default();
        for (path, values) in extractor.extract_with_values(doc) {
            let builder = builders.entry(path).or_default();
            for value in &values {
                builder.add_value(value);
            }
        }
    }

    let mut configs = TableConfigs::new();
    let mut table_names = BTreeSet::new();
    for (value, builders) in groups {
        let paths: Vec<(PathExpression, TypeTag)> = builders
            .iter()
            .filter_map(|(path, builder)| match PathExpression::parse(path) {
                Ok(parsed) => Some((parsed, builder.build())),
                Err(e) => {
                    debug!(path = %path, error = %e, "Skipping path that cannot be addressed");
                    None
                }
            })
            .collect();
        if paths.is_empty() {
            continue;
        }

        let aliases = aliases_for(paths.iter().map(|(p, _)| p));
        let fields = paths
            .into_iter()
            .zip(aliases)
            .map(|((source, type_tag), alias)| FieldSpec {
                source,
                alias,
                type_tag,
                coerce: None,
            })
            .collect();

        let table_name = unique_name(table_name_for(&value), &mut table_names);
        configs.insert(value, TableConfig::new(table_name, fields)?)?;
    }

    Ok(configs)
}

/// Last key of each path, or the whole path where the last key is ambiguous
fn aliases_for<'a>(paths: impl Iterator<Item = &'a PathExpression> + Clone) -> Vec<String> {
    let mut last_key_counts: HashMap<String, usize> = HashMap::new();
    for path in paths.clone() {
        *last_key_counts.entry(last_key(path)).or_insert(0) += 1;
    }

    let mut taken = BTreeSet::new();
    paths
        .map(|path| {
            let short = last_key(path);
            let alias = if last_key_counts.get(&short).copied().unwrap_or(0) > 1 {
                flat_name(path)
            } else {
                short
            };
            unique_name(alias, &mut taken)
        })
        .collect()
}

fn last_key(path: &PathExpression) -> String {
    path.steps()
        .iter()
        .rev()
        .find_map(|s| match s {
            Step::Key(k) => Some(k.clone()),
            Step::Iterate => None,
        })
        .unwrap_or_else(|| "value".to_string())
}

fn flat_name(path: &PathExpression) -> String {
    path.steps()
        .iter()
        .filter_map(|s| match s {
            Step::Key(k) => Some(k.as_str()),
            Step::Iterate => None,
        })
        .collect::<Vec<_>>()
        .join("_")
}

fn table_name_for(value: &str) -> String {
    let mut name = String::with_capacity(value.len());
    let mut prev_lower = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                name.push('_');
            }
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            name.push(c.to_ascii_lowercase());
        } else {
            if !name.ends_with('_') {
                name.push('_');
            }
            prev_lower = false;
        }
    }
    let name = name.trim_matches('_').to_string();
    if name.is_empty() {
        "table".to_string()
    } else {
        name
    }
}

fn unique_name(base: String, taken: &mut BTreeSet<String>) -> String {
    let mut candidate = base.clone();
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hint(values: &[Value]) -> TypeTag {
        let mut builder = TypeHintBuilder::new();
        for v in values {
            builder.add_value(v);
        }
        builder.build()
    }

    #[test]
    fn test_type_hints() {
        assert_eq!(hint(&[json!(1), json!(2)]), TypeTag::Integer);
        assert_eq!(hint(&[json!(1), json!(2.5)]), TypeTag::Float);
        assert_eq!(hint(&[json!(true), json!(null)]), TypeTag::Boolean);
        assert_eq!(hint(&[json!("2024-01-15"), json!("2023-12-31")]), TypeTag::Date);
        assert_eq!(hint(&[json!("2024-01-15T10:00:00Z")]), TypeTag::Timestamp);
        assert_eq!(hint(&[json!("2024-01-15"), json!("soon")]), TypeTag::String);
        assert_eq!(hint(&[json!("1"), json!(1)]), TypeTag::String);
        assert_eq!(hint(&[json!(null)]), TypeTag::String);
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format("2024-01-15"), Some(StringFormat::Date));
        assert_eq!(detect_format("2024-01-15T10:00:00.123+02:00"), Some(StringFormat::DateTime));
        assert_eq!(detect_format("2024-01-15 10:00:00"), None);
        assert_eq!(detect_format("hello"), None);
    }

    #[test]
    fn test_table_names() {
        assert_eq!(table_name_for("OrderCreated"), "order_created");
        assert_eq!(table_name_for("user.v2-updated"), "user_v2_updated");
        assert_eq!(table_name_for("!!"), "table");
    }

    #[test]
    fn test_draft_configs() {
        let docs = vec![
            json!({
                "header": {"action": "OrderCreated", "id": "e1"},
                "body": {"id": 7, "items": [{"sku": "A", "price": 1.5}, {"sku": "B", "price": 2}]}
            }),
            json!({"header": {"action": "UserCreated", "id": "e2"}, "body": {"user": {"name": "x", "since": "2024-01-15"}}}),
        ];
        let configs = draft_table_configs(&docs, &PathExpression::parse("header.action").unwrap()).unwrap();
        assert_eq!(configs.len(), 2);

        let orders = configs.get("OrderCreated").unwrap();
        assert_eq!(orders.table_name, "order_created");
        let fields: Vec<(String, String, TypeTag)> = orders
            .fields
            .iter()
            .map(|f| (f.source.to_string(), f.alias.clone(), f.type_tag))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("body.id".to_string(), "body_id".to_string(), TypeTag::Integer),
                ("body.items[].price".to_string(), "price".to_string(), TypeTag::Float),
                ("body.items[].sku".to_string(), "sku".to_string(), TypeTag::String),
                ("header.action".to_string(), "action".to_string(), TypeTag::String),
                ("header.id".to_string(), "header_id".to_string(), TypeTag::String),
            ]
        );

        let users = configs.get("UserCreated").unwrap();
        let since = users.fields.iter().find(|f| f.alias == "since").unwrap();
        assert_eq!(since.type_tag, TypeTag::Date);
    }

    #[test]
    fn test_draft_skips_dotted_keys() {
        let docs = vec![json!({"kind": "a", "a.b": {"c": 1}, "a": {"b": {"c": 2}}})];
        let configs = draft_table_configs(&docs, &PathExpression::parse("kind").unwrap()).unwrap();
        let sources: Vec<String> = configs
            .get("a")
            .unwrap()
            .fields
            .iter()
            .map(|f| f.source.to_string())
            .collect();
        assert_eq!(sources, vec!["a.b.c".to_string(), "kind".to_string()]);

        let table = configs.get("a").unwrap();
        let c = table.fields.iter().find(|f| f.alias == "c").unwrap();
        assert_eq!(c.source.resolve_first(&docs[0]), Some(&json!(2)));
    }

    #[test]
    fn test_drafted_config_processes_its_corpus() {
        use crate::unfurl::processor::{JsonProcessor, ProcessorSettings, RunContext};

        let docs = vec![
            json!({"kind": "a", "when": "2024-01-15T10:00:00Z", "n": 1}),
            json!({"kind": "a", "when": "2024-02-01T00:00:00Z", "n": 2}),
        ];
        let splitter = PathExpression::parse("kind").unwrap();
        let configs = draft_table_configs(&docs, &splitter).unwrap();
        let processor = JsonProcessor::new(splitter, configs, ProcessorSettings::default()).unwrap();

        let result = processor.process(&docs, &RunContext::new());
        assert_eq!(result.stats.failed, 0);
        assert_eq!(result.table("a").unwrap().rows.len(), 2);
    }
}
