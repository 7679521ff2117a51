//! Table configuration: which fields to pull out of each document shape
//!
//! Configuration arrives as nested maps (JSON or YAML):
//!
//! ```json
//! {
//!   "OrderCreated": {
//!     "table_name": "orders",
//!     "fields": [
//!       {"source": "header.id", "alias": "event_id", "type": "string"},
//!       {"source": "body.items[].price", "alias": "price", "type": "float", "coerce": true}
//!     ]
//!   }
//! }
//! ```
//!
//! It is compiled eagerly into [`TableConfigs`]; malformed paths, unknown
//! types and duplicate aliases are rejected before any document is read.

use crate::error::ConfigError;
use crate::unfurl::coerce::{CoerceMode, CoercionRules, TypeTag};
use crate::unfurl::expander::EmptyArrayPolicy;
use crate::unfurl::path::{PathExpression, Step};
use crate::unfurl::processor::{JsonProcessor, MetadataColumns, ProcessorSettings};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// One output column and where its value comes from
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub source: PathExpression,
    pub alias: String,
    pub type_tag: TypeTag,
    /// Per-field override of the run-level coerce default
    pub coerce: Option<bool>,
}

impl FieldSpec {
    pub fn new(source: &str, alias: impl Into<String>, type_tag: TypeTag) -> Result<Self, ConfigError> {
        Ok(FieldSpec {
            source: PathExpression::parse(source)?,
            alias: alias.into(),
            type_tag,
            coerce: None,
        })
    }

    pub fn with_coerce(mut self, coerce: bool) -> Self {
        self.coerce = Some(coerce);
        self
    }

    /// Effective coercion mode given the run default
    pub fn mode(&self, default_coerce: bool) -> CoerceMode {
        CoerceMode::from_flag(self.coerce.unwrap_or(default_coerce))
    }
}

/// Name and type of a table column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub alias: String,
    pub type_tag: TypeTag,
}

/// Output table and its ordered fields
#[derive(Debug, Clone, PartialEq)]
pub struct TableConfig {
    pub table_name: String,
    pub fields: Vec<FieldSpec>,
}

impl TableConfig {
    pub fn new(table_name: impl Into<String>, fields: Vec<FieldSpec>) -> Result<Self, ConfigError> {
        let table_name = table_name.into();
        if fields.is_empty() {
            return Err(ConfigError::EmptyTable { table: table_name });
        }

        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.alias.as_str()) {
                return Err(ConfigError::DuplicateAlias {
                    table: table_name,
                    alias: field.alias.clone(),
                });
            }
        }

        Ok(TableConfig { table_name, fields })
    }

    pub fn columns(&self) -> Vec<Column> {
        self.fields
            .iter()
            .map(|f| Column {
                alias: f.alias.clone(),
                type_tag: f.type_tag,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawField {
    source: String,
    alias: String,
    #[serde(rename = "type", default)]
    type_name: Option<String>,
    #[serde(default)]
    coerce: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    table_name: String,
    fields: Vec<RawField>,
}

impl RawTable {
    fn compile(self) -> Result<TableConfig, ConfigError> {
        let fields = self
            .fields
            .into_iter()
            .map(|raw| {
                let type_tag = match raw.type_name.as_deref() {
                    None => TypeTag::String,
                    Some(name) => TypeTag::parse(name).ok_or_else(|| ConfigError::UnknownType {
                        alias: raw.alias.clone(),
                        type_name: name.to_string(),
                    })?,
                };
                Ok(FieldSpec {
                    source: PathExpression::parse(&raw.source)?,
                    alias: raw.alias,
                    type_tag,
                    coerce: raw.coerce,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        TableConfig::new(self.table_name, fields)
    }
}

/// Discriminator value → table configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableConfigs {
    tables: BTreeMap<String, TableConfig>,
}

impl TableConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile the nested-map form
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let raw: BTreeMap<String, RawTable> =
            serde_json::from_value(value.clone()).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut configs = TableConfigs::new();
        for (discriminator, table) in raw {
            configs.insert(discriminator, table.compile()?)?;
        }
        Ok(configs)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Add a route; several discriminators may share a table only with identical columns
    pub fn insert(&mut self, discriminator: impl Into<String>, table: TableConfig) -> Result<(), ConfigError> {
        if let Some(existing) = self.tables.values().find(|t| t.table_name == table.table_name) {
            if existing.columns() != table.columns() {
                return Err(ConfigError::ConflictingTable {
                    table: table.table_name,
                });
            }
        }
        self.tables.insert(discriminator.into(), table);
        Ok(())
    }

    pub fn get(&self, discriminator: &str) -> Option<&TableConfig> {
        self.tables.get(discriminator)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TableConfig)> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Back to the nested-map form accepted by [`from_value`](Self::from_value)
    pub fn to_value(&self) -> Value {
        let tables = self
            .tables
            .iter()
            .map(|(discriminator, table)| {
                let fields: Vec<Value> = table
                    .fields
                    .iter()
                    .map(|f| {
                        let mut field = json!({
                            "source": f.source.to_string(),
                            "alias": f.alias,
                            "type": f.type_tag.as_str(),
                        });
                        if let (Some(coerce), Some(map)) = (f.coerce, field.as_object_mut()) {
                            map.insert("coerce".to_string(), Value::Bool(coerce));
                        }
                        field
                    })
                    .collect();
                (
                    discriminator.clone(),
                    json!({"table_name": table.table_name, "fields": fields}),
                )
            })
            .collect();
        Value::Object(tables)
    }
}

/// Split path given either as `"header.action"` or as `["header", "action"]`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SplitPathSpec {
    Dotted(String),
    Keys(Vec<String>),
}

impl SplitPathSpec {
    pub fn compile(&self) -> Result<PathExpression, ConfigError> {
        let path = match self {
            SplitPathSpec::Dotted(s) => PathExpression::parse(s)?,
            SplitPathSpec::Keys(keys) => {
                if keys.is_empty() {
                    return Err(ConfigError::InvalidPath {
                        path: String::new(),
                        reason: "path is empty".to_string(),
                    });
                }
                PathExpression::from_steps(keys.iter().cloned().map(Step::Key).collect())
            }
        };
        if path.has_iterate() {
            return Err(ConfigError::IterateInSplitPath {
                path: path.to_string(),
            });
        }
        Ok(path)
    }
}

/// Complete run configuration as stored in a file
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub split_path: SplitPathSpec,
    #[serde(default)]
    pub coerce: bool,
    #[serde(default)]
    pub empty_arrays: EmptyArrayPolicy,
    #[serde(default)]
    pub metadata_columns: MetadataColumns,
    #[serde(default)]
    pub currency_symbols: Option<Vec<char>>,
    #[serde(default)]
    pub truthy: Option<Vec<String>>,
    #[serde(default)]
    pub falsy: Option<Vec<String>>,
    #[serde(default)]
    pub datetime_formats: Option<Vec<String>>,
    pub tables: Value,
}

impl RunConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config = if is_yaml {
            Self::from_yaml_str(&text)
        } else {
            Self::from_json_str(&text)
        };
        config.with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn settings(&self) -> ProcessorSettings {
        let defaults = CoercionRules::default();
        let rules = CoercionRules {
            currency_symbols: self.currency_symbols.clone().unwrap_or(defaults.currency_symbols),
            truthy: lowercase(self.truthy.clone()).unwrap_or(defaults.truthy),
            falsy: lowercase(self.falsy.clone()).unwrap_or(defaults.falsy),
            datetime_formats: self.datetime_formats.clone().unwrap_or(defaults.datetime_formats),
        };

        ProcessorSettings {
            default_coerce: self.coerce,
            empty_arrays: self.empty_arrays,
            rules,
            metadata_columns: self.metadata_columns.clone(),
        }
    }

    /// Compile everything into a ready processor
    pub fn build_processor(&self) -> Result<JsonProcessor, ConfigError> {
        let split_path = self.split_path.compile()?;
        let tables = TableConfigs::from_value(&self.tables)?;
        JsonProcessor::new(split_path, tables, self.settings())
    }
}

fn lowercase(tokens: Option<Vec<String>>) -> Option<Vec<String>> {
    tokens.map(|t| t.into_iter().map(|s| s.trim().to_lowercase()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_config() -> Value {
        json!({
            "OrderCreated": {
                "table_name": "orders",
                "fields": [
                    {"source": "header.id", "alias": "event_id", "type": "string"},
                    {"source": "body.items[].sku", "alias": "sku"},
                    {"source": "body.items[].price", "alias": "price", "type": "float", "coerce": true}
                ]
            }
        })
    }

    #[test]
    fn test_compile_nested_maps() {
        let configs = TableConfigs::from_value(&order_config()).unwrap();
        let table = configs.get("OrderCreated").unwrap();

        assert_eq!(table.table_name, "orders");
        assert_eq!(table.fields.len(), 3);
        assert_eq!(table.fields[1].type_tag, TypeTag::String);
        assert_eq!(table.fields[2].coerce, Some(true));
        assert_eq!(table.fields[2].mode(false), CoerceMode::Lenient);
        assert_eq!(table.fields[0].mode(false), CoerceMode::Strict);
        assert_eq!(table.fields[2].source.to_string(), "body.items[].price");
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let config = json!({
            "A": {"table_name": "a", "fields": [
                {"source": "x", "alias": "dup", "type": "string"},
                {"source": "y", "alias": "dup", "type": "string"}
            ]}
        });
        assert_eq!(
            TableConfigs::from_value(&config),
            Err(ConfigError::DuplicateAlias {
                table: "a".into(),
                alias: "dup".into()
            })
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let config = json!({
            "A": {"table_name": "a", "fields": [{"source": "x", "alias": "x", "type": "money"}]}
        });
        assert!(matches!(
            TableConfigs::from_value(&config),
            Err(ConfigError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_malformed_path_rejected() {
        let config = json!({
            "A": {"table_name": "a", "fields": [{"source": "items[0].x", "alias": "x"}]}
        });
        assert!(matches!(
            TableConfigs::from_value(&config),
            Err(ConfigError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_shared_table_requires_same_columns() {
        let same = json!({
            "A": {"table_name": "t", "fields": [{"source": "x", "alias": "x"}]},
            "B": {"table_name": "t", "fields": [{"source": "y", "alias": "x"}]}
        });
        assert_eq!(TableConfigs::from_value(&same).unwrap().len(), 2);

        let different = json!({
            "A": {"table_name": "t", "fields": [{"source": "x", "alias": "x"}]},
            "B": {"table_name": "t", "fields": [{"source": "y", "alias": "y"}]}
        });
        assert!(matches!(
            TableConfigs::from_value(&different),
            Err(ConfigError::ConflictingTable { .. })
        ));
    }

    #[test]
    fn test_to_value_round_trips() {
        let configs = TableConfigs::from_value(&order_config()).unwrap();
        let value = configs.to_value();
        assert_eq!(value["OrderCreated"]["fields"][1]["type"], json!("string"));
        assert_eq!(value["OrderCreated"]["fields"][2]["coerce"], json!(true));
        assert_eq!(TableConfigs::from_value(&value).unwrap(), configs);
    }

    #[test]
    fn test_yaml_config() {
        let yaml = r#"
OrderCreated:
  table_name: orders
  fields:
    - source: header.id
      alias: event_id
      type: string
"#;
        let configs = TableConfigs::from_yaml_str(yaml).unwrap();
        assert_eq!(configs.get("OrderCreated").unwrap().fields[0].alias, "event_id");
    }

    #[test]
    fn test_split_path_forms() {
        let dotted = SplitPathSpec::Dotted("header.action".into()).compile().unwrap();
        let keys = SplitPathSpec::Keys(vec!["header".into(), "action".into()])
            .compile()
            .unwrap();
        assert_eq!(dotted, keys);

        assert!(matches!(
            SplitPathSpec::Dotted("items[].kind".into()).compile(),
            Err(ConfigError::IterateInSplitPath { .. })
        ));
    }

    #[test]
    fn test_run_config() {
        let text = json!({
            "split_path": ["header", "action"],
            "coerce": true,
            "empty_arrays": "drop",
            "truthy": ["JA"],
            "tables": order_config()
        })
        .to_string();

        let run = RunConfig::from_json_str(&text).unwrap();
        let settings = run.settings();
        assert!(settings.default_coerce);
        assert_eq!(settings.empty_arrays, EmptyArrayPolicy::DropRow);
        assert_eq!(settings.rules.truthy, vec!["ja".to_string()]);
        assert_eq!(settings.metadata_columns, MetadataColumns::default());
        assert!(run.build_processor().is_ok());
    }
}
