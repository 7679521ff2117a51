//! Table building: route each document to its table and accumulate rows
//!
//! The processor holds only compiled, read-only configuration. Everything
//! that varies per run (source metadata, cancellation) comes in through a
//! [`RunContext`], so the same processor can be shared across threads and
//! batches.

use crate::error::{ConfigError, UnfurlError};
use crate::unfurl::coerce::{CellValue, Coercer, CoercionRules, TypeTag};
use crate::unfurl::config::{Column, TableConfig, TableConfigs};
use crate::unfurl::expander::{EmptyArrayPolicy, Expansion, Row, RowExpander};
use crate::unfurl::path::{follow_keys, PathExpression};
use crate::unfurl::plan::AxisPlan;
use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Names of the two columns added when a run carries source metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataColumns {
    pub label: String,
    pub date: String,
}

impl Default for MetadataColumns {
    fn default() -> Self {
        MetadataColumns {
            label: "source_path".to_string(),
            date: "source_last_modified_utc".to_string(),
        }
    }
}

impl MetadataColumns {
    fn aliases(&self) -> [&str; 2] {
        [&self.label, &self.date]
    }
}

/// Run-wide processing options
#[derive(Debug, Clone, Default)]
pub struct ProcessorSettings {
    /// Coerce mode for fields without their own `coerce` flag
    pub default_coerce: bool,
    pub empty_arrays: EmptyArrayPolicy,
    pub rules: CoercionRules,
    pub metadata_columns: MetadataColumns,
}

/// Where the current batch came from
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    pub label: String,
    pub last_modified: NaiveDateTime,
}

/// Per-call context threaded through a batch
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub source: Option<SourceMetadata>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a source label and timestamp to every row of the run
    pub fn with_source(mut self, label: impl Into<String>, last_modified: NaiveDateTime) -> Self {
        self.source = Some(SourceMetadata {
            label: label.into(),
            last_modified,
        });
        self
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |c| c.load(Ordering::Relaxed))
    }
}

/// Counters kept per output table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    /// Documents routed to the table, including ones that produced no rows
    pub documents: usize,
    pub rows: usize,
    /// Non-null raw values that lenient coercion turned into null
    pub null_coerced: usize,
}

/// One output table
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub stats: TableStats,
}

/// Batch-level counters; every input document lands in exactly one bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub processed: usize,
    pub unrouted: usize,
    pub failed: usize,
    /// Documents never looked at because the run was cancelled
    pub unprocessed: usize,
}

/// A document that was routed but could not be turned into rows
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentFailure {
    /// Position of the document in the batch
    pub index: usize,
    pub discriminator: String,
    pub alias: Option<String>,
    pub path: Option<String>,
    pub error: UnfurlError,
}

impl DocumentFailure {
    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}

/// Everything produced by one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessingResult {
    pub tables: BTreeMap<String, Table>,
    pub stats: BatchStats,
    pub failures: Vec<DocumentFailure>,
    /// Discriminator values seen without a configured table
    pub unrouted_values: BTreeMap<String, usize>,
}

impl ProcessingResult {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(|t| t.rows.len()).sum()
    }
}

#[derive(Debug, Clone)]
struct Route {
    table: TableConfig,
    plan: AxisPlan,
}

enum Outcome {
    Routed {
        discriminator: String,
        expansion: Expansion,
    },
    Failed {
        discriminator: String,
        error: UnfurlError,
    },
    Unrouted(Option<String>),
}

/// Routes documents by a discriminator path and flattens them into tables
#[derive(Debug, Clone)]
pub struct JsonProcessor {
    split_path: PathExpression,
    routes: BTreeMap<String, Route>,
    expander: RowExpander,
    metadata_columns: MetadataColumns,
}

impl JsonProcessor {
    pub fn new(split_path: PathExpression, tables: TableConfigs, settings: ProcessorSettings) -> Result<Self, ConfigError> {
        if split_path.has_iterate() {
            return Err(ConfigError::IterateInSplitPath {
                path: split_path.to_string(),
            });
        }

        let mut routes = BTreeMap::new();
        for (discriminator, table) in tables.iter() {
            for alias in settings.metadata_columns.aliases() {
                if table.fields.iter().any(|f| f.alias == alias) {
                    return Err(ConfigError::MetadataCollision {
                        table: table.table_name.clone(),
                        alias: alias.to_string(),
                    });
                }
            }

            routes.insert(
                discriminator.clone(),
                Route {
                    plan: AxisPlan::build(&table.fields),
                    table: table.clone(),
                },
            );
        }

        let expander = RowExpander::new(
            Coercer::new(settings.rules),
            settings.empty_arrays,
            settings.default_coerce,
        );

        Ok(JsonProcessor {
            split_path,
            routes,
            expander,
            metadata_columns: settings.metadata_columns,
        })
    }

    pub fn split_path(&self) -> &PathExpression {
        &self.split_path
    }

    pub fn table_config(&self, discriminator: &str) -> Option<&TableConfig> {
        self.routes.get(discriminator).map(|r| &r.table)
    }

    /// Discriminator of a document as a routing key
    pub fn discriminator(&self, doc: &Value) -> Option<String> {
        follow_keys(doc, self.split_path.steps()).and_then(discriminator_key)
    }

    /// Process a batch sequentially, in input order
    pub fn process(&self, docs: &[Value], ctx: &RunContext) -> ProcessingResult {
        let mut acc = Accumulator::new(self, ctx);
        for (index, doc) in docs.iter().enumerate() {
            if ctx.is_cancelled() {
                acc.result.stats.unprocessed = docs.len() - index;
                break;
            }
            acc.fold(index, self.process_one(doc));
        }
        acc.finish()
    }

    /// Process a batch on the rayon pool; same result as [`process`](Self::process)
    pub fn process_parallel(&self, docs: &[Value], ctx: &RunContext) -> ProcessingResult {
        let outcomes: Vec<Option<Outcome>> = docs
            .par_iter()
            .map(|doc| (!ctx.is_cancelled()).then(|| self.process_one(doc)))
            .collect();

        let mut acc = Accumulator::new(self, ctx);
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Some(outcome) => acc.fold(index, outcome),
                None => acc.result.stats.unprocessed += 1,
            }
        }
        acc.finish()
    }

    fn process_one(&self, doc: &Value) -> Outcome {
        let Some(discriminator) = self.discriminator(doc) else {
            return Outcome::Unrouted(None);
        };
        let Some(route) = self.routes.get(&discriminator) else {
            return Outcome::Unrouted(Some(discriminator));
        };

        match self.expander.expand_planned(doc, &route.table, &route.plan) {
            Ok(expansion) => Outcome::Routed {
                discriminator,
                expansion,
            },
            Err(error) => Outcome::Failed { discriminator, error },
        }
    }
}

fn discriminator_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Folds per-document outcomes into a result, in input order
struct Accumulator<'a> {
    processor: &'a JsonProcessor,
    source: Option<&'a SourceMetadata>,
    aliases: HashMap<String, Arc<[String]>>,
    result: ProcessingResult,
}

impl<'a> Accumulator<'a> {
    fn new(processor: &'a JsonProcessor, ctx: &'a RunContext) -> Self {
        Accumulator {
            processor,
            source: ctx.source.as_ref(),
            aliases: HashMap::new(),
            result: ProcessingResult::default(),
        }
    }

    fn fold(&mut self, index: usize, outcome: Outcome) {
        match outcome {
            Outcome::Routed {
                discriminator,
                expansion,
            } => self.append(&discriminator, expansion),
            Outcome::Failed { discriminator, error } => self.fail(index, discriminator, error),
            Outcome::Unrouted(value) => {
                debug!(index, discriminator = ?value, "Document has no configured table");
                self.result.stats.unrouted += 1;
                if let Some(value) = value {
                    *self.result.unrouted_values.entry(value).or_insert(0) += 1;
                }
            }
        }
    }

    fn append(&mut self, discriminator: &str, expansion: Expansion) {
        let processor = self.processor;
        let Some(route) = processor.routes.get(discriminator) else {
            return;
        };
        let table_config = &route.table;
        let source = self.source;
        let metadata = &processor.metadata_columns;

        let aliases = self
            .aliases
            .entry(table_config.table_name.clone())
            .or_insert_with(|| {
                let mut aliases: Vec<String> = table_config.fields.iter().map(|f| f.alias.clone()).collect();
                if source.is_some() {
                    aliases.push(metadata.label.clone());
                    aliases.push(metadata.date.clone());
                }
                Arc::from(aliases)
            })
            .clone();

        let table = self
            .result
            .tables
            .entry(table_config.table_name.clone())
            .or_insert_with(|| Table {
                name: table_config.table_name.clone(),
                columns: table_columns(table_config, metadata, source.is_some()),
                rows: Vec::new(),
                stats: TableStats::default(),
            });

        table.stats.documents += 1;
        table.stats.null_coerced += expansion.null_coerced;
        table.stats.rows += expansion.rows.len();

        for mut values in expansion.rows {
            if let Some(source) = source {
                values.push(CellValue::String(source.label.clone()));
                values.push(CellValue::Timestamp(source.last_modified));
            }
            table.rows.push(Row::new(aliases.clone(), values));
        }
        self.result.stats.processed += 1;
    }

    fn fail(&mut self, index: usize, discriminator: String, error: UnfurlError) {
        let alias = match &error {
            UnfurlError::TypeMismatch { alias, .. } => Some(alias.clone()),
        };
        let path = alias.as_ref().and_then(|alias| {
            self.processor
                .routes
                .get(&discriminator)
                .and_then(|r| r.table.fields.iter().find(|f| &f.alias == alias))
                .map(|f| f.source.to_string())
        });

        warn!(index, discriminator = %discriminator, error = %error, "Document failed");
        self.result.stats.failed += 1;
        self.result.failures.push(DocumentFailure {
            index,
            discriminator,
            alias,
            path,
            error,
        });
    }

    fn finish(self) -> ProcessingResult {
        let result = self.result;
        for table in result.tables.values() {
            if table.stats.null_coerced > 0 {
                warn!(
                    table = %table.name,
                    null_coerced = table.stats.null_coerced,
                    "Lenient coercion replaced values with null"
                );
            }
        }
        info!(
            processed = result.stats.processed,
            unrouted = result.stats.unrouted,
            failed = result.stats.failed,
            unprocessed = result.stats.unprocessed,
            tables = result.tables.len(),
            rows = result.total_rows(),
            "Batch complete"
        );
        result
    }
}

fn table_columns(table: &TableConfig, metadata: &MetadataColumns, with_metadata: bool) -> Vec<Column> {
    let mut columns = table.columns();
    if with_metadata {
        columns.push(Column {
            alias: metadata.label.clone(),
            type_tag: TypeTag::String,
        });
        columns.push(Column {
            alias: metadata.date.clone(),
            type_tag: TypeTag::Timestamp,
        });
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn order_configs(coerce_price: bool) -> TableConfigs {
        TableConfigs::from_value(&json!({
            "OrderCreated": {
                "table_name": "order_items",
                "fields": [
                    {"source": "header.id", "alias": "event_id", "type": "string"},
                    {"source": "body.items[].sku", "alias": "sku", "type": "string"},
                    {"source": "body.items[].price", "alias": "price", "type": "float", "coerce": coerce_price}
                ]
            },
            "CustomerUpdated": {
                "table_name": "customers",
                "fields": [
                    {"source": "body.customer.id", "alias": "customer_id", "type": "integer"},
                    {"source": "body.customer.active", "alias": "active", "type": "boolean", "coerce": true}
                ]
            }
        }))
        .unwrap()
    }

    fn processor(coerce_price: bool) -> JsonProcessor {
        JsonProcessor::new(
            PathExpression::parse("header.action").unwrap(),
            order_configs(coerce_price),
            ProcessorSettings::default(),
        )
        .unwrap()
    }

    fn order(id: &str, prices: &[&str]) -> Value {
        let items: Vec<Value> = prices
            .iter()
            .enumerate()
            .map(|(i, p)| json!({"sku": format!("SKU-{}", i), "price": p}))
            .collect();
        json!({"header": {"action": "OrderCreated", "id": id}, "body": {"items": items}})
    }

    fn batch() -> Vec<Value> {
        vec![
            order("e1", &["$10.00", "25%"]),
            json!({"header": {"action": "CustomerUpdated"}, "body": {"customer": {"id": "42", "active": "yes"}}}),
            json!({"header": {"action": "Unknown"}}),
            json!({"body": {}}),
            order("e2", &["1,234.50"]),
            order("e3", &[]),
        ]
    }

    #[test]
    fn test_order_scenario() {
        let doc = json!({
            "header": {"action": "OrderCreated"},
            "body": {"items": [{"sku": "A", "price": "$10.00"}, {"sku": "B", "price": "25%"}]}
        });
        let result = processor(true).process(&[doc], &RunContext::new());

        let table = result.table("order_items").unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get("sku"), Some(&CellValue::String("A".into())));
        assert_eq!(table.rows[0].get("price"), Some(&CellValue::Float(10.0)));
        assert_eq!(table.rows[1].get("sku"), Some(&CellValue::String("B".into())));
        assert_eq!(table.rows[1].get("price"), Some(&CellValue::Float(0.25)));
        assert_eq!(table.rows[0].get("event_id"), Some(&CellValue::Null));
    }

    #[test]
    fn test_strict_failure_is_isolated() {
        let docs = vec![order("bad", &["$10.00"]), order("good", &["12.5"])];
        let result = processor(false).process(&docs, &RunContext::new());

        assert_eq!(result.stats.failed, 1);
        assert_eq!(result.stats.processed, 1);

        let failure = &result.failures[0];
        assert_eq!(failure.index, 0);
        assert_eq!(failure.discriminator, "OrderCreated");
        assert_eq!(failure.alias.as_deref(), Some("price"));
        assert_eq!(failure.path.as_deref(), Some("body.items[].price"));
        assert_eq!(failure.kind(), "type_mismatch");
        assert!(matches!(failure.error, UnfurlError::TypeMismatch { expected: TypeTag::Float, .. }));

        let table = result.table("order_items").unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].get("event_id"), Some(&CellValue::String("good".into())));
    }

    #[test]
    fn test_routing_and_counts() {
        let result = processor(true).process(&batch(), &RunContext::new());

        assert_eq!(
            result.stats,
            BatchStats {
                processed: 4,
                unrouted: 2,
                failed: 0,
                unprocessed: 0,
            }
        );
        assert_eq!(result.unrouted_values.get("Unknown"), Some(&1));

        let items = result.table("order_items").unwrap();
        assert_eq!(items.stats.documents, 3);
        // empty item list keeps one null row
        assert_eq!(items.rows.len(), 4);
        assert_eq!(items.rows[3].get("sku"), Some(&CellValue::Null));
        assert_eq!(items.rows[2].get("price"), Some(&CellValue::Float(1234.5)));

        let customers = result.table("customers").unwrap();
        assert_eq!(customers.rows[0].get("customer_id"), Some(&CellValue::Integer(42)));
        assert_eq!(customers.rows[0].get("active"), Some(&CellValue::Boolean(true)));
    }

    #[test]
    fn test_numeric_discriminator() {
        let tables = TableConfigs::from_value(&json!({
            "7": {"table_name": "sevens", "fields": [{"source": "v", "alias": "v"}]}
        }))
        .unwrap();
        let processor =
            JsonProcessor::new(PathExpression::parse("kind").unwrap(), tables, ProcessorSettings::default()).unwrap();

        let docs = vec![json!({"kind": 7, "v": "x"}), json!({"kind": null}), json!({"kind": [7]})];
        let result = processor.process(&docs, &RunContext::new());
        assert_eq!(result.stats.processed, 1);
        assert_eq!(result.stats.unrouted, 2);
    }

    #[test]
    fn test_metadata_columns() {
        let modified = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let ctx = RunContext::new().with_source("s3://bucket/events.json", modified);
        let result = processor(true).process(&[order("e1", &["1"])], &ctx);

        let table = result.table("order_items").unwrap();
        let aliases: Vec<_> = table.columns.iter().map(|c| c.alias.as_str()).collect();
        assert_eq!(
            aliases,
            vec!["event_id", "sku", "price", "source_path", "source_last_modified_utc"]
        );
        assert_eq!(table.columns[4].type_tag, TypeTag::Timestamp);

        let row = &table.rows[0];
        assert_eq!(
            row.get("source_path"),
            Some(&CellValue::String("s3://bucket/events.json".into()))
        );
        assert_eq!(row.get("source_last_modified_utc"), Some(&CellValue::Timestamp(modified)));
    }

    #[test]
    fn test_metadata_collision_rejected() {
        let tables = TableConfigs::from_value(&json!({
            "A": {"table_name": "a", "fields": [{"source": "path", "alias": "source_path"}]}
        }))
        .unwrap();
        let err = JsonProcessor::new(PathExpression::parse("kind").unwrap(), tables, ProcessorSettings::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MetadataCollision { .. }));
    }

    #[test]
    fn test_deterministic_and_parallel_match() {
        let p = processor(true);
        let docs = batch();
        let first = p.process(&docs, &RunContext::new());
        let second = p.process(&docs, &RunContext::new());
        let parallel = p.process_parallel(&docs, &RunContext::new());

        assert_eq!(first, second);
        assert_eq!(first, parallel);
    }

    #[test]
    fn test_cancelled_run_counts_remainder() {
        let flag = Arc::new(AtomicBool::new(true));
        let ctx = RunContext::new().with_cancel(flag);
        let docs = batch();

        let result = processor(true).process(&docs, &ctx);
        assert_eq!(result.stats.unprocessed, docs.len());
        assert!(result.tables.is_empty());

        let result = processor(true).process_parallel(&docs, &ctx);
        assert_eq!(result.stats.unprocessed, docs.len());
    }

    #[test]
    fn test_null_coerced_counted() {
        let result = processor(true).process(&[order("e1", &["abc", "5"])], &RunContext::new());
        let table = result.table("order_items").unwrap();
        assert_eq!(table.stats.null_coerced, 1);
        assert_eq!(table.stats.rows, 2);
    }

    #[test]
    fn test_drop_policy() {
        let settings = ProcessorSettings {
            empty_arrays: EmptyArrayPolicy::DropRow,
            default_coerce: true,
            ..Default::default()
        };
        let processor =
            JsonProcessor::new(PathExpression::parse("header.action").unwrap(), order_configs(true), settings).unwrap();
        let result = processor.process(&[order("e3", &[])], &RunContext::new());

        let table = result.table("order_items").unwrap();
        assert_eq!(table.stats.documents, 1);
        assert!(table.rows.is_empty());
        assert_eq!(result.stats.processed, 1);
    }
}
