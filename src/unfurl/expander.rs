//! Row expansion: one document + one table configuration → rows
//!
//! Walks the [`AxisPlan`] depth-first. Each array axis contributes one
//! binding per element, nested axes are evaluated inside their parent's
//! element, and sibling axes are combined by cartesian product. The raw
//! values bound for each row are then coerced to the declared types.

use crate::error::UnfurlError;
use crate::unfurl::coerce::{is_null_like, CellValue, Coercer};
use crate::unfurl::config::TableConfig;
use crate::unfurl::path::follow_keys;
use crate::unfurl::plan::{AxisNode, AxisPlan, FieldSlot};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::sync::Arc;

/// What an absent or empty array contributes to the row product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmptyArrayPolicy {
    /// One row with every field under the axis set to null (outer explode)
    #[default]
    #[serde(rename = "keep", alias = "keep_row", alias = "outer")]
    KeepRow,
    /// No rows for the enclosing element (inner explode)
    #[serde(rename = "drop", alias = "drop_row", alias = "inner")]
    DropRow,
}

/// One output row: alias → typed value, in column order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    aliases: Arc<[String]>,
    values: Vec<CellValue>,
}

impl Row {
    pub fn new(aliases: Arc<[String]>, values: Vec<CellValue>) -> Self {
        debug_assert_eq!(aliases.len(), values.len());
        Row { aliases, values }
    }

    pub fn get(&self, alias: &str) -> Option<&CellValue> {
        self.aliases
            .iter()
            .position(|a| a == alias)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn values(&self) -> &[CellValue] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.aliases.iter().map(String::as_str).zip(self.values.iter())
    }

    pub fn to_json_map(&self) -> Map<String, Value> {
        self.iter().map(|(alias, v)| (alias.to_string(), v.to_json())).collect()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json_map().serialize(serializer)
    }
}

/// Coerced cell values for one document, before metadata is attached
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    pub rows: Vec<Vec<CellValue>>,
    /// Non-null raw values that lenient coercion turned into null
    pub null_coerced: usize,
}

type Binding<'a> = Vec<Option<&'a Value>>;

/// Stateless row generator
#[derive(Debug, Clone, Default)]
pub struct RowExpander {
    coercer: Coercer,
    policy: EmptyArrayPolicy,
    default_coerce: bool,
}

impl RowExpander {
    pub fn new(coercer: Coercer, policy: EmptyArrayPolicy, default_coerce: bool) -> Self {
        RowExpander {
            coercer,
            policy,
            default_coerce,
        }
    }

    pub fn policy(&self) -> EmptyArrayPolicy {
        self.policy
    }

    /// Expand a document against a table, planning the axes on the fly
    pub fn expand(&self, doc: &Value, table: &TableConfig) -> Result<Vec<Row>, UnfurlError> {
        let plan = AxisPlan::build(&table.fields);
        let aliases: Arc<[String]> = table.fields.iter().map(|f| f.alias.clone()).collect();
        let expansion = self.expand_planned(doc, table, &plan)?;

        Ok(expansion
            .rows
            .into_iter()
            .map(|values| Row::new(aliases.clone(), values))
            .collect())
    }

    /// Expand with a pre-built plan; fails on the first strict coercion error
    pub fn expand_planned(&self, doc: &Value, table: &TableConfig, plan: &AxisPlan) -> Result<Expansion, UnfurlError> {
        let bindings = self.bind_level(doc, &plan.scalar_fields, &plan.axes, plan.width);

        let mut expansion = Expansion {
            rows: Vec::with_capacity(bindings.len()),
            null_coerced: 0,
        };

        for binding in bindings {
            let mut cells = Vec::with_capacity(plan.width);
            for (field, raw) in table.fields.iter().zip(binding) {
                let Some(raw) = raw else {
                    cells.push(CellValue::Null);
                    continue;
                };

                let cell = self
                    .coercer
                    .coerce(raw, field.type_tag, field.mode(self.default_coerce))
                    .map_err(|e| UnfurlError::TypeMismatch {
                        alias: field.alias.clone(),
                        raw: e.raw,
                        expected: e.target,
                    })?;

                if cell.is_null() && !is_null_like(raw) {
                    expansion.null_coerced += 1;
                }
                cells.push(cell);
            }
            expansion.rows.push(cells);
        }

        Ok(expansion)
    }

    /// Bindings for the fields owned by `node` and every axis below it
    fn bind_level<'a>(&self, node: &'a Value, slots: &[FieldSlot], axes: &[AxisNode], width: usize) -> Vec<Binding<'a>> {
        let mut base = vec![None; width];
        for slot in slots {
            base[slot.column] = follow_keys(node, &slot.leaf);
        }

        let mut rows = vec![base];
        for axis in axes {
            if rows.is_empty() {
                break;
            }
            let sub = self.bind_axis(node, axis, width);
            rows = cross(&rows, &sub);
        }
        rows
    }

    fn bind_axis<'a>(&self, parent: &'a Value, axis: &AxisNode, width: usize) -> Vec<Binding<'a>> {
        match follow_keys(parent, &axis.relative) {
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .flat_map(|item| self.bind_level(item, &axis.fields, &axis.children, width))
                .collect(),
            _ => match self.policy {
                EmptyArrayPolicy::KeepRow => vec![vec![None; width]],
                EmptyArrayPolicy::DropRow => Vec::new(),
            },
        }
    }
}

/// Cartesian product of two binding sets over disjoint columns
fn cross<'a>(left: &[Binding<'a>], right: &[Binding<'a>]) -> Vec<Binding<'a>> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in left {
        for r in right {
            let mut row = l.clone();
            for (cell, value) in row.iter_mut().zip(r) {
                if value.is_some() {
                    *cell = *value;
                }
            }
            out.push(row);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unfurl::coerce::TypeTag;
    use crate::unfurl::config::FieldSpec;
    use serde_json::json;

    fn table(fields: &[(&str, &str, TypeTag)]) -> TableConfig {
        TableConfig::new(
            "t",
            fields
                .iter()
                .map(|(source, alias, tag)| FieldSpec::new(source, *alias, *tag).unwrap())
                .collect(),
        )
        .unwrap()
    }

    fn strings(rows: &[Row], alias: &str) -> Vec<Option<String>> {
        rows.iter()
            .map(|r| r.get(alias).and_then(|v| v.as_str()).map(String::from))
            .collect()
    }

    #[test]
    fn test_scalar_fields_make_one_row() {
        let doc = json!({"header": {"id": "123", "action": "A"}, "body": {"name": "x"}});
        let t = table(&[
            ("header.id", "id", TypeTag::String),
            ("body.name", "name", TypeTag::String),
            ("body.missing", "missing", TypeTag::String),
        ]);

        let rows = RowExpander::default().expand(&doc, &t).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&CellValue::String("123".into())));
        assert_eq!(rows[0].get("missing"), Some(&CellValue::Null));
        assert_eq!(rows[0].aliases(), &["id", "name", "missing"]);
    }

    #[test]
    fn test_single_axis_zips_siblings() {
        let doc = json!({
            "header": {"id": "order-001"},
            "body": {"items": [
                {"name": "Widget A", "quantity": 5},
                {"name": "Widget B", "quantity": 10},
                {"name": "Widget C", "quantity": 3}
            ]}
        });
        let t = table(&[
            ("header.id", "header_id", TypeTag::String),
            ("body.items[].name", "item_name", TypeTag::String),
            ("body.items[].quantity", "quantity", TypeTag::Integer),
        ]);

        let rows = RowExpander::default().expand(&doc, &t).unwrap();
        assert_eq!(rows.len(), 3);
        let pairs: Vec<_> = rows
            .iter()
            .map(|r| {
                (
                    r.get("item_name").and_then(|v| v.as_str()).unwrap().to_string(),
                    r.get("quantity").and_then(|v| v.as_i64()).unwrap(),
                )
            })
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("Widget A".to_string(), 5),
                ("Widget B".to_string(), 10),
                ("Widget C".to_string(), 3)
            ]
        );
        assert!(rows.iter().all(|r| r.get("header_id").and_then(|v| v.as_str()) == Some("order-001")));
    }

    #[test]
    fn test_independent_axes_cross_product() {
        let doc = json!({
            "products": [{"sku": "PROD-A"}, {"sku": "PROD-B"}, {"sku": "PROD-C"}],
            "customers": [{"id": "CUST-1"}, {"id": "CUST-2"}]
        });
        let t = table(&[
            ("products[].sku", "sku", TypeTag::String),
            ("customers[].id", "customer", TypeTag::String),
        ]);

        let rows = RowExpander::default().expand(&doc, &t).unwrap();
        assert_eq!(rows.len(), 6);
        for sku in ["PROD-A", "PROD-B", "PROD-C"] {
            let customers: Vec<_> = rows
                .iter()
                .filter(|r| r.get("sku").and_then(|v| v.as_str()) == Some(sku))
                .map(|r| r.get("customer").and_then(|v| v.as_str()).unwrap().to_string())
                .collect();
            assert_eq!(customers, vec!["CUST-1", "CUST-2"]);
        }
    }

    #[test]
    fn test_nested_axes() {
        let doc = json!({
            "orders": [
                {"orderId": "ORD-1", "items": [{"sku": "SKU-A"}, {"sku": "SKU-B"}]},
                {"orderId": "ORD-2", "items": [{"sku": "SKU-C"}]}
            ]
        });
        let t = table(&[
            ("orders[].orderId", "order_id", TypeTag::String),
            ("orders[].items[].sku", "sku", TypeTag::String),
        ]);

        let rows = RowExpander::default().expand(&doc, &t).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            strings(&rows, "order_id"),
            vec![Some("ORD-1".into()), Some("ORD-1".into()), Some("ORD-2".into())]
        );
        assert_eq!(
            strings(&rows, "sku"),
            vec![Some("SKU-A".into()), Some("SKU-B".into()), Some("SKU-C".into())]
        );
    }

    #[test]
    fn test_rows_follow_resolve_order() {
        let doc = json!({
            "orders": [
                {"items": [{"sku": "SKU-A"}, {"sku": "SKU-B"}]},
                {"items": [{"sku": "SKU-C"}]},
                {"items": [{"sku": "SKU-D"}, {"sku": "SKU-E"}]}
            ]
        });
        let t = table(&[("orders[].items[].sku", "sku", TypeTag::String)]);

        let rows = RowExpander::default().expand(&doc, &t).unwrap();
        let resolved: Vec<Option<String>> = t.fields[0]
            .source
            .resolve(&doc)
            .iter()
            .map(|r| r.value.as_str().map(String::from))
            .collect();
        assert_eq!(strings(&rows, "sku"), resolved);
    }

    #[test]
    fn test_empty_array_keeps_null_row() {
        let doc = json!({"header": {"id": "order-empty"}, "items": []});
        let t = table(&[
            ("header.id", "header_id", TypeTag::String),
            ("items[].name", "item_name", TypeTag::String),
        ]);

        let rows = RowExpander::default().expand(&doc, &t).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("header_id"), Some(&CellValue::String("order-empty".into())));
        assert_eq!(rows[0].get("item_name"), Some(&CellValue::Null));
    }

    #[test]
    fn test_empty_array_drop_policy() {
        let doc = json!({"header": {"id": "order-empty"}, "items": []});
        let t = table(&[
            ("header.id", "header_id", TypeTag::String),
            ("items[].name", "item_name", TypeTag::String),
        ]);

        let expander = RowExpander::new(Coercer::default(), EmptyArrayPolicy::DropRow, false);
        assert!(expander.expand(&doc, &t).unwrap().is_empty());
    }

    #[test]
    fn test_empty_inner_array_per_policy() {
        let doc = json!({
            "orders": [
                {"orderId": "ORD-EMPTY", "items": []},
                {"orderId": "ORD-FULL", "items": [{"sku": "SKU-X"}]}
            ]
        });
        let t = table(&[
            ("orders[].orderId", "order_id", TypeTag::String),
            ("orders[].items[].sku", "sku", TypeTag::String),
        ]);

        let keep = RowExpander::default().expand(&doc, &t).unwrap();
        assert_eq!(
            strings(&keep, "order_id"),
            vec![Some("ORD-EMPTY".into()), Some("ORD-FULL".into())]
        );
        assert_eq!(strings(&keep, "sku"), vec![None, Some("SKU-X".into())]);

        let drop = RowExpander::new(Coercer::default(), EmptyArrayPolicy::DropRow, false)
            .expand(&doc, &t)
            .unwrap();
        assert_eq!(strings(&drop, "order_id"), vec![Some("ORD-FULL".into())]);
    }

    #[test]
    fn test_deeply_nested_empty_arrays() {
        let t = table(&[
            ("header.action", "action", TypeTag::String),
            ("a[].b[].c[].value", "deep_value", TypeTag::String),
        ]);
        for doc in [
            json!({"header": {"action": "X"}, "a": []}),
            json!({"header": {"action": "X"}, "a": [{"b": []}]}),
            json!({"header": {"action": "X"}, "a": [{"b": [{"c": []}]}]}),
        ] {
            let rows = RowExpander::default().expand(&doc, &t).unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].get("deep_value"), Some(&CellValue::Null));
        }
    }

    #[test]
    fn test_array_of_scalars() {
        let doc = json!({"id": 1, "tags": ["rust", "json"]});
        let t = table(&[("id", "id", TypeTag::Integer), ("tags[]", "tag", TypeTag::String)]);
        let rows = RowExpander::default().expand(&doc, &t).unwrap();
        assert_eq!(strings(&rows, "tag"), vec![Some("rust".into()), Some("json".into())]);
    }

    #[test]
    fn test_strict_mismatch_aborts_document() {
        let doc = json!({"items": [{"price": "10.5"}, {"price": "$10.00"}]});
        let t = table(&[("items[].price", "price", TypeTag::Float)]);

        let err = RowExpander::default().expand(&doc, &t).unwrap_err();
        assert_eq!(
            err,
            UnfurlError::TypeMismatch {
                alias: "price".into(),
                raw: "\"$10.00\"".into(),
                expected: TypeTag::Float,
            }
        );
    }

    #[test]
    fn test_lenient_nulls_are_counted() {
        let doc = json!({"items": [{"qty": "abc"}, {"qty": "7"}, {"qty": null}]});
        let t = table(&[("items[].qty", "qty", TypeTag::Integer)]);
        let plan = AxisPlan::build(&t.fields);

        let expander = RowExpander::new(Coercer::default(), EmptyArrayPolicy::KeepRow, true);
        let expansion = expander.expand_planned(&doc, &t, &plan).unwrap();
        assert_eq!(
            expansion.rows,
            vec![vec![CellValue::Null], vec![CellValue::Integer(7)], vec![CellValue::Null]]
        );
        assert_eq!(expansion.null_coerced, 1);
    }

    #[test]
    fn test_row_serializes_as_map() {
        let row = Row::new(
            Arc::from(vec!["a".to_string(), "b".to_string()]),
            vec![CellValue::Integer(1), CellValue::Null],
        );
        assert_eq!(serde_json::to_value(&row).unwrap(), json!({"a": 1, "b": null}));
    }
}
