//! Axis alignment: a pre-computed extraction plan for one table
//!
//! Every `[]` in a field's source path opens an array axis. Fields that share
//! an axis prefix are zipped (they read the same element), an axis whose
//! prefix extends another one is nested beneath it, and axes with no common
//! prefix are independent and combine by cartesian product.
//!
//! The plan is built once per table so that row expansion never has to
//! compare paths at runtime.

use crate::unfurl::config::FieldSpec;
use crate::unfurl::path::{PathExpression, Step};

/// A field bound relative to the node that owns it
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSlot {
    /// Position of the field in the table's column order
    pub column: usize,
    /// Key steps from the owning element (or document root) to the value
    pub leaf: Vec<Step>,
}

/// One array axis and everything that depends on it
#[derive(Debug, Clone, PartialEq)]
pub struct AxisNode {
    /// Full path up to and including this axis's `[]`
    pub prefix: PathExpression,
    /// Key steps from the parent element (or root) to the array
    pub relative: Vec<Step>,
    /// Fields whose deepest axis is this one
    pub fields: Vec<FieldSlot>,
    /// Axes nested inside this array's elements
    pub children: Vec<AxisNode>,
}

impl AxisNode {
    fn new(prefix: PathExpression, relative: Vec<Step>) -> Self {
        AxisNode {
            prefix,
            relative,
            fields: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Every column produced by this axis and the axes beneath it
    pub fn columns(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self.fields.iter().map(|f| f.column).collect();
        for child in &self.children {
            out.extend(child.columns());
        }
        out
    }
}

/// Fields sharing one `[]`-terminated prefix
#[derive(Debug, Clone, PartialEq)]
pub struct AxisGroup {
    pub prefix: PathExpression,
    /// Column indices of the fields whose deepest axis is `prefix`
    pub fields: Vec<usize>,
    /// Prefix of the enclosing axis, `None` for top-level axes
    pub parent: Option<PathExpression>,
}

/// Complete plan for a table
#[derive(Debug, Clone, PartialEq)]
pub struct AxisPlan {
    /// Fields that cross no array, evaluated once per document
    pub scalar_fields: Vec<FieldSlot>,
    /// Independent top-level axes
    pub axes: Vec<AxisNode>,
    /// Number of columns in the table
    pub width: usize,
}

impl AxisPlan {
    /// Align a table's fields into axes; order follows first field appearance
    pub fn build(fields: &[FieldSpec]) -> Self {
        let mut scalar_fields = Vec::new();
        let mut axes = Vec::new();

        for (column, field) in fields.iter().enumerate() {
            let steps = field.source.steps();
            let positions = field.source.iterate_positions();

            if positions.is_empty() {
                scalar_fields.push(FieldSlot {
                    column,
                    leaf: steps.to_vec(),
                });
            } else {
                insert_field(&mut axes, steps, &positions, 0, column);
            }
        }

        AxisPlan {
            scalar_fields,
            axes,
            width: fields.len(),
        }
    }

    /// Flattened view of the axis tree, parents before children
    pub fn groups(&self) -> Vec<AxisGroup> {
        let mut out = Vec::new();
        for axis in &self.axes {
            collect_groups(axis, None, &mut out);
        }
        out
    }

    /// Whether the table touches any array
    pub fn is_scalar(&self) -> bool {
        self.axes.is_empty()
    }
}

/// Group the fields of a table by the array axes they traverse
pub fn align(fields: &[FieldSpec]) -> Vec<AxisGroup> {
    AxisPlan::build(fields).groups()
}

fn insert_field(nodes: &mut Vec<AxisNode>, steps: &[Step], positions: &[usize], start: usize, column: usize) {
    let Some((&pos, deeper)) = positions.split_first() else {
        return;
    };

    let prefix = &steps[..=pos];
    let idx = match nodes.iter().position(|n| n.prefix.steps() == prefix) {
        Some(idx) => idx,
        None => {
            nodes.push(AxisNode::new(
                PathExpression::from_steps(prefix.to_vec()),
                steps[start..pos].to_vec(),
            ));
            nodes.len() - 1
        }
    };
    let node = &mut nodes[idx];

    if deeper.is_empty() {
        node.fields.push(FieldSlot {
            column,
            leaf: steps[pos + 1..].to_vec(),
        });
    } else {
        insert_field(&mut node.children, steps, deeper, pos + 1, column);
    }
}

fn collect_groups(node: &AxisNode, parent: Option<&PathExpression>, out: &mut Vec<AxisGroup>) {
    out.push(AxisGroup {
        prefix: node.prefix.clone(),
        fields: node.fields.iter().map(|f| f.column).collect(),
        parent: parent.cloned(),
    });
    for child in &node.children {
        collect_groups(child, Some(&node.prefix), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unfurl::coerce::TypeTag;

    fn fields(sources: &[&str]) -> Vec<FieldSpec> {
        sources
            .iter()
            .enumerate()
            .map(|(i, s)| FieldSpec::new(s, format!("f{}", i), TypeTag::String).unwrap())
            .collect()
    }

    #[test]
    fn test_scalar_only() {
        let plan = AxisPlan::build(&fields(&["header.id", "header.action"]));
        assert!(plan.is_scalar());
        assert_eq!(plan.scalar_fields.len(), 2);
        assert_eq!(plan.width, 2);
    }

    #[test]
    fn test_siblings_share_one_axis() {
        let groups = align(&fields(&["header.id", "body.items[].sku", "body.items[].price"]));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].prefix.to_string(), "body.items[]");
        assert_eq!(groups[0].fields, vec![1, 2]);
        assert_eq!(groups[0].parent, None);
    }

    #[test]
    fn test_independent_axes() {
        let plan = AxisPlan::build(&fields(&["products[].sku", "customers[].id", "products[].name"]));
        assert_eq!(plan.axes.len(), 2);
        assert_eq!(plan.axes[0].prefix.to_string(), "products[]");
        assert_eq!(plan.axes[0].columns(), vec![0, 2]);
        assert_eq!(plan.axes[1].prefix.to_string(), "customers[]");
    }

    #[test]
    fn test_nested_axes() {
        let plan = AxisPlan::build(&fields(&[
            "body.orders[].orderId",
            "body.orders[].items[].sku",
            "body.orders[].items[].price",
        ]));

        assert_eq!(plan.axes.len(), 1);
        let orders = &plan.axes[0];
        assert_eq!(
            orders.relative,
            vec![Step::Key("body".into()), Step::Key("orders".into())]
        );
        assert_eq!(orders.fields[0].leaf, vec![Step::Key("orderId".into())]);

        let items = &orders.children[0];
        assert_eq!(items.prefix.to_string(), "body.orders[].items[]");
        assert_eq!(items.relative, vec![Step::Key("items".into())]);
        assert_eq!(items.columns(), vec![1, 2]);

        let groups = plan.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].parent.as_ref().map(|p| p.to_string()), Some("body.orders[]".into()));
    }

    #[test]
    fn test_nested_axis_without_own_fields() {
        let plan = AxisPlan::build(&fields(&["a[].b[].c[].value"]));
        let a = &plan.axes[0];
        assert!(a.fields.is_empty());
        let c = &a.children[0].children[0];
        assert_eq!(c.prefix.to_string(), "a[].b[].c[]");
        assert_eq!(c.fields[0].leaf, vec![Step::Key("value".into())]);
    }

    #[test]
    fn test_scalar_array_elements() {
        let plan = AxisPlan::build(&fields(&["tags[]"]));
        assert!(plan.axes[0].fields[0].leaf.is_empty());
    }
}
