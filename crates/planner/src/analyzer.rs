//! Plan-shape analysis: cache signatures, referenced columns and partition filters.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use quarry_common::{global_metrics, ColumnId, NodeId};
use tracing::debug;

use crate::catalog::{CatalogReader, TableDescriptor};
use crate::expr::{ScalarExpr, ScalarOp};
use crate::plan::{Operator, PlanNode};

/// Walks operator plans once and records their shape.
///
/// The catalog is consulted for scanned tables; lookup failures are skipped,
/// never surfaced as errors.
pub struct PlanShapeAnalyzer<'a> {
    catalog: &'a dyn CatalogReader,
}

impl std::fmt::Debug for PlanShapeAnalyzer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanShapeAnalyzer").finish_non_exhaustive()
    }
}

/// Result of one [`PlanShapeAnalyzer::analyze`] pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanShape {
    signature: BTreeSet<String>,
    available_columns: IndexMap<ColumnId, String>,
    used_positions: Vec<usize>,
    tables: Vec<String>,
    partition_values: BTreeMap<NodeId, BTreeSet<String>>,
}

impl<'a> PlanShapeAnalyzer<'a> {
    pub fn new(catalog: &'a dyn CatalogReader) -> Self {
        Self { catalog }
    }

    pub fn analyze(&self, plan: &PlanNode) -> PlanShape {
        let mut shape = PlanShape::default();
        plan.walk(&mut |node, depth| self.visit(node, depth, &mut shape));
        debug!(
            tokens = shape.signature.len(),
            available_columns = shape.available_columns.len(),
            partitioned_scans = shape.partition_values.len(),
            "plan shape analyzed"
        );
        shape
    }

    fn visit(&self, node: &PlanNode, depth: usize, shape: &mut PlanShape) {
        let token = match node.op() {
            Operator::Scan { table, .. } => {
                let qualified = table.qualified_name();
                shape.tables.push(qualified.clone());
                match self.catalog.table(table.id) {
                    Ok(desc) => shape.add_available_columns(&desc),
                    Err(e) => debug!(table = %qualified, error = %e, "no catalog entry for scanned table"),
                }
                format!("Scan#{qualified}")
            }
            Operator::Values { row_shape, .. } => format!("Values#{}", row_shape.fields().len()),
            Operator::Filter { input, predicate } => {
                predicate.input_ref_occurrences(&mut shape.used_positions);
                self.collect_partition_values(input, predicate, shape);
                format!("Filter#{}", predicate.skeleton())
            }
            Operator::Project { exprs, .. } => {
                for e in exprs {
                    e.input_ref_occurrences(&mut shape.used_positions);
                }
                let skeletons = exprs.iter().map(|e| e.skeleton()).collect::<Vec<_>>();
                format!("Project#{}#{}", exprs.len(), skeletons.join(";"))
            }
            Operator::Aggregate {
                grouping_sets,
                calls,
                indicator,
                ..
            } => {
                let sets = grouping_sets
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                let calls = calls
                    .iter()
                    .map(|c| c.descriptor())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("Aggregate#{sets}#{calls}#{indicator}")
            }
            Operator::Join {
                left,
                right,
                condition,
                join_type,
            } => {
                condition.input_ref_occurrences(&mut shape.used_positions);
                match (left.scan_table(), right.scan_table()) {
                    (Some(l), Some(r)) => format!(
                        "Join#{join_type:?}#{}#{}",
                        l.qualified_name(),
                        r.qualified_name()
                    ),
                    _ => format!("Join#{join_type:?}#{}", condition.skeleton()),
                }
            }
            Operator::Union { all, .. } => format!("Union#{all}"),
            Operator::Intersect { all, .. } => format!("Intersect#{all}"),
            Operator::Minus { all, .. } => format!("Minus#{all}"),
            Operator::Sort {
                collation,
                offset,
                fetch,
                ..
            } => format!(
                "Sort#{collation}#{}#{}",
                if offset.is_some() { "offset" } else { "" },
                if fetch.is_some() { "fetch" } else { "" }
            ),
            Operator::Exchange { distribution, .. } => {
                format!("Exchange#{}", distribution.kind.short_name())
            }
            Operator::Other { name, .. } => format!("Other#{name}"),
        };
        shape.signature.insert(format!("{depth}:{token}"));
    }

    fn collect_partition_values(
        &self,
        input: &PlanNode,
        predicate: &ScalarExpr,
        shape: &mut PlanShape,
    ) {
        let Some(table) = input.scan_table() else {
            return;
        };
        let desc = match self.catalog.table(table.id) {
            Ok(desc) => desc,
            Err(e) => {
                debug!(table = %table.qualified_name(), error = %e, "partition analysis skipped");
                return;
            }
        };
        let Some(column) = desc.partition_column_index() else {
            debug!(table = %table.qualified_name(), "table not partitioned");
            return;
        };

        let mut visitor = PartitionPredicateVisitor::new(column);
        visitor.visit(predicate);
        if visitor.unsupported {
            debug!(
                table = %table.qualified_name(),
                predicate = %predicate,
                "unsupported predicate shape for partition pruning"
            );
            return;
        }
        if visitor.values.is_empty() {
            return;
        }
        global_metrics().record_partition_filter(&table.qualified_name(), visitor.values.len() as u64);
        shape
            .partition_values
            .entry(input.id())
            .or_default()
            .extend(visitor.values);
    }
}

impl PlanShape {
    fn add_available_columns(&mut self, desc: &TableDescriptor) {
        for (i, id) in desc.column_ids.iter().enumerate() {
            if let Some(name) = desc.qualified_column_name(i) {
                self.available_columns.entry(*id).or_insert(name);
            }
        }
    }

    /// Sorted, depth-prefixed structural tokens. Literal values never appear.
    pub fn signature(&self) -> &BTreeSet<String> {
        &self.signature
    }

    /// Plan-cache key: the joined signature.
    pub fn query_name(&self) -> String {
        let tokens = self.signature.iter().cloned().collect::<Vec<_>>();
        format!("[{}]", tokens.join(", "))
    }

    /// Every column of every scanned table, in first-seen order.
    pub fn available_columns(&self) -> &IndexMap<ColumnId, String> {
        &self.available_columns
    }

    /// Columns read by filter, project and join expressions.
    ///
    /// Expression positions are matched against the available-column order;
    /// positions beyond it are dropped. When no positions were recorded, every
    /// available column is returned.
    pub fn used_columns(&self) -> IndexMap<ColumnId, String> {
        if self.available_columns.is_empty() {
            return IndexMap::new();
        }
        if self.used_positions.is_empty() {
            return self.available_columns.clone();
        }
        let used = self.used_positions.iter().copied().collect::<BTreeSet<_>>();
        self.available_columns
            .iter()
            .enumerate()
            .filter(|(i, _)| used.contains(i))
            .map(|(_, (id, name))| (*id, name.clone()))
            .collect()
    }

    /// Qualified names of scanned tables, one per scan.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Literal partition-column values per scan node.
    pub fn partition_values(&self) -> &BTreeMap<NodeId, BTreeSet<String>> {
        &self.partition_values
    }
}

/// Collects literals pinned to one partition column by a conjunctive predicate.
struct PartitionPredicateVisitor {
    column: usize,
    values: BTreeSet<String>,
    unsupported: bool,
}

impl PartitionPredicateVisitor {
    fn new(column: usize) -> Self {
        Self {
            column,
            values: BTreeSet::new(),
            unsupported: false,
        }
    }

    fn is_partition_ref(&self, e: &ScalarExpr) -> bool {
        e.as_input_ref() == Some(self.column)
    }

    fn mentions_partition(&self, e: &ScalarExpr) -> bool {
        e.referenced_inputs().contains(&self.column)
    }

    fn visit(&mut self, e: &ScalarExpr) {
        let Some((op, operands)) = e.as_call() else {
            return;
        };
        match (op, operands) {
            (ScalarOp::And, _) => operands.iter().for_each(|o| self.visit(o)),
            (ScalarOp::Or, _) => self.unsupported = true,
            (ScalarOp::Eq, [l, r]) => {
                let bound = if self.is_partition_ref(l) {
                    r.as_literal()
                } else if self.is_partition_ref(r) {
                    l.as_literal()
                } else {
                    if self.mentions_partition(e) {
                        self.unsupported = true;
                    }
                    return;
                };
                match bound {
                    Some(v) if !v.is_null() => {
                        self.values.insert(v.to_string());
                    }
                    _ => self.unsupported = true,
                }
            }
            (ScalarOp::In, [probe, candidates @ ..]) if self.is_partition_ref(probe) => {
                for c in candidates {
                    match c.as_literal() {
                        Some(v) if !v.is_null() => {
                            self.values.insert(v.to_string());
                        }
                        _ => self.unsupported = true,
                    }
                }
            }
            _ => {
                if self.mentions_partition(e) {
                    self.unsupported = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema};
    use quarry_common::{QuarryError, Result, TableId};

    use super::*;
    use crate::plan::{PlanBuilder, TableRef};
    use crate::types::Value;

    struct Catalog(HashMap<TableId, TableDescriptor>);

    impl CatalogReader for Catalog {
        fn table(&self, id: TableId) -> Result<TableDescriptor> {
            self.0
                .get(&id)
                .cloned()
                .ok_or_else(|| QuarryError::Planning(format!("unknown table {id}")))
        }
    }

    fn descriptor(id: u64, name: &str, partitioned: bool) -> TableDescriptor {
        TableDescriptor {
            table: TableRef::new(TableId(id), "public", name),
            column_ids: vec![ColumnId(id * 10), ColumnId(id * 10 + 1)],
            schema: Arc::new(Schema::new(vec![
                Field::new("id", DataType::Int64, false),
                Field::new("region", DataType::Utf8, false),
            ])),
            partition_column: partitioned.then_some(ColumnId(id * 10 + 1)),
            unique_keys: vec![],
            collation: Default::default(),
            distribution: None,
        }
    }

    fn catalog() -> Catalog {
        Catalog(HashMap::from([
            (TableId(1), descriptor(1, "orders", true)),
            (TableId(2), descriptor(2, "users", false)),
        ]))
    }

    fn filtered_scan(table: u64, predicate: impl Fn(&Schema) -> ScalarExpr) -> PlanNode {
        let desc = descriptor(table, if table == 1 { "orders" } else { "users" }, table == 1);
        let mut b = PlanBuilder::new();
        let scan = b.scan(desc.table.clone(), desc.schema.clone()).unwrap();
        let pred = predicate(&desc.schema);
        b.filter(scan, pred).unwrap()
    }

    fn region_eq(s: &Schema, v: &str) -> ScalarExpr {
        ScalarExpr::binary(
            ScalarOp::Eq,
            ScalarExpr::column(s, 1).unwrap(),
            ScalarExpr::literal(Value::Utf8(v.into())),
        )
        .unwrap()
    }

    #[test]
    fn equality_on_partition_column_is_collected() {
        let cat = catalog();
        let plan = filtered_scan(1, |s| region_eq(s, "X"));
        let shape = PlanShapeAnalyzer::new(&cat).analyze(&plan);
        let scan_id = plan.children()[0].id();
        assert_eq!(
            shape.partition_values().get(&scan_id),
            Some(&BTreeSet::from(["X".to_string()]))
        );
    }

    #[test]
    fn non_partitioned_table_has_no_entry() {
        let cat = catalog();
        let plan = filtered_scan(2, |s| region_eq(s, "X"));
        let shape = PlanShapeAnalyzer::new(&cat).analyze(&plan);
        assert!(shape.partition_values().is_empty());
    }

    #[test]
    fn disjunction_is_unsupported() {
        let cat = catalog();
        let plan = filtered_scan(1, |s| {
            ScalarExpr::call(ScalarOp::Or, vec![region_eq(s, "X"), region_eq(s, "Y")]).unwrap()
        });
        let shape = PlanShapeAnalyzer::new(&cat).analyze(&plan);
        assert!(shape.partition_values().is_empty());
    }

    #[test]
    fn in_list_and_conjunction_collect_all_values() {
        let cat = catalog();
        let plan = filtered_scan(1, |s| {
            let in_list = ScalarExpr::call(
                ScalarOp::In,
                vec![
                    ScalarExpr::column(s, 1).unwrap(),
                    ScalarExpr::literal(Value::Utf8("A".into())),
                    ScalarExpr::literal(Value::Utf8("B".into())),
                ],
            )
            .unwrap();
            let id_gt = ScalarExpr::binary(
                ScalarOp::Gt,
                ScalarExpr::column(s, 0).unwrap(),
                ScalarExpr::literal(Value::Int64(5)),
            )
            .unwrap();
            ScalarExpr::and_all(vec![in_list, id_gt]).unwrap()
        });
        let shape = PlanShapeAnalyzer::new(&cat).analyze(&plan);
        let values = shape.partition_values().values().next().unwrap();
        assert_eq!(values.iter().cloned().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn range_on_partition_column_is_unsupported() {
        let cat = catalog();
        let plan = filtered_scan(1, |s| {
            ScalarExpr::binary(
                ScalarOp::Gt,
                ScalarExpr::column(s, 1).unwrap(),
                ScalarExpr::literal(Value::Utf8("M".into())),
            )
            .unwrap()
        });
        let shape = PlanShapeAnalyzer::new(&cat).analyze(&plan);
        assert!(shape.partition_values().is_empty());
    }

    #[test]
    fn literals_do_not_change_signature() {
        let cat = catalog();
        let a = PlanShapeAnalyzer::new(&cat).analyze(&filtered_scan(1, |s| region_eq(s, "X")));
        let b = PlanShapeAnalyzer::new(&cat).analyze(&filtered_scan(1, |s| region_eq(s, "Y")));
        assert_eq!(a.query_name(), b.query_name());

        let c = PlanShapeAnalyzer::new(&cat).analyze(&filtered_scan(2, |s| region_eq(s, "X")));
        assert_ne!(a.query_name(), c.query_name());
    }

    #[test]
    fn used_columns_follow_available_order_and_drop_overflow() {
        let cat = catalog();
        let plan = filtered_scan(1, |s| region_eq(s, "X"));
        let shape = PlanShapeAnalyzer::new(&cat).analyze(&plan);
        assert_eq!(shape.available_columns().len(), 2);
        let used = shape.used_columns();
        assert_eq!(
            used.into_iter().collect::<Vec<_>>(),
            vec![(ColumnId(11), "public.orders.region".to_string())]
        );

        let mut overflow = shape.clone();
        overflow.used_positions = vec![5];
        assert!(overflow.used_columns().is_empty());

        let mut none = shape;
        none.used_positions.clear();
        assert_eq!(none.used_columns().len(), 2);
    }
}
