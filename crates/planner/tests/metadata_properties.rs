mod support;

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};
use proptest::prelude::*;
use quarry_common::{EngineConfig, QuarryError};
use quarry_planner::{
    AggFunction, AggregateCall, Collation, ColumnSet, FieldCollation, JoinType, MetadataQuery,
    PlanBuilder, ScalarExpr, ScalarOp, Value,
};

use support::*;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn scan_and_filter_row_counts_follow_statistics() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);
    let s = scan.schema().clone();
    let filter = b
        .filter(scan, cmp(ScalarOp::Eq, col(&s, 1), Value::Int64(7)))
        .unwrap();
    let mq = MetadataQuery::new(&filter, &cat, EngineConfig::default()).unwrap();

    let scan = filter.children()[0];
    assert_eq!(mq.tuple_count(scan).unwrap(), Some(1000.0));
    assert!(approx(mq.tuple_count(&filter).unwrap().unwrap(), 150.0));
    assert_eq!(mq.min_row_count(&filter).unwrap(), Some(0.0));
    assert_eq!(mq.max_row_count(&filter).unwrap(), Some(f64::INFINITY));
}

#[test]
fn unknown_statistics_use_configured_default() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let scan = scan_customers(&mut b);
    let config = EngineConfig {
        default_scan_row_count: 42.0,
        ..EngineConfig::default()
    };
    let mq = MetadataQuery::new(&scan, &cat, config).unwrap();
    assert_eq!(mq.tuple_count(&scan).unwrap(), Some(42.0));
}

#[test]
fn sort_fetch_bounds_row_counts() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);
    let sort = b
        .sort(scan, Collation(vec![FieldCollation::desc(2)]), Some(5), Some(10))
        .unwrap();
    let mq = MetadataQuery::new(&sort, &cat, EngineConfig::default()).unwrap();
    assert_eq!(mq.tuple_count(&sort).unwrap(), Some(10.0));
    assert_eq!(mq.max_row_count(&sort).unwrap(), Some(10.0));
    assert_eq!(mq.collations(&sort).unwrap(), Some(vec![Collation(vec![FieldCollation::desc(2)])]));
}

#[test]
fn cumulative_cost_adds_children() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);
    let s = scan.schema().clone();
    let filter = b
        .filter(scan, cmp(ScalarOp::Gt, col(&s, 2), Value::Float64(10.0)))
        .unwrap();
    let project = b
        .project(filter, vec![(col(&s, 0), "id".to_string())])
        .unwrap();
    let mq = MetadataQuery::new(&project, &cat, EngineConfig::default()).unwrap();

    let filter = project.children()[0];
    let scan = filter.children()[0];
    let own = mq.non_cumulative_cost(&project).unwrap().unwrap();
    let below = mq.cumulative_cost(filter).unwrap().unwrap();
    let total = mq.cumulative_cost(&project).unwrap().unwrap();
    assert!(approx(total.cpu, own.cpu + below.cpu));
    assert!(approx(total.rows, own.rows + below.rows));

    let scan_cost = mq.cumulative_cost(scan).unwrap().unwrap();
    assert_eq!(scan_cost, mq.non_cumulative_cost(scan).unwrap().unwrap());
    assert!(approx(scan_cost.cpu, 1001.0));
}

#[test]
fn grouping_yields_unique_keys() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);
    let s = scan.schema().clone();
    let agg = b
        .group_by(
            scan,
            &[1],
            vec![AggregateCall::new(AggFunction::Sum, vec![2], "total", &s).unwrap()],
        )
        .unwrap();
    let mq = MetadataQuery::new(&agg, &cat, EngineConfig::default()).unwrap();

    assert_eq!(mq.are_columns_unique(&agg, &ColumnSet::of(&[0]), false).unwrap(), Some(true));
    assert_eq!(
        mq.unique_keys(&agg, false).unwrap().unwrap().into_iter().collect::<Vec<_>>(),
        vec![ColumnSet::of(&[0])]
    );
    // 50 customers from the statistics.
    let groups = mq.tuple_count(&agg).unwrap().unwrap();
    assert!(groups > 0.0 && groups <= 50.0);

    let scan = agg.children()[0];
    assert_eq!(mq.are_columns_unique(scan, &ColumnSet::of(&[0, 1]), false).unwrap(), Some(true));
    assert_eq!(mq.are_columns_unique(scan, &ColumnSet::of(&[1]), false).unwrap(), Some(false));
}

#[test]
fn grouping_on_a_subset_cannot_prove_duplicates() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);
    let agg = b.group_by(scan, &[1, 3], vec![]).unwrap();
    let mq = MetadataQuery::new(&agg, &cat, EngineConfig::default()).unwrap();

    // `customer` repeats in orders, but per (customer, region) group it may not.
    assert_eq!(mq.are_columns_unique(&agg, &ColumnSet::of(&[0]), false).unwrap(), None);
    assert_eq!(mq.are_columns_unique(&agg, &ColumnSet::of(&[0, 1]), false).unwrap(), Some(true));
}

#[test]
fn values_requests_beyond_row_width_are_unknown() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)]));
    let values = b
        .values(schema, vec![vec![Value::Int64(1)], vec![Value::Int64(1)]])
        .unwrap();
    let mq = MetadataQuery::new(&values, &cat, EngineConfig::default()).unwrap();

    assert_eq!(mq.distinct_row_count(&values, &ColumnSet::of(&[5]), None).unwrap(), None);
    assert_eq!(mq.are_columns_unique(&values, &ColumnSet::of(&[3]), false).unwrap(), None);
    assert_eq!(mq.distinct_row_count(&values, &ColumnSet::of(&[0]), None).unwrap(), Some(1.0));
    assert_eq!(mq.are_columns_unique(&values, &ColumnSet::of(&[0]), false).unwrap(), Some(false));
}

#[test]
fn empty_grouping_set_counts_one_row_over_empty_input() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, true)]));
    let values = b.values(schema.clone(), vec![]).unwrap();
    let count = AggregateCall::new(AggFunction::Count, vec![], "n", &schema).unwrap();
    let rollup = b
        .aggregate(values, vec![ColumnSet::of(&[0]), ColumnSet::empty()], vec![count], false)
        .unwrap();
    let mq = MetadataQuery::new(&rollup, &cat, EngineConfig::default()).unwrap();

    assert_eq!(mq.max_row_count(&rollup).unwrap(), Some(1.0));
    assert_eq!(mq.min_row_count(&rollup).unwrap(), Some(1.0));
    assert_eq!(mq.tuple_count(&rollup).unwrap(), Some(1.0));
}

#[test]
fn same_table_scanned_twice_gets_two_occurrences() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let left = scan_orders(&mut b);
    let right = scan_orders(&mut b);
    let ls = left.schema().clone();
    let width = ls.fields().len();
    let condition = ScalarExpr::binary(
        ScalarOp::Eq,
        col(&ls, 1),
        ScalarExpr::input_ref(width, quarry_planner::SqlType::int64(false)),
    )
    .unwrap();
    let join = b.join(left, right, condition, JoinType::Inner).unwrap();
    let mq = MetadataQuery::new(&join, &cat, EngineConfig::default()).unwrap();

    let tables = mq.table_references(&join).unwrap().unwrap();
    let numbers: Vec<_> = tables.iter().map(|t| t.entity_number).collect();
    assert_eq!(numbers, vec![0, 1]);
    assert!(tables.iter().all(|t| t.qualified_name == "sales.orders"));

    let left_origin = mq.column_origin(&join, 1).unwrap().unwrap();
    let right_origin = mq.column_origin(&join, width).unwrap().unwrap();
    assert_eq!(left_origin.column, 1);
    assert_eq!(right_origin.column, 0);
    assert_ne!(left_origin.table, right_origin.table);
}

#[test]
fn computed_projection_origins_are_derived() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);
    let s = scan.schema().clone();
    let doubled = ScalarExpr::binary(ScalarOp::Multiply, col(&s, 2), ScalarExpr::literal(Value::Float64(2.0))).unwrap();
    let project = b
        .project(scan, vec![(col(&s, 0), "id".into()), (doubled, "twice".into())])
        .unwrap();
    let mq = MetadataQuery::new(&project, &cat, EngineConfig::default()).unwrap();

    let id = mq.column_origin(&project, 0).unwrap().unwrap();
    assert!(!id.derived);
    let twice = mq.column_origin(&project, 1).unwrap().unwrap();
    assert!(twice.derived);
    assert_eq!(twice.column, 2);

    let lineage = mq
        .expression_lineage(&project, &ScalarExpr::input_ref(1, quarry_planner::SqlType::float64(true)))
        .unwrap()
        .unwrap();
    assert_eq!(lineage.len(), 1);
    assert!(lineage[0].to_string().contains("[sales.orders]:0"));
}

#[test]
fn foreign_node_is_a_metadata_error() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);
    let mut other = PlanBuilder::new();
    let stranger = scan_orders(&mut other);
    let mq = MetadataQuery::new(&scan, &cat, EngineConfig::default()).unwrap();
    let err = mq.tuple_count(&stranger).unwrap_err();
    assert!(matches!(err, QuarryError::Metadata(_)), "{err}");
}

#[test]
fn repeated_requests_are_memoized() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);
    let mq = MetadataQuery::new(&scan, &cat, EngineConfig::default()).unwrap();
    mq.tuple_count(&scan).unwrap();
    let after_first = mq.cached_entries();
    mq.tuple_count(&scan).unwrap();
    assert_eq!(mq.cached_entries(), after_first);
    assert!(after_first >= 3);

    let uncached = EngineConfig {
        metadata_cache_enabled: false,
        ..EngineConfig::default()
    };
    let mq = MetadataQuery::new(&scan, &cat, uncached).unwrap();
    assert_eq!(mq.tuple_count(&scan).unwrap(), Some(1000.0));
    assert_eq!(mq.cached_entries(), 0);
}

#[test]
fn memory_stops_at_phase_transitions() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);
    let exchange = b
        .exchange(scan, quarry_planner::Distribution::hash(vec![1], Some(8)))
        .unwrap();
    let sort = b
        .sort(exchange, Collation(vec![FieldCollation::asc(0)]), None, None)
        .unwrap();
    let mq = MetadataQuery::new(&sort, &cat, EngineConfig::default()).unwrap();

    let exchange = sort.children()[0];
    assert_eq!(mq.is_phase_transition(exchange).unwrap(), Some(true));
    assert_eq!(mq.is_phase_transition(&sort).unwrap(), Some(false));
    assert_eq!(mq.split_count(&sort).unwrap(), Some(8));
    let memory = mq.memory(&sort).unwrap().unwrap();
    assert!(memory > 0.0);
    assert_eq!(mq.cumulative_memory_within_phase(&sort).unwrap(), Some(memory));
    assert_eq!(
        mq.cumulative_memory_within_phase_split(&sort).unwrap(),
        Some(memory / 8.0)
    );
}

fn comparison() -> impl Strategy<Value = (usize, ScalarOp, i64)> {
    (
        prop_oneof![Just(0usize), Just(1usize)],
        prop_oneof![
            Just(ScalarOp::Eq),
            Just(ScalarOp::NotEq),
            Just(ScalarOp::Lt),
            Just(ScalarOp::GtEq),
        ],
        -100i64..100,
    )
}

proptest! {
    #[test]
    fn selectivity_stays_in_unit_interval(conjuncts in prop::collection::vec(comparison(), 1..6)) {
        let cat = catalog();
        let mut b = PlanBuilder::new();
        let scan = scan_orders(&mut b);
        let s = scan.schema().clone();
        let exprs: Vec<ScalarExpr> = conjuncts
            .iter()
            .map(|(c, op, v)| cmp(*op, col(&s, *c), Value::Int64(*v)))
            .collect();
        let predicate = ScalarExpr::and_all(exprs).unwrap();
        let filter = b.filter(scan, predicate.clone()).unwrap();
        let mq = MetadataQuery::new(&filter, &cat, EngineConfig::default()).unwrap();

        let sel = mq.selectivity(&filter, Some(&predicate)).unwrap().unwrap();
        prop_assert!((0.0..=1.0).contains(&sel));
        let scan = filter.children()[0];
        let sel = mq.selectivity(scan, Some(&predicate)).unwrap().unwrap();
        prop_assert!((0.0..=1.0).contains(&sel));
    }

    #[test]
    fn tuple_count_is_within_bounds(offset in prop::option::of(0usize..2000), fetch in prop::option::of(0usize..2000)) {
        let cat = catalog();
        let mut b = PlanBuilder::new();
        let scan = scan_orders(&mut b);
        let sort = b.sort(scan, Collation::empty(), offset, fetch).unwrap();
        let mq = MetadataQuery::new(&sort, &cat, EngineConfig::default()).unwrap();

        let rows = mq.tuple_count(&sort).unwrap().unwrap();
        let min = mq.min_row_count(&sort).unwrap().unwrap_or(0.0);
        let max = mq.max_row_count(&sort).unwrap().unwrap_or(f64::INFINITY);
        prop_assert!(min <= rows && rows <= max, "{min} <= {rows} <= {max}");
    }
}
