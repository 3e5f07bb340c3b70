mod support;

use std::sync::Arc;

use quarry_common::EngineConfig;
use quarry_planner::{
    default_handlers, HandlerTable, MetadataArgs, MetadataKind, MetadataQuery, MetadataValue,
    OperatorKind, PlanBuilder, PlanNode,
};

use support::*;

fn fixed_rows(rows: f64) -> quarry_planner::MetadataHandler {
    Arc::new(move |_: &MetadataQuery<'_>, _: &PlanNode, _: &MetadataArgs| {
        Ok(Some(MetadataValue::Number(rows)))
    })
}

#[test]
fn custom_handler_overrides_builtin_rule() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);

    let mut table = (*default_handlers()).clone();
    assert!(table.register(OperatorKind::Scan, MetadataKind::TupleCount, fixed_rows(7.0)));
    let mq = MetadataQuery::with_handlers(&scan, &cat, EngineConfig::default(), Arc::new(table)).unwrap();
    assert_eq!(mq.tuple_count(&scan).unwrap(), Some(7.0));

    // The shared table is untouched.
    let mq = MetadataQuery::new(&scan, &cat, EngineConfig::default()).unwrap();
    assert_eq!(mq.tuple_count(&scan).unwrap(), Some(1000.0));
}

#[test]
fn deregistered_rule_falls_back_per_kind() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);
    let sort = b
        .sort(scan, quarry_planner::Collation::empty(), None, Some(3))
        .unwrap();

    let mut table = (*default_handlers()).clone();
    assert!(table.deregister(OperatorKind::Sort, MetadataKind::TupleCount));
    assert!(!table.deregister(OperatorKind::Sort, MetadataKind::TupleCount));
    let mq = MetadataQuery::with_handlers(&sort, &cat, EngineConfig::default(), Arc::new(table)).unwrap();
    // Fallback passes the input estimate through; the max bound still applies.
    assert_eq!(mq.tuple_count(&sort).unwrap(), Some(3.0));
    assert_eq!(mq.max_row_count(&sort).unwrap(), Some(3.0));
}

#[test]
fn empty_table_resolves_nothing() {
    let cat = catalog();
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);
    let mq = MetadataQuery::with_handlers(&scan, &cat, EngineConfig::default(), Arc::new(HandlerTable::new()))
        .unwrap();
    for kind in MetadataKind::ALL {
        assert_eq!(mq.request(&scan, kind, MetadataArgs::None).unwrap(), None, "{kind}");
    }
}

#[test]
fn fallback_registration_reports_replacement() {
    let mut table = HandlerTable::new();
    assert!(!table.register_fallback(MetadataKind::Memory, fixed_rows(1.0)));
    assert!(table.register_fallback(MetadataKind::Memory, fixed_rows(2.0)));
    assert!(table.lookup(OperatorKind::Join, MetadataKind::Memory).is_some());
    assert!(table.lookup(OperatorKind::Join, MetadataKind::Selectivity).is_none());
}
