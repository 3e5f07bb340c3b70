mod support;

use quarry_common::QuarryError;
use quarry_planner::{
    explain_plan, AggFunction, AggregateCall, PlanBuilder, PlanNode, ScalarOp, Value,
};

use support::*;

#[test]
fn plan_json_round_trip_keeps_ids_and_shapes() {
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);
    let s = scan.schema().clone();
    let filter = b
        .filter(scan, cmp(ScalarOp::Eq, col(&s, 3), Value::Utf8("EU".into())))
        .unwrap();
    let agg = b
        .group_by(
            filter,
            &[1],
            vec![AggregateCall::new(AggFunction::Count, vec![], "n", &s).unwrap()],
        )
        .unwrap();

    let text = agg.to_json().unwrap();
    let back = PlanNode::from_json(&text).unwrap();
    assert_eq!(back, agg);
    assert_eq!(back.schema(), agg.schema());
    assert_eq!(explain_plan(&back), explain_plan(&agg));
}

#[test]
fn malformed_plan_json_is_rejected() {
    let mut b = PlanBuilder::new();
    let scan = scan_orders(&mut b);
    let s = scan.schema().clone();
    let filter = b
        .filter(scan, cmp(ScalarOp::Gt, col(&s, 0), Value::Int64(1)))
        .unwrap();
    // Point the predicate at a column the scan does not produce.
    let text = filter.to_json().unwrap().replace("\"index\": 0", "\"index\": 9");
    let err = PlanNode::from_json(&text).unwrap_err();
    assert!(matches!(err, QuarryError::InvalidShape(_)), "{err}");
}

#[test]
fn duplicate_node_ids_are_rejected() {
    let mut b = PlanBuilder::new();
    let left = scan_orders(&mut b);
    let mut again = PlanBuilder::new();
    let right = scan_orders(&mut again);
    let union = b.union(vec![left, right], true).unwrap();
    let err = PlanNode::from_json(&union.to_json().unwrap()).unwrap_err();
    assert!(matches!(err, QuarryError::InvalidShape(_)), "{err}");
}
