use crate::plan::{Operator, PlanNode};

/// Render an operator plan as human-readable multiline text.
pub fn explain_plan(plan: &PlanNode) -> String {
    explain_plan_with(plan, &|_| None)
}

/// Like [`explain_plan`], appending `annotate(node)` to each node header when present.
pub fn explain_plan_with(plan: &PlanNode, annotate: &dyn Fn(&PlanNode) -> Option<String>) -> String {
    let mut s = String::new();
    fmt_plan(plan, 0, annotate, &mut s);
    s
}

fn fmt_plan(
    plan: &PlanNode,
    indent: usize,
    annotate: &dyn Fn(&PlanNode) -> Option<String>,
    out: &mut String,
) {
    let pad = "  ".repeat(indent);
    let note = annotate(plan)
        .map(|n| format!(" [{n}]"))
        .unwrap_or_default();
    let id = plan.id();
    match plan.op() {
        Operator::Scan { table, row_shape } => {
            out.push_str(&format!(
                "{pad}Scan {id} table={} columns={}{note}\n",
                table.qualified_name(),
                row_shape.fields().len()
            ));
        }
        Operator::Values { rows, row_shape } => {
            out.push_str(&format!(
                "{pad}Values {id} rows={} columns={}{note}\n",
                rows.len(),
                row_shape.fields().len()
            ));
        }
        Operator::Filter { predicate, .. } => {
            out.push_str(&format!("{pad}Filter {id} {predicate}{note}\n"));
        }
        Operator::Project { exprs, names, .. } => {
            out.push_str(&format!("{pad}Project {id}{note}\n"));
            for (e, name) in exprs.iter().zip(names) {
                out.push_str(&format!("{pad}  {name} := {e}\n"));
            }
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
                .join(", ");
            out.push_str(&format!(
                "{pad}Aggregate {id} grouping_sets=[{sets}] indicator={indicator}{note}\n"
            ));
            for call in calls {
                out.push_str(&format!("{pad}  {} := {call}\n", call.name));
            }
        }
        Operator::Join {
            condition,
            join_type,
            ..
        } => {
            out.push_str(&format!(
                "{pad}Join {id} type={join_type:?} on={condition}{note}\n"
            ));
        }
        Operator::Union { all, .. } => {
            out.push_str(&format!("{pad}Union {id} all={all}{note}\n"));
        }
        Operator::Intersect { all, .. } => {
            out.push_str(&format!("{pad}Intersect {id} all={all}{note}\n"));
        }
        Operator::Minus { all, .. } => {
            out.push_str(&format!("{pad}Minus {id} all={all}{note}\n"));
        }
        Operator::Sort {
            collation,
            offset,
            fetch,
            ..
        } => {
            out.push_str(&format!(
                "{pad}Sort {id} collation={collation} offset={offset:?} fetch={fetch:?}{note}\n"
            ));
        }
        Operator::Exchange { distribution, .. } => {
            out.push_str(&format!("{pad}Exchange {id} distribution={distribution}{note}\n"));
        }
        Operator::Other { name, .. } => {
            out.push_str(&format!("{pad}Other {id} name={name}{note}\n"));
        }
    }
    for child in plan.children() {
        fmt_plan(child, indent + 1, annotate, out);
    }
}
