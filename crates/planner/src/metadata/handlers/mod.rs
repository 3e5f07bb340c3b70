//! Built-in derivation rules, grouped by concern.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use quarry_common::Result;

use super::kinds::{MetadataArgs, MetadataKind, MetadataValue};
use super::query::MetadataQuery;
use crate::expr::{ScalarExpr, ScalarOp};
use crate::plan::{OperatorKind, PlanNode};
use crate::types::Value;

mod cost;
mod lineage;
mod physical;
mod rows;
mod selectivity;
mod uniqueness;

/// Derivation rule for one metadata kind.
pub type MetadataHandler = Arc<
    dyn Fn(&MetadataQuery<'_>, &PlanNode, &MetadataArgs) -> Result<Option<MetadataValue>>
        + Send
        + Sync,
>;

/// Capability table: (operator kind, metadata kind) to rule, plus per-kind fallbacks.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<(OperatorKind, MetadataKind), MetadataHandler>,
    fallbacks: HashMap<MetadataKind, MetadataHandler>,
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("handlers", &self.handlers.len())
            .field("fallbacks", &self.fallbacks.len())
            .finish()
    }
}

impl HandlerTable {
    /// Empty table: every request resolves to `None`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in rule registered.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        rows::register(&mut table);
        selectivity::register(&mut table);
        uniqueness::register(&mut table);
        cost::register(&mut table);
        lineage::register(&mut table);
        physical::register(&mut table);
        table
    }

    /// Register or replace the rule for one operator kind.
    ///
    /// Returns `true` when an existing rule was replaced.
    pub fn register(
        &mut self,
        operator: OperatorKind,
        kind: MetadataKind,
        handler: MetadataHandler,
    ) -> bool {
        self.handlers.insert((operator, kind), handler).is_some()
    }

    /// Register or replace the fallback rule of a metadata kind.
    pub fn register_fallback(&mut self, kind: MetadataKind, handler: MetadataHandler) -> bool {
        self.fallbacks.insert(kind, handler).is_some()
    }

    /// Remove an operator-specific rule so the fallback applies.
    pub fn deregister(&mut self, operator: OperatorKind, kind: MetadataKind) -> bool {
        self.handlers.remove(&(operator, kind)).is_some()
    }

    pub fn lookup(&self, operator: OperatorKind, kind: MetadataKind) -> Option<&MetadataHandler> {
        self.handlers
            .get(&(operator, kind))
            .or_else(|| self.fallbacks.get(&kind))
    }
}

static DEFAULT_HANDLERS: OnceLock<Arc<HandlerTable>> = OnceLock::new();

/// Shared built-in handler table.
pub fn default_handlers() -> Arc<HandlerTable> {
    DEFAULT_HANDLERS
        .get_or_init(|| Arc::new(HandlerTable::builtin()))
        .clone()
}

/// Selectivity guesses when nothing better is known.
pub(crate) fn guess_selectivity(predicate: Option<&ScalarExpr>) -> f64 {
    let Some(predicate) = predicate else {
        return 1.0;
    };
    let mut sel: f64 = 1.0;
    for conjunct in predicate.conjuncts() {
        sel *= match conjunct {
            ScalarExpr::Literal {
                value: Value::Boolean(true),
                ..
            } => 1.0,
            ScalarExpr::Literal {
                value: Value::Boolean(false) | Value::Null,
                ..
            } => 0.0,
            ScalarExpr::Call {
                op: ScalarOp::IsNotNull,
                ..
            } => 0.9,
            ScalarExpr::Call { op: ScalarOp::Eq, .. } => 0.15,
            ScalarExpr::Call { op, .. } if op.is_comparison() => 0.5,
            _ => 0.25,
        };
    }
    sel.clamp(0.0, 1.0)
}

/// Expected number of distinct values when drawing `selected` rows from a
/// domain of `domain` distinct values.
pub(crate) fn num_distinct_vals(domain: f64, selected: f64) -> f64 {
    if domain <= 0.0 || selected <= 0.0 {
        return 0.0;
    }
    if domain.is_infinite() {
        return selected;
    }
    let res = (1.0 - (-selected / domain).exp()) * domain;
    res.min(selected).max(selected.min(1.0))
}

/// Output column to input column for plain `InputRef` projections.
pub(crate) fn project_sources(exprs: &[ScalarExpr]) -> Vec<Option<usize>> {
    exprs.iter().map(|e| e.as_input_ref()).collect()
}

/// First output position projecting input column `input`.
pub(crate) fn project_target(exprs: &[ScalarExpr], input: usize) -> Option<usize> {
    exprs.iter().position(|e| e.as_input_ref() == Some(input))
}

/// Equi-join column pairs `(left, right)` from the conjuncts of `condition`,
/// right ordinals relative to the right input.
pub(crate) fn equi_join_keys(condition: &ScalarExpr, left_width: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for conjunct in condition.conjuncts() {
        if let Some((ScalarOp::Eq, [a, b])) = conjunct.as_call() {
            if let (Some(a), Some(b)) = (a.as_input_ref(), b.as_input_ref()) {
                let (l, r) = if a < b { (a, b) } else { (b, a) };
                if l < left_width && r >= left_width {
                    pairs.push((l, r - left_width));
                }
            }
        }
    }
    pairs
}

pub(crate) fn number(v: f64) -> Option<MetadataValue> {
    Some(MetadataValue::Number(v))
}

/// Registers `handler` for every operator kind in `operators`.
pub(crate) fn register_all(
    table: &mut HandlerTable,
    operators: &[OperatorKind],
    kind: MetadataKind,
    handler: MetadataHandler,
) {
    for op in operators {
        table.register(*op, kind, handler.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlType;

    fn col(i: usize) -> ScalarExpr {
        ScalarExpr::input_ref(i, SqlType::int64(true))
    }

    #[test]
    fn guesses_follow_operator_class() {
        let eq = ScalarExpr::binary(ScalarOp::Eq, col(0), ScalarExpr::literal(Value::Int64(1))).unwrap();
        let lt = ScalarExpr::binary(ScalarOp::Lt, col(0), ScalarExpr::literal(Value::Int64(1))).unwrap();
        let nn = ScalarExpr::call(ScalarOp::IsNotNull, vec![col(1)]).unwrap();
        assert_eq!(guess_selectivity(None), 1.0);
        assert_eq!(guess_selectivity(Some(&eq)), 0.15);
        assert_eq!(guess_selectivity(Some(&lt)), 0.5);
        assert_eq!(guess_selectivity(Some(&nn)), 0.9);
        let both = ScalarExpr::and_all(vec![eq, lt]).unwrap();
        assert!((guess_selectivity(Some(&both)) - 0.075).abs() < 1e-12);
    }

    #[test]
    fn distinct_values_never_exceed_selection_or_domain() {
        assert_eq!(num_distinct_vals(0.0, 10.0), 0.0);
        let d = num_distinct_vals(10.0, 1000.0);
        assert!(d <= 10.0 && d > 9.9);
        assert!(num_distinct_vals(1000.0, 5.0) <= 5.0);
    }

    #[test]
    fn equi_keys_are_normalized_to_left_right() {
        let cond = ScalarExpr::binary(ScalarOp::Eq, col(3), col(1)).unwrap();
        assert_eq!(equi_join_keys(&cond, 2), vec![(1, 1)]);
    }

    #[test]
    fn fallback_applies_when_operator_rule_missing() {
        let mut table = HandlerTable::new();
        let h: MetadataHandler =
            Arc::new(|_: &MetadataQuery<'_>, _: &PlanNode, _: &MetadataArgs| Ok(number(1.0)));
        assert!(!table.register_fallback(MetadataKind::Memory, h.clone()));
        assert!(table.lookup(OperatorKind::Sort, MetadataKind::Memory).is_some());
        assert!(table.lookup(OperatorKind::Sort, MetadataKind::SplitCount).is_none());
        assert!(!table.register(OperatorKind::Sort, MetadataKind::Memory, h.clone()));
        assert!(table.register(OperatorKind::Sort, MetadataKind::Memory, h));
        assert!(table.deregister(OperatorKind::Sort, MetadataKind::Memory));
    }
}
