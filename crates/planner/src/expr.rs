//! Typed scalar expression trees evaluated over an operator's input row.

use std::collections::BTreeSet;
use std::fmt;

use arrow_schema::{DataType, Schema};
use quarry_common::{QuarryError, Result};
use serde::{Deserialize, Serialize};

use crate::types::{comparable, is_numeric, unify_types, wider_numeric, SqlType, Value};

/// Scalar operators usable in [`ScalarExpr::Call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    And,
    Or,
    Not,
    IsNull,
    IsNotNull,
    /// `operands[0] IN (operands[1..])`.
    In,
    /// `[when_1, then_1, .., when_n, then_n, else]`.
    Case,
    Coalesce,
    Cast,
}

impl ScalarOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ScalarOp::Eq => "=",
            ScalarOp::NotEq => "<>",
            ScalarOp::Lt => "<",
            ScalarOp::LtEq => "<=",
            ScalarOp::Gt => ">",
            ScalarOp::GtEq => ">=",
            ScalarOp::Plus => "+",
            ScalarOp::Minus => "-",
            ScalarOp::Multiply => "*",
            ScalarOp::Divide => "/",
            ScalarOp::And => "AND",
            ScalarOp::Or => "OR",
            ScalarOp::Not => "NOT",
            ScalarOp::IsNull => "IS NULL",
            ScalarOp::IsNotNull => "IS NOT NULL",
            ScalarOp::In => "IN",
            ScalarOp::Case => "CASE",
            ScalarOp::Coalesce => "COALESCE",
            ScalarOp::Cast => "CAST",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            ScalarOp::Eq | ScalarOp::NotEq | ScalarOp::Lt | ScalarOp::LtEq | ScalarOp::Gt | ScalarOp::GtEq
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            ScalarOp::Plus | ScalarOp::Minus | ScalarOp::Multiply | ScalarOp::Divide
        )
    }

    /// Comparison with operands swapped (`a < b` is `b > a`).
    pub fn reverse(self) -> Self {
        match self {
            ScalarOp::Lt => ScalarOp::Gt,
            ScalarOp::LtEq => ScalarOp::GtEq,
            ScalarOp::Gt => ScalarOp::Lt,
            ScalarOp::GtEq => ScalarOp::LtEq,
            other => other,
        }
    }
}

/// One occurrence of a base table in a plan.
///
/// The same physical table scanned twice gets two occurrences with different
/// `entity_number`s.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableOccurrence {
    pub qualified_name: String,
    pub entity_number: usize,
}

impl fmt::Display for TableOccurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]:{}", self.qualified_name, self.entity_number)
    }
}

/// Immutable, typed scalar expression.
///
/// `InputRef.index` is only meaningful relative to the row shape of the
/// operator input the expression is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarExpr {
    Literal {
        value: Value,
        ty: SqlType,
    },
    InputRef {
        index: usize,
        ty: SqlType,
    },
    Call {
        op: ScalarOp,
        operands: Vec<ScalarExpr>,
        ty: SqlType,
    },
    CorrelationRef {
        id: u32,
        ty: SqlType,
    },
    /// Base-table column reached by lineage tracing; never appears in plans.
    TableInputRef {
        table: TableOccurrence,
        column: usize,
        ty: SqlType,
    },
}

impl ScalarExpr {
    /// Literal typed after its value; `Null` becomes a nullable `Null`-typed literal.
    pub fn literal(value: Value) -> Self {
        let ty = SqlType::new(value.data_type(), value.is_null());
        ScalarExpr::Literal { value, ty }
    }

    /// Literal with an explicit type, used for typed nulls.
    pub fn typed_literal(value: Value, ty: SqlType) -> Result<Self> {
        if !value.is_null() && value.data_type() != ty.data_type {
            return Err(QuarryError::InvalidShape(format!(
                "literal {value:?} does not have type {}",
                ty
            )));
        }
        Ok(ScalarExpr::Literal { value, ty })
    }

    pub fn input_ref(index: usize, ty: SqlType) -> Self {
        ScalarExpr::InputRef { index, ty }
    }

    /// Reference to column `index` of `input`, typed after the field.
    pub fn column(input: &Schema, index: usize) -> Result<Self> {
        let field = input.fields().get(index).ok_or_else(|| {
            QuarryError::InvalidShape(format!(
                "column index {index} out of range for row of {} fields",
                input.fields().len()
            ))
        })?;
        Ok(ScalarExpr::InputRef {
            index,
            ty: SqlType::of_field(field),
        })
    }

    pub fn correlation(id: u32, ty: SqlType) -> Self {
        ScalarExpr::CorrelationRef { id, ty }
    }

    /// Builds a call, deriving its result type.
    ///
    /// Operand count and type mismatches fail with `InvalidShape`. Use
    /// [`ScalarExpr::cast`] for `CAST`, which needs a target type.
    pub fn call(op: ScalarOp, operands: Vec<ScalarExpr>) -> Result<Self> {
        let ty = derive_call_type(op, &operands)?;
        Ok(ScalarExpr::Call { op, operands, ty })
    }

    pub fn binary(op: ScalarOp, left: ScalarExpr, right: ScalarExpr) -> Result<Self> {
        Self::call(op, vec![left, right])
    }

    pub fn cast(expr: ScalarExpr, to: DataType) -> Self {
        let nullable = expr.ty().nullable;
        ScalarExpr::Call {
            op: ScalarOp::Cast,
            operands: vec![expr],
            ty: SqlType::new(to, nullable),
        }
    }

    /// Conjunction of `exprs`; a single predicate is returned as is, none gives `TRUE`.
    pub fn and_all(mut exprs: Vec<ScalarExpr>) -> Result<Self> {
        match exprs.len() {
            0 => Ok(Self::literal(Value::Boolean(true))),
            1 => Ok(exprs.remove(0)),
            _ => Self::call(ScalarOp::And, exprs),
        }
    }

    pub fn ty(&self) -> &SqlType {
        match self {
            ScalarExpr::Literal { ty, .. }
            | ScalarExpr::InputRef { ty, .. }
            | ScalarExpr::Call { ty, .. }
            | ScalarExpr::CorrelationRef { ty, .. }
            | ScalarExpr::TableInputRef { ty, .. } => ty,
        }
    }

    pub fn data_type(&self) -> &DataType {
        &self.ty().data_type
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            ScalarExpr::Literal { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_input_ref(&self) -> Option<usize> {
        match self {
            ScalarExpr::InputRef { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<(ScalarOp, &[ScalarExpr])> {
        match self {
            ScalarExpr::Call { op, operands, .. } => Some((*op, operands.as_slice())),
            _ => None,
        }
    }

    /// Top-level `AND` operands, flattened.
    pub fn conjuncts(&self) -> Vec<&ScalarExpr> {
        let mut out = Vec::new();
        collect_conjuncts(self, &mut out);
        out
    }

    /// Every `InputRef` index in evaluation order, duplicates included.
    pub fn input_ref_occurrences(&self, out: &mut Vec<usize>) {
        match self {
            ScalarExpr::InputRef { index, .. } => out.push(*index),
            ScalarExpr::Call { operands, .. } => {
                for operand in operands {
                    operand.input_ref_occurrences(out);
                }
            }
            ScalarExpr::Literal { .. }
            | ScalarExpr::CorrelationRef { .. }
            | ScalarExpr::TableInputRef { .. } => {}
        }
    }

    pub fn referenced_inputs(&self) -> BTreeSet<usize> {
        let mut v = Vec::new();
        self.input_ref_occurrences(&mut v);
        v.into_iter().collect()
    }

    /// Checks every input reference against `input` and returns the first mismatch.
    pub fn validate_against(&self, input: &Schema) -> Result<()> {
        match self {
            ScalarExpr::InputRef { index, ty } => {
                let field = input.fields().get(*index).ok_or_else(|| {
                    QuarryError::InvalidShape(format!(
                        "input reference ${index} out of range for row of {} fields",
                        input.fields().len()
                    ))
                })?;
                if field.data_type() != &ty.data_type {
                    return Err(QuarryError::InvalidShape(format!(
                        "input reference ${index} typed {:?} but input field '{}' is {:?}",
                        ty.data_type,
                        field.name(),
                        field.data_type()
                    )));
                }
                Ok(())
            }
            ScalarExpr::Call { operands, .. } => {
                operands.iter().try_for_each(|o| o.validate_against(input))
            }
            ScalarExpr::Literal { .. } | ScalarExpr::CorrelationRef { .. } => Ok(()),
            ScalarExpr::TableInputRef { .. } => Err(QuarryError::InvalidShape(
                "table input references cannot appear inside a plan".to_string(),
            )),
        }
    }

    /// Rebuilds the tree replacing each `InputRef` by `f(index, type)`.
    ///
    /// Call result types are kept, so replacements must preserve operand types.
    pub fn map_input_refs(
        &self,
        f: &mut dyn FnMut(usize, &SqlType) -> Result<ScalarExpr>,
    ) -> Result<ScalarExpr> {
        Ok(match self {
            ScalarExpr::InputRef { index, ty } => f(*index, ty)?,
            ScalarExpr::Call { op, operands, ty } => ScalarExpr::Call {
                op: *op,
                operands: operands
                    .iter()
                    .map(|o| o.map_input_refs(f))
                    .collect::<Result<Vec<_>>>()?,
                ty: ty.clone(),
            },
            other => other.clone(),
        })
    }

    /// Literal-free rendering: literals print as `?:<type>`.
    pub fn skeleton(&self) -> String {
        match self {
            ScalarExpr::Literal { ty, .. } => format!("?:{:?}", ty.data_type),
            ScalarExpr::Call { op, operands, ty } => {
                let args = operands
                    .iter()
                    .map(|o| o.skeleton())
                    .collect::<Vec<_>>()
                    .join(", ");
                if *op == ScalarOp::Cast {
                    format!("CAST({args}):{:?}", ty.data_type)
                } else {
                    format!("{}({args})", op.symbol())
                }
            }
            other => other.to_string(),
        }
    }
}

fn collect_conjuncts<'a>(e: &'a ScalarExpr, out: &mut Vec<&'a ScalarExpr>) {
    match e {
        ScalarExpr::Call {
            op: ScalarOp::And,
            operands,
            ..
        } => {
            for o in operands {
                collect_conjuncts(o, out);
            }
        }
        other => out.push(other),
    }
}

impl fmt::Display for ScalarExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarExpr::Literal { value, .. } => write!(f, "{}", value.to_literal_string()),
            ScalarExpr::InputRef { index, .. } => write!(f, "${index}"),
            ScalarExpr::CorrelationRef { id, .. } => write!(f, "$cor{id}"),
            ScalarExpr::TableInputRef { table, column, .. } => write!(f, "{table}.${column}"),
            ScalarExpr::Call { op, operands, ty } => {
                let args = operands
                    .iter()
                    .map(|o| o.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                if *op == ScalarOp::Cast {
                    write!(f, "CAST({args}):{:?}", ty.data_type)
                } else {
                    write!(f, "{}({args})", op.symbol())
                }
            }
        }
    }
}

fn derive_call_type(op: ScalarOp, operands: &[ScalarExpr]) -> Result<SqlType> {
    let any_nullable = operands.iter().any(|o| o.ty().nullable);
    let arity = |expected: usize| -> Result<()> {
        if operands.len() != expected {
            return Err(QuarryError::InvalidShape(format!(
                "{} expects {expected} operand(s), got {}",
                op.symbol(),
                operands.len()
            )));
        }
        Ok(())
    };
    match op {
        _ if op.is_comparison() => {
            arity(2)?;
            let (l, r) = (operands[0].data_type(), operands[1].data_type());
            if !comparable(l, r) {
                return Err(QuarryError::InvalidShape(format!(
                    "cannot compare types {l:?} and {r:?}"
                )));
            }
            Ok(SqlType::boolean(any_nullable))
        }
        _ if op.is_arithmetic() => {
            arity(2)?;
            let (l, r) = (operands[0].data_type(), operands[1].data_type());
            let numeric_or_null = |dt: &DataType| is_numeric(dt) || *dt == DataType::Null;
            if !numeric_or_null(l) || !numeric_or_null(r) {
                return Err(QuarryError::InvalidShape(format!(
                    "arithmetic requires numeric operands, got {l:?} and {r:?}"
                )));
            }
            let target = if op == ScalarOp::Divide {
                DataType::Float64
            } else if *l == DataType::Null {
                r.clone()
            } else if *r == DataType::Null {
                l.clone()
            } else {
                wider_numeric(l, r).ok_or_else(|| {
                    QuarryError::Planning("failed numeric widening".to_string())
                })?
            };
            Ok(SqlType::new(target, any_nullable))
        }
        ScalarOp::And | ScalarOp::Or => {
            if operands.len() < 2 {
                return Err(QuarryError::InvalidShape(format!(
                    "{} expects at least 2 operands",
                    op.symbol()
                )));
            }
            operands.iter().try_for_each(ensure_boolean)?;
            Ok(SqlType::boolean(any_nullable))
        }
        ScalarOp::Not => {
            arity(1)?;
            ensure_boolean(&operands[0])?;
            Ok(SqlType::boolean(any_nullable))
        }
        ScalarOp::IsNull | ScalarOp::IsNotNull => {
            arity(1)?;
            Ok(SqlType::boolean(false))
        }
        ScalarOp::In => {
            if operands.len() < 2 {
                return Err(QuarryError::InvalidShape(
                    "IN expects a value and at least one candidate".to_string(),
                ));
            }
            let probe = operands[0].data_type();
            for candidate in &operands[1..] {
                if !comparable(probe, candidate.data_type()) {
                    return Err(QuarryError::InvalidShape(format!(
                        "IN candidate of type {:?} is not comparable with {probe:?}",
                        candidate.data_type()
                    )));
                }
            }
            Ok(SqlType::boolean(any_nullable))
        }
        ScalarOp::Case => {
            if operands.len() < 3 || operands.len() % 2 == 0 {
                return Err(QuarryError::InvalidShape(format!(
                    "CASE expects when/then pairs followed by an else branch, got {} operands",
                    operands.len()
                )));
            }
            let mut results = Vec::new();
            for pair in operands[..operands.len() - 1].chunks(2) {
                ensure_boolean(&pair[0])?;
                results.push(&pair[1]);
            }
            results.push(&operands[operands.len() - 1]);
            let types = results.iter().map(|e| e.data_type()).collect::<Vec<_>>();
            let target = unify_types(&types)?;
            let nullable = results.iter().any(|e| e.ty().nullable);
            Ok(SqlType::new(target, nullable))
        }
        ScalarOp::Coalesce => {
            if operands.is_empty() {
                return Err(QuarryError::InvalidShape(
                    "COALESCE expects at least one operand".to_string(),
                ));
            }
            let types = operands.iter().map(|e| e.data_type()).collect::<Vec<_>>();
            let target = unify_types(&types)?;
            let nullable = operands.iter().all(|e| e.ty().nullable);
            Ok(SqlType::new(target, nullable))
        }
        ScalarOp::Cast => Err(QuarryError::Planning(
            "CAST needs a target type; build it with ScalarExpr::cast".to_string(),
        )),
        _ => Err(QuarryError::Unsupported(format!("operator {op:?}"))),
    }
}

fn ensure_boolean(e: &ScalarExpr) -> Result<()> {
    match e.data_type() {
        DataType::Boolean | DataType::Null => Ok(()),
        other => Err(QuarryError::InvalidShape(format!(
            "expected boolean operand, got {other:?} in {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::Field;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Utf8, false),
        ])
    }

    #[test]
    fn comparison_derives_nullable_boolean() {
        let s = schema();
        let e = ScalarExpr::binary(
            ScalarOp::Eq,
            ScalarExpr::column(&s, 0).unwrap(),
            ScalarExpr::literal(Value::Int64(3)),
        )
        .unwrap();
        assert_eq!(e.ty(), &SqlType::boolean(true));
        assert_eq!(e.to_string(), "=($0, 3)");
        assert_eq!(e.skeleton(), "=($0, ?:Int64)");
    }

    #[test]
    fn mismatched_operands_are_rejected() {
        let s = schema();
        let err = ScalarExpr::binary(
            ScalarOp::Plus,
            ScalarExpr::column(&s, 1).unwrap(),
            ScalarExpr::literal(Value::Int32(1)),
        )
        .unwrap_err();
        assert!(matches!(err, QuarryError::InvalidShape(_)));
        assert!(ScalarExpr::column(&s, 2).is_err());
    }

    #[test]
    fn validate_catches_stale_input_reference() {
        let e = ScalarExpr::input_ref(1, SqlType::int64(true));
        assert!(e.validate_against(&schema()).is_err());
        let ok = ScalarExpr::input_ref(1, SqlType::utf8(false));
        assert!(ok.validate_against(&schema()).is_ok());
    }

    #[test]
    fn conjuncts_flatten_nested_and() {
        let s = schema();
        let p1 = ScalarExpr::call(ScalarOp::IsNotNull, vec![ScalarExpr::column(&s, 0).unwrap()])
            .unwrap();
        let p2 = ScalarExpr::binary(
            ScalarOp::Eq,
            ScalarExpr::column(&s, 1).unwrap(),
            ScalarExpr::literal(Value::Utf8("x".into())),
        )
        .unwrap();
        let inner = ScalarExpr::and_all(vec![p1.clone(), p2.clone()]).unwrap();
        let outer = ScalarExpr::and_all(vec![inner, p1.clone()]).unwrap();
        assert_eq!(outer.conjuncts(), vec![&p1, &p2, &p1]);
    }

    #[test]
    fn case_unifies_branch_types() {
        let cond = ScalarExpr::literal(Value::Boolean(true));
        let e = ScalarExpr::call(
            ScalarOp::Case,
            vec![
                cond,
                ScalarExpr::literal(Value::Int32(1)),
                ScalarExpr::literal(Value::Float64(2.0)),
            ],
        )
        .unwrap();
        assert_eq!(e.data_type(), &DataType::Float64);
        assert!(!e.ty().nullable);
    }
}
