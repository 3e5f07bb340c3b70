//! Expression compilation and row-at-a-time evaluation for execution units.
//!
//! Input contract:
//! - expressions come from a validated plan, so `InputRef` indexes and call
//!   operand types already match the row shape they are compiled against.
//!
//! Output contract:
//! - each evaluation returns one [`Value`] for the given row, following SQL
//!   three-valued logic (null in, null out, except for `IS [NOT] NULL`,
//!   Kleene `AND`/`OR`, `COALESCE` and `CASE`).

use std::cmp::Ordering;
use std::sync::Arc;

use arrow_schema::{DataType, Schema};
use quarry_common::{QuarryError, Result};
use quarry_planner::{ScalarExpr, ScalarOp, SqlType, Value};

/// Executable expression over one row.
pub trait PhysicalExpr: Send + Sync {
    /// Static output type of this expression.
    fn data_type(&self) -> DataType;
    /// Evaluate against `row`, whose layout is the schema the expression was compiled for.
    fn evaluate(&self, row: &[Value]) -> Result<Value>;
}

/// Compile a plan expression into a runnable one.
pub fn compile_expr(expr: &ScalarExpr, input_schema: &Schema) -> Result<Arc<dyn PhysicalExpr>> {
    match expr {
        ScalarExpr::InputRef { index, .. } => {
            let field = input_schema.fields().get(*index).ok_or_else(|| {
                QuarryError::InvalidShape(format!(
                    "column ${index} out of range for row of {} fields",
                    input_schema.fields().len()
                ))
            })?;
            Ok(Arc::new(ColumnExpr {
                index: *index,
                dt: field.data_type().clone(),
            }))
        }
        ScalarExpr::Literal { value, ty } => Ok(Arc::new(LiteralExpr {
            value: value.clone(),
            dt: ty.data_type.clone(),
        })),
        ScalarExpr::CorrelationRef { id, .. } => Err(QuarryError::Unsupported(format!(
            "correlation variable $cor{id} cannot be evaluated outside a correlated subquery"
        ))),
        ScalarExpr::TableInputRef { .. } => Err(QuarryError::InvalidShape(
            "table input references cannot be evaluated".to_string(),
        )),
        ScalarExpr::Call { op, operands, ty } => {
            let args = operands
                .iter()
                .map(|o| compile_expr(o, input_schema))
                .collect::<Result<Vec<_>>>()?;
            compile_call(*op, args, ty)
        }
    }
}

fn compile_call(op: ScalarOp, mut args: Vec<Arc<dyn PhysicalExpr>>, ty: &SqlType) -> Result<Arc<dyn PhysicalExpr>> {
    let out = ty.data_type.clone();
    let expr: Arc<dyn PhysicalExpr> = match op {
        _ if op.is_comparison() || op.is_arithmetic() => {
            let [left, right] = take_two(args, op)?;
            Arc::new(BinaryExpr { left, right, op, out })
        }
        ScalarOp::And | ScalarOp::Or => Arc::new(BoolExpr {
            args,
            is_and: op == ScalarOp::And,
        }),
        ScalarOp::Not => Arc::new(NotExpr { inner: take_one(&mut args, op)? }),
        ScalarOp::IsNull | ScalarOp::IsNotNull => Arc::new(NullTestExpr {
            inner: take_one(&mut args, op)?,
            negated: op == ScalarOp::IsNotNull,
        }),
        ScalarOp::In => {
            if args.len() < 2 {
                return Err(arity_error(op, args.len()));
            }
            let probe = args.remove(0);
            Arc::new(InListExpr { probe, list: args })
        }
        ScalarOp::Case => {
            if args.len() < 3 || args.len() % 2 == 0 {
                return Err(arity_error(op, args.len()));
            }
            let otherwise = args.pop().ok_or_else(|| arity_error(op, 0))?;
            let mut branches = Vec::with_capacity(args.len() / 2);
            let mut it = args.into_iter();
            while let (Some(when), Some(then)) = (it.next(), it.next()) {
                branches.push((when, then));
            }
            Arc::new(CaseExpr { branches, otherwise, out })
        }
        ScalarOp::Coalesce => Arc::new(CoalesceExpr { args, out }),
        ScalarOp::Cast => Arc::new(CastExpr {
            inner: take_one(&mut args, op)?,
            to_type: out,
        }),
        _ => return Err(QuarryError::Unsupported(format!("operator {op:?} in execution"))),
    };
    Ok(expr)
}

fn arity_error(op: ScalarOp, got: usize) -> QuarryError {
    QuarryError::InvalidShape(format!("{} called with {got} operand(s)", op.symbol()))
}

fn take_one(args: &mut Vec<Arc<dyn PhysicalExpr>>, op: ScalarOp) -> Result<Arc<dyn PhysicalExpr>> {
    if args.len() != 1 {
        return Err(arity_error(op, args.len()));
    }
    args.pop().ok_or_else(|| arity_error(op, 0))
}

fn take_two(args: Vec<Arc<dyn PhysicalExpr>>, op: ScalarOp) -> Result<[Arc<dyn PhysicalExpr>; 2]> {
    let n = args.len();
    <[Arc<dyn PhysicalExpr>; 2]>::try_from(args).map_err(|_| arity_error(op, n))
}

struct ColumnExpr {
    index: usize,
    dt: DataType,
}

impl PhysicalExpr for ColumnExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, row: &[Value]) -> Result<Value> {
        row.get(self.index).cloned().ok_or_else(|| {
            QuarryError::Execution(format!(
                "row of {} values has no column ${}",
                row.len(),
                self.index
            ))
        })
    }
}

struct LiteralExpr {
    value: Value,
    dt: DataType,
}

impl PhysicalExpr for LiteralExpr {
    fn data_type(&self) -> DataType {
        self.dt.clone()
    }

    fn evaluate(&self, _row: &[Value]) -> Result<Value> {
        Ok(self.value.clone())
    }
}

struct CastExpr {
    inner: Arc<dyn PhysicalExpr>,
    to_type: DataType,
}

impl PhysicalExpr for CastExpr {
    fn data_type(&self) -> DataType {
        self.to_type.clone()
    }

    fn evaluate(&self, row: &[Value]) -> Result<Value> {
        self.inner.evaluate(row)?.cast_to(&self.to_type)
    }
}

fn expect_bool(v: &Value, what: &str) -> Result<Option<bool>> {
    match v {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(*b)),
        other => Err(QuarryError::Execution(format!("{what} expects boolean, got {other:?}"))),
    }
}

fn bool_value(b: Option<bool>) -> Value {
    b.map(Value::Boolean).unwrap_or(Value::Null)
}

struct NotExpr {
    inner: Arc<dyn PhysicalExpr>,
}

impl PhysicalExpr for NotExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, row: &[Value]) -> Result<Value> {
        let v = self.inner.evaluate(row)?;
        Ok(bool_value(expect_bool(&v, "NOT")?.map(|b| !b)))
    }
}

/// Kleene `AND`/`OR` over any number of operands.
struct BoolExpr {
    args: Vec<Arc<dyn PhysicalExpr>>,
    is_and: bool,
}

impl PhysicalExpr for BoolExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, row: &[Value]) -> Result<Value> {
        let what = if self.is_and { "AND" } else { "OR" };
        let mut saw_null = false;
        for arg in &self.args {
            match expect_bool(&arg.evaluate(row)?, what)? {
                // false decides AND, true decides OR
                Some(b) if b != self.is_and => return Ok(Value::Boolean(b)),
                Some(_) => {}
                None => saw_null = true,
            }
        }
        Ok(if saw_null {
            Value::Null
        } else {
            Value::Boolean(self.is_and)
        })
    }
}

struct NullTestExpr {
    inner: Arc<dyn PhysicalExpr>,
    negated: bool,
}

impl PhysicalExpr for NullTestExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, row: &[Value]) -> Result<Value> {
        let is_null = self.inner.evaluate(row)?.is_null();
        Ok(Value::Boolean(is_null != self.negated))
    }
}

struct InListExpr {
    probe: Arc<dyn PhysicalExpr>,
    list: Vec<Arc<dyn PhysicalExpr>>,
}

impl PhysicalExpr for InListExpr {
    fn data_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, row: &[Value]) -> Result<Value> {
        let probe = self.probe.evaluate(row)?;
        if probe.is_null() {
            return Ok(Value::Null);
        }
        let mut saw_null = false;
        for candidate in &self.list {
            let c = candidate.evaluate(row)?;
            if c.is_null() {
                saw_null = true;
            } else if probe.compare(&c) == Some(Ordering::Equal) {
                return Ok(Value::Boolean(true));
            }
        }
        Ok(if saw_null { Value::Null } else { Value::Boolean(false) })
    }
}

struct CaseExpr {
    branches: Vec<(Arc<dyn PhysicalExpr>, Arc<dyn PhysicalExpr>)>,
    otherwise: Arc<dyn PhysicalExpr>,
    out: DataType,
}

impl PhysicalExpr for CaseExpr {
    fn data_type(&self) -> DataType {
        self.out.clone()
    }

    fn evaluate(&self, row: &[Value]) -> Result<Value> {
        for (when, then) in &self.branches {
            if expect_bool(&when.evaluate(row)?, "CASE WHEN")? == Some(true) {
                return then.evaluate(row)?.cast_to(&self.out);
            }
        }
        self.otherwise.evaluate(row)?.cast_to(&self.out)
    }
}

struct CoalesceExpr {
    args: Vec<Arc<dyn PhysicalExpr>>,
    out: DataType,
}

impl PhysicalExpr for CoalesceExpr {
    fn data_type(&self) -> DataType {
        self.out.clone()
    }

    fn evaluate(&self, row: &[Value]) -> Result<Value> {
        for arg in &self.args {
            let v = arg.evaluate(row)?;
            if !v.is_null() {
                return v.cast_to(&self.out);
            }
        }
        Ok(Value::Null)
    }
}

struct BinaryExpr {
    left: Arc<dyn PhysicalExpr>,
    right: Arc<dyn PhysicalExpr>,
    op: ScalarOp,
    out: DataType,
}

impl PhysicalExpr for BinaryExpr {
    fn data_type(&self) -> DataType {
        self.out.clone()
    }

    fn evaluate(&self, row: &[Value]) -> Result<Value> {
        let l = self.left.evaluate(row)?;
        let r = self.right.evaluate(row)?;
        if l.is_null() || r.is_null() {
            return Ok(Value::Null);
        }
        if self.op.is_comparison() {
            eval_cmp(self.op, &l, &r)
        } else {
            eval_arith(self.op, &l, &r, &self.out)
        }
    }
}

fn eval_cmp(op: ScalarOp, l: &Value, r: &Value) -> Result<Value> {
    let ord = l.compare(r).ok_or_else(|| {
        QuarryError::Execution(format!("cannot compare {l:?} with {r:?}"))
    })?;
    let b = match op {
        ScalarOp::Eq => ord == Ordering::Equal,
        ScalarOp::NotEq => ord != Ordering::Equal,
        ScalarOp::Lt => ord == Ordering::Less,
        ScalarOp::LtEq => ord != Ordering::Greater,
        ScalarOp::Gt => ord == Ordering::Greater,
        ScalarOp::GtEq => ord != Ordering::Less,
        other => return Err(QuarryError::Execution(format!("{other:?} is not a comparison"))),
    };
    Ok(Value::Boolean(b))
}

fn eval_arith(op: ScalarOp, l: &Value, r: &Value, out: &DataType) -> Result<Value> {
    match out {
        DataType::Float32 | DataType::Float64 => {
            let (a, b) = match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(non_numeric(op, l, r)),
            };
            let v = match op {
                ScalarOp::Plus => a + b,
                ScalarOp::Minus => a - b,
                ScalarOp::Multiply => a * b,
                ScalarOp::Divide => {
                    if b == 0.0 {
                        return Err(QuarryError::Execution("division by zero".to_string()));
                    }
                    a / b
                }
                other => return Err(QuarryError::Execution(format!("{other:?} is not arithmetic"))),
            };
            Value::Float64(v).cast_to(out)
        }
        DataType::Int32 | DataType::Int64 => {
            let (a, b) = match (l.as_i64(), r.as_i64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(non_numeric(op, l, r)),
            };
            let v = match op {
                ScalarOp::Plus => a.checked_add(b),
                ScalarOp::Minus => a.checked_sub(b),
                ScalarOp::Multiply => a.checked_mul(b),
                other => return Err(QuarryError::Execution(format!("{other:?} is not integral arithmetic"))),
            }
            .ok_or_else(|| QuarryError::Execution(format!("integer overflow in {l} {} {r}", op.symbol())))?;
            Value::Int64(v)
                .cast_to(out)
                .map_err(|_| QuarryError::Execution(format!("integer overflow in {l} {} {r}", op.symbol())))
        }
        other => Err(QuarryError::Unsupported(format!("arithmetic producing {other:?}"))),
    }
}

fn non_numeric(op: ScalarOp, l: &Value, r: &Value) -> QuarryError {
    QuarryError::Execution(format!("{} needs numeric operands, got {l:?} and {r:?}", op.symbol()))
}
