//! Aggregates expressed as scalar programs over `(input row ++ state)`.

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};
use quarry_common::{QuarryError, Result};
use quarry_planner::{AggFunction, AggregateCall, ScalarExpr, ScalarOp, SqlType, Value};

use super::Accumulator;
use crate::expressions::{compile_expr, PhysicalExpr};

/// Compiled init/add/merge/result steps shared by every group of one call.
pub(super) struct Program {
    input_width: usize,
    init: Vec<Value>,
    /// One expression per state slot, over `input ++ state`.
    add: Vec<Arc<dyn PhysicalExpr>>,
    /// One expression per state slot, over `state ++ state`.
    merge: Vec<Arc<dyn PhysicalExpr>>,
    /// Over `state`.
    result: Arc<dyn PhysicalExpr>,
}

fn col(schema: &Schema, i: usize) -> Result<ScalarExpr> {
    ScalarExpr::column(schema, i)
}

fn is_null(e: ScalarExpr) -> Result<ScalarExpr> {
    ScalarExpr::call(ScalarOp::IsNull, vec![e])
}

/// `acc` unchanged for a null `v`, `v` for a null `acc`, else `op(acc, v)`.
fn null_skipping_fold(op: ScalarOp, acc: ScalarExpr, v: ScalarExpr) -> Result<ScalarExpr> {
    let combined = ScalarExpr::binary(op, acc.clone(), v.clone())?;
    ScalarExpr::call(
        ScalarOp::Case,
        vec![is_null(v.clone())?, acc.clone(), is_null(acc)?, v, combined],
    )
}

fn concat(left: &[Field], right: &[Field]) -> Schema {
    Schema::new(left.iter().chain(right.iter()).cloned().collect::<Vec<_>>())
}

fn compile_all(exprs: Vec<ScalarExpr>, schema: &Schema) -> Result<Vec<Arc<dyn PhysicalExpr>>> {
    exprs.iter().map(|e| compile_expr(e, schema)).collect()
}

impl Program {
    pub(super) fn for_call(function: &AggFunction, arg: usize, input: &Schema) -> Result<Self> {
        let arg_field = input.fields().get(arg).ok_or_else(|| {
            QuarryError::InvalidShape(format!("aggregate argument ${arg} out of range"))
        })?;
        let arg_type = arg_field.data_type().clone();
        let width = input.fields().len();
        let input_fields = input.fields().iter().map(|f| f.as_ref().clone()).collect::<Vec<_>>();

        let (state, init) = match function {
            AggFunction::Avg => {
                if !matches!(
                    arg_type,
                    DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64
                ) {
                    return Err(QuarryError::InvalidShape(format!(
                        "AVG over non-numeric type {arg_type:?}"
                    )));
                }
                (
                    vec![
                        Field::new("sum", DataType::Float64, true),
                        Field::new("count", DataType::Int64, false),
                    ],
                    vec![Value::Null, Value::Int64(0)],
                )
            }
            AggFunction::BoolAnd | AggFunction::BoolOr => {
                if arg_type != DataType::Boolean {
                    return Err(QuarryError::InvalidShape(format!(
                        "{function} over non-boolean type {arg_type:?}"
                    )));
                }
                (vec![Field::new("acc", DataType::Boolean, true)], vec![Value::Null])
            }
            AggFunction::AnyValue => (vec![Field::new("acc", arg_type.clone(), true)], vec![Value::Null]),
            other => {
                return Err(QuarryError::Unsupported(format!(
                    "{other} has no compiled accumulator"
                )))
            }
        };

        let buffer = concat(&input_fields, &state);
        let pair = concat(&state, &state);
        let state_schema = Schema::new(state.clone());
        let n = state.len();
        let x = col(&buffer, arg)?;

        let (add, merge, result) = match function {
            AggFunction::Avg => {
                let (sum, count) = (col(&buffer, width)?, col(&buffer, width + 1)?);
                let x_null = is_null(x.clone())?;
                let zero = ScalarExpr::literal(Value::Float64(0.0));
                let add_sum = ScalarExpr::call(
                    ScalarOp::Case,
                    vec![
                        x_null.clone(),
                        sum.clone(),
                        ScalarExpr::binary(
                            ScalarOp::Plus,
                            ScalarExpr::call(ScalarOp::Coalesce, vec![sum, zero])?,
                            ScalarExpr::cast(x, DataType::Float64),
                        )?,
                    ],
                )?;
                let add_count = ScalarExpr::call(
                    ScalarOp::Case,
                    vec![
                        x_null,
                        count.clone(),
                        ScalarExpr::binary(ScalarOp::Plus, count, ScalarExpr::literal(Value::Int64(1)))?,
                    ],
                )?;

                let merge_sum = null_skipping_fold(ScalarOp::Plus, col(&pair, 0)?, col(&pair, 2)?)?;
                let merge_count = ScalarExpr::binary(ScalarOp::Plus, col(&pair, 1)?, col(&pair, 3)?)?;

                let (sum, count) = (col(&state_schema, 0)?, col(&state_schema, 1)?);
                let result = ScalarExpr::call(
                    ScalarOp::Case,
                    vec![
                        ScalarExpr::binary(ScalarOp::Eq, count.clone(), ScalarExpr::literal(Value::Int64(0)))?,
                        ScalarExpr::typed_literal(Value::Null, SqlType::float64(true))?,
                        ScalarExpr::binary(ScalarOp::Divide, sum, ScalarExpr::cast(count, DataType::Float64))?,
                    ],
                )?;
                (vec![add_sum, add_count], vec![merge_sum, merge_count], result)
            }
            AggFunction::BoolAnd | AggFunction::BoolOr => {
                let op = if *function == AggFunction::BoolAnd {
                    ScalarOp::And
                } else {
                    ScalarOp::Or
                };
                let add = null_skipping_fold(op, col(&buffer, width)?, x)?;
                let merge = null_skipping_fold(op, col(&pair, 0)?, col(&pair, 1)?)?;
                (vec![add], vec![merge], col(&state_schema, 0)?)
            }
            _ => {
                let add = ScalarExpr::call(ScalarOp::Coalesce, vec![col(&buffer, width)?, x])?;
                let merge = ScalarExpr::call(ScalarOp::Coalesce, vec![col(&pair, 0)?, col(&pair, 1)?])?;
                (vec![add], vec![merge], col(&state_schema, 0)?)
            }
        };
        debug_assert_eq!(add.len(), n);

        Ok(Self {
            input_width: width,
            init,
            add: compile_all(add, &buffer)?,
            merge: compile_all(merge, &pair)?,
            result: compile_expr(&result, &state_schema)?,
        })
    }
}

/// Accumulator driven by a compiled [`Program`]; supports merging partial states.
pub struct CompiledAccumulator {
    program: Arc<Program>,
    state: Vec<Value>,
    buffer: Vec<Value>,
}

impl CompiledAccumulator {
    pub(super) fn new(program: Arc<Program>) -> Self {
        let state = program.init.clone();
        Self {
            program,
            state,
            buffer: Vec::new(),
        }
    }

    /// Accumulator for `AVG`, `BOOL_AND`, `BOOL_OR` or `ANY_VALUE` over rows shaped like `input`.
    pub fn for_call(call: &AggregateCall, input: &Schema) -> Result<Self> {
        let arg = match call.args.as_slice() {
            [one] => *one,
            other => {
                return Err(QuarryError::InvalidShape(format!(
                    "{} expects exactly one argument, got {}",
                    call.function,
                    other.len()
                )))
            }
        };
        let program = Program::for_call(&call.function, arg, input)?;
        Ok(Self::new(Arc::new(program)))
    }

    fn step(&mut self, exprs: &[Arc<dyn PhysicalExpr>]) -> Result<()> {
        self.state = exprs
            .iter()
            .map(|e| e.evaluate(&self.buffer))
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    /// Fold another partial state of the same call into this one.
    pub fn merge(&mut self, other: CompiledAccumulator) -> Result<()> {
        if self.state.len() != other.state.len() {
            return Err(QuarryError::Accumulator(
                "cannot merge accumulators of different aggregates".to_string(),
            ));
        }
        self.buffer.clear();
        self.buffer.extend(self.state.iter().cloned());
        self.buffer.extend(other.state);
        let program = Arc::clone(&self.program);
        self.step(&program.merge)
    }
}

impl Accumulator for CompiledAccumulator {
    fn send(&mut self, row: &[Value]) -> Result<()> {
        if row.len() != self.program.input_width {
            return Err(QuarryError::Execution(format!(
                "aggregate expected rows of {} values, got {}",
                self.program.input_width,
                row.len()
            )));
        }
        self.buffer.clear();
        self.buffer.extend_from_slice(row);
        self.buffer.extend(self.state.iter().cloned());
        let program = Arc::clone(&self.program);
        self.step(&program.add)
    }

    fn end(self: Box<Self>) -> Result<Value> {
        self.program.result.evaluate(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> Schema {
        Schema::new(vec![Field::new("x", DataType::Int64, true)])
    }

    fn feed(acc: &mut CompiledAccumulator, values: &[Option<i64>]) {
        for v in values {
            acc.send(&[v.map(Value::Int64).unwrap_or(Value::Null)]).unwrap();
        }
    }

    #[test]
    fn avg_merges_partial_states() {
        let s = input();
        let call = AggregateCall::new(AggFunction::Avg, vec![0], "a", &s).unwrap();
        let mut left = CompiledAccumulator::for_call(&call, &s).unwrap();
        let mut right = CompiledAccumulator::for_call(&call, &s).unwrap();
        feed(&mut left, &[Some(1), None]);
        feed(&mut right, &[Some(2), Some(6)]);
        left.merge(right).unwrap();
        assert_eq!(Box::new(left).end().unwrap(), Value::Float64(3.0));
    }

    #[test]
    fn merging_with_an_empty_state_keeps_the_value() {
        let s = input();
        let call = AggregateCall::new(AggFunction::AnyValue, vec![0], "a", &s).unwrap();
        let mut left = CompiledAccumulator::for_call(&call, &s).unwrap();
        let mut right = CompiledAccumulator::for_call(&call, &s).unwrap();
        feed(&mut right, &[None, Some(9)]);
        left.merge(right).unwrap();
        assert_eq!(Box::new(left).end().unwrap(), Value::Int64(9));
    }

    #[test]
    fn non_numeric_avg_is_rejected() {
        let s = Schema::new(vec![Field::new("s", DataType::Utf8, true)]);
        let call = AggregateCall::typed(AggFunction::Avg, vec![0], "a", SqlType::float64(true));
        assert!(CompiledAccumulator::for_call(&call, &s).is_err());
    }
}
