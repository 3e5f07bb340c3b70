//! Per-group aggregate state.
//!
//! An [`AccumulatorFactory`] is resolved once per aggregate call when an
//! `Aggregate` unit is built; it then creates one [`Accumulator`] for every
//! distinct grouping key. Strategies:
//! - built-in typed folds for `COUNT`, `SUM`, `SUM0`, `MIN` and `MAX`
//! - compiled scalar programs for `AVG`, `BOOL_AND`, `BOOL_OR` and `ANY_VALUE`
//! - user-defined aggregates resolved through [`UdafRegistry`]
//! - a filtering wrapper for calls carrying a `FILTER` column

mod builtin;
mod compiled;
mod user;

use std::sync::Arc;

use arrow_schema::{DataType, Schema};
use quarry_common::{QuarryError, Result};
use quarry_planner::{AggFunction, AggregateCall, Value};

use crate::udaf::{UdafEntry, UdafRegistry};

pub use compiled::CompiledAccumulator;

/// Running state of one aggregate call for one group.
///
/// `end` consumes the accumulator, so it runs exactly once.
pub trait Accumulator: Send {
    /// Feed one input row.
    fn send(&mut self, row: &[Value]) -> Result<()>;
    /// Final value.
    fn end(self: Box<Self>) -> Result<Value>;
}

#[derive(Clone)]
enum Strategy {
    Count { args: Vec<usize> },
    Sum { arg: usize, dt: DataType, zero_when_empty: bool },
    Pick { arg: usize, dt: DataType, is_max: bool },
    Compiled(Arc<compiled::Program>),
    User { arg: usize, entry: UdafEntry, name: String },
}

/// Creates accumulators for one aggregate call.
#[derive(Clone)]
pub struct AccumulatorFactory {
    strategy: Strategy,
    filter_arg: Option<usize>,
}

impl std::fmt::Debug for AccumulatorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let strategy = match &self.strategy {
            Strategy::Count { .. } => "count",
            Strategy::Sum { .. } => "sum",
            Strategy::Pick { .. } => "pick",
            Strategy::Compiled(_) => "compiled",
            Strategy::User { .. } => "user",
        };
        f.debug_struct("AccumulatorFactory")
            .field("strategy", &strategy)
            .field("filter_arg", &self.filter_arg)
            .finish()
    }
}

impl AccumulatorFactory {
    /// Resolve the strategy for `call` over rows shaped like `input`.
    pub fn new(call: &AggregateCall, input: &Schema, udafs: &UdafRegistry) -> Result<Self> {
        let width = input.fields().len();
        if let Some(bad) = call.args.iter().chain(call.filter_arg.iter()).find(|&&i| i >= width) {
            return Err(QuarryError::InvalidShape(format!(
                "aggregate {call} references ${bad} of a {width}-column input"
            )));
        }
        let arg_type = |i: usize| input.field(i).data_type().clone();
        let single = || -> Result<usize> {
            match call.args.as_slice() {
                [one] => Ok(*one),
                other => Err(QuarryError::InvalidShape(format!(
                    "{} expects exactly one argument, got {}",
                    call.function,
                    other.len()
                ))),
            }
        };
        let strategy = match &call.function {
            AggFunction::Count => Strategy::Count {
                args: call.args.clone(),
            },
            AggFunction::Sum | AggFunction::Sum0 => {
                let arg = single()?;
                Strategy::Sum {
                    arg,
                    dt: arg_type(arg),
                    zero_when_empty: call.function == AggFunction::Sum0,
                }
            }
            AggFunction::Min | AggFunction::Max => {
                let arg = single()?;
                Strategy::Pick {
                    arg,
                    dt: arg_type(arg),
                    is_max: call.function == AggFunction::Max,
                }
            }
            AggFunction::Avg | AggFunction::BoolAnd | AggFunction::BoolOr | AggFunction::AnyValue => {
                let arg = single()?;
                Strategy::Compiled(Arc::new(compiled::Program::for_call(&call.function, arg, input)?))
            }
            AggFunction::UserDefined(name) => {
                let entry = udafs.get(name).ok_or_else(|| {
                    QuarryError::Planning(format!("unknown aggregate function '{name}'"))
                })?;
                let arg = match call.args.as_slice() {
                    [one] => *one,
                    other => {
                        return Err(QuarryError::Planning(format!(
                            "user-defined aggregate '{name}' takes exactly one argument, got {}",
                            other.len()
                        )))
                    }
                };
                Strategy::User {
                    arg,
                    entry,
                    name: name.clone(),
                }
            }
        };
        Ok(Self {
            strategy,
            filter_arg: call.filter_arg,
        })
    }

    /// Fresh accumulator in its initial state.
    pub fn create(&self) -> Result<Box<dyn Accumulator>> {
        let inner: Box<dyn Accumulator> = match &self.strategy {
            Strategy::Count { args } => Box::new(builtin::CountAccumulator::new(args.clone())),
            Strategy::Sum {
                arg,
                dt,
                zero_when_empty,
            } => builtin::sum_accumulator(*arg, dt, *zero_when_empty)?,
            Strategy::Pick { arg, dt, is_max } => builtin::pick_accumulator(*arg, dt, *is_max),
            Strategy::Compiled(program) => Box::new(CompiledAccumulator::new(Arc::clone(program))),
            Strategy::User { arg, entry, name } => {
                Box::new(user::UserAccumulator::new(*arg, entry, name)?)
            }
        };
        Ok(match self.filter_arg {
            Some(filter_arg) => Box::new(FilteredAccumulator { inner, filter_arg }),
            None => inner,
        })
    }
}

/// Forwards rows whose filter column is `true`.
struct FilteredAccumulator {
    inner: Box<dyn Accumulator>,
    filter_arg: usize,
}

impl Accumulator for FilteredAccumulator {
    fn send(&mut self, row: &[Value]) -> Result<()> {
        match row.get(self.filter_arg) {
            Some(Value::Boolean(true)) => self.inner.send(row),
            Some(Value::Boolean(false)) | Some(Value::Null) => Ok(()),
            Some(other) => Err(QuarryError::Execution(format!(
                "aggregate filter column ${} holds non-boolean {other:?}",
                self.filter_arg
            ))),
            None => Err(QuarryError::Execution(format!(
                "aggregate filter column ${} missing from row of {} values",
                self.filter_arg,
                row.len()
            ))),
        }
    }

    fn end(self: Box<Self>) -> Result<Value> {
        self.inner.end()
    }
}

pub(crate) fn arg_value(row: &[Value], arg: usize) -> Result<&Value> {
    row.get(arg).ok_or_else(|| {
        QuarryError::Execution(format!(
            "aggregate argument ${arg} missing from row of {} values",
            row.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use arrow_schema::Field;
    use quarry_planner::SqlType;

    use super::*;
    use crate::udaf::UserAggregate;

    fn run(call: &AggregateCall, input: &Schema, rows: &[Vec<Value>]) -> Result<Value> {
        run_with(call, input, rows, &UdafRegistry::default())
    }

    fn run_with(
        call: &AggregateCall,
        input: &Schema,
        rows: &[Vec<Value>],
        udafs: &UdafRegistry,
    ) -> Result<Value> {
        let factory = AccumulatorFactory::new(call, input, udafs)?;
        let mut acc = factory.create()?;
        for row in rows {
            acc.send(row)?;
        }
        acc.end()
    }

    fn two_ints() -> Schema {
        Schema::new(vec![
            Field::new("a", DataType::Int64, true),
            Field::new("b", DataType::Int64, true),
        ])
    }

    fn ints(values: &[Option<i64>]) -> Vec<Vec<Value>> {
        values
            .iter()
            .map(|v| vec![v.map(Value::Int64).unwrap_or(Value::Null), Value::Null])
            .collect()
    }

    #[test]
    fn count_skips_null_arguments_but_star_counts_all() {
        let s = two_ints();
        let rows = vec![
            vec![Value::Int64(1), Value::Null],
            vec![Value::Int64(2), Value::Int64(3)],
            vec![Value::Null, Value::Int64(4)],
        ];
        let count_a = AggregateCall::new(AggFunction::Count, vec![0], "c", &s).unwrap();
        let count_star = AggregateCall::new(AggFunction::Count, vec![], "c", &s).unwrap();
        let count_ab = AggregateCall::new(AggFunction::Count, vec![0, 1], "c", &s).unwrap();
        assert_eq!(run(&count_a, &s, &rows).unwrap(), Value::Int64(2));
        assert_eq!(run(&count_star, &s, &rows).unwrap(), Value::Int64(3));
        assert_eq!(run(&count_ab, &s, &rows).unwrap(), Value::Int64(1));
    }

    #[test]
    fn sum_and_sum0_differ_only_when_empty() {
        let s = two_ints();
        let sum = AggregateCall::new(AggFunction::Sum, vec![0], "s", &s).unwrap();
        let sum0 = AggregateCall::new(AggFunction::Sum0, vec![0], "s", &s).unwrap();
        let rows = ints(&[Some(5), None, Some(7)]);
        assert_eq!(run(&sum0, &s, &rows).unwrap(), Value::Int64(12));
        assert_eq!(run(&sum, &s, &rows).unwrap(), Value::Int64(12));
        let nulls = ints(&[None, None]);
        assert_eq!(run(&sum, &s, &nulls).unwrap(), Value::Null);
        assert_eq!(run(&sum0, &s, &nulls).unwrap(), Value::Int64(0));
    }

    #[test]
    fn sum_overflow_is_an_accumulator_error() {
        let s = two_ints();
        let sum = AggregateCall::new(AggFunction::Sum, vec![0], "s", &s).unwrap();
        let err = run(&sum, &s, &ints(&[Some(i64::MAX), Some(1)])).unwrap_err();
        assert!(matches!(err, QuarryError::Accumulator(_)));
    }

    #[test]
    fn min_max_over_floats_and_strings() {
        let s = Schema::new(vec![
            Field::new("x", DataType::Float64, true),
            Field::new("s", DataType::Utf8, true),
        ]);
        let rows = vec![
            vec![Value::Float64(-2.5), Value::Utf8("pear".into())],
            vec![Value::Null, Value::Null],
            vec![Value::Float64(-7.0), Value::Utf8("apple".into())],
        ];
        let min = AggregateCall::new(AggFunction::Min, vec![0], "m", &s).unwrap();
        let max = AggregateCall::new(AggFunction::Max, vec![0], "m", &s).unwrap();
        let min_s = AggregateCall::new(AggFunction::Min, vec![1], "m", &s).unwrap();
        assert_eq!(run(&min, &s, &rows).unwrap(), Value::Float64(-7.0));
        // all inputs negative: the seed must not leak into the result
        assert_eq!(run(&max, &s, &rows).unwrap(), Value::Float64(-2.5));
        assert_eq!(run(&min_s, &s, &rows).unwrap(), Value::Utf8("apple".into()));
        assert_eq!(run(&max, &s, &[]).unwrap(), Value::Null);
    }

    #[test]
    fn avg_and_boolean_folds() {
        let s = Schema::new(vec![
            Field::new("x", DataType::Int32, true),
            Field::new("b", DataType::Boolean, true),
        ]);
        let rows = vec![
            vec![Value::Int32(1), Value::Boolean(true)],
            vec![Value::Null, Value::Null],
            vec![Value::Int32(4), Value::Boolean(false)],
        ];
        let avg = AggregateCall::new(AggFunction::Avg, vec![0], "a", &s).unwrap();
        let all = AggregateCall::new(AggFunction::BoolAnd, vec![1], "a", &s).unwrap();
        let any = AggregateCall::new(AggFunction::BoolOr, vec![1], "a", &s).unwrap();
        let first = AggregateCall::new(AggFunction::AnyValue, vec![0], "a", &s).unwrap();
        assert_eq!(run(&avg, &s, &rows).unwrap(), Value::Float64(2.5));
        assert_eq!(run(&all, &s, &rows).unwrap(), Value::Boolean(false));
        assert_eq!(run(&any, &s, &rows).unwrap(), Value::Boolean(true));
        assert_eq!(run(&first, &s, &rows).unwrap(), Value::Int32(1));
        assert_eq!(run(&avg, &s, &[]).unwrap(), Value::Null);
        assert_eq!(run(&all, &s, &[]).unwrap(), Value::Null);
    }

    #[test]
    fn filtered_count_only_sees_true_rows() {
        let s = Schema::new(vec![
            Field::new("v", DataType::Int64, false),
            Field::new("keep", DataType::Boolean, true),
        ]);
        let rows = vec![
            vec![Value::Int64(1), Value::Boolean(true)],
            vec![Value::Int64(2), Value::Boolean(false)],
            vec![Value::Int64(3), Value::Boolean(true)],
            vec![Value::Int64(4), Value::Null],
        ];
        let call = AggregateCall::new(AggFunction::Count, vec![0], "c", &s)
            .unwrap()
            .with_filter(1);
        assert_eq!(run(&call, &s, &rows).unwrap(), Value::Int64(2));
    }

    struct Concat;

    impl UserAggregate for Concat {
        fn init(&mut self) -> Result<Value> {
            Ok(Value::Utf8(String::new()))
        }

        fn add(&mut self, state: Value, value: &Value) -> Result<Value> {
            Ok(Value::Utf8(format!("{state}{value}")))
        }

        fn merge(&mut self, left: Value, right: Value) -> Result<Value> {
            Ok(Value::Utf8(format!("{left}{right}")))
        }

        fn result(&mut self, state: Value) -> Result<Value> {
            Ok(state)
        }
    }

    #[test]
    fn user_aggregate_skips_nulls_and_honors_null_when_empty() {
        let s = two_ints();
        let udafs = UdafRegistry::default();
        udafs.register("concat_all", true, || Box::new(Concat));
        let call = AggregateCall::typed(
            AggFunction::from_name("CONCAT_ALL"),
            vec![0],
            "c",
            SqlType::utf8(true),
        );
        let rows = ints(&[Some(1), None, Some(2)]);
        assert_eq!(run_with(&call, &s, &rows, &udafs).unwrap(), Value::Utf8("12".into()));
        assert_eq!(run_with(&call, &s, &[], &udafs).unwrap(), Value::Null);

        let two_args = AggregateCall::typed(
            AggFunction::from_name("concat_all"),
            vec![0, 1],
            "c",
            SqlType::utf8(true),
        );
        assert!(AccumulatorFactory::new(&two_args, &s, &udafs).is_err());
        let unknown = AggregateCall::typed(
            AggFunction::from_name("nope"),
            vec![0],
            "c",
            SqlType::utf8(true),
        );
        assert!(matches!(
            AccumulatorFactory::new(&unknown, &s, &udafs),
            Err(QuarryError::Planning(_))
        ));
    }
}
