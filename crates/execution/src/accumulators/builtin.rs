use std::cmp::Ordering;
use std::marker::PhantomData;

use arrow_schema::DataType;
use quarry_common::{QuarryError, Result};
use quarry_planner::Value;

use super::{arg_value, Accumulator};

pub(super) struct CountAccumulator {
    args: Vec<usize>,
    count: i64,
}

impl CountAccumulator {
    pub(super) fn new(args: Vec<usize>) -> Self {
        Self { args, count: 0 }
    }
}

impl Accumulator for CountAccumulator {
    fn send(&mut self, row: &[Value]) -> Result<()> {
        for &arg in &self.args {
            if arg_value(row, arg)?.is_null() {
                return Ok(());
            }
        }
        self.count += 1;
        Ok(())
    }

    fn end(self: Box<Self>) -> Result<Value> {
        Ok(Value::Int64(self.count))
    }
}

/// Numeric column type with a typed fold.
trait Native: Copy + PartialOrd + Send + 'static {
    const MIN: Self;
    const MAX: Self;
    const ZERO: Self;
    fn from_value(v: &Value) -> Option<Self>;
    fn into_value(self) -> Value;
    fn checked_add(self, other: Self) -> Option<Self>;
}

macro_rules! native_int {
    ($t:ty, $variant:ident) => {
        impl Native for $t {
            const MIN: Self = <$t>::MIN;
            const MAX: Self = <$t>::MAX;
            const ZERO: Self = 0;
            fn from_value(v: &Value) -> Option<Self> {
                match v {
                    Value::$variant(x) => Some(*x),
                    _ => None,
                }
            }
            fn into_value(self) -> Value {
                Value::$variant(self)
            }
            fn checked_add(self, other: Self) -> Option<Self> {
                <$t>::checked_add(self, other)
            }
        }
    };
}

// Float seeds are the infinities so infinite inputs still replace them.
macro_rules! native_float {
    ($t:ty, $variant:ident) => {
        impl Native for $t {
            const MIN: Self = <$t>::NEG_INFINITY;
            const MAX: Self = <$t>::INFINITY;
            const ZERO: Self = 0.0;
            fn from_value(v: &Value) -> Option<Self> {
                match v {
                    Value::$variant(x) => Some(*x),
                    _ => None,
                }
            }
            fn into_value(self) -> Value {
                Value::$variant(self)
            }
            fn checked_add(self, other: Self) -> Option<Self> {
                Some(self + other)
            }
        }
    };
}

native_int!(i32, Int32);
native_int!(i64, Int64);
native_float!(f32, Float32);
native_float!(f64, Float64);

fn typed<T: Native>(v: &Value, what: &str) -> Result<Option<T>> {
    if v.is_null() {
        return Ok(None);
    }
    T::from_value(v).map(Some).ok_or_else(|| {
        QuarryError::Accumulator(format!("{what} received unexpected value {v:?}"))
    })
}

struct SumAccumulator<T: Native> {
    arg: usize,
    sum: T,
    seen: bool,
    zero_when_empty: bool,
}

impl<T: Native> Accumulator for SumAccumulator<T> {
    fn send(&mut self, row: &[Value]) -> Result<()> {
        let Some(v) = typed::<T>(arg_value(row, self.arg)?, "SUM")? else {
            return Ok(());
        };
        self.sum = self.sum.checked_add(v).ok_or_else(|| {
            QuarryError::Accumulator(format!("SUM overflow adding {}", v.into_value()))
        })?;
        self.seen = true;
        Ok(())
    }

    fn end(self: Box<Self>) -> Result<Value> {
        Ok(if self.seen || self.zero_when_empty {
            self.sum.into_value()
        } else {
            Value::Null
        })
    }
}

/// Keeps the input the comparator prefers, starting from the type's extreme.
struct PickAccumulator<T: Native, C> {
    arg: usize,
    current: T,
    seen: bool,
    _cmp: PhantomData<C>,
}

trait Prefer: Send + 'static {
    const NAME: &'static str;
    fn prefer<T: PartialOrd>(candidate: &T, current: &T) -> bool;
}

struct Lesser;
struct Greater;

impl Prefer for Lesser {
    const NAME: &'static str = "MIN";
    fn prefer<T: PartialOrd>(candidate: &T, current: &T) -> bool {
        candidate < current
    }
}

impl Prefer for Greater {
    const NAME: &'static str = "MAX";
    fn prefer<T: PartialOrd>(candidate: &T, current: &T) -> bool {
        candidate > current
    }
}

impl<T: Native, C: Prefer> PickAccumulator<T, C> {
    fn seeded(arg: usize, seed: T) -> Self {
        Self {
            arg,
            current: seed,
            seen: false,
            _cmp: PhantomData,
        }
    }
}

impl<T: Native, C: Prefer> Accumulator for PickAccumulator<T, C> {
    fn send(&mut self, row: &[Value]) -> Result<()> {
        if let Some(v) = typed::<T>(arg_value(row, self.arg)?, C::NAME)? {
            if C::prefer(&v, &self.current) {
                self.current = v;
            }
            self.seen = true;
        }
        Ok(())
    }

    fn end(self: Box<Self>) -> Result<Value> {
        Ok(if self.seen {
            self.current.into_value()
        } else {
            Value::Null
        })
    }
}

/// MIN/MAX over values without a numeric fast path.
struct ValuePickAccumulator {
    arg: usize,
    best: Option<Value>,
    want: Ordering,
}

impl Accumulator for ValuePickAccumulator {
    fn send(&mut self, row: &[Value]) -> Result<()> {
        let v = arg_value(row, self.arg)?;
        if v.is_null() {
            return Ok(());
        }
        let replace = match &self.best {
            None => true,
            Some(best) => {
                let ord = v.compare(best).ok_or_else(|| {
                    QuarryError::Accumulator(format!("cannot compare {v:?} with {best:?}"))
                })?;
                ord == self.want
            }
        };
        if replace {
            self.best = Some(v.clone());
        }
        Ok(())
    }

    fn end(self: Box<Self>) -> Result<Value> {
        Ok(self.best.unwrap_or(Value::Null))
    }
}

pub(super) fn sum_accumulator(
    arg: usize,
    dt: &DataType,
    zero_when_empty: bool,
) -> Result<Box<dyn Accumulator>> {
    fn make<T: Native>(arg: usize, zero_when_empty: bool) -> Box<dyn Accumulator> {
        Box::new(SumAccumulator::<T> {
            arg,
            sum: T::ZERO,
            seen: false,
            zero_when_empty,
        })
    }
    Ok(match dt {
        DataType::Int32 => make::<i32>(arg, zero_when_empty),
        DataType::Int64 => make::<i64>(arg, zero_when_empty),
        DataType::Float32 => make::<f32>(arg, zero_when_empty),
        DataType::Float64 => make::<f64>(arg, zero_when_empty),
        other => {
            return Err(QuarryError::InvalidShape(format!(
                "SUM over non-numeric type {other:?}"
            )))
        }
    })
}

pub(super) fn pick_accumulator(arg: usize, dt: &DataType, is_max: bool) -> Box<dyn Accumulator> {
    fn make<T: Native>(arg: usize, is_max: bool) -> Box<dyn Accumulator> {
        if is_max {
            Box::new(PickAccumulator::<T, Greater>::seeded(arg, T::MIN))
        } else {
            Box::new(PickAccumulator::<T, Lesser>::seeded(arg, T::MAX))
        }
    }
    match dt {
        DataType::Int32 => make::<i32>(arg, is_max),
        DataType::Int64 => make::<i64>(arg, is_max),
        DataType::Float32 => make::<f32>(arg, is_max),
        DataType::Float64 => make::<f64>(arg, is_max),
        _ => Box::new(ValuePickAccumulator {
            arg,
            best: None,
            want: if is_max {
                Ordering::Greater
            } else {
                Ordering::Less
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_min_seeded_with_extreme_reports_extreme_input() {
        let mut acc = pick_accumulator(0, &DataType::Int32, false);
        acc.send(&[Value::Int32(i32::MAX)]).unwrap();
        assert_eq!(acc.end().unwrap(), Value::Int32(i32::MAX));
    }

    #[test]
    fn float_max_accepts_negative_infinity() {
        let mut acc = pick_accumulator(0, &DataType::Float64, true);
        acc.send(&[Value::Float64(f64::NEG_INFINITY)]).unwrap();
        assert_eq!(acc.end().unwrap(), Value::Float64(f64::NEG_INFINITY));
    }

    #[test]
    fn mistyped_input_is_rejected() {
        let mut acc = sum_accumulator(0, &DataType::Int64, false).unwrap();
        let err = acc.send(&[Value::Utf8("x".into())]).unwrap_err();
        assert!(matches!(err, QuarryError::Accumulator(_)));
    }
}
