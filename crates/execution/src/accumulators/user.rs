use quarry_common::{QuarryError, Result};
use quarry_planner::Value;

use super::{arg_value, Accumulator};
use crate::udaf::{UdafEntry, UserAggregate};

/// Adapts a registered [`UserAggregate`] to the accumulator protocol.
pub(super) struct UserAccumulator {
    arg: usize,
    name: String,
    aggregate: Box<dyn UserAggregate>,
    state: Value,
    contributed: bool,
    null_when_empty: bool,
}

fn wrap(name: &str, step: &str, err: QuarryError) -> QuarryError {
    match err {
        QuarryError::Accumulator(_) | QuarryError::Cancelled => err,
        other => QuarryError::Accumulator(format!("{name}.{step}: {other}")),
    }
}

impl UserAccumulator {
    pub(super) fn new(arg: usize, entry: &UdafEntry, name: &str) -> Result<Self> {
        let mut aggregate = (entry.factory)();
        let state = aggregate.init().map_err(|e| wrap(name, "init", e))?;
        Ok(Self {
            arg,
            name: name.to_string(),
            aggregate,
            state,
            contributed: false,
            null_when_empty: entry.null_when_empty,
        })
    }
}

impl Accumulator for UserAccumulator {
    fn send(&mut self, row: &[Value]) -> Result<()> {
        let value = arg_value(row, self.arg)?;
        if value.is_null() {
            return Ok(());
        }
        let state = std::mem::replace(&mut self.state, Value::Null);
        self.state = self
            .aggregate
            .add(state, value)
            .map_err(|e| wrap(&self.name, "add", e))?;
        self.contributed = true;
        Ok(())
    }

    fn end(mut self: Box<Self>) -> Result<Value> {
        if self.null_when_empty && !self.contributed {
            return Ok(Value::Null);
        }
        let state = std::mem::replace(&mut self.state, Value::Null);
        self.aggregate
            .result(state)
            .map_err(|e| wrap(&self.name, "result", e))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    struct Failing;

    impl UserAggregate for Failing {
        fn init(&mut self) -> Result<Value> {
            Ok(Value::Null)
        }

        fn add(&mut self, _state: Value, _value: &Value) -> Result<Value> {
            Err(QuarryError::Execution("boom".to_string()))
        }

        fn merge(&mut self, left: Value, _right: Value) -> Result<Value> {
            Ok(left)
        }

        fn result(&mut self, state: Value) -> Result<Value> {
            Ok(state)
        }
    }

    #[test]
    fn add_failure_surfaces_as_accumulator_error() {
        let entry = UdafEntry {
            factory: Arc::new(|| Box::new(Failing) as Box<dyn UserAggregate>),
            null_when_empty: false,
        };
        let mut acc = UserAccumulator::new(0, &entry, "failing").unwrap();
        acc.send(&[Value::Null]).unwrap();
        let err = acc.send(&[Value::Int64(1)]).unwrap_err();
        assert!(matches!(err, QuarryError::Accumulator(msg) if msg.contains("failing.add")));
    }
}
