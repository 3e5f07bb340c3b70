//! Grouped aggregation over one or more grouping sets.

use std::sync::Arc;

use arrow_schema::{Schema, SchemaRef};
use indexmap::IndexMap;
use quarry_common::{QuarryError, Result};
use quarry_planner::{group_set, AggregateCall, ColumnSet, Value};
use tracing::debug;

use crate::accumulators::{Accumulator, AccumulatorFactory};
use crate::context::SharedTaskContext;
use crate::exec_node::{spawn_unit, ExecNode, ExecNodeRef, UnitStats};
use crate::stream::{Row, RowStream};

/// Canonical byte encoding of a projected grouping key.
///
/// Each value is a tag byte plus a fixed or length-prefixed payload, so
/// distinct keys never share an encoding.
fn encode_key(row: &[Value], columns: &ColumnSet, out: &mut Vec<u8>) -> Result<()> {
    out.clear();
    for c in columns.iter() {
        let v = row.get(c).ok_or_else(|| {
            QuarryError::Execution(format!(
                "grouping column ${c} missing from row of {} values",
                row.len()
            ))
        })?;
        match v {
            Value::Null => out.push(0),
            Value::Boolean(b) => out.extend_from_slice(&[1, u8::from(*b)]),
            Value::Int32(x) => {
                out.push(2);
                out.extend_from_slice(&x.to_be_bytes());
            }
            Value::Int64(x) => {
                out.push(3);
                out.extend_from_slice(&x.to_be_bytes());
            }
            Value::Float32(x) => {
                out.push(4);
                out.extend_from_slice(&x.to_bits().to_be_bytes());
            }
            Value::Float64(x) => {
                out.push(5);
                out.extend_from_slice(&x.to_bits().to_be_bytes());
            }
            Value::Utf8(s) => {
                out.push(6);
                out.extend_from_slice(&(s.len() as u64).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }
    Ok(())
}

struct Group {
    key: Vec<Value>,
    accumulators: Vec<Box<dyn Accumulator>>,
}

/// Per grouping set state: insertion-ordered groups.
struct GroupingSetState {
    columns: ColumnSet,
    groups: IndexMap<Vec<u8>, Group>,
}

fn new_accumulators(factories: &[AccumulatorFactory]) -> Result<Vec<Box<dyn Accumulator>>> {
    factories.iter().map(AccumulatorFactory::create).collect()
}

/// Hash aggregation unit.
pub struct AggregateExec {
    input: ExecNodeRef,
    grouping_sets: Vec<ColumnSet>,
    indicator: bool,
    factories: Arc<Vec<AccumulatorFactory>>,
    schema: SchemaRef,
}

impl AggregateExec {
    /// Aggregate `input` by `grouping_sets`, computing `calls`; `schema` is the
    /// planned output row shape.
    pub fn new(
        input: ExecNodeRef,
        grouping_sets: Vec<ColumnSet>,
        calls: &[AggregateCall],
        indicator: bool,
        schema: SchemaRef,
        ctx: &SharedTaskContext,
    ) -> Result<Self> {
        let input_schema: SchemaRef = input.schema();
        let factories = calls
            .iter()
            .map(|c| AccumulatorFactory::new(c, input_schema.as_ref(), &ctx.udafs))
            .collect::<Result<Vec<_>>>()?;
        if grouping_sets.is_empty() {
            return Err(QuarryError::InvalidShape(
                "aggregate needs at least one grouping set".to_string(),
            ));
        }
        Ok(Self {
            input,
            grouping_sets,
            indicator,
            factories: Arc::new(factories),
            schema,
        })
    }
}

fn output_row(
    groups: &ColumnSet,
    set: &ColumnSet,
    indicator: bool,
    group: Group,
) -> Result<Row> {
    let mut row = Vec::with_capacity(groups.len() * 2 + group.accumulators.len());
    for c in groups.iter() {
        let v = match set.position(c) {
            Some(p) => group.key.get(p).cloned().unwrap_or(Value::Null),
            None => Value::Null,
        };
        row.push(v);
    }
    if indicator {
        row.extend(groups.iter().map(|c| Value::Boolean(set.contains(c))));
    }
    for acc in group.accumulators {
        row.push(acc.end()?);
    }
    Ok(row)
}

impl ExecNode for AggregateExec {
    fn name(&self) -> &'static str {
        "Aggregate"
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn execute(&self, ctx: SharedTaskContext) -> Result<RowStream> {
        let mut input = self.input.execute(Arc::clone(&ctx))?;
        let factories = Arc::clone(&self.factories);
        let all_groups = group_set(&self.grouping_sets);
        let mut sets = self
            .grouping_sets
            .iter()
            .map(|columns| GroupingSetState {
                columns: columns.clone(),
                groups: IndexMap::new(),
            })
            .collect::<Vec<_>>();
        let indicator = self.indicator;
        Ok(spawn_unit(ctx, self.name(), self.schema(), move |mut tx| async move {
            let mut stats = UnitStats::default();
            let mut key = Vec::new();
            while let Some(row) = input.next_row().await {
                let row = row?;
                stats.rows_in += 1;
                for set in &mut sets {
                    encode_key(&row, &set.columns, &mut key)?;
                    let index = match set.groups.get_index_of(key.as_slice()) {
                        Some(index) => index,
                        None => {
                            let group = Group {
                                key: set
                                    .columns
                                    .iter()
                                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                                    .collect(),
                                accumulators: new_accumulators(&factories)?,
                            };
                            set.groups.insert_full(key.clone(), group).0
                        }
                    };
                    for acc in &mut set.groups[index].accumulators {
                        acc.send(&row)?;
                    }
                }
            }
            debug!(
                rows_in = stats.rows_in,
                groups = sets.iter().map(|s| s.groups.len()).sum::<usize>(),
                "aggregate input drained"
            );
            for mut set in sets {
                if set.columns.is_empty() && set.groups.is_empty() {
                    set.groups.insert(
                        Vec::new(),
                        Group {
                            key: Vec::new(),
                            accumulators: new_accumulators(&factories)?,
                        },
                    );
                }
                for (_, group) in set.groups {
                    let out = output_row(&all_groups, &set.columns, indicator, group)?;
                    tx.send_row(out).await?;
                    stats.rows_out += 1;
                }
            }
            Ok(stats)
        }))
    }
}

/// Row shape check used by pipeline construction.
pub(crate) fn check_output_width(schema: &Schema, grouping_sets: &[ColumnSet], calls: usize, indicator: bool) -> Result<()> {
    let groups = group_set(grouping_sets).len();
    let expected = groups + if indicator { groups } else { 0 } + calls;
    if schema.fields().len() != expected {
        return Err(QuarryError::InvalidShape(format!(
            "aggregate row shape has {} fields, expected {expected}",
            schema.fields().len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_of_different_types_do_not_collide() {
        let cols = ColumnSet::of(&[0, 1]);
        let mut a = Vec::new();
        let mut b = Vec::new();
        encode_key(&[Value::Utf8("ab".into()), Value::Utf8("c".into())], &cols, &mut a).unwrap();
        encode_key(&[Value::Utf8("a".into()), Value::Utf8("bc".into())], &cols, &mut b).unwrap();
        assert_ne!(a, b);
        encode_key(&[Value::Null, Value::Int64(0)], &cols, &mut a).unwrap();
        encode_key(&[Value::Int64(0), Value::Null], &cols, &mut b).unwrap();
        assert_ne!(a, b);
    }
}
