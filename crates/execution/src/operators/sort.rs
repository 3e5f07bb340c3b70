use std::cmp::Ordering;
use std::sync::Arc;

use arrow_schema::SchemaRef;
use quarry_common::Result;
use quarry_planner::{Collation, FieldCollation, NullOrder, SortDirection, Value};

use crate::context::SharedTaskContext;
use crate::exec_node::{spawn_unit, ExecNode, ExecNodeRef, UnitStats};
use crate::stream::{Row, RowStream};

/// Materializing sort with optional `OFFSET` / `FETCH`.
pub struct SortExec {
    input: ExecNodeRef,
    collation: Collation,
    offset: usize,
    fetch: Option<usize>,
}

impl SortExec {
    /// Sort `input` by `collation`, then skip `offset` rows and keep at most `fetch`.
    pub fn new(input: ExecNodeRef, collation: Collation, offset: Option<usize>, fetch: Option<usize>) -> Self {
        Self {
            input,
            collation,
            offset: offset.unwrap_or(0),
            fetch,
        }
    }
}

fn compare_field(a: &Value, b: &Value, key: &FieldCollation) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => match key.nulls {
            NullOrder::First => Ordering::Less,
            NullOrder::Last => Ordering::Greater,
        },
        (false, true) => match key.nulls {
            NullOrder::First => Ordering::Greater,
            NullOrder::Last => Ordering::Less,
        },
        (false, false) => {
            let ord = a.sort_cmp(b);
            match key.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        }
    }
}

fn compare_rows(a: &Row, b: &Row, collation: &Collation) -> Ordering {
    for key in collation.fields() {
        let (Some(x), Some(y)) = (a.get(key.field), b.get(key.field)) else {
            continue;
        };
        let ord = compare_field(x, y, key);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl ExecNode for SortExec {
    fn name(&self) -> &'static str {
        "Sort"
    }

    fn schema(&self) -> SchemaRef {
        self.input.schema()
    }

    fn execute(&self, ctx: SharedTaskContext) -> Result<RowStream> {
        let mut input = self.input.execute(Arc::clone(&ctx))?;
        let collation = self.collation.clone();
        let (offset, fetch) = (self.offset, self.fetch);
        Ok(spawn_unit(ctx, self.name(), self.schema(), move |mut tx| async move {
            let mut rows = Vec::new();
            while let Some(row) = input.next_row().await {
                rows.push(row?);
            }
            let mut stats = UnitStats {
                rows_in: rows.len() as u64,
                rows_out: 0,
            };
            // stable, so equal keys keep arrival order
            rows.sort_by(|a, b| compare_rows(a, b, &collation));
            let take = fetch.unwrap_or(usize::MAX);
            for row in rows.into_iter().skip(offset).take(take) {
                tx.send_row(row).await?;
                stats.rows_out += 1;
            }
            Ok(stats)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descending_puts_nulls_first_by_default() {
        let mut rows: Vec<Row> = vec![
            vec![Value::Int64(2)],
            vec![Value::Null],
            vec![Value::Int64(1)],
        ];
        let collation = Collation(vec![FieldCollation::desc(0)]);
        rows.sort_by(|a, b| compare_rows(a, b, &collation));
        assert_eq!(
            rows,
            vec![vec![Value::Null], vec![Value::Int64(2)], vec![Value::Int64(1)]]
        );
    }
}
