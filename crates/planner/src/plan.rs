//! Immutable operator plan trees.
//!
//! Every [`PlanNode`] owns its inputs, carries a stable [`NodeId`] and a row
//! shape derived (and validated) at construction time. Malformed trees never
//! exist: constructors and deserialization fail with `InvalidShape`.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use quarry_common::{NodeId, QuarryError, Result, TableId};
use serde::{Deserialize, Serialize};

use crate::expr::ScalarExpr;
use crate::traits::{Collation, ColumnSet, Distribution};
use crate::types::{SqlType, Value};

/// Catalog table referenced by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub id: TableId,
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(id: TableId, schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// `schema.table`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
}

impl JoinType {
    /// Whether the output carries the right input's columns.
    pub fn projects_right(self) -> bool {
        !matches!(self, JoinType::Semi | JoinType::Anti)
    }
}

/// Aggregate function referenced by an [`AggregateCall`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunction {
    Count,
    /// Null over zero contributing rows.
    Sum,
    /// Zero over zero contributing rows.
    Sum0,
    Min,
    Max,
    Avg,
    BoolAnd,
    BoolOr,
    AnyValue,
    /// Resolved by name against the user-defined aggregate registry.
    UserDefined(String),
}

impl AggFunction {
    pub fn name(&self) -> &str {
        match self {
            AggFunction::Count => "COUNT",
            AggFunction::Sum => "SUM",
            AggFunction::Sum0 => "$SUM0",
            AggFunction::Min => "MIN",
            AggFunction::Max => "MAX",
            AggFunction::Avg => "AVG",
            AggFunction::BoolAnd => "BOOL_AND",
            AggFunction::BoolOr => "BOOL_OR",
            AggFunction::AnyValue => "ANY_VALUE",
            AggFunction::UserDefined(name) => name.as_str(),
        }
    }

    /// Case-insensitive lookup; unknown names become user-defined references.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => AggFunction::Count,
            "SUM" => AggFunction::Sum,
            "$SUM0" | "SUM0" => AggFunction::Sum0,
            "MIN" => AggFunction::Min,
            "MAX" => AggFunction::Max,
            "AVG" => AggFunction::Avg,
            "BOOL_AND" | "EVERY" => AggFunction::BoolAnd,
            "BOOL_OR" | "SOME" => AggFunction::BoolOr,
            "ANY_VALUE" => AggFunction::AnyValue,
            _ => AggFunction::UserDefined(name.to_ascii_lowercase()),
        }
    }

    /// Result type of a built-in function over `args`.
    pub fn derive_type(&self, args: &[SqlType]) -> Result<SqlType> {
        let single = || -> Result<&SqlType> {
            match args {
                [one] => Ok(one),
                _ => Err(QuarryError::InvalidShape(format!(
                    "{} expects exactly one argument, got {}",
                    self.name(),
                    args.len()
                ))),
            }
        };
        let numeric = |ty: &SqlType| -> Result<()> {
            match ty.data_type {
                DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64 => {
                    Ok(())
                }
                ref other => Err(QuarryError::InvalidShape(format!(
                    "{} requires a numeric argument, got {other:?}",
                    self.name()
                ))),
            }
        };
        match self {
            AggFunction::Count => Ok(SqlType::int64(false)),
            AggFunction::Sum => {
                let arg = single()?;
                numeric(arg)?;
                Ok(arg.with_nullable(true))
            }
            AggFunction::Sum0 => {
                let arg = single()?;
                numeric(arg)?;
                Ok(arg.with_nullable(false))
            }
            AggFunction::Min | AggFunction::Max | AggFunction::AnyValue => {
                Ok(single()?.with_nullable(true))
            }
            AggFunction::Avg => {
                numeric(single()?)?;
                Ok(SqlType::float64(true))
            }
            AggFunction::BoolAnd | AggFunction::BoolOr => {
                let arg = single()?;
                if arg.data_type != DataType::Boolean {
                    return Err(QuarryError::InvalidShape(format!(
                        "{} requires a boolean argument, got {:?}",
                        self.name(),
                        arg.data_type
                    )));
                }
                Ok(SqlType::boolean(true))
            }
            AggFunction::UserDefined(name) => Err(QuarryError::Planning(format!(
                "user-defined aggregate '{name}' needs an explicit result type"
            ))),
        }
    }
}

impl fmt::Display for AggFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One aggregate computed by an `Aggregate` node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateCall {
    pub function: AggFunction,
    /// Input column ordinals; empty for `COUNT(*)`.
    pub args: Vec<usize>,
    /// Boolean input column gating which rows contribute.
    #[serde(default)]
    pub filter_arg: Option<usize>,
    pub name: String,
    pub ty: SqlType,
}

impl AggregateCall {
    /// Built-in call typed against `input`.
    pub fn new(
        function: AggFunction,
        args: Vec<usize>,
        name: impl Into<String>,
        input: &Schema,
    ) -> Result<Self> {
        let arg_types = args
            .iter()
            .map(|&i| {
                input
                    .fields()
                    .get(i)
                    .map(|f| SqlType::of_field(f))
                    .ok_or_else(|| {
                        QuarryError::InvalidShape(format!(
                            "aggregate argument ${i} out of range for row of {} fields",
                            input.fields().len()
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        let ty = function.derive_type(&arg_types)?;
        Ok(Self {
            function,
            args,
            filter_arg: None,
            name: name.into(),
            ty,
        })
    }

    /// Call with an explicit result type, used for user-defined aggregates.
    pub fn typed(function: AggFunction, args: Vec<usize>, name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            function,
            args,
            filter_arg: None,
            name: name.into(),
            ty,
        }
    }

    pub fn with_filter(mut self, filter_arg: usize) -> Self {
        self.filter_arg = Some(filter_arg);
        self
    }

    /// Literal-free descriptor used by explain output and plan signatures.
    pub fn descriptor(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AggregateCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self
            .args
            .iter()
            .map(|a| format!("${a}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}({args})", self.function)?;
        if let Some(filter) = self.filter_arg {
            write!(f, " FILTER ${filter}")?;
        }
        Ok(())
    }
}

/// Operator variants. Inputs are owned; the tree is acyclic by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operator {
    Scan {
        table: TableRef,
        row_shape: SchemaRef,
    },
    Values {
        rows: Vec<Vec<Value>>,
        row_shape: SchemaRef,
    },
    Filter {
        input: Box<PlanNode>,
        predicate: ScalarExpr,
    },
    Project {
        input: Box<PlanNode>,
        exprs: Vec<ScalarExpr>,
        names: Vec<String>,
    },
    Aggregate {
        input: Box<PlanNode>,
        grouping_sets: Vec<ColumnSet>,
        calls: Vec<AggregateCall>,
        #[serde(default)]
        indicator: bool,
    },
    Join {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        condition: ScalarExpr,
        join_type: JoinType,
    },
    Union {
        inputs: Vec<PlanNode>,
        all: bool,
    },
    Intersect {
        inputs: Vec<PlanNode>,
        all: bool,
    },
    Minus {
        inputs: Vec<PlanNode>,
        all: bool,
    },
    Sort {
        input: Box<PlanNode>,
        collation: Collation,
        #[serde(default)]
        offset: Option<usize>,
        #[serde(default)]
        fetch: Option<usize>,
    },
    Exchange {
        input: Box<PlanNode>,
        distribution: Distribution,
    },
    /// Operator this crate only knows by name; row shape follows its first input.
    Other {
        name: String,
        inputs: Vec<PlanNode>,
    },
}

/// Operator discriminant, used to key metadata handler tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperatorKind {
    Scan,
    Values,
    Filter,
    Project,
    Aggregate,
    Join,
    Union,
    Intersect,
    Minus,
    Sort,
    Exchange,
    Other,
}

impl OperatorKind {
    pub const ALL: [OperatorKind; 12] = [
        OperatorKind::Scan,
        OperatorKind::Values,
        OperatorKind::Filter,
        OperatorKind::Project,
        OperatorKind::Aggregate,
        OperatorKind::Join,
        OperatorKind::Union,
        OperatorKind::Intersect,
        OperatorKind::Minus,
        OperatorKind::Sort,
        OperatorKind::Exchange,
        OperatorKind::Other,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OperatorKind::Scan => "Scan",
            OperatorKind::Values => "Values",
            OperatorKind::Filter => "Filter",
            OperatorKind::Project => "Project",
            OperatorKind::Aggregate => "Aggregate",
            OperatorKind::Join => "Join",
            OperatorKind::Union => "Union",
            OperatorKind::Intersect => "Intersect",
            OperatorKind::Minus => "Minus",
            OperatorKind::Sort => "Sort",
            OperatorKind::Exchange => "Exchange",
            OperatorKind::Other => "Other",
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Operator {
    pub fn kind(&self) -> OperatorKind {
        match self {
            Operator::Scan { .. } => OperatorKind::Scan,
            Operator::Values { .. } => OperatorKind::Values,
            Operator::Filter { .. } => OperatorKind::Filter,
            Operator::Project { .. } => OperatorKind::Project,
            Operator::Aggregate { .. } => OperatorKind::Aggregate,
            Operator::Join { .. } => OperatorKind::Join,
            Operator::Union { .. } => OperatorKind::Union,
            Operator::Intersect { .. } => OperatorKind::Intersect,
            Operator::Minus { .. } => OperatorKind::Minus,
            Operator::Sort { .. } => OperatorKind::Sort,
            Operator::Exchange { .. } => OperatorKind::Exchange,
            Operator::Other { .. } => OperatorKind::Other,
        }
    }

    pub fn children(&self) -> Vec<&PlanNode> {
        match self {
            Operator::Scan { .. } | Operator::Values { .. } => Vec::new(),
            Operator::Filter { input, .. }
            | Operator::Project { input, .. }
            | Operator::Aggregate { input, .. }
            | Operator::Sort { input, .. }
            | Operator::Exchange { input, .. } => vec![input.as_ref()],
            Operator::Join { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Operator::Union { inputs, .. }
            | Operator::Intersect { inputs, .. }
            | Operator::Minus { inputs, .. }
            | Operator::Other { inputs, .. } => inputs.iter().collect(),
        }
    }

    fn into_children_replaced(self, mut children: Vec<PlanNode>) -> Result<Operator> {
        let expected = self.children().len();
        if children.len() != expected {
            return Err(QuarryError::InvalidShape(format!(
                "{} expects {expected} input(s), got {}",
                self.kind(),
                children.len()
            )));
        }
        Ok(match self {
            leaf @ (Operator::Scan { .. } | Operator::Values { .. }) => leaf,
            Operator::Filter { predicate, .. } => Operator::Filter {
                input: take_first(&mut children),
                predicate,
            },
            Operator::Project { exprs, names, .. } => Operator::Project {
                input: take_first(&mut children),
                exprs,
                names,
            },
            Operator::Aggregate {
                grouping_sets,
                calls,
                indicator,
                ..
            } => Operator::Aggregate {
                input: take_first(&mut children),
                grouping_sets,
                calls,
                indicator,
            },
            Operator::Join {
                condition,
                join_type,
                ..
            } => {
                let left = take_first(&mut children);
                let right = take_first(&mut children);
                Operator::Join {
                    left,
                    right,
                    condition,
                    join_type,
                }
            }
            Operator::Sort {
                collation,
                offset,
                fetch,
                ..
            } => Operator::Sort {
                input: take_first(&mut children),
                collation,
                offset,
                fetch,
            },
            Operator::Exchange { distribution, .. } => Operator::Exchange {
                input: take_first(&mut children),
                distribution,
            },
            Operator::Union { all, .. } => Operator::Union {
                inputs: children,
                all,
            },
            Operator::Intersect { all, .. } => Operator::Intersect {
                inputs: children,
                all,
            },
            Operator::Minus { all, .. } => Operator::Minus {
                inputs: children,
                all,
            },
            Operator::Other { name, .. } => Operator::Other {
                name,
                inputs: children,
            },
        })
    }
}

fn take_first(children: &mut Vec<PlanNode>) -> Box<PlanNode> {
    Box::new(children.remove(0))
}

/// A node of an operator plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanNodeRepr", into = "PlanNodeRepr")]
pub struct PlanNode {
    id: NodeId,
    op: Operator,
    schema: SchemaRef,
}

#[derive(Serialize, Deserialize)]
struct PlanNodeRepr {
    id: NodeId,
    op: Operator,
}

impl TryFrom<PlanNodeRepr> for PlanNode {
    type Error = QuarryError;

    fn try_from(value: PlanNodeRepr) -> Result<Self> {
        PlanNode::new(value.id, value.op)
    }
}

impl From<PlanNode> for PlanNodeRepr {
    fn from(value: PlanNode) -> Self {
        Self {
            id: value.id,
            op: value.op,
        }
    }
}

impl PlanNode {
    /// Validates `op` against its inputs and derives the output row shape.
    pub fn new(id: NodeId, op: Operator) -> Result<Self> {
        let schema = derive_row_shape(&op)?;
        Ok(Self { id, op, schema })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op(&self) -> &Operator {
        &self.op
    }

    pub fn kind(&self) -> OperatorKind {
        self.op.kind()
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn children(&self) -> Vec<&PlanNode> {
        self.op.children()
    }

    /// Copy of this node over new inputs, keeping its id. The result is re-validated.
    pub fn with_children(&self, children: Vec<PlanNode>) -> Result<PlanNode> {
        let op = self.op.clone().into_children_replaced(children)?;
        PlanNode::new(self.id, op)
    }

    /// Table of a `Scan`.
    pub fn scan_table(&self) -> Option<&TableRef> {
        match &self.op {
            Operator::Scan { table, .. } => Some(table),
            _ => None,
        }
    }

    /// Pre-order traversal with depth (root at 0).
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a PlanNode, usize)) {
        fn go<'a>(node: &'a PlanNode, depth: usize, f: &mut dyn FnMut(&'a PlanNode, usize)) {
            f(node, depth);
            for child in node.children() {
                go(child, depth + 1, f);
            }
        }
        go(self, 0, f)
    }

    pub fn find(&self, id: NodeId) -> Option<&PlanNode> {
        let mut found = None;
        self.walk(&mut |n, _| {
            if found.is_none() && n.id == id {
                found = Some(n);
            }
        });
        found
    }

    pub fn node_count(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |_, _| n += 1);
        n
    }

    /// Fails when two nodes of the tree share an id.
    pub fn validate_tree(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let mut dup = None;
        self.walk(&mut |n, _| {
            if !seen.insert(n.id) && dup.is_none() {
                dup = Some(n.id);
            }
        });
        match dup {
            Some(id) => Err(QuarryError::InvalidShape(format!(
                "node id {id} appears more than once in the plan"
            ))),
            None => Ok(()),
        }
    }

    /// Deserializes and validates a whole plan.
    pub fn from_json(text: &str) -> Result<PlanNode> {
        let plan: PlanNode = serde_json::from_str(text)
            .map_err(|e| QuarryError::InvalidShape(format!("plan json: {e}")))?;
        plan.validate_tree()?;
        Ok(plan)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::explain::explain_plan(self))
    }
}

/// Union of the grouping sets, the group key of an `Aggregate`.
pub fn group_set(grouping_sets: &[ColumnSet]) -> ColumnSet {
    grouping_sets
        .iter()
        .fold(ColumnSet::empty(), |acc, s| acc.union(s))
}

fn derive_row_shape(op: &Operator) -> Result<SchemaRef> {
    match op {
        Operator::Scan { row_shape, .. } => Ok(row_shape.clone()),
        Operator::Values { rows, row_shape } => {
            for (r, row) in rows.iter().enumerate() {
                check_values_row(r, row, row_shape)?;
            }
            Ok(row_shape.clone())
        }
        Operator::Filter { input, predicate } => {
            predicate.validate_against(input.schema())?;
            ensure_predicate("filter predicate", predicate)?;
            Ok(input.schema().clone())
        }
        Operator::Project {
            input,
            exprs,
            names,
        } => {
            if exprs.len() != names.len() {
                return Err(QuarryError::InvalidShape(format!(
                    "project has {} expressions but {} names",
                    exprs.len(),
                    names.len()
                )));
            }
            let mut fields = Vec::with_capacity(exprs.len());
            for (e, name) in exprs.iter().zip(names) {
                e.validate_against(input.schema())?;
                fields.push(e.ty().to_field(name.clone()));
            }
            Ok(Arc::new(Schema::new(fields)))
        }
        Operator::Aggregate {
            input,
            grouping_sets,
            calls,
            indicator,
        } => aggregate_row_shape(input.schema(), grouping_sets, calls, *indicator),
        Operator::Join {
            left,
            right,
            condition,
            join_type,
        } => {
            let combined = concat_fields(left.schema(), right.schema(), false, false);
            condition.validate_against(&combined)?;
            ensure_predicate("join condition", condition)?;
            let (left_nullable, right_nullable) = match join_type {
                JoinType::Left => (false, true),
                JoinType::Right => (true, false),
                JoinType::Full => (true, true),
                _ => (false, false),
            };
            if join_type.projects_right() {
                Ok(Arc::new(concat_fields(
                    left.schema(),
                    right.schema(),
                    left_nullable,
                    right_nullable,
                )))
            } else {
                Ok(left.schema().clone())
            }
        }
        Operator::Union { inputs, .. }
        | Operator::Intersect { inputs, .. }
        | Operator::Minus { inputs, .. } => set_op_row_shape(op.kind(), inputs),
        Operator::Sort {
            input, collation, ..
        } => {
            let width = input.schema().fields().len();
            if let Some(fc) = collation.fields().iter().find(|fc| fc.field >= width) {
                return Err(QuarryError::InvalidShape(format!(
                    "sort key ${} out of range for row of {width} fields",
                    fc.field
                )));
            }
            Ok(input.schema().clone())
        }
        Operator::Exchange {
            input,
            distribution,
        } => {
            let width = input.schema().fields().len();
            if let Some(k) = distribution.keys.iter().find(|k| **k >= width) {
                return Err(QuarryError::InvalidShape(format!(
                    "distribution key ${k} out of range for row of {width} fields"
                )));
            }
            Ok(input.schema().clone())
        }
        Operator::Other { inputs, .. } => Ok(inputs
            .first()
            .map(|i| i.schema().clone())
            .unwrap_or_else(|| Arc::new(Schema::empty()))),
    }
}

fn check_values_row(r: usize, row: &[Value], shape: &Schema) -> Result<()> {
    if row.len() != shape.fields().len() {
        return Err(QuarryError::InvalidShape(format!(
            "values row {r} has {} fields, expected {}",
            row.len(),
            shape.fields().len()
        )));
    }
    for (value, field) in row.iter().zip(shape.fields()) {
        let ok = if value.is_null() {
            field.is_nullable()
        } else {
            &value.data_type() == field.data_type()
        };
        if !ok {
            return Err(QuarryError::InvalidShape(format!(
                "values row {r}: {value:?} does not fit column '{}' of type {:?}",
                field.name(),
                field.data_type()
            )));
        }
    }
    Ok(())
}

fn ensure_predicate(what: &str, e: &ScalarExpr) -> Result<()> {
    match e.data_type() {
        DataType::Boolean | DataType::Null => Ok(()),
        other => Err(QuarryError::InvalidShape(format!(
            "{what} must be boolean, got {other:?}"
        ))),
    }
}

fn concat_fields(left: &Schema, right: &Schema, left_nullable: bool, right_nullable: bool) -> Schema {
    let widen = |f: &Arc<Field>, force: bool| -> Field {
        let f = f.as_ref().clone();
        if force {
            f.with_nullable(true)
        } else {
            f
        }
    };
    let fields = left
        .fields()
        .iter()
        .map(|f| widen(f, left_nullable))
        .chain(right.fields().iter().map(|f| widen(f, right_nullable)))
        .collect::<Vec<_>>();
    Schema::new(fields)
}

fn aggregate_row_shape(
    input: &Schema,
    grouping_sets: &[ColumnSet],
    calls: &[AggregateCall],
    indicator: bool,
) -> Result<SchemaRef> {
    if grouping_sets.is_empty() {
        return Err(QuarryError::InvalidShape(
            "aggregate needs at least one grouping set".to_string(),
        ));
    }
    let width = input.fields().len();
    let groups = group_set(grouping_sets);
    if let Some(max) = groups.iter().max() {
        if max >= width {
            return Err(QuarryError::InvalidShape(format!(
                "grouping column ${max} out of range for row of {width} fields"
            )));
        }
    }
    let mut fields = Vec::new();
    for c in groups.iter() {
        let f = input.field(c);
        let in_every_set = grouping_sets.iter().all(|s| s.contains(c));
        fields.push(f.clone().with_nullable(f.is_nullable() || !in_every_set));
    }
    if indicator {
        for c in groups.iter() {
            fields.push(Field::new(
                format!("i${}", input.field(c).name()),
                DataType::Boolean,
                false,
            ));
        }
    }
    for call in calls {
        if let Some(a) = call.args.iter().find(|a| **a >= width) {
            return Err(QuarryError::InvalidShape(format!(
                "{} argument ${a} out of range for row of {width} fields",
                call.function
            )));
        }
        if let Some(filter) = call.filter_arg {
            let f = input.fields().get(filter).ok_or_else(|| {
                QuarryError::InvalidShape(format!(
                    "filter argument ${filter} out of range for row of {width} fields"
                ))
            })?;
            if f.data_type() != &DataType::Boolean {
                return Err(QuarryError::InvalidShape(format!(
                    "filter argument ${filter} must be boolean, got {:?}",
                    f.data_type()
                )));
            }
        }
        fields.push(call.ty.to_field(call.name.clone()));
    }
    Ok(Arc::new(Schema::new(fields)))
}

fn set_op_row_shape(kind: OperatorKind, inputs: &[PlanNode]) -> Result<SchemaRef> {
    let first = inputs.first().ok_or_else(|| {
        QuarryError::InvalidShape(format!("{kind} needs at least one input"))
    })?;
    let base = first.schema();
    let mut nullable = base
        .fields()
        .iter()
        .map(|f| f.is_nullable())
        .collect::<Vec<_>>();
    for (i, other) in inputs.iter().enumerate().skip(1) {
        let s = other.schema();
        if s.fields().len() != base.fields().len() {
            return Err(QuarryError::InvalidShape(format!(
                "{kind} input {i} has {} fields, expected {}",
                s.fields().len(),
                base.fields().len()
            )));
        }
        for (c, (a, b)) in base.fields().iter().zip(s.fields()).enumerate() {
            if a.data_type() != b.data_type() {
                return Err(QuarryError::InvalidShape(format!(
                    "{kind} input {i} column {c} is {:?}, expected {:?}",
                    b.data_type(),
                    a.data_type()
                )));
            }
            nullable[c] |= b.is_nullable();
        }
    }
    let fields = base
        .fields()
        .iter()
        .zip(nullable)
        .map(|(f, n)| f.as_ref().clone().with_nullable(n))
        .collect::<Vec<_>>();
    Ok(Arc::new(Schema::new(fields)))
}

/// Assigns fresh, unique node ids while building validated plans.
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    next_id: u64,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Builder whose first node gets id `next_id`.
    pub fn starting_at(next_id: u64) -> Self {
        Self { next_id }
    }

    fn build(&mut self, op: Operator) -> Result<PlanNode> {
        let node = PlanNode::new(NodeId(self.next_id), op)?;
        self.next_id += 1;
        Ok(node)
    }

    pub fn scan(&mut self, table: TableRef, row_shape: SchemaRef) -> Result<PlanNode> {
        self.build(Operator::Scan { table, row_shape })
    }

    pub fn values(&mut self, row_shape: SchemaRef, rows: Vec<Vec<Value>>) -> Result<PlanNode> {
        self.build(Operator::Values { rows, row_shape })
    }

    pub fn filter(&mut self, input: PlanNode, predicate: ScalarExpr) -> Result<PlanNode> {
        self.build(Operator::Filter {
            input: Box::new(input),
            predicate,
        })
    }

    pub fn project(&mut self, input: PlanNode, exprs: Vec<(ScalarExpr, String)>) -> Result<PlanNode> {
        let (exprs, names) = exprs.into_iter().unzip();
        self.build(Operator::Project {
            input: Box::new(input),
            exprs,
            names,
        })
    }

    pub fn aggregate(
        &mut self,
        input: PlanNode,
        grouping_sets: Vec<ColumnSet>,
        calls: Vec<AggregateCall>,
        indicator: bool,
    ) -> Result<PlanNode> {
        self.build(Operator::Aggregate {
            input: Box::new(input),
            grouping_sets,
            calls,
            indicator,
        })
    }

    /// Aggregate with a single grouping set.
    pub fn group_by(
        &mut self,
        input: PlanNode,
        keys: &[usize],
        calls: Vec<AggregateCall>,
    ) -> Result<PlanNode> {
        self.aggregate(input, vec![ColumnSet::of(keys)], calls, false)
    }

    pub fn join(
        &mut self,
        left: PlanNode,
        right: PlanNode,
        condition: ScalarExpr,
        join_type: JoinType,
    ) -> Result<PlanNode> {
        self.build(Operator::Join {
            left: Box::new(left),
            right: Box::new(right),
            condition,
            join_type,
        })
    }

    pub fn union(&mut self, inputs: Vec<PlanNode>, all: bool) -> Result<PlanNode> {
        self.build(Operator::Union { inputs, all })
    }

    pub fn intersect(&mut self, inputs: Vec<PlanNode>, all: bool) -> Result<PlanNode> {
        self.build(Operator::Intersect { inputs, all })
    }

    pub fn minus(&mut self, inputs: Vec<PlanNode>, all: bool) -> Result<PlanNode> {
        self.build(Operator::Minus { inputs, all })
    }

    pub fn sort(
        &mut self,
        input: PlanNode,
        collation: Collation,
        offset: Option<usize>,
        fetch: Option<usize>,
    ) -> Result<PlanNode> {
        self.build(Operator::Sort {
            input: Box::new(input),
            collation,
            offset,
            fetch,
        })
    }

    pub fn exchange(&mut self, input: PlanNode, distribution: Distribution) -> Result<PlanNode> {
        self.build(Operator::Exchange {
            input: Box::new(input),
            distribution,
        })
    }

    pub fn other(&mut self, name: impl Into<String>, inputs: Vec<PlanNode>) -> Result<PlanNode> {
        self.build(Operator::Other {
            name: name.into(),
            inputs,
        })
    }
}
