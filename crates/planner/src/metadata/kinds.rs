use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Add;

use serde::{Deserialize, Serialize};

use crate::expr::{ScalarExpr, TableOccurrence};
use crate::plan::OperatorKind;
use crate::traits::{Collation, ColumnSet, Distribution};

/// Queryable properties of a plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetadataKind {
    Selectivity,
    UniqueKeys,
    ColumnUniqueness,
    Collation,
    Distribution,
    NodeTypes,
    TupleCount,
    MaxRowCount,
    MinRowCount,
    DistinctRowCount,
    PercentageOriginalRows,
    PopulationSize,
    AverageRowSize,
    AverageColumnSizes,
    ColumnOrigin,
    ExpressionLineage,
    TableReferences,
    CumulativeCost,
    NonCumulativeCost,
    IsPhaseTransition,
    SplitCount,
    Memory,
    CumulativeMemoryWithinPhase,
    CumulativeMemoryWithinPhaseSplit,
}

impl MetadataKind {
    pub const ALL: [MetadataKind; 24] = [
        MetadataKind::Selectivity,
        MetadataKind::UniqueKeys,
        MetadataKind::ColumnUniqueness,
        MetadataKind::Collation,
        MetadataKind::Distribution,
        MetadataKind::NodeTypes,
        MetadataKind::TupleCount,
        MetadataKind::MaxRowCount,
        MetadataKind::MinRowCount,
        MetadataKind::DistinctRowCount,
        MetadataKind::PercentageOriginalRows,
        MetadataKind::PopulationSize,
        MetadataKind::AverageRowSize,
        MetadataKind::AverageColumnSizes,
        MetadataKind::ColumnOrigin,
        MetadataKind::ExpressionLineage,
        MetadataKind::TableReferences,
        MetadataKind::CumulativeCost,
        MetadataKind::NonCumulativeCost,
        MetadataKind::IsPhaseTransition,
        MetadataKind::SplitCount,
        MetadataKind::Memory,
        MetadataKind::CumulativeMemoryWithinPhase,
        MetadataKind::CumulativeMemoryWithinPhaseSplit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MetadataKind::Selectivity => "Selectivity",
            MetadataKind::UniqueKeys => "UniqueKeys",
            MetadataKind::ColumnUniqueness => "ColumnUniqueness",
            MetadataKind::Collation => "Collation",
            MetadataKind::Distribution => "Distribution",
            MetadataKind::NodeTypes => "NodeTypes",
            MetadataKind::TupleCount => "TupleCount",
            MetadataKind::MaxRowCount => "MaxRowCount",
            MetadataKind::MinRowCount => "MinRowCount",
            MetadataKind::DistinctRowCount => "DistinctRowCount",
            MetadataKind::PercentageOriginalRows => "PercentageOriginalRows",
            MetadataKind::PopulationSize => "PopulationSize",
            MetadataKind::AverageRowSize => "AverageRowSize",
            MetadataKind::AverageColumnSizes => "AverageColumnSizes",
            MetadataKind::ColumnOrigin => "ColumnOrigin",
            MetadataKind::ExpressionLineage => "ExpressionLineage",
            MetadataKind::TableReferences => "TableReferences",
            MetadataKind::CumulativeCost => "CumulativeCost",
            MetadataKind::NonCumulativeCost => "NonCumulativeCost",
            MetadataKind::IsPhaseTransition => "IsPhaseTransition",
            MetadataKind::SplitCount => "SplitCount",
            MetadataKind::Memory => "Memory",
            MetadataKind::CumulativeMemoryWithinPhase => "CumulativeMemoryWithinPhase",
            MetadataKind::CumulativeMemoryWithinPhaseSplit => "CumulativeMemoryWithinPhaseSplit",
        }
    }
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind-specific request arguments; part of the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetadataArgs {
    None,
    /// Selectivity of an optional predicate over the node's output.
    Predicate(Option<ScalarExpr>),
    /// Unique keys, optionally ignoring rows with nulls in the key.
    IgnoreNulls(bool),
    /// Column uniqueness.
    Columns {
        columns: ColumnSet,
        ignore_nulls: bool,
    },
    /// Distinct row count / population size.
    GroupKey {
        key: ColumnSet,
        predicate: Option<ScalarExpr>,
    },
    Column(usize),
    Expr(ScalarExpr),
}

/// Estimated cost of producing a node's rows.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Cost {
    pub rows: f64,
    pub cpu: f64,
    pub io: f64,
}

impl Cost {
    pub fn new(rows: f64, cpu: f64, io: f64) -> Self {
        Self { rows, cpu, io }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_infinite(&self) -> bool {
        self.rows.is_infinite() || self.cpu.is_infinite() || self.io.is_infinite()
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost::new(self.rows + rhs.rows, self.cpu + rhs.cpu, self.io + rhs.io)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{} rows, {} cpu, {} io}}",
            self.rows, self.cpu, self.io
        )
    }
}

/// Base-table column an output column is computed from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnOrigin {
    pub table: TableOccurrence,
    /// Column ordinal within the table.
    pub column: usize,
    /// True when the value is computed from the column rather than copied.
    pub derived: bool,
}

/// Result of a metadata request.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Number(f64),
    Flag(bool),
    Count(usize),
    Keys(BTreeSet<ColumnSet>),
    Collations(Vec<Collation>),
    Distribution(Distribution),
    NodeTypes(BTreeMap<OperatorKind, usize>),
    Cost(Cost),
    Sizes(Vec<Option<f64>>),
    Origins(BTreeSet<ColumnOrigin>),
    Expressions(Vec<ScalarExpr>),
    Tables(BTreeSet<TableOccurrence>),
}

impl MetadataValue {
    pub fn into_number(self) -> Option<f64> {
        match self {
            MetadataValue::Number(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_flag(self) -> Option<bool> {
        match self {
            MetadataValue::Flag(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_count(self) -> Option<usize> {
        match self {
            MetadataValue::Count(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_keys(self) -> Option<BTreeSet<ColumnSet>> {
        match self {
            MetadataValue::Keys(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_collations(self) -> Option<Vec<Collation>> {
        match self {
            MetadataValue::Collations(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_distribution(self) -> Option<Distribution> {
        match self {
            MetadataValue::Distribution(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_node_types(self) -> Option<BTreeMap<OperatorKind, usize>> {
        match self {
            MetadataValue::NodeTypes(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_cost(self) -> Option<Cost> {
        match self {
            MetadataValue::Cost(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_sizes(self) -> Option<Vec<Option<f64>>> {
        match self {
            MetadataValue::Sizes(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_origins(self) -> Option<BTreeSet<ColumnOrigin>> {
        match self {
            MetadataValue::Origins(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_expressions(self) -> Option<Vec<ScalarExpr>> {
        match self {
            MetadataValue::Expressions(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_tables(self) -> Option<BTreeSet<TableOccurrence>> {
        match self {
            MetadataValue::Tables(v) => Some(v),
            _ => None,
        }
    }
}
