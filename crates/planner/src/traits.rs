//! Physical traits attached to plan nodes: column sets, collations, distributions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sorted, de-duplicated set of column ordinals.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<usize>", into = "Vec<usize>")]
pub struct ColumnSet(Vec<usize>);

impl ColumnSet {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn of(columns: &[usize]) -> Self {
        columns.iter().copied().collect()
    }

    /// Ordinals `0..n`.
    pub fn range(n: usize) -> Self {
        Self((0..n).collect())
    }

    pub fn contains(&self, column: usize) -> bool {
        self.0.binary_search(&column).is_ok()
    }

    pub fn is_subset(&self, other: &ColumnSet) -> bool {
        self.0.iter().all(|c| other.contains(*c))
    }

    pub fn union(&self, other: &ColumnSet) -> ColumnSet {
        self.0.iter().chain(other.0.iter()).copied().collect()
    }

    /// Position of `column` inside the set.
    pub fn position(&self, column: usize) -> Option<usize> {
        self.0.binary_search(&column).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn max(&self) -> Option<usize> {
        self.0.last().copied()
    }
}

impl FromIterator<usize> for ColumnSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        let mut v = iter.into_iter().collect::<Vec<_>>();
        v.sort_unstable();
        v.dedup();
        Self(v)
    }
}

impl From<Vec<usize>> for ColumnSet {
    fn from(value: Vec<usize>) -> Self {
        value.into_iter().collect()
    }
}

impl From<ColumnSet> for Vec<usize> {
    fn from(value: ColumnSet) -> Self {
        value.0
    }
}

impl fmt::Display for ColumnSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items = self.0.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        write!(f, "{{{}}}", items.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullOrder {
    First,
    Last,
}

/// Ordering on one output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldCollation {
    pub field: usize,
    pub direction: SortDirection,
    pub nulls: NullOrder,
}

impl FieldCollation {
    pub fn asc(field: usize) -> Self {
        Self {
            field,
            direction: SortDirection::Ascending,
            nulls: NullOrder::Last,
        }
    }

    pub fn desc(field: usize) -> Self {
        Self {
            field,
            direction: SortDirection::Descending,
            nulls: NullOrder::First,
        }
    }
}

impl fmt::Display for FieldCollation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        let nulls = match self.nulls {
            NullOrder::First => "NULLS FIRST",
            NullOrder::Last => "NULLS LAST",
        };
        write!(f, "${} {dir} {nulls}", self.field)
    }
}

/// Lexicographic row ordering; empty means unordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collation(pub Vec<FieldCollation>);

impl Collation {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn fields(&self) -> &[FieldCollation] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keeps the leading fields that survive `map`, stopping at the first that does not.
    pub fn remap(&self, map: impl Fn(usize) -> Option<usize>) -> Collation {
        let mut out = Vec::new();
        for fc in &self.0 {
            match map(fc.field) {
                Some(field) => out.push(FieldCollation { field, ..*fc }),
                None => break,
            }
        }
        Collation(out)
    }
}

impl fmt::Display for Collation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items = self.0.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        write!(f, "[{}]", items.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistributionKind {
    Singleton,
    Hash,
    Range,
    Random,
    RoundRobin,
    Broadcast,
    Any,
}

impl DistributionKind {
    pub fn short_name(self) -> &'static str {
        match self {
            DistributionKind::Singleton => "single",
            DistributionKind::Hash => "hash",
            DistributionKind::Range => "range",
            DistributionKind::Random => "random",
            DistributionKind::RoundRobin => "rr",
            DistributionKind::Broadcast => "broadcast",
            DistributionKind::Any => "any",
        }
    }
}

/// How rows are spread across parallel consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Distribution {
    pub kind: DistributionKind,
    #[serde(default)]
    pub keys: Vec<usize>,
    /// Declared fan-out for hash/range/random distributions.
    #[serde(default)]
    pub partitions: Option<usize>,
}

impl Distribution {
    pub fn singleton() -> Self {
        Self::of(DistributionKind::Singleton)
    }

    pub fn broadcast() -> Self {
        Self::of(DistributionKind::Broadcast)
    }

    pub fn any() -> Self {
        Self::of(DistributionKind::Any)
    }

    pub fn hash(keys: Vec<usize>, partitions: Option<usize>) -> Self {
        Self {
            kind: DistributionKind::Hash,
            keys,
            partitions,
        }
    }

    pub fn range(keys: Vec<usize>, partitions: Option<usize>) -> Self {
        Self {
            kind: DistributionKind::Range,
            keys,
            partitions,
        }
    }

    pub fn of(kind: DistributionKind) -> Self {
        Self {
            kind,
            keys: Vec::new(),
            partitions: None,
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.short_name())?;
        if !self.keys.is_empty() {
            let keys = self.keys.iter().map(|k| format!("${k}")).collect::<Vec<_>>();
            write!(f, "[{}]", keys.join(", "))?;
        }
        if let Some(p) = self.partitions {
            write!(f, " x{p}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_set_is_sorted_and_unique() {
        let s = ColumnSet::of(&[3, 1, 3, 0]);
        assert_eq!(s.as_slice(), &[0, 1, 3]);
        assert_eq!(s.position(3), Some(2));
        assert!(ColumnSet::of(&[1]).is_subset(&s));
        assert_eq!(s.to_string(), "{0, 1, 3}");
    }

    #[test]
    fn collation_remap_stops_at_first_lost_field() {
        let c = Collation(vec![FieldCollation::asc(2), FieldCollation::desc(0), FieldCollation::asc(1)]);
        let remapped = c.remap(|f| if f == 0 { None } else { Some(f + 10) });
        assert_eq!(remapped, Collation(vec![FieldCollation::asc(12)]));
    }
}
