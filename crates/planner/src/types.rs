//! Runtime values and nullable logical types.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use arrow_schema::{DataType, Field};
use quarry_common::{QuarryError, Result};
use serde::{Deserialize, Serialize};

/// A single SQL value as carried through expressions and pipeline rows.
///
/// Equality and hashing are content based; floats compare by bit pattern so
/// values can serve as grouping keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Utf8(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Arrow type of this value; `Null` maps to [`DataType::Null`].
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Boolean(_) => DataType::Boolean,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::Float32(_) => DataType::Float32,
            Value::Float64(_) => DataType::Float64,
            Value::Utf8(_) => DataType::Utf8,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// SQL comparison. `None` when either side is null or the types are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Utf8(a), Value::Utf8(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            },
        }
    }

    /// Total order used by sorting: nulls compare equal to each other and are
    /// placed by the caller; incomparable pairs fall back to type order.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self
                .compare(other)
                .unwrap_or_else(|| self.type_rank().cmp(&other.type_rank())),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int32(_) | Value::Int64(_) | Value::Float32(_) | Value::Float64(_) => 2,
            Value::Utf8(_) => 3,
        }
    }

    /// Converts to `target`, keeping nulls null.
    pub fn cast_to(&self, target: &DataType) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        let out = match target {
            DataType::Null => Value::Null,
            DataType::Boolean => match self {
                Value::Boolean(b) => Value::Boolean(*b),
                Value::Utf8(s) => match s.to_ascii_lowercase().as_str() {
                    "true" => Value::Boolean(true),
                    "false" => Value::Boolean(false),
                    _ => return Err(cast_error(self, target)),
                },
                other => Value::Boolean(other.as_f64().ok_or_else(|| cast_error(self, target))? != 0.0),
            },
            DataType::Int32 => {
                let v = self.integral(target)?;
                Value::Int32(i32::try_from(v).map_err(|_| cast_error(self, target))?)
            }
            DataType::Int64 => Value::Int64(self.integral(target)?),
            DataType::Float32 => Value::Float32(self.floating(target)? as f32),
            DataType::Float64 => Value::Float64(self.floating(target)?),
            DataType::Utf8 | DataType::LargeUtf8 => Value::Utf8(self.to_string()),
            other => {
                return Err(QuarryError::Unsupported(format!(
                    "cast to {other:?} is not supported"
                )))
            }
        };
        Ok(out)
    }

    fn integral(&self, target: &DataType) -> Result<i64> {
        match self {
            Value::Boolean(b) => Ok(i64::from(*b)),
            Value::Float32(_) | Value::Float64(_) => {
                let f = self.as_f64().unwrap_or_default();
                if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Ok(f.trunc() as i64)
                } else {
                    Err(cast_error(self, target))
                }
            }
            Value::Utf8(s) => s.trim().parse::<i64>().map_err(|_| cast_error(self, target)),
            other => other.as_i64().ok_or_else(|| cast_error(self, target)),
        }
    }

    fn floating(&self, target: &DataType) -> Result<f64> {
        match self {
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Utf8(s) => s.trim().parse::<f64>().map_err(|_| cast_error(self, target)),
            other => other.as_f64().ok_or_else(|| cast_error(self, target)),
        }
    }

    /// Literal rendering used by explain output: strings are quoted.
    pub fn to_literal_string(&self) -> String {
        match self {
            Value::Utf8(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Null => "null".to_string(),
            other => other.to_string(),
        }
    }
}

fn cast_error(value: &Value, target: &DataType) -> QuarryError {
    QuarryError::Execution(format!("cannot cast {value:?} to {target:?}"))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float32(a), Value::Float32(b)) => a.to_bits() == b.to_bits(),
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::Utf8(a), Value::Utf8(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(v) => v.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float32(v) => v.to_bits().hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::Utf8(v) => v.hash(state),
        }
    }
}

/// Canonical string form; used by partition filter maps.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Utf8(v) => write!(f, "{v}"),
        }
    }
}

/// Logical type of an expression or column: arrow type plus nullability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SqlType {
    pub data_type: DataType,
    pub nullable: bool,
}

impl SqlType {
    pub fn new(data_type: DataType, nullable: bool) -> Self {
        Self {
            data_type,
            nullable,
        }
    }

    pub fn boolean(nullable: bool) -> Self {
        Self::new(DataType::Boolean, nullable)
    }

    pub fn int64(nullable: bool) -> Self {
        Self::new(DataType::Int64, nullable)
    }

    pub fn float64(nullable: bool) -> Self {
        Self::new(DataType::Float64, nullable)
    }

    pub fn utf8(nullable: bool) -> Self {
        Self::new(DataType::Utf8, nullable)
    }

    pub fn of_field(field: &Field) -> Self {
        Self::new(field.data_type().clone(), field.is_nullable())
    }

    pub fn with_nullable(&self, nullable: bool) -> Self {
        Self::new(self.data_type.clone(), nullable)
    }

    pub fn to_field(&self, name: impl Into<String>) -> Field {
        Field::new(name, self.data_type.clone(), self.nullable)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "{:?}", self.data_type)
        } else {
            write!(f, "{:?} NOT NULL", self.data_type)
        }
    }
}

pub(crate) fn is_numeric(dt: &DataType) -> bool {
    numeric_rank(dt).is_some()
}

fn numeric_rank(dt: &DataType) -> Option<u8> {
    Some(match dt {
        DataType::Int8 => 1,
        DataType::Int16 => 2,
        DataType::Int32 => 3,
        DataType::Int64 => 4,
        DataType::UInt8 => 1,
        DataType::UInt16 => 2,
        DataType::UInt32 => 3,
        DataType::UInt64 => 4,
        DataType::Float32 => 5,
        DataType::Float64 => 6,
        _ => return None,
    })
}

pub(crate) fn wider_numeric(a: &DataType, b: &DataType) -> Option<DataType> {
    let ra = numeric_rank(a)?;
    let rb = numeric_rank(b)?;
    if ra >= rb {
        Some(a.clone())
    } else {
        Some(b.clone())
    }
}

/// Whether values of the two types can be compared with `=`/`<`.
pub(crate) fn comparable(a: &DataType, b: &DataType) -> bool {
    if a == b || *a == DataType::Null || *b == DataType::Null {
        return true;
    }
    if is_numeric(a) && is_numeric(b) {
        return true;
    }
    matches!(
        (a, b),
        (DataType::Utf8, DataType::LargeUtf8) | (DataType::LargeUtf8, DataType::Utf8)
    )
}

/// Common supertype for CASE/COALESCE/set-operation branches.
pub(crate) fn unify_types(types: &[&DataType]) -> Result<DataType> {
    let mut target: Option<DataType> = None;
    for dt in types {
        let dt = *dt;
        if *dt == DataType::Null {
            continue;
        }
        target = Some(match target {
            None => dt.clone(),
            Some(t) if t == *dt => t,
            Some(t) if is_numeric(&t) && is_numeric(dt) => wider_numeric(&t, dt).ok_or_else(|| {
                QuarryError::Planning("failed to determine numeric widening type".to_string())
            })?,
            Some(DataType::Utf8) if *dt == DataType::LargeUtf8 => DataType::LargeUtf8,
            Some(DataType::LargeUtf8) if *dt == DataType::Utf8 => DataType::LargeUtf8,
            Some(t) => {
                return Err(QuarryError::InvalidShape(format!(
                    "type mismatch: cannot unify {t:?} and {dt:?}"
                )));
            }
        });
    }
    Ok(target.unwrap_or(DataType::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_values_hash_by_bits() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Value::Float64(1.5));
        set.insert(Value::Float64(1.5));
        set.insert(Value::Float32(1.5));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn compare_across_numeric_widths() {
        assert_eq!(
            Value::Int32(3).compare(&Value::Float64(3.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Int64(7).compare(&Value::Int32(7)), Some(Ordering::Equal));
        assert_eq!(Value::Null.compare(&Value::Int32(1)), None);
        assert_eq!(Value::Utf8("a".into()).compare(&Value::Int32(1)), None);
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!(Value::Utf8("X".into()).to_string(), "X");
        assert_eq!(Value::Int32(5).to_string(), "5");
        assert_eq!(Value::Boolean(true).to_string(), "true");
        assert_eq!(Value::Utf8("it's".into()).to_literal_string(), "'it''s'");
    }

    #[test]
    fn cast_respects_range() {
        assert_eq!(
            Value::Int64(12).cast_to(&DataType::Int32).unwrap(),
            Value::Int32(12)
        );
        assert!(Value::Int64(i64::MAX).cast_to(&DataType::Int32).is_err());
        assert_eq!(
            Value::Utf8("2.5".into()).cast_to(&DataType::Float64).unwrap(),
            Value::Float64(2.5)
        );
        assert_eq!(Value::Null.cast_to(&DataType::Int64).unwrap(), Value::Null);
    }

    #[test]
    fn unify_widens_numeric_and_rejects_mixed() {
        assert_eq!(
            unify_types(&[&DataType::Int32, &DataType::Null, &DataType::Float64]).unwrap(),
            DataType::Float64
        );
        assert!(unify_types(&[&DataType::Utf8, &DataType::Int32]).is_err());
    }
}
