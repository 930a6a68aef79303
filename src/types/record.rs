//! Records, keys, and key ordering.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Result, StorageError};
use crate::types::value::DataValue;

/// An immutable ordered sequence of values, one per table column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record(Vec<DataValue>);

impl Record {
    /// Create a record from its column values (in table column order)
    pub fn new(values: Vec<DataValue>) -> Self {
        Self(values)
    }

    /// Number of values (the table's column count)
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Value at a column ordinal
    pub fn value(&self, ordinal: usize) -> &DataValue {
        &self.0[ordinal]
    }

    /// All values in table column order
    pub fn values(&self) -> &[DataValue] {
        &self.0
    }
}

impl From<Vec<DataValue>> for Record {
    fn from(values: Vec<DataValue>) -> Self {
        Self::new(values)
    }
}

/// An ordered sequence of values in primary-key order.
///
/// Key order need not match the physical column order of the owning table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(Vec<DataValue>);

impl Key {
    /// Create a key from values already in primary-key order
    pub fn new(values: Vec<DataValue>) -> Self {
        Self(values)
    }

    /// Single-column key
    pub fn single(value: DataValue) -> Self {
        Self(vec![value])
    }

    /// Key values in primary-key order
    pub fn values(&self) -> &[DataValue] {
        &self.0
    }

    /// Number of key columns
    pub fn arity(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<DataValue>> for Key {
    fn from(values: Vec<DataValue>) -> Self {
        Self::new(values)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

/// Compare two values of the same primitive type.
///
/// NULL sorts below any non-NULL value; two NULLs are equal. A type mismatch
/// is a validation error, never a silent ordering.
pub fn compare_values(a: &DataValue, b: &DataValue) -> Result<Ordering> {
    if a.data_type() != b.data_type() {
        return Err(StorageError::TypeMismatch {
            expected: a.data_type().name(),
            actual: b.data_type().name(),
        });
    }
    let ord = match (a, b) {
        (DataValue::Null(_), DataValue::Null(_)) => Ordering::Equal,
        (DataValue::Null(_), _) => Ordering::Less,
        (_, DataValue::Null(_)) => Ordering::Greater,
        (DataValue::Int(x), DataValue::Int(y)) => x.cmp(y),
        (DataValue::BigInt(x), DataValue::BigInt(y)) => x.cmp(y),
        (DataValue::Bool(x), DataValue::Bool(y)) => x.cmp(y),
        (DataValue::Double(x), DataValue::Double(y)) => x.total_cmp(y),
        (DataValue::Decimal(x), DataValue::Decimal(y)) => x.cmp_numeric(y),
        (DataValue::DateTime(x), DataValue::DateTime(y)) => x.cmp(y),
        (DataValue::Varchar(x), DataValue::Varchar(y)) => x.as_bytes().cmp(y.as_bytes()),
        (DataValue::Blob(x), DataValue::Blob(y)) => x.cmp(y),
        // unreachable: the type check above already rejected mixed pairs
        _ => unreachable!("compare_values called with mismatched variants"),
    };
    Ok(ord)
}

/// Compare two keys lexicographically, position by position.
///
/// Each position requires a strict type match. A shorter key that is a
/// prefix of a longer one sorts first.
pub fn compare_keys(a: &Key, b: &Key) -> Result<Ordering> {
    for (va, vb) in a.values().iter().zip(b.values()) {
        match compare_values(va, vb)? {
            Ordering::Equal => continue,
            other => return Ok(other),
        }
    }
    Ok(a.arity().cmp(&b.arity()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::value::{DecimalValue, PrimitiveType};

    #[test]
    fn test_compare_ints() {
        let a = Key::single(DataValue::Int(1));
        let b = Key::single(DataValue::Int(2));
        assert_eq!(compare_keys(&a, &b).unwrap(), Ordering::Less);
        assert_eq!(compare_keys(&b, &a).unwrap(), Ordering::Greater);
        assert_eq!(compare_keys(&a, &a).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_null_sorts_below_values() {
        let null = DataValue::Null(PrimitiveType::Int);
        assert_eq!(
            compare_values(&null, &DataValue::Int(i32::MIN)).unwrap(),
            Ordering::Less
        );
        assert_eq!(compare_values(&null, &null).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let err = compare_values(&DataValue::Int(1), &DataValue::BigInt(1)).unwrap_err();
        assert!(matches!(err, StorageError::TypeMismatch { .. }));
    }

    #[test]
    fn test_strings_order_by_byte_ordinal() {
        let a = DataValue::Varchar("Eng".into());
        let b = DataValue::Varchar("Sales".into());
        assert_eq!(compare_values(&a, &b).unwrap(), Ordering::Less);
    }

    #[test]
    fn test_composite_key_is_lexicographic() {
        let a = Key::new(vec![DataValue::Varchar("Sales".into()), DataValue::Int(50)]);
        let b = Key::new(vec![DataValue::Varchar("Sales".into()), DataValue::Int(52)]);
        let c = Key::new(vec![DataValue::Varchar("Eng".into()), DataValue::Int(101)]);
        assert_eq!(compare_keys(&a, &b).unwrap(), Ordering::Less);
        assert_eq!(compare_keys(&c, &a).unwrap(), Ordering::Less);
    }

    #[test]
    fn test_misc_type_orderings() {
        assert_eq!(
            compare_values(&DataValue::Bool(false), &DataValue::Bool(true)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare_values(
                &DataValue::Decimal(DecimalValue::new(150, 1)),
                &DataValue::Decimal(DecimalValue::new(1500, 2)),
            )
            .unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            compare_values(&DataValue::Blob(vec![1, 2]), &DataValue::Blob(vec![1, 2, 0])).unwrap(),
            Ordering::Less
        );
    }
}
