//! Primitive data types and tagged values.
//!
//! The engine understands a closed set of primitive types. Values are
//! immutable tagged variants; NULL is distinguished per type so that a NULL
//! integer and a NULL string are different values.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// The closed set of primitive types the engine stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    BigInt,
    /// Boolean
    Bool,
    /// IEEE-754 double
    Double,
    /// Fixed-point decimal with (precision, scale)
    Decimal,
    /// UTC datetime
    DateTime,
    /// Length-limited UTF-8 string
    Varchar,
    /// Length-limited byte blob
    Blob,
}

impl PrimitiveType {
    /// On-disk width of a non-null value of this type, or `None` for
    /// variable-width types.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Int => Some(4),
            Self::BigInt => Some(8),
            Self::Bool => Some(1),
            Self::Double => Some(8),
            Self::Decimal => Some(16),
            Self::DateTime => Some(8),
            Self::Varchar | Self::Blob => None,
        }
    }

    /// Check if values of this type are variable-width on disk
    pub fn is_variable_width(self) -> bool {
        self.fixed_width().is_none()
    }

    /// Stable integer code used when the type is stored in a catalog row
    pub fn code(self) -> i32 {
        match self {
            Self::Int => 1,
            Self::BigInt => 2,
            Self::Bool => 3,
            Self::Double => 4,
            Self::Decimal => 5,
            Self::DateTime => 6,
            Self::Varchar => 7,
            Self::Blob => 8,
        }
    }

    /// Inverse of [`PrimitiveType::code`]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Int),
            2 => Some(Self::BigInt),
            3 => Some(Self::Bool),
            4 => Some(Self::Double),
            5 => Some(Self::Decimal),
            6 => Some(Self::DateTime),
            7 => Some(Self::Varchar),
            8 => Some(Self::Blob),
            _ => None,
        }
    }

    /// Human-readable type name
    pub fn name(self) -> &'static str {
        match self {
            Self::Int => "Int",
            Self::BigInt => "BigInt",
            Self::Bool => "Bool",
            Self::Double => "Double",
            Self::Decimal => "Decimal",
            Self::DateTime => "DateTime",
            Self::Varchar => "Varchar",
            Self::Blob => "Blob",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A primitive type plus its parameters: max length for strings and blobs,
/// precision and scale for decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypeInfo {
    /// The underlying primitive type
    #[serde(rename = "PrimitiveType")]
    pub primitive: PrimitiveType,
    /// Maximum length in bytes (strings, blobs)
    #[serde(rename = "MaxLength", default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Total number of significant digits (decimals)
    #[serde(rename = "Precision", default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    /// Digits to the right of the decimal point (decimals)
    #[serde(rename = "Scale", default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u8>,
}

impl DataTypeInfo {
    /// Plain type with no parameters
    pub fn new(primitive: PrimitiveType) -> Self {
        Self {
            primitive,
            max_length: None,
            precision: None,
            scale: None,
        }
    }

    pub fn int() -> Self {
        Self::new(PrimitiveType::Int)
    }

    pub fn bigint() -> Self {
        Self::new(PrimitiveType::BigInt)
    }

    pub fn bool() -> Self {
        Self::new(PrimitiveType::Bool)
    }

    pub fn double() -> Self {
        Self::new(PrimitiveType::Double)
    }

    pub fn datetime() -> Self {
        Self::new(PrimitiveType::DateTime)
    }

    pub fn varchar(max_length: u32) -> Self {
        Self {
            max_length: Some(max_length),
            ..Self::new(PrimitiveType::Varchar)
        }
    }

    pub fn blob(max_length: u32) -> Self {
        Self {
            max_length: Some(max_length),
            ..Self::new(PrimitiveType::Blob)
        }
    }

    pub fn decimal(precision: u8, scale: u8) -> Self {
        Self {
            precision: Some(precision),
            scale: Some(scale),
            ..Self::new(PrimitiveType::Decimal)
        }
    }
}

/// Fixed-point decimal: an unscaled i128 plus a scale.
///
/// The numeric value is `unscaled / 10^scale`. On disk the unscaled value is
/// stored as 16 little-endian bytes at the owning column's declared scale.
#[derive(Debug, Clone, Copy)]
pub struct DecimalValue {
    unscaled: i128,
    scale: u8,
}

impl DecimalValue {
    /// Create from an unscaled value and scale: `(12345, 2)` is `123.45`
    pub fn new(unscaled: i128, scale: u8) -> Self {
        Self { unscaled, scale }
    }

    /// The unscaled backing value
    pub fn unscaled(&self) -> i128 {
        self.unscaled
    }

    /// Digits to the right of the decimal point
    pub fn scale(&self) -> u8 {
        self.scale
    }

    /// Re-express this value at a different scale, or `None` when the
    /// conversion would lose digits or overflow.
    pub fn rescale(&self, scale: u8) -> Option<Self> {
        if scale == self.scale {
            return Some(*self);
        }
        if scale > self.scale {
            let factor = pow10(scale - self.scale)?;
            let unscaled = self.unscaled.checked_mul(factor)?;
            Some(Self { unscaled, scale })
        } else {
            let factor = pow10(self.scale - scale)?;
            if self.unscaled % factor != 0 {
                return None;
            }
            Some(Self {
                unscaled: self.unscaled / factor,
                scale,
            })
        }
    }

    /// Strip trailing zero digits so numerically equal values share one
    /// representation (used by equality and hashing).
    fn normalized(&self) -> (i128, u8) {
        let mut unscaled = self.unscaled;
        let mut scale = self.scale;
        while scale > 0 && unscaled % 10 == 0 {
            unscaled /= 10;
            scale -= 1;
        }
        (unscaled, scale)
    }

    /// Numeric comparison across scales
    pub fn cmp_numeric(&self, other: &Self) -> std::cmp::Ordering {
        let max_scale = self.scale.max(other.scale);
        match (self.rescale(max_scale), other.rescale(max_scale)) {
            (Some(a), Some(b)) => a.unscaled.cmp(&b.unscaled),
            // rescale overflow: approximate
            _ => {
                let a = self.unscaled as f64 / 10f64.powi(self.scale as i32);
                let b = other.unscaled as f64 / 10f64.powi(other.scale as i32);
                a.total_cmp(&b)
            }
        }
    }

    /// 16-byte on-disk form (unscaled value, little-endian)
    pub fn to_le_bytes(&self) -> [u8; 16] {
        self.unscaled.to_le_bytes()
    }

    /// Inverse of [`DecimalValue::to_le_bytes`] at a given scale
    pub fn from_le_bytes(bytes: [u8; 16], scale: u8) -> Self {
        Self {
            unscaled: i128::from_le_bytes(bytes),
            scale,
        }
    }
}

fn pow10(exp: u8) -> Option<i128> {
    10i128.checked_pow(exp as u32)
}

impl PartialEq for DecimalValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_numeric(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for DecimalValue {}

impl PartialOrd for DecimalValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DecimalValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.cmp_numeric(other)
    }
}

impl Hash for DecimalValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let (unscaled, scale) = self.normalized();
        unscaled.hash(state);
        scale.hash(state);
    }
}

impl FromStr for DecimalValue {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(StorageError::malformed(format!("invalid decimal '{s}'")));
        }
        let mut unscaled: i128 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            let digit = c
                .to_digit(10)
                .ok_or_else(|| StorageError::malformed(format!("invalid decimal '{s}'")))?;
            unscaled = unscaled
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit as i128))
                .ok_or_else(|| StorageError::malformed(format!("decimal '{s}' out of range")))?;
        }
        if negative {
            unscaled = -unscaled;
        }
        if frac_part.len() > u8::MAX as usize {
            return Err(StorageError::malformed(format!("decimal '{s}' out of range")));
        }
        Ok(Self::new(unscaled, frac_part.len() as u8))
    }
}

impl fmt::Display for DecimalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.unscaled);
        }
        let sign = if self.unscaled < 0 { "-" } else { "" };
        let abs = self.unscaled.unsigned_abs();
        let factor = 10u128.pow(self.scale as u32);
        write!(
            f,
            "{}{}.{:0width$}",
            sign,
            abs / factor,
            abs % factor,
            width = self.scale as usize
        )
    }
}

/// An immutable tagged value: a primitive type and an optional payload.
///
/// Equality is type-then-value. Two NULLs of the same type are equal; blob
/// equality is by content; doubles compare equal by bit pattern.
#[derive(Debug, Clone)]
pub enum DataValue {
    /// Typed NULL
    Null(PrimitiveType),
    Int(i32),
    BigInt(i64),
    Bool(bool),
    Double(f64),
    Decimal(DecimalValue),
    DateTime(DateTime<Utc>),
    Varchar(String),
    Blob(Vec<u8>),
}

impl DataValue {
    /// The primitive type of this value
    pub fn data_type(&self) -> PrimitiveType {
        match self {
            Self::Null(t) => *t,
            Self::Int(_) => PrimitiveType::Int,
            Self::BigInt(_) => PrimitiveType::BigInt,
            Self::Bool(_) => PrimitiveType::Bool,
            Self::Double(_) => PrimitiveType::Double,
            Self::Decimal(_) => PrimitiveType::Decimal,
            Self::DateTime(_) => PrimitiveType::DateTime,
            Self::Varchar(_) => PrimitiveType::Varchar,
            Self::Blob(_) => PrimitiveType::Blob,
        }
    }

    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }
}

impl PartialEq for DataValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null(a), Self::Null(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Varchar(a), Self::Varchar(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for DataValue {}

impl Hash for DataValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data_type().hash(state);
        match self {
            Self::Null(_) => {}
            Self::Int(v) => v.hash(state),
            Self::BigInt(v) => v.hash(state),
            Self::Bool(v) => v.hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::Decimal(v) => v.hash(state),
            Self::DateTime(v) => v.hash(state),
            Self::Varchar(v) => v.hash(state),
            Self::Blob(v) => v.hash(state),
        }
    }
}

// Display is used in duplicate-key error messages; keep it compact.
impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null(t) => write!(f, "NULL({t})"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Varchar(v) => write!(f, "'{v}'"),
            Self::Blob(v) => write!(f, "blob[{}]", v.len()),
        }
    }
}
