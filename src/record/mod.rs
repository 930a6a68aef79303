//! Binary record serialization.
//!
//! Row layout, in order:
//!
//! 1. **Null bitmap**: `ceil(column_count / 8)` bytes, bit `i` set iff
//!    column `i` is NULL.
//! 2. **Fixed-width payloads** in table column order, one per non-null
//!    fixed-width column: i32 (4), i64 (8), bool (1), f64 (8), decimal (16),
//!    datetime (8, microseconds since the Unix epoch as i64).
//! 3. **Variable-width payloads** in table column order, one per non-null
//!    variable-width column: `u32` length followed by that many bytes.
//!
//! All integers are little-endian. Separator keys in internal B+Tree nodes
//! use the same layout over the primary-key columns in key order.

use chrono::DateTime;

use crate::error::{Result, StorageError};
use crate::types::{ColumnDefinition, DataValue, DecimalValue, Key, PrimitiveType, Record,
    TableDefinition};

/// Serialize a record against an ordered column list
pub fn serialize(columns: &[ColumnDefinition], record: &Record) -> Result<Vec<u8>> {
    let refs: Vec<&ColumnDefinition> = columns.iter().collect();
    encode(&refs, record.values())
}

/// Serialize a full row for storage in `table`.
///
/// Refuses a row whose arity does not match the table or that carries NULL
/// in any primary-key position.
pub fn serialize_row(table: &TableDefinition, record: &Record) -> Result<Vec<u8>> {
    if record.arity() != table.columns().len() {
        return Err(StorageError::malformed(format!(
            "row for '{}' has {} values, table has {} columns",
            table.name(),
            record.arity(),
            table.columns().len()
        )));
    }
    for &ordinal in table.primary_key_ordinals() {
        if record.value(ordinal).is_null() {
            return Err(StorageError::NullPrimaryKey(
                table.columns()[ordinal].name.clone(),
            ));
        }
    }
    serialize(table.columns(), record)
}

/// Deserialize a record against an ordered column list
pub fn deserialize(columns: &[ColumnDefinition], bytes: &[u8]) -> Result<Record> {
    let refs: Vec<&ColumnDefinition> = columns.iter().collect();
    Ok(Record::new(decode(&refs, bytes)?))
}

/// Project the primary key out of a record's values
pub fn primary_key_of(table: &TableDefinition, record: &Record) -> Result<Key> {
    let mut values = Vec::with_capacity(table.primary_key_ordinals().len());
    for &ordinal in table.primary_key_ordinals() {
        let value = record.value(ordinal);
        if value.is_null() {
            return Err(StorageError::NullPrimaryKey(
                table.columns()[ordinal].name.clone(),
            ));
        }
        values.push(value.clone());
    }
    Ok(Key::new(values))
}

/// Extract the primary key from serialized row bytes.
///
/// Walks the physical layout once, in table column order, but emits the key
/// values in primary-key order. A set null bit on a key column is a
/// data-format error: stored rows always materialise their key.
pub fn deserialize_primary_key(table: &TableDefinition, bytes: &[u8]) -> Result<Key> {
    let columns = table.columns();
    let pk_ordinals = table.primary_key_ordinals();
    let bitmap_len = null_bitmap_len(columns.len());
    if bytes.len() < bitmap_len {
        return Err(StorageError::malformed("record shorter than its null bitmap"));
    }
    let bitmap = &bytes[..bitmap_len];

    // key position per column ordinal, for the reorder at the end
    let mut key_values: Vec<Option<DataValue>> = vec![None; pk_ordinals.len()];
    let target = |ordinal: usize| pk_ordinals.iter().position(|&o| o == ordinal);

    let mut offset = bitmap_len;

    // fixed-width section
    for (ordinal, column) in columns.iter().enumerate() {
        if is_null(bitmap, ordinal) {
            if target(ordinal).is_some() {
                return Err(StorageError::malformed(format!(
                    "stored row has NULL primary key column '{}'",
                    column.name
                )));
            }
            continue;
        }
        if let Some(width) = column.data_type.primitive.fixed_width() {
            if let Some(position) = target(ordinal) {
                key_values[position] = Some(decode_fixed(column, bytes, offset)?);
            }
            offset += width;
        }
    }

    // variable-width section
    for (ordinal, column) in columns.iter().enumerate() {
        if is_null(bitmap, ordinal) || !column.data_type.primitive.is_variable_width() {
            continue;
        }
        let (value_len, payload_offset) = read_var_header(bytes, offset)?;
        if let Some(position) = target(ordinal) {
            let value = decode_var(column, &bytes[payload_offset..payload_offset + value_len])?;
            key_values[position] = Some(value);
        }
        offset = payload_offset + value_len;
    }

    let values = key_values
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| StorageError::malformed("record truncated before primary key"))?;
    Ok(Key::new(values))
}

/// Serialize a key over the table's primary-key columns (separator entries)
pub fn serialize_key(table: &TableDefinition, key: &Key) -> Result<Vec<u8>> {
    encode(&table.primary_key_columns(), key.values())
}

/// Inverse of [`serialize_key`]
pub fn deserialize_key(table: &TableDefinition, bytes: &[u8]) -> Result<Key> {
    Ok(Key::new(decode(&table.primary_key_columns(), bytes)?))
}

fn null_bitmap_len(column_count: usize) -> usize {
    column_count.div_ceil(8)
}

fn is_null(bitmap: &[u8], ordinal: usize) -> bool {
    bitmap[ordinal / 8] & (1 << (ordinal % 8)) != 0
}

fn encode(columns: &[&ColumnDefinition], values: &[DataValue]) -> Result<Vec<u8>> {
    if values.len() != columns.len() {
        return Err(StorageError::malformed(format!(
            "{} values for {} columns",
            values.len(),
            columns.len()
        )));
    }

    let mut out = vec![0u8; null_bitmap_len(columns.len())];
    for (i, (column, value)) in columns.iter().zip(values).enumerate() {
        if value.data_type() != column.data_type.primitive {
            return Err(StorageError::TypeMismatch {
                expected: column.data_type.primitive.name(),
                actual: value.data_type().name(),
            });
        }
        if value.is_null() {
            out[i / 8] |= 1 << (i % 8);
        }
    }

    // fixed-width section
    for (column, value) in columns.iter().zip(values) {
        if value.is_null() || column.data_type.primitive.is_variable_width() {
            continue;
        }
        match value {
            DataValue::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            DataValue::BigInt(v) => out.extend_from_slice(&v.to_le_bytes()),
            DataValue::Bool(v) => out.push(u8::from(*v)),
            DataValue::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
            DataValue::Decimal(v) => {
                let scale = column.data_type.scale.unwrap_or(0);
                let rescaled = v.rescale(scale).ok_or_else(|| {
                    StorageError::malformed(format!(
                        "decimal {v} cannot be stored at scale {scale} in column '{}'",
                        column.name
                    ))
                })?;
                out.extend_from_slice(&rescaled.to_le_bytes());
            }
            DataValue::DateTime(v) => out.extend_from_slice(&v.timestamp_micros().to_le_bytes()),
            _ => unreachable!("variable-width value in fixed-width section"),
        }
    }

    // variable-width section
    for (column, value) in columns.iter().zip(values) {
        if value.is_null() || !column.data_type.primitive.is_variable_width() {
            continue;
        }
        let payload: &[u8] = match value {
            DataValue::Varchar(s) => s.as_bytes(),
            DataValue::Blob(b) => b,
            _ => unreachable!("fixed-width value in variable-width section"),
        };
        if let Some(max) = column.data_type.max_length {
            if payload.len() > max as usize {
                return Err(StorageError::ValueTooLong {
                    column: column.name.clone(),
                    length: payload.len(),
                    max: max as usize,
                });
            }
        }
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
    }

    Ok(out)
}

fn decode(columns: &[&ColumnDefinition], bytes: &[u8]) -> Result<Vec<DataValue>> {
    let bitmap_len = null_bitmap_len(columns.len());
    if bytes.len() < bitmap_len {
        return Err(StorageError::malformed("record shorter than its null bitmap"));
    }
    let bitmap = &bytes[..bitmap_len];

    let mut values: Vec<Option<DataValue>> = vec![None; columns.len()];
    let mut offset = bitmap_len;

    for (ordinal, column) in columns.iter().enumerate() {
        if is_null(bitmap, ordinal) {
            values[ordinal] = Some(DataValue::Null(column.data_type.primitive));
        } else if let Some(width) = column.data_type.primitive.fixed_width() {
            values[ordinal] = Some(decode_fixed(column, bytes, offset)?);
            offset += width;
        }
    }

    for (ordinal, column) in columns.iter().enumerate() {
        if is_null(bitmap, ordinal) || !column.data_type.primitive.is_variable_width() {
            continue;
        }
        let (value_len, payload_offset) = read_var_header(bytes, offset)?;
        values[ordinal] = Some(decode_var(
            column,
            &bytes[payload_offset..payload_offset + value_len],
        )?);
        offset = payload_offset + value_len;
    }

    Ok(values
        .into_iter()
        .map(|v| v.expect("every column decoded"))
        .collect())
}

fn decode_fixed(column: &ColumnDefinition, record: &[u8], offset: usize) -> Result<DataValue> {
    let width = column
        .data_type
        .primitive
        .fixed_width()
        .expect("decode_fixed on variable-width column");
    let bytes = record.get(offset..offset + width).ok_or_else(|| {
        StorageError::malformed(format!("record truncated in column '{}'", column.name))
    })?;
    let value = match column.data_type.primitive {
        PrimitiveType::Int => DataValue::Int(i32::from_le_bytes(bytes[..4].try_into().unwrap())),
        PrimitiveType::BigInt => {
            DataValue::BigInt(i64::from_le_bytes(bytes[..8].try_into().unwrap()))
        }
        PrimitiveType::Bool => match bytes[0] {
            0 => DataValue::Bool(false),
            1 => DataValue::Bool(true),
            other => {
                return Err(StorageError::malformed(format!(
                    "invalid boolean byte {other} in column '{}'",
                    column.name
                )))
            }
        },
        PrimitiveType::Double => {
            DataValue::Double(f64::from_le_bytes(bytes[..8].try_into().unwrap()))
        }
        PrimitiveType::Decimal => DataValue::Decimal(DecimalValue::from_le_bytes(
            bytes[..16].try_into().unwrap(),
            column.data_type.scale.unwrap_or(0),
        )),
        PrimitiveType::DateTime => {
            let micros = i64::from_le_bytes(bytes[..8].try_into().unwrap());
            let instant = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                StorageError::malformed(format!(
                    "datetime {micros} out of range in column '{}'",
                    column.name
                ))
            })?;
            DataValue::DateTime(instant)
        }
        PrimitiveType::Varchar | PrimitiveType::Blob => {
            unreachable!("variable-width type in fixed decode")
        }
    };
    Ok(value)
}

fn decode_var(column: &ColumnDefinition, payload: &[u8]) -> Result<DataValue> {
    match column.data_type.primitive {
        PrimitiveType::Varchar => {
            let text = std::str::from_utf8(payload).map_err(|_| {
                StorageError::malformed(format!("invalid UTF-8 in column '{}'", column.name))
            })?;
            Ok(DataValue::Varchar(text.to_owned()))
        }
        PrimitiveType::Blob => Ok(DataValue::Blob(payload.to_vec())),
        _ => unreachable!("decode_var on fixed-width column"),
    }
}

fn read_var_header(bytes: &[u8], offset: usize) -> Result<(usize, usize)> {
    if bytes.len() < offset + 4 {
        return Err(StorageError::malformed("record truncated at length prefix"));
    }
    let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
    let payload_offset = offset + 4;
    if bytes.len() < payload_offset + len {
        return Err(StorageError::malformed("record truncated in payload"));
    }
    Ok((len, payload_offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Constraint, DataTypeInfo, PrimaryKeyConstraint};
    use chrono::{TimeZone, Utc};

    fn table(
        name: &str,
        columns: Vec<ColumnDefinition>,
        pk: Vec<&str>,
    ) -> TableDefinition {
        TableDefinition::new(
            name,
            columns,
            vec![Constraint::PrimaryKey(PrimaryKeyConstraint {
                name: None,
                column_names: pk.into_iter().map(String::from).collect(),
            })],
        )
        .unwrap()
    }

    fn all_types_table() -> TableDefinition {
        table(
            "everything",
            vec![
                ColumnDefinition::new("id", DataTypeInfo::int(), false),
                ColumnDefinition::new("big", DataTypeInfo::bigint(), true),
                ColumnDefinition::new("flag", DataTypeInfo::bool(), true),
                ColumnDefinition::new("ratio", DataTypeInfo::double(), true),
                ColumnDefinition::new("price", DataTypeInfo::decimal(12, 2), true),
                ColumnDefinition::new("seen_at", DataTypeInfo::datetime(), true),
                ColumnDefinition::new("label", DataTypeInfo::varchar(32), true),
                ColumnDefinition::new("payload", DataTypeInfo::blob(64), true),
            ],
            vec!["id"],
        )
    }

    #[test]
    fn test_roundtrip_all_types() {
        let table = all_types_table();
        let record = Record::new(vec![
            DataValue::Int(42),
            DataValue::BigInt(-7_000_000_000),
            DataValue::Bool(true),
            DataValue::Double(2.5),
            DataValue::Decimal(DecimalValue::new(123456, 2)),
            DataValue::DateTime(Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap()),
            DataValue::Varchar("hello".into()),
            DataValue::Blob(vec![0xDE, 0xAD, 0xBE, 0xEF]),
        ]);

        let bytes = serialize_row(&table, &record).unwrap();
        let restored = deserialize(table.columns(), &bytes).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_roundtrip_with_nulls() {
        let table = all_types_table();
        let record = Record::new(vec![
            DataValue::Int(1),
            DataValue::Null(PrimitiveType::BigInt),
            DataValue::Null(PrimitiveType::Bool),
            DataValue::Null(PrimitiveType::Double),
            DataValue::Null(PrimitiveType::Decimal),
            DataValue::Null(PrimitiveType::DateTime),
            DataValue::Null(PrimitiveType::Varchar),
            DataValue::Null(PrimitiveType::Blob),
        ]);

        let bytes = serialize_row(&table, &record).unwrap();
        // bitmap + one i32 only
        assert_eq!(bytes.len(), 1 + 4);
        let restored = deserialize(table.columns(), &bytes).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_null_primary_key_rejected() {
        let table = all_types_table();
        let mut values = vec![
            DataValue::Null(PrimitiveType::Int),
            DataValue::Null(PrimitiveType::BigInt),
            DataValue::Null(PrimitiveType::Bool),
            DataValue::Null(PrimitiveType::Double),
            DataValue::Null(PrimitiveType::Decimal),
            DataValue::Null(PrimitiveType::DateTime),
            DataValue::Null(PrimitiveType::Varchar),
            DataValue::Null(PrimitiveType::Blob),
        ];
        let err = serialize_row(&table, &Record::new(values.clone())).unwrap_err();
        assert!(matches!(err, StorageError::NullPrimaryKey(_)));

        values[0] = DataValue::Int(9);
        assert!(serialize_row(&table, &Record::new(values)).is_ok());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let table = all_types_table();
        let mut values = vec![
            DataValue::BigInt(42), // wrong: column is Int
            DataValue::Null(PrimitiveType::BigInt),
            DataValue::Null(PrimitiveType::Bool),
            DataValue::Null(PrimitiveType::Double),
            DataValue::Null(PrimitiveType::Decimal),
            DataValue::Null(PrimitiveType::DateTime),
            DataValue::Null(PrimitiveType::Varchar),
            DataValue::Null(PrimitiveType::Blob),
        ];
        let err = serialize_row(&table, &Record::new(values.clone())).unwrap_err();
        assert!(matches!(err, StorageError::TypeMismatch { .. }));

        values[0] = DataValue::Int(42);
        assert!(serialize_row(&table, &Record::new(values)).is_ok());
    }

    #[test]
    fn test_varchar_over_max_length_rejected() {
        let table = table(
            "t",
            vec![
                ColumnDefinition::new("id", DataTypeInfo::int(), false),
                ColumnDefinition::new("s", DataTypeInfo::varchar(4), true),
            ],
            vec!["id"],
        );
        let record = Record::new(vec![DataValue::Int(1), DataValue::Varchar("toolong".into())]);
        let err = serialize_row(&table, &record).unwrap_err();
        assert!(matches!(err, StorageError::ValueTooLong { .. }));
    }

    #[test]
    fn test_primary_key_projection_roundtrip() {
        let table = all_types_table();
        let record = Record::new(vec![
            DataValue::Int(7),
            DataValue::BigInt(1),
            DataValue::Bool(false),
            DataValue::Double(0.0),
            DataValue::Decimal(DecimalValue::new(0, 2)),
            DataValue::DateTime(Utc.timestamp_micros(0).unwrap()),
            DataValue::Varchar("x".into()),
            DataValue::Blob(vec![]),
        ]);
        let bytes = serialize_row(&table, &record).unwrap();
        let key = deserialize_primary_key(&table, &bytes).unwrap();
        assert_eq!(key, primary_key_of(&table, &record).unwrap());
        assert_eq!(key.values(), &[DataValue::Int(7)]);
    }

    #[test]
    fn test_reordered_composite_key_projection() {
        // PRIMARY KEY (col_c, col_a): key order differs from column order
        let table = table(
            "r",
            vec![
                ColumnDefinition::new("col_a", DataTypeInfo::int(), false),
                ColumnDefinition::new("col_b", DataTypeInfo::varchar(10), true),
                ColumnDefinition::new("col_c", DataTypeInfo::bigint(), false),
            ],
            vec!["col_c", "col_a"],
        );
        let record = Record::new(vec![
            DataValue::Int(10),
            DataValue::Varchar("hello".into()),
            DataValue::BigInt(999),
        ]);
        let bytes = serialize_row(&table, &record).unwrap();
        let key = deserialize_primary_key(&table, &bytes).unwrap();
        assert_eq!(key.values(), &[DataValue::BigInt(999), DataValue::Int(10)]);
    }

    #[test]
    fn test_separator_key_roundtrip() {
        let table = table(
            "e",
            vec![
                ColumnDefinition::new("org", DataTypeInfo::varchar(20), false),
                ColumnDefinition::new("emp_id", DataTypeInfo::int(), false),
            ],
            vec!["org", "emp_id"],
        );
        let key = Key::new(vec![DataValue::Varchar("Sales".into()), DataValue::Int(50)]);
        let bytes = serialize_key(&table, &key).unwrap();
        assert_eq!(deserialize_key(&table, &bytes).unwrap(), key);
    }

    #[test]
    fn test_truncated_record_is_malformed() {
        let table = all_types_table();
        let record = Record::new(vec![
            DataValue::Int(1),
            DataValue::BigInt(2),
            DataValue::Bool(true),
            DataValue::Double(1.0),
            DataValue::Null(PrimitiveType::Decimal),
            DataValue::Null(PrimitiveType::DateTime),
            DataValue::Varchar("abcdef".into()),
            DataValue::Null(PrimitiveType::Blob),
        ]);
        let bytes = serialize_row(&table, &record).unwrap();
        let err = deserialize(table.columns(), &bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, StorageError::MalformedData(_)));
    }
}
