//! System catalog: table definitions and row codecs.
//!
//! The catalog is stored in four ordinary tables managed by the same
//! engine: `sys_databases`, `sys_tables`, `sys_columns`, `sys_constraints`.
//! Their physical layout is compiled in; the JSON bootstrap files consumed
//! on first boot may restate these definitions but must keep the same
//! shape, since every later boot decodes catalog rows with the compiled-in
//! layout.

use std::path::Path;

use crate::error::{Result, StorageError};
use crate::fs::FileSystem;
use crate::types::{
    ColumnDefinition, Constraint, DataTypeInfo, DataValue, ForeignKeyConstraint,
    PrimaryKeyConstraint, PrimitiveType, Record, ReferentialAction, TableDefinition,
    UniqueConstraint,
};

/// Fixed ids of the system tables
pub const SYS_DATABASES_TABLE_ID: i32 = 1;
pub const SYS_TABLES_TABLE_ID: i32 = 2;
pub const SYS_COLUMNS_TABLE_ID: i32 = 3;
pub const SYS_CONSTRAINTS_TABLE_ID: i32 = 4;

/// The database every system table belongs to
pub const MASTER_DATABASE_ID: i32 = 1;
pub const MASTER_DATABASE_NAME: &str = "master";

/// `(table_id, table_name, bootstrap file name)` for each system table
pub const SYSTEM_TABLES: [(i32, &str, &str); 4] = [
    (SYS_DATABASES_TABLE_ID, "sys_databases", "sys_databases.json"),
    (SYS_TABLES_TABLE_ID, "sys_tables", "sys_tables.json"),
    (SYS_COLUMNS_TABLE_ID, "sys_columns", "sys_columns.json"),
    (
        SYS_CONSTRAINTS_TABLE_ID,
        "sys_constraints",
        "sys_constraints.json",
    ),
];

const CONSTRAINT_TYPE_PRIMARY_KEY: i32 = 1;
const CONSTRAINT_TYPE_FOREIGN_KEY: i32 = 2;
const CONSTRAINT_TYPE_UNIQUE: i32 = 3;

fn pk(columns: &[&str]) -> Constraint {
    Constraint::PrimaryKey(PrimaryKeyConstraint {
        name: None,
        column_names: columns.iter().map(|c| c.to_string()).collect(),
    })
}

/// Compiled-in definition of `sys_databases`
pub fn sys_databases_definition() -> TableDefinition {
    TableDefinition::new(
        "sys_databases",
        vec![
            ColumnDefinition::new("database_id", DataTypeInfo::int(), false),
            ColumnDefinition::new("database_name", DataTypeInfo::varchar(128), false),
        ],
        vec![pk(&["database_id"])],
    )
    .expect("builtin sys_databases definition is valid")
}

/// Compiled-in definition of `sys_tables`
pub fn sys_tables_definition() -> TableDefinition {
    TableDefinition::new(
        "sys_tables",
        vec![
            ColumnDefinition::new("table_id", DataTypeInfo::int(), false),
            ColumnDefinition::new("database_id", DataTypeInfo::int(), false),
            ColumnDefinition::new("table_name", DataTypeInfo::varchar(128), false),
        ],
        vec![pk(&["table_id"])],
    )
    .expect("builtin sys_tables definition is valid")
}

/// Compiled-in definition of `sys_columns`
pub fn sys_columns_definition() -> TableDefinition {
    TableDefinition::new(
        "sys_columns",
        vec![
            ColumnDefinition::new("column_id", DataTypeInfo::int(), false),
            ColumnDefinition::new("table_id", DataTypeInfo::int(), false),
            ColumnDefinition::new("column_name", DataTypeInfo::varchar(128), false),
            ColumnDefinition::new("data_type", DataTypeInfo::int(), false),
            ColumnDefinition::new("max_length", DataTypeInfo::int(), true),
            ColumnDefinition::new("precision", DataTypeInfo::int(), true),
            ColumnDefinition::new("scale", DataTypeInfo::int(), true),
            ColumnDefinition::new("is_nullable", DataTypeInfo::bool(), false),
            ColumnDefinition::new("ordinal", DataTypeInfo::int(), false),
            ColumnDefinition::new("default_expression", DataTypeInfo::varchar(512), true),
        ],
        vec![pk(&["column_id"])],
    )
    .expect("builtin sys_columns definition is valid")
}

/// Compiled-in definition of `sys_constraints`
pub fn sys_constraints_definition() -> TableDefinition {
    TableDefinition::new(
        "sys_constraints",
        vec![
            ColumnDefinition::new("constraint_id", DataTypeInfo::int(), false),
            ColumnDefinition::new("table_id", DataTypeInfo::int(), false),
            ColumnDefinition::new("constraint_name", DataTypeInfo::varchar(128), false),
            ColumnDefinition::new("constraint_type", DataTypeInfo::int(), false),
            ColumnDefinition::new("column_names", DataTypeInfo::varchar(512), false),
            ColumnDefinition::new("referenced_table", DataTypeInfo::varchar(128), true),
            ColumnDefinition::new("referenced_columns", DataTypeInfo::varchar(512), true),
            ColumnDefinition::new("on_update_action", DataTypeInfo::int(), true),
            ColumnDefinition::new("on_delete_action", DataTypeInfo::int(), true),
        ],
        vec![pk(&["constraint_id"])],
    )
    .expect("builtin sys_constraints definition is valid")
}

/// Compiled-in definition for a system table id
pub fn builtin_definition(table_id: i32) -> TableDefinition {
    match table_id {
        SYS_DATABASES_TABLE_ID => sys_databases_definition(),
        SYS_TABLES_TABLE_ID => sys_tables_definition(),
        SYS_COLUMNS_TABLE_ID => sys_columns_definition(),
        SYS_CONSTRAINTS_TABLE_ID => sys_constraints_definition(),
        other => panic!("no builtin definition for table id {other}"),
    }
}

/// Load a system-table definition from its bootstrap JSON file, if present.
///
/// Only consulted on first boot; later boots read the catalog tables.
pub async fn load_bootstrap_definition(
    fs: &dyn FileSystem,
    catalog_dir: &Path,
    file_name: &str,
) -> Result<Option<TableDefinition>> {
    let path = fs.join(catalog_dir, file_name);
    if !fs.file_exists(&path).await {
        return Ok(None);
    }
    let bytes = fs.read_to_end(&path).await?;
    let mut definition: TableDefinition =
        serde_json::from_slice(&bytes).map_err(|e| StorageError::InvalidCatalogFile {
            file: file_name.to_string(),
            reason: e.to_string(),
        })?;
    definition
        .validate()
        .map_err(|e| StorageError::InvalidCatalogFile {
            file: file_name.to_string(),
            reason: e.to_string(),
        })?;
    Ok(Some(definition))
}

/// `sys_databases` row
pub fn database_row(database_id: i32, name: &str) -> Record {
    Record::new(vec![
        DataValue::Int(database_id),
        DataValue::Varchar(name.to_string()),
    ])
}

/// `sys_tables` row
pub fn table_row(table_id: i32, database_id: i32, name: &str) -> Record {
    Record::new(vec![
        DataValue::Int(table_id),
        DataValue::Int(database_id),
        DataValue::Varchar(name.to_string()),
    ])
}

/// `sys_columns` row for one column of a table
pub fn column_row(column_id: i32, table_id: i32, column: &ColumnDefinition) -> Record {
    let opt_int = |v: Option<u32>| match v {
        Some(n) => DataValue::Int(n as i32),
        None => DataValue::Null(PrimitiveType::Int),
    };
    Record::new(vec![
        DataValue::Int(column_id),
        DataValue::Int(table_id),
        DataValue::Varchar(column.name.clone()),
        DataValue::Int(column.data_type.primitive.code()),
        opt_int(column.data_type.max_length),
        opt_int(column.data_type.precision.map(u32::from)),
        opt_int(column.data_type.scale.map(u32::from)),
        DataValue::Bool(column.nullable),
        DataValue::Int(column.ordinal as i32),
        match &column.default_expression {
            Some(e) => DataValue::Varchar(e.clone()),
            None => DataValue::Null(PrimitiveType::Varchar),
        },
    ])
}

/// `sys_constraints` row for one constraint of a table
pub fn constraint_row(constraint_id: i32, table_id: i32, constraint: &Constraint) -> Record {
    let name = constraint
        .name()
        .expect("validated constraints are named")
        .to_string();
    let null_string = || DataValue::Null(PrimitiveType::Varchar);
    let null_int = || DataValue::Null(PrimitiveType::Int);

    let (kind, columns, referenced_table, referenced_columns, on_update, on_delete) =
        match constraint {
            Constraint::PrimaryKey(c) => (
                CONSTRAINT_TYPE_PRIMARY_KEY,
                c.column_names.join(","),
                null_string(),
                null_string(),
                null_int(),
                null_int(),
            ),
            Constraint::Unique(c) => (
                CONSTRAINT_TYPE_UNIQUE,
                c.column_names.join(","),
                null_string(),
                null_string(),
                null_int(),
                null_int(),
            ),
            Constraint::ForeignKey(c) => (
                CONSTRAINT_TYPE_FOREIGN_KEY,
                c.referencing_column_names.join(","),
                DataValue::Varchar(c.referenced_table_name.clone()),
                DataValue::Varchar(c.referenced_column_names.join(",")),
                DataValue::Int(c.on_update_action.code()),
                DataValue::Int(c.on_delete_action.code()),
            ),
        };

    Record::new(vec![
        DataValue::Int(constraint_id),
        DataValue::Int(table_id),
        DataValue::Varchar(name),
        DataValue::Int(kind),
        DataValue::Varchar(columns),
        referenced_table,
        referenced_columns,
        on_update,
        on_delete,
    ])
}

fn int_at(row: &Record, ordinal: usize) -> Result<i32> {
    match row.value(ordinal) {
        DataValue::Int(v) => Ok(*v),
        other => Err(StorageError::malformed(format!(
            "catalog row holds {other:?} where an integer was expected"
        ))),
    }
}

fn opt_int_at(row: &Record, ordinal: usize) -> Result<Option<i32>> {
    match row.value(ordinal) {
        DataValue::Null(_) => Ok(None),
        DataValue::Int(v) => Ok(Some(*v)),
        other => Err(StorageError::malformed(format!(
            "catalog row holds {other:?} where an integer was expected"
        ))),
    }
}

fn string_at(row: &Record, ordinal: usize) -> Result<String> {
    match row.value(ordinal) {
        DataValue::Varchar(v) => Ok(v.clone()),
        other => Err(StorageError::malformed(format!(
            "catalog row holds {other:?} where a string was expected"
        ))),
    }
}

fn opt_string_at(row: &Record, ordinal: usize) -> Result<Option<String>> {
    match row.value(ordinal) {
        DataValue::Null(_) => Ok(None),
        DataValue::Varchar(v) => Ok(Some(v.clone())),
        other => Err(StorageError::malformed(format!(
            "catalog row holds {other:?} where a string was expected"
        ))),
    }
}

fn bool_at(row: &Record, ordinal: usize) -> Result<bool> {
    match row.value(ordinal) {
        DataValue::Bool(v) => Ok(*v),
        other => Err(StorageError::malformed(format!(
            "catalog row holds {other:?} where a boolean was expected"
        ))),
    }
}

/// Decode a `sys_tables` row into `(table_id, database_id, name)`
pub fn table_from_row(row: &Record) -> Result<(i32, i32, String)> {
    Ok((int_at(row, 0)?, int_at(row, 1)?, string_at(row, 2)?))
}

/// Decode a `sys_databases` row into `(database_id, name)`
pub fn database_from_row(row: &Record) -> Result<(i32, String)> {
    Ok((int_at(row, 0)?, string_at(row, 1)?))
}

/// Decode a `sys_columns` row into `(table_id, ordinal, column)`
pub fn column_from_row(row: &Record) -> Result<(i32, usize, ColumnDefinition)> {
    let table_id = int_at(row, 1)?;
    let name = string_at(row, 2)?;
    let code = int_at(row, 3)?;
    let primitive = PrimitiveType::from_code(code)
        .ok_or_else(|| StorageError::malformed(format!("unknown data type code {code}")))?;
    let data_type = DataTypeInfo {
        primitive,
        max_length: opt_int_at(row, 4)?.map(|v| v as u32),
        precision: opt_int_at(row, 5)?.map(|v| v as u8),
        scale: opt_int_at(row, 6)?.map(|v| v as u8),
    };
    let nullable = bool_at(row, 7)?;
    let ordinal = int_at(row, 8)? as usize;

    let mut column = ColumnDefinition::new(name, data_type, nullable);
    column.default_expression = opt_string_at(row, 9)?;
    Ok((table_id, ordinal, column))
}

fn split_names(joined: &str) -> Vec<String> {
    joined.split(',').map(str::to_string).collect()
}

/// Decode a `sys_constraints` row into `(table_id, constraint)`
pub fn constraint_from_row(row: &Record) -> Result<(i32, Constraint)> {
    let table_id = int_at(row, 1)?;
    let name = Some(string_at(row, 2)?);
    let kind = int_at(row, 3)?;
    let column_names = split_names(&string_at(row, 4)?);

    let constraint = match kind {
        CONSTRAINT_TYPE_PRIMARY_KEY => Constraint::PrimaryKey(PrimaryKeyConstraint {
            name,
            column_names,
        }),
        CONSTRAINT_TYPE_UNIQUE => Constraint::Unique(UniqueConstraint { name, column_names }),
        CONSTRAINT_TYPE_FOREIGN_KEY => {
            let referenced_table_name = opt_string_at(row, 5)?.ok_or_else(|| {
                StorageError::malformed("foreign key row without a referenced table")
            })?;
            let referenced_column_names = split_names(&opt_string_at(row, 6)?.ok_or_else(
                || StorageError::malformed("foreign key row without referenced columns"),
            )?);
            let decode_action = |v: Option<i32>| match v {
                None => Ok(ReferentialAction::NoAction),
                Some(code) => ReferentialAction::from_code(code).ok_or_else(|| {
                    StorageError::malformed(format!("unknown referential action code {code}"))
                }),
            };
            Constraint::ForeignKey(ForeignKeyConstraint {
                name,
                referencing_column_names: column_names,
                referenced_table_name,
                referenced_column_names,
                on_update_action: decode_action(opt_int_at(row, 7)?)?,
                on_delete_action: decode_action(opt_int_at(row, 8)?)?,
            })
        }
        other => {
            return Err(StorageError::malformed(format!(
                "unknown constraint type code {other}"
            )))
        }
    };
    Ok((table_id, constraint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;

    #[test]
    fn test_builtin_definitions_are_valid() {
        for (table_id, name, _) in SYSTEM_TABLES {
            let def = builtin_definition(table_id);
            assert_eq!(def.name(), name);
            assert!(def.primary_key().is_some());
        }
    }

    #[test]
    fn test_column_row_roundtrip() {
        let def = sys_columns_definition();
        for column in def.columns() {
            let row = column_row(10, 3, column);
            let (table_id, ordinal, decoded) = column_from_row(&row).unwrap();
            assert_eq!(table_id, 3);
            assert_eq!(ordinal, column.ordinal);
            assert_eq!(decoded.name, column.name);
            assert_eq!(decoded.data_type, column.data_type);
            assert_eq!(decoded.nullable, column.nullable);
        }
    }

    #[test]
    fn test_constraint_row_roundtrip() {
        let fk = Constraint::ForeignKey(ForeignKeyConstraint {
            name: Some("fk_orders_customer".into()),
            referencing_column_names: vec!["customer_id".into()],
            referenced_table_name: "customers".into(),
            referenced_column_names: vec!["id".into()],
            on_update_action: ReferentialAction::NoAction,
            on_delete_action: ReferentialAction::Cascade,
        });
        let row = constraint_row(5, 9, &fk);
        let (table_id, decoded) = constraint_from_row(&row).unwrap();
        assert_eq!(table_id, 9);
        match decoded {
            Constraint::ForeignKey(c) => {
                assert_eq!(c.name.as_deref(), Some("fk_orders_customer"));
                assert_eq!(c.referencing_column_names, vec!["customer_id"]);
                assert_eq!(c.referenced_table_name, "customers");
                assert_eq!(c.on_delete_action, ReferentialAction::Cascade);
            }
            other => panic!("expected foreign key, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bootstrap_definition_from_json() {
        let fs = MemoryFileSystem::new();
        let dir = Path::new("/catalog");
        let json = serde_json::to_vec(&sys_databases_definition()).unwrap();
        fs.write_at(&fs.join(dir, "sys_databases.json"), 0, &json)
            .await
            .unwrap();

        let loaded = load_bootstrap_definition(&fs, dir, "sys_databases.json")
            .await
            .unwrap()
            .expect("file present");
        assert_eq!(loaded.name(), "sys_databases");
        assert_eq!(loaded.primary_key_ordinals(), &[0]);

        // absent file is not an error
        assert!(load_bootstrap_definition(&fs, dir, "sys_tables.json")
            .await
            .unwrap()
            .is_none());

        // malformed file is
        fs.write_at(&fs.join(dir, "sys_columns.json"), 0, b"not json")
            .await
            .unwrap();
        let err = load_bootstrap_definition(&fs, dir, "sys_columns.json")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidCatalogFile { .. }));
    }
}
