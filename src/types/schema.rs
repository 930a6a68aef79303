//! Column, constraint, and table definitions.
//!
//! The serde field names follow the catalog bootstrap JSON contract, so
//! these types parse the `sys_*.json` files directly.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};
use crate::types::value::{DataTypeInfo, PrimitiveType};

/// A single column of a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name; lookups are case-insensitive
    #[serde(rename = "Name")]
    pub name: String,
    /// Type and type parameters
    #[serde(rename = "DataType")]
    pub data_type: DataTypeInfo,
    /// Whether NULL is storable in this column
    #[serde(rename = "IsNullable")]
    pub nullable: bool,
    /// Position in the table's physical column order; assigned on validation
    #[serde(skip)]
    pub ordinal: usize,
    /// Optional default expression, kept as uninterpreted text
    #[serde(
        rename = "DefaultValueExpression",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_expression: Option<String>,
}

impl ColumnDefinition {
    /// Create a column definition; the ordinal is assigned when the column
    /// joins a [`TableDefinition`].
    pub fn new(name: impl Into<String>, data_type: DataTypeInfo, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            ordinal: 0,
            default_expression: None,
        }
    }
}

/// Action taken on the referencing rows when a referenced row changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
}

impl ReferentialAction {
    /// Stable integer code used when the action is stored in a catalog row
    pub fn code(self) -> i32 {
        match self {
            Self::NoAction => 0,
            Self::Cascade => 1,
            Self::SetNull => 2,
            Self::SetDefault => 3,
            Self::Restrict => 4,
        }
    }

    /// Inverse of [`ReferentialAction::code`]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::NoAction),
            1 => Some(Self::Cascade),
            2 => Some(Self::SetNull),
            3 => Some(Self::SetDefault),
            4 => Some(Self::Restrict),
            _ => None,
        }
    }
}

/// Primary-key constraint: the clustering key of the table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryKeyConstraint {
    /// Constraint name; generated as `pk_<table>` when omitted
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Key columns in key order (which may differ from column order)
    #[serde(rename = "ColumnNames")]
    pub column_names: Vec<String>,
}

/// Unique constraint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueConstraint {
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "ColumnNames")]
    pub column_names: Vec<String>,
}

/// Foreign-key constraint referencing a parent table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyConstraint {
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "ReferencingColumnNames")]
    pub referencing_column_names: Vec<String>,
    #[serde(rename = "ReferencedTableName")]
    pub referenced_table_name: String,
    #[serde(rename = "ReferencedColumnNames")]
    pub referenced_column_names: Vec<String>,
    #[serde(rename = "OnUpdateAction", default)]
    pub on_update_action: ReferentialAction,
    #[serde(rename = "OnDeleteAction", default)]
    pub on_delete_action: ReferentialAction,
}

/// A table constraint, discriminated by `ConstraintType` in the catalog JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "ConstraintType")]
pub enum Constraint {
    PrimaryKey(PrimaryKeyConstraint),
    ForeignKey(ForeignKeyConstraint),
    Unique(UniqueConstraint),
}

impl Constraint {
    /// The constraint's name, if one has been assigned
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::PrimaryKey(c) => c.name.as_deref(),
            Self::ForeignKey(c) => c.name.as_deref(),
            Self::Unique(c) => c.name.as_deref(),
        }
    }

    fn set_name(&mut self, name: String) {
        match self {
            Self::PrimaryKey(c) => c.name = Some(name),
            Self::ForeignKey(c) => c.name = Some(name),
            Self::Unique(c) => c.name = Some(name),
        }
    }
}

/// A table: name, ordered columns, constraints.
///
/// Construction through [`TableDefinition::new`] validates the definition
/// and precomputes the primary-key projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Columns")]
    columns: Vec<ColumnDefinition>,
    #[serde(rename = "Constraints", default)]
    constraints: Vec<Constraint>,
    /// Ordinals of the primary-key columns, in key order
    #[serde(skip)]
    pk_ordinals: Vec<usize>,
}

impl TableDefinition {
    /// Create and validate a table definition
    pub fn new(
        name: impl Into<String>,
        columns: Vec<ColumnDefinition>,
        constraints: Vec<Constraint>,
    ) -> Result<Self> {
        let mut def = Self {
            name: name.into(),
            columns,
            constraints,
            pk_ordinals: Vec::new(),
        };
        def.validate()?;
        Ok(def)
    }

    /// Validate a definition parsed from catalog JSON (assigns ordinals,
    /// generates missing constraint names, computes the key projection).
    pub fn validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StorageError::invalid_definition("table name is empty"));
        }
        if self.columns.is_empty() {
            return Err(StorageError::invalid_definition(format!(
                "table '{}' has no columns",
                self.name
            )));
        }

        for (ordinal, column) in self.columns.iter_mut().enumerate() {
            column.ordinal = ordinal;
        }

        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.to_lowercase()) {
                return Err(StorageError::invalid_definition(format!(
                    "duplicate column '{}' in table '{}'",
                    column.name, self.name
                )));
            }
            match column.data_type.primitive {
                PrimitiveType::Varchar | PrimitiveType::Blob => {
                    if column.data_type.max_length.is_none() {
                        return Err(StorageError::invalid_definition(format!(
                            "column '{}' needs a maximum length",
                            column.name
                        )));
                    }
                }
                PrimitiveType::Decimal => {
                    if column.data_type.precision.is_none() || column.data_type.scale.is_none() {
                        return Err(StorageError::invalid_definition(format!(
                            "column '{}' needs precision and scale",
                            column.name
                        )));
                    }
                }
                _ => {}
            }
        }

        let pk_count = self
            .constraints
            .iter()
            .filter(|c| matches!(c, Constraint::PrimaryKey(_)))
            .count();
        if pk_count > 1 {
            return Err(StorageError::invalid_definition(format!(
                "table '{}' declares {} primary keys",
                self.name, pk_count
            )));
        }

        // Generate names for anonymous constraints, then enforce uniqueness.
        let table = self.name.clone();
        for (i, constraint) in self.constraints.iter_mut().enumerate() {
            if constraint.name().is_none() {
                let generated = match constraint {
                    Constraint::PrimaryKey(_) => format!("pk_{table}"),
                    Constraint::ForeignKey(_) => format!("fk_{table}_{i}"),
                    Constraint::Unique(_) => format!("uq_{table}_{i}"),
                };
                constraint.set_name(generated);
            }
        }
        let mut names = std::collections::HashSet::new();
        for constraint in &self.constraints {
            let name = constraint.name().expect("constraint name assigned above");
            if !names.insert(name.to_lowercase()) {
                return Err(StorageError::invalid_definition(format!(
                    "duplicate constraint name '{name}' in table '{}'",
                    self.name
                )));
            }
        }

        self.pk_ordinals.clear();
        for constraint in &self.constraints {
            match constraint {
                Constraint::PrimaryKey(pk) => {
                    if pk.column_names.is_empty() {
                        return Err(StorageError::invalid_definition(format!(
                            "primary key of '{}' has no columns",
                            self.name
                        )));
                    }
                    for column_name in &pk.column_names {
                        let (ordinal, column) =
                            self.column_by_name(column_name).ok_or_else(|| {
                                StorageError::invalid_definition(format!(
                                    "primary key column '{column_name}' not found in '{}'",
                                    self.name
                                ))
                            })?;
                        if column.nullable {
                            return Err(StorageError::invalid_definition(format!(
                                "primary key column '{column_name}' must be non-nullable"
                            )));
                        }
                        self.pk_ordinals.push(ordinal);
                    }
                }
                Constraint::Unique(unique) => {
                    for column_name in &unique.column_names {
                        if self.column_by_name(column_name).is_none() {
                            return Err(StorageError::invalid_definition(format!(
                                "unique constraint column '{column_name}' not found in '{}'",
                                self.name
                            )));
                        }
                    }
                }
                Constraint::ForeignKey(fk) => {
                    if fk.referencing_column_names.is_empty()
                        || fk.referencing_column_names.len() != fk.referenced_column_names.len()
                    {
                        return Err(StorageError::invalid_definition(format!(
                            "foreign key on '{}' has mismatched column lists",
                            self.name
                        )));
                    }
                    for column_name in &fk.referencing_column_names {
                        if self.column_by_name(column_name).is_none() {
                            return Err(StorageError::invalid_definition(format!(
                                "foreign key column '{column_name}' not found in '{}'",
                                self.name
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in physical order
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// All constraints
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Case-insensitive column lookup, returning `(ordinal, column)`
    pub fn column_by_name(&self, name: &str) -> Option<(usize, &ColumnDefinition)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.name.eq_ignore_ascii_case(name))
    }

    /// The primary-key constraint, if declared
    pub fn primary_key(&self) -> Option<&PrimaryKeyConstraint> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::PrimaryKey(pk) => Some(pk),
            _ => None,
        })
    }

    /// Column ordinals of the primary key, in key order
    pub fn primary_key_ordinals(&self) -> &[usize] {
        &self.pk_ordinals
    }

    /// Primary-key columns, in key order
    pub fn primary_key_columns(&self) -> Vec<&ColumnDefinition> {
        self.pk_ordinals.iter().map(|&o| &self.columns[o]).collect()
    }
}
