//! Schema definitions for scopedb
//!
//! Tables, columns, indices and foreign keys. A [`TableDef`] is immutable once
//! built and owns its columns; every [`Column`] keeps a non-owning
//! back-reference to the table that owns it.

use super::types::DataType;
use crate::error::{Error, Result};
use crate::storage::Row;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Stable identifier of a column: declared table name plus column name.
///
/// Foreign-key links are stored as identifiers rather than column handles so
/// that tables never own each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnId {
    pub table: String,
    pub column: String,
}

impl ColumnId {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Parse a `Table.column` reference
    pub fn parse(reference: &str) -> Result<Self> {
        match reference.split_once('.') {
            Some((table, column)) if !table.is_empty() && !column.is_empty() => {
                Ok(Self::new(table, column))
            }
            _ => Err(Error::SchemaViolation(format!(
                "malformed column reference '{}', expected Table.column",
                reference
            ))),
        }
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Column blueprint, used while a table is being defined
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
    /// Is this column nullable?
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Is this column unique?
    #[serde(default)]
    pub unique: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    /// Create a new nullable, non-unique column definition
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            unique: false,
        }
    }

    /// Set nullable flag
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set unique flag
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct ForeignKeyLinks {
    parent: Option<ColumnId>,
    children: Vec<ColumnId>,
}

/// A column bound to its owning table
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    data_type: DataType,
    position: usize,
    nullable: bool,
    unique: bool,
    alias: Option<String>,
    table_name: String,
    effective_table_name: String,
    table: Weak<TableDef>,
    /// Covering indices, resolved when the table is assembled
    indices: Arc<Vec<Arc<IndexDef>>>,
    links: Arc<RwLock<ForeignKeyLinks>>,
}

impl Column {
    fn bind(
        def: &ColumnDef,
        position: usize,
        table: &TableShape,
        indices: &[Arc<IndexDef>],
        owner: Weak<TableDef>,
    ) -> Self {
        let covering = indices
            .iter()
            .filter(|index| index.covers(&def.name))
            .cloned()
            .collect();
        Self {
            name: def.name.clone(),
            data_type: def.data_type,
            position,
            nullable: def.nullable,
            unique: def.unique,
            alias: None,
            table_name: table.name.clone(),
            effective_table_name: table.effective_name().to_string(),
            table: owner,
            indices: Arc::new(covering),
            links: Arc::new(RwLock::new(ForeignKeyLinks::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<effective table name>.<column name>`
    pub fn normalized_name(&self) -> String {
        format!("{}.{}", self.effective_table_name, self.name)
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Position of this column's value inside a [`Row`]
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Declared name of the owning table
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Alias of the owning table if it has one, else its declared name
    pub fn effective_table_name(&self) -> &str {
        &self.effective_table_name
    }

    /// Owning table, if it is still alive
    pub fn table(&self) -> Option<Arc<TableDef>> {
        self.table.upgrade()
    }

    pub fn id(&self) -> ColumnId {
        ColumnId::new(&self.table_name, &self.name)
    }

    /// Indices of the owning table that include this column.
    ///
    /// Resolved once when the table is assembled and shared by every clone
    /// and alias of the column, so the answer does not depend on the owning
    /// table still being alive.
    pub fn indices(&self) -> &[Arc<IndexDef>] {
        &self.indices
    }

    /// Record the column this one references. Replaces any previous parent.
    pub fn set_parent(&self, parent: &Column) {
        let mut links = self.links.write().unwrap_or_else(PoisonError::into_inner);
        links.parent = Some(parent.id());
    }

    /// Column this one references, if any
    pub fn parent(&self) -> Option<ColumnId> {
        let links = self.links.read().unwrap_or_else(PoisonError::into_inner);
        links.parent.clone()
    }

    /// Record the columns referencing this one. Replaces the previous set.
    pub fn set_children(&self, children: &[Column]) {
        let mut links = self.links.write().unwrap_or_else(PoisonError::into_inner);
        links.children = children.iter().map(Column::id).collect();
    }

    /// Columns referencing this one
    pub fn children(&self) -> Vec<ColumnId> {
        let links = self.links.read().unwrap_or_else(PoisonError::into_inner);
        links.children.clone()
    }

    /// A copy of this column carrying a different alias.
    ///
    /// The copy keeps a snapshot of the foreign-key links; rewiring either
    /// column afterwards does not affect the other.
    pub fn with_alias(&self, alias: impl Into<String>) -> Column {
        let links = self
            .links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Column {
            alias: Some(alias.into()),
            links: Arc::new(RwLock::new(links)),
            ..self.clone()
        }
    }

    /// Check a single value against this column's type and nullability
    pub fn check_value(&self, value: &crate::storage::Value) -> Result<()> {
        if value.is_null() {
            if self.nullable {
                return Ok(());
            }
            return Err(Error::NullNotAllowed(self.normalized_name()));
        }
        if !self.data_type.accepts(value) {
            return Err(Error::TypeMismatch {
                from: value.type_name().to_string(),
                to: format!("{} ({})", self.data_type, self.normalized_name()),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} AS {}", self.normalized_name(), alias),
            None => write!(f, "{}", self.normalized_name()),
        }
    }
}

/// Sort order of an indexed column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// A column reference inside an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedColumn {
    pub name: String,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub auto_increment: bool,
}

impl IndexedColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Asc,
            auto_increment: false,
        }
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }
}

/// Index definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name
    pub name: String,
    /// Table this index belongs to
    pub table_name: String,
    /// Columns included in the index, in key order
    pub columns: Vec<IndexedColumn>,
    /// Is this a unique index?
    pub unique: bool,
    /// Is this the primary key index?
    pub primary: bool,
}

impl IndexDef {
    pub fn new(
        name: impl Into<String>,
        table_name: impl Into<String>,
        columns: Vec<IndexedColumn>,
    ) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            columns,
            unique: false,
            primary: false,
        }
    }

    /// Set unique flag
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Set primary flag
    pub fn primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        if primary {
            self.unique = true;
        }
        self
    }

    /// `<table>.<index>`
    pub fn normalized_name(&self) -> String {
        format!("{}.{}", self.table_name, self.name)
    }

    /// Does this index have a member column with the given name?
    pub fn covers(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name == column)
    }
}

/// What happens to referencing rows when the referenced row changes.
///
/// Declarative: recorded in the schema and its JSON form, not enforced by
/// the transaction runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintAction {
    #[default]
    Restrict,
    Cascade,
}

/// When a foreign-key constraint is checked. Declarative, like
/// [`ConstraintAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintTiming {
    #[default]
    Immediate,
    Deferrable,
}

/// Foreign key: `child_table.child_column` references `parent_table.parent_column`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDef {
    pub name: String,
    pub child_table: String,
    pub child_column: String,
    pub parent_table: String,
    pub parent_column: String,
    pub action: ConstraintAction,
    pub timing: ConstraintTiming,
}

impl ForeignKeyDef {
    pub fn child(&self) -> ColumnId {
        ColumnId::new(&self.child_table, &self.child_column)
    }

    pub fn parent(&self) -> ColumnId {
        ColumnId::new(&self.parent_table, &self.parent_column)
    }

    /// `<child table>.<constraint name>`
    pub fn normalized_name(&self) -> String {
        format!("{}.{}", self.child_table, self.name)
    }
}

/// Name and alias of a table, the part every column needs to know
struct TableShape {
    name: String,
    alias: Option<String>,
}

impl TableShape {
    fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Table definition - immutable once built
#[derive(Debug)]
pub struct TableDef {
    name: String,
    alias: Option<String>,
    columns: IndexMap<String, Column>,
    indices: Vec<Arc<IndexDef>>,
    primary_key: Option<Arc<IndexDef>>,
    foreign_keys: Vec<ForeignKeyDef>,
    column_defs: Vec<ColumnDef>,
}

impl TableDef {
    /// Assemble a table. The index list is complete before any column exists,
    /// so each column's covering indices are resolved here.
    pub(crate) fn assemble(
        name: String,
        alias: Option<String>,
        column_defs: Vec<ColumnDef>,
        indices: Vec<Arc<IndexDef>>,
        foreign_keys: Vec<ForeignKeyDef>,
    ) -> Arc<Self> {
        let primary_key = indices.iter().find(|index| index.primary).cloned();
        let shape = TableShape { name, alias };
        Arc::new_cyclic(|owner| {
            let columns = column_defs
                .iter()
                .enumerate()
                .map(|(position, def)| {
                    (
                        def.name.clone(),
                        Column::bind(def, position, &shape, &indices, owner.clone()),
                    )
                })
                .collect();
            TableDef {
                name: shape.name.clone(),
                alias: shape.alias.clone(),
                columns,
                indices,
                primary_key,
                foreign_keys,
                column_defs,
            }
        })
    }

    /// Declared table name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Alias if present, otherwise the declared name
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Columns in declaration order
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.values()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Column by name, as an error when absent
    pub fn require_column(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string(), self.name.clone()))
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_defs(&self) -> &[ColumnDef] {
        &self.column_defs
    }

    pub fn indices(&self) -> &[Arc<IndexDef>] {
        &self.indices
    }

    pub fn primary_key(&self) -> Option<&Arc<IndexDef>> {
        self.primary_key.as_ref()
    }

    /// Foreign keys declared on this table (this table is the referencing side)
    pub fn foreign_keys(&self) -> &[ForeignKeyDef] {
        &self.foreign_keys
    }

    /// A copy of this table under an alias. Columns of the copy use the alias
    /// in their normalized names and keep their foreign-key links.
    pub fn with_alias(&self, alias: impl Into<String>) -> Arc<TableDef> {
        let aliased = TableDef::assemble(
            self.name.clone(),
            Some(alias.into()),
            self.column_defs.clone(),
            self.indices.clone(),
            self.foreign_keys.clone(),
        );
        for column in self.columns() {
            if let Some(copy) = aliased.column(column.name()) {
                if let Some(parent) = column.parent() {
                    copy.links
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .parent = Some(parent);
                }
                copy.links
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .children = column.children();
            }
        }
        aliased
    }

    /// Check that a row fits this table: arity, nullability and value types
    pub fn validate_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::SchemaViolation(format!(
                "row {} has {} values, table '{}' has {} columns",
                row.id(),
                row.len(),
                self.name,
                self.columns.len()
            )));
        }
        for (column, value) in self.columns().zip(row.values()) {
            column.check_value(value)?;
        }
        Ok(())
    }
}
