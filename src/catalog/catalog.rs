//! Schema graph for scopedb
//!
//! The [`Schema`] owns every table of a database and the authoritative
//! foreign-key wiring between their columns. It is built once through
//! [`SchemaBuilder`] and never changes afterwards.

use super::schema::{
    Column, ColumnDef, ColumnId, ConstraintAction, ConstraintTiming, ForeignKeyDef, IndexDef,
    IndexedColumn, TableDef,
};
use super::types::DataType;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A finalized schema graph
#[derive(Debug)]
pub struct Schema {
    name: String,
    version: u32,
    tables: IndexMap<String, Arc<TableDef>>,
}

impl Schema {
    /// Start building a schema
    pub fn builder(name: impl Into<String>, version: u32) -> SchemaBuilder {
        SchemaBuilder::new(name, version)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Get a table by name
    pub fn table(&self, name: &str) -> Result<Arc<TableDef>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Check if a table exists
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Tables in declaration order
    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableDef>> {
        self.tables.values()
    }

    /// List all table names
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Resolve a column identifier
    pub fn column(&self, id: &ColumnId) -> Option<Column> {
        self.tables.get(&id.table)?.column(&id.column).cloned()
    }

    /// Column referenced by `column`, if any
    pub fn parent_of(&self, column: &Column) -> Option<Column> {
        column.parent().and_then(|id| self.column(&id))
    }

    /// Columns referencing `column`
    pub fn children_of(&self, column: &Column) -> Vec<Column> {
        column
            .children()
            .iter()
            .filter_map(|id| self.column(id))
            .collect()
    }

    /// Foreign keys whose parent side is `table`
    pub fn referencing_foreign_keys(&self, table: &str) -> Vec<&ForeignKeyDef> {
        self.tables()
            .flat_map(|t| t.foreign_keys())
            .filter(|fk| fk.parent_table == table)
            .collect()
    }
}

/// Builder for a [`Schema`]
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    version: u32,
    tables: IndexMap<String, TableBuilder>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            tables: IndexMap::new(),
        }
    }

    /// Add a table definition
    pub fn table(mut self, table: TableBuilder) -> Result<Self> {
        if self.tables.contains_key(&table.name) {
            return Err(Error::TableAlreadyExists(table.name));
        }
        self.tables.insert(table.name.clone(), table);
        Ok(self)
    }

    /// Validate every table, then wire foreign keys in both directions.
    pub fn build(self) -> Result<Schema> {
        let mut tables = IndexMap::with_capacity(self.tables.len());
        for (name, builder) in self.tables {
            tables.insert(name, builder.finish()?);
        }

        let mut normalized = HashSet::new();
        for table in tables.values() {
            for column in table.columns() {
                if !normalized.insert(column.normalized_name()) {
                    return Err(Error::DuplicateColumn(column.normalized_name()));
                }
            }
        }

        let schema = Schema {
            name: self.name,
            version: self.version,
            tables,
        };

        // Children are collected first: set_children replaces, never appends.
        let mut children: BTreeMap<ColumnId, Vec<Column>> = BTreeMap::new();
        for table in schema.tables() {
            for fk in table.foreign_keys() {
                let child = schema.column(&fk.child()).ok_or_else(|| {
                    Error::ForeignKeyTargetNotFound {
                        name: fk.normalized_name(),
                        target: fk.child().to_string(),
                    }
                })?;
                let parent = schema.column(&fk.parent()).ok_or_else(|| {
                    Error::ForeignKeyTargetNotFound {
                        name: fk.normalized_name(),
                        target: fk.parent().to_string(),
                    }
                })?;
                child.set_parent(&parent);
                children.entry(parent.id()).or_default().push(child);
            }
        }
        for (parent, referencing) in children {
            if let Some(parent) = schema.column(&parent) {
                parent.set_children(&referencing);
            }
        }

        debug!(
            schema = %schema.name,
            version = schema.version,
            tables = schema.tables.len(),
            "schema built"
        );
        Ok(schema)
    }
}

/// Builder for creating tables with a fluent API
#[derive(Debug, Clone)]
pub struct TableBuilder {
    name: String,
    columns: Vec<ColumnDef>,
    indices: Vec<IndexDef>,
    primary_key: Option<Vec<IndexedColumn>>,
    foreign_keys: Vec<ForeignKeyDef>,
}

impl TableBuilder {
    /// Start building a new table
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indices: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a nullable column
    pub fn column(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.column_def(ColumnDef::new(name, data_type))
    }

    /// Add a NOT NULL column
    pub fn column_not_null(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.column_def(ColumnDef::new(name, data_type).nullable(false))
    }

    /// Add a fully specified column
    pub fn column_def(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Designate the primary key. Its columns become unique and NOT NULL.
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = Some(columns.iter().map(|c| IndexedColumn::new(*c)).collect());
        self
    }

    /// Designate the primary key with explicit per-column settings
    pub fn primary_key_columns(mut self, columns: Vec<IndexedColumn>) -> Self {
        self.primary_key = Some(columns);
        self
    }

    /// Add a secondary index
    pub fn index(self, name: impl Into<String>, columns: &[&str], unique: bool) -> Self {
        let columns = columns.iter().map(|c| IndexedColumn::new(*c)).collect();
        self.index_columns(name, columns, unique)
    }

    /// Add a secondary index with explicit per-column settings
    pub fn index_columns(
        mut self,
        name: impl Into<String>,
        columns: Vec<IndexedColumn>,
        unique: bool,
    ) -> Self {
        let index = IndexDef::new(name, self.name.clone(), columns).unique(unique);
        self.indices.push(index);
        self
    }

    /// Add a restricting, immediately checked foreign key from `local` to
    /// `reference` (written `Table.column`).
    pub fn foreign_key(self, name: impl Into<String>, local: &str, reference: &str) -> Result<Self> {
        self.foreign_key_with(
            name,
            local,
            reference,
            ConstraintAction::Restrict,
            ConstraintTiming::Immediate,
        )
    }

    /// Add a foreign key with explicit action and timing
    pub fn foreign_key_with(
        mut self,
        name: impl Into<String>,
        local: &str,
        reference: &str,
        action: ConstraintAction,
        timing: ConstraintTiming,
    ) -> Result<Self> {
        let parent = ColumnId::parse(reference)?;
        self.foreign_keys.push(ForeignKeyDef {
            name: name.into(),
            child_table: self.name.clone(),
            child_column: local.to_string(),
            parent_table: parent.table,
            parent_column: parent.column,
            action,
            timing,
        });
        Ok(self)
    }

    pub(crate) fn finish(mut self) -> Result<Arc<TableDef>> {
        let mut seen: HashSet<String> = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.clone()) {
                return Err(Error::ColumnAlreadyExists(
                    column.name.clone(),
                    self.name.clone(),
                ));
            }
        }

        let mut indices = Vec::with_capacity(self.indices.len() + 1);
        if let Some(pk_columns) = self.primary_key.take() {
            for member in &pk_columns {
                let column = self
                    .columns
                    .iter_mut()
                    .find(|c| c.name == member.name)
                    .ok_or_else(|| Error::ColumnNotFound(member.name.clone(), self.name.clone()))?;
                column.nullable = false;
                if pk_columns.len() == 1 {
                    column.unique = true;
                }
            }
            let pk_name = format!("pk{}", self.name);
            indices.push(IndexDef::new(pk_name, self.name.clone(), pk_columns).primary(true));
        }
        indices.append(&mut self.indices);

        let mut index_names = HashSet::new();
        for index in &indices {
            if !index_names.insert(index.name.as_str()) {
                return Err(Error::IndexAlreadyExists(index.normalized_name()));
            }
            for member in &index.columns {
                if !seen.contains(member.name.as_str()) {
                    return Err(Error::ColumnNotFound(
                        member.name.clone(),
                        self.name.clone(),
                    ));
                }
            }
        }

        // A single-column unique index makes that column unique.
        for index in indices.iter().filter(|i| i.unique && i.columns.len() == 1) {
            if let Some(column) = self.columns.iter_mut().find(|c| c.name == index.columns[0].name) {
                column.unique = true;
            }
        }

        for fk in &self.foreign_keys {
            if !seen.contains(fk.child_column.as_str()) {
                return Err(Error::ColumnNotFound(
                    fk.child_column.clone(),
                    self.name.clone(),
                ));
            }
        }

        Ok(TableDef::assemble(
            self.name,
            None,
            self.columns,
            indices.into_iter().map(Arc::new).collect(),
            self.foreign_keys,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hr_schema() -> Result<Schema> {
        Schema::builder("hr", 1)
            .table(
                TableBuilder::new("Job")
                    .column("id", DataType::String)
                    .column("title", DataType::String)
                    .primary_key(&["id"]),
            )?
            .table(
                TableBuilder::new("Employee")
                    .column("id", DataType::String)
                    .column("jobId", DataType::String)
                    .column("salary", DataType::Number)
                    .primary_key(&["id"])
                    .index("idx_salary", &["salary"], false)
                    .foreign_key("fk_JobId", "jobId", "Job.id")?,
            )?
            .build()
    }

    #[test]
    fn test_build_schema() {
        let schema = hr_schema().unwrap();
        assert_eq!(schema.table_names(), vec!["Job", "Employee"]);

        let employee = schema.table("Employee").unwrap();
        assert_eq!(employee.column_count(), 3);
        let id = employee.column("id").unwrap();
        assert!(!id.is_nullable());
        assert!(id.is_unique());
        assert_eq!(employee.indices().len(), 2);

        assert!(matches!(schema.table("Nope"), Err(Error::TableNotFound(_))));
    }

    #[test]
    fn test_foreign_key_wiring() {
        let schema = hr_schema().unwrap();
        let employee = schema.table("Employee").unwrap();
        let job = schema.table("Job").unwrap();
        let job_id = employee.column("jobId").unwrap();
        let id = job.column("id").unwrap();

        assert_eq!(job_id.parent(), Some(id.id()));
        assert_eq!(id.children(), vec![job_id.id()]);
        assert_eq!(schema.parent_of(job_id).unwrap().normalized_name(), "Job.id");
        assert_eq!(schema.children_of(id).len(), 1);
        assert_eq!(schema.referencing_foreign_keys("Job").len(), 1);
        assert!(job.column("title").unwrap().parent().is_none());
    }

    #[test]
    fn test_duplicate_table_and_column() {
        let result = Schema::builder("s", 1)
            .table(TableBuilder::new("A"))
            .and_then(|b| b.table(TableBuilder::new("A")));
        assert!(matches!(result, Err(Error::TableAlreadyExists(_))));

        let result = Schema::builder("s", 1)
            .table(
                TableBuilder::new("A")
                    .column("x", DataType::Integer)
                    .column("x", DataType::String),
            )
            .and_then(SchemaBuilder::build);
        assert!(matches!(result, Err(Error::ColumnAlreadyExists(_, _))));
    }

    #[test]
    fn test_unknown_references() {
        let result = Schema::builder("s", 1)
            .table(
                TableBuilder::new("A")
                    .column("x", DataType::Integer)
                    .index("idx_y", &["y"], false),
            )
            .and_then(SchemaBuilder::build);
        assert!(matches!(result, Err(Error::ColumnNotFound(_, _))));

        let result = Schema::builder("s", 1)
            .table(
                TableBuilder::new("A")
                    .column("x", DataType::Integer)
                    .foreign_key("fk_x", "x", "B.id")
                    .unwrap(),
            )
            .and_then(SchemaBuilder::build);
        assert!(matches!(
            result,
            Err(Error::ForeignKeyTargetNotFound { .. })
        ));

        assert!(TableBuilder::new("A").foreign_key("fk", "x", "noDot").is_err());
    }
}
