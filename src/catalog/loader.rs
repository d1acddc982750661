//! JSON schema descriptions
//!
//! Serializable mirror of the schema graph, used to load a schema from a file
//! at startup and to export a built schema back out.

use super::catalog::{Schema, SchemaBuilder, TableBuilder};
use super::schema::{ColumnDef, ConstraintAction, ConstraintTiming, IndexedColumn};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Serializable description of a whole schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDesc {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub tables: Vec<TableDesc>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDesc {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<Vec<IndexedColumn>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indices: Vec<IndexDesc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDesc {
    pub name: String,
    pub columns: Vec<IndexedColumn>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyDesc {
    pub name: String,
    pub local: String,
    /// `Table.column`
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub action: ConstraintAction,
    #[serde(default)]
    pub timing: ConstraintTiming,
}

impl SchemaDesc {
    /// Build and finalize the described schema
    pub fn build(self) -> Result<Schema> {
        let mut builder = SchemaBuilder::new(self.name, self.version);
        for table in self.tables {
            builder = builder.table(table.into_builder()?)?;
        }
        builder.build()
    }
}

impl TableDesc {
    fn into_builder(self) -> Result<TableBuilder> {
        let mut builder = TableBuilder::new(self.name);
        for column in self.columns {
            builder = builder.column_def(column);
        }
        if let Some(pk) = self.primary_key {
            builder = builder.primary_key_columns(pk);
        }
        for index in self.indices {
            builder = builder.index_columns(index.name, index.columns, index.unique);
        }
        for fk in self.foreign_keys {
            builder =
                builder.foreign_key_with(fk.name, &fk.local, &fk.reference, fk.action, fk.timing)?;
        }
        Ok(builder)
    }
}

impl Schema {
    /// Parse and build a schema from its JSON description
    pub fn from_json_str(json: &str) -> Result<Self> {
        let desc: SchemaDesc = serde_json::from_str(json)?;
        desc.build()
    }

    /// Load a schema description from disk
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let schema = Self::from_json_str(&json)?;
        info!(path = %path.display(), schema = schema.name(), "schema loaded");
        Ok(schema)
    }

    /// Export the description this schema was built from
    pub fn to_desc(&self) -> SchemaDesc {
        let tables = self
            .tables()
            .map(|table| {
                let primary_key = table.primary_key().map(|pk| pk.columns.clone());
                TableDesc {
                    name: table.name().to_string(),
                    columns: table.column_defs().to_vec(),
                    primary_key,
                    indices: table
                        .indices()
                        .iter()
                        .filter(|index| !index.primary)
                        .map(|index| IndexDesc {
                            name: index.name.clone(),
                            columns: index.columns.clone(),
                            unique: index.unique,
                        })
                        .collect(),
                    foreign_keys: table
                        .foreign_keys()
                        .iter()
                        .map(|fk| ForeignKeyDesc {
                            name: fk.name.clone(),
                            local: fk.child_column.clone(),
                            reference: fk.parent().to_string(),
                            action: fk.action,
                            timing: fk.timing,
                        })
                        .collect(),
                }
            })
            .collect();
        SchemaDesc {
            name: self.name().to_string(),
            version: self.version(),
            tables,
        }
    }

    /// Serialize the schema description as pretty JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_desc())?)
    }
}
