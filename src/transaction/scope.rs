//! Transaction scopes
//!
//! A scope is the static set of tables a transaction declares up front: the
//! tables it reads and the tables it writes. Writing a table implies reading it.

use std::collections::BTreeSet;
use std::fmt;

/// Declared read and write tables of a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    reads: BTreeSet<String>,
    writes: BTreeSet<String>,
}

impl Scope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table the transaction only reads
    pub fn read(mut self, table: impl Into<String>) -> Self {
        let table = table.into();
        if !self.writes.contains(&table) {
            self.reads.insert(table);
        }
        self
    }

    /// Add a table the transaction writes (and may read)
    pub fn write(mut self, table: impl Into<String>) -> Self {
        let table = table.into();
        self.reads.remove(&table);
        self.writes.insert(table);
        self
    }

    /// Scope reading every given table
    pub fn reading<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tables.into_iter().fold(Self::new(), Scope::read)
    }

    /// Scope writing every given table
    pub fn writing<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tables.into_iter().fold(Self::new(), Scope::write)
    }

    /// Tables that are read but not written
    pub fn reads(&self) -> impl Iterator<Item = &str> {
        self.reads.iter().map(String::as_str)
    }

    pub fn writes(&self) -> impl Iterator<Item = &str> {
        self.writes.iter().map(String::as_str)
    }

    /// Every table in the scope
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.reads.union(&self.writes).map(String::as_str)
    }

    pub fn can_read(&self, table: &str) -> bool {
        self.reads.contains(table) || self.writes.contains(table)
    }

    pub fn can_write(&self, table: &str) -> bool {
        self.writes.contains(table)
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    /// First table on which two scopes cannot hold locks at the same time:
    /// one writes a table the other reads or writes.
    pub fn first_conflict<'a>(&'a self, other: &Scope) -> Option<&'a str> {
        self.tables()
            .find(|table| (self.can_write(table) && other.can_read(table)) || other.can_write(table))
    }

    pub fn conflicts_with(&self, other: &Scope) -> bool {
        self.first_conflict(other).is_some()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reads: Vec<&str> = self.reads().collect();
        let writes: Vec<&str> = self.writes().collect();
        write!(f, "read[{}] write[{}]", reads.join(","), writes.join(","))
    }
}
