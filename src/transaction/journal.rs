//! Per-transaction effect journal
//!
//! Row effects are buffered here until commit. The journal keeps the
//! pre-image of every updated or deleted row so that a commit interrupted by a
//! storage failure can be undone.

use crate::error::{Error, Result};
use crate::storage::{Row, RowId, StorageBackend};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use tracing::{error, trace};

/// Row counts of a finished transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Buffered effects on one table
#[derive(Debug, Default)]
pub(crate) struct TableJournal {
    inserted: BTreeMap<RowId, Row>,
    /// (before, after)
    updated: BTreeMap<RowId, (Row, Row)>,
    deleted: BTreeMap<RowId, Row>,
}

impl TableJournal {
    pub(crate) fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub(crate) fn insert(&mut self, row: Row) {
        self.inserted.insert(row.id(), row);
    }

    /// Record a new version of a visible row
    pub(crate) fn update(&mut self, before: Row, after: Row) {
        let id = after.id();
        if let Some(pending) = self.inserted.get_mut(&id) {
            *pending = after;
        } else if let Some((_, latest)) = self.updated.get_mut(&id) {
            *latest = after;
        } else {
            self.updated.insert(id, (before, after));
        }
    }

    /// Remove a visible row
    pub(crate) fn delete(&mut self, visible: Row) {
        let id = visible.id();
        if self.inserted.remove(&id).is_some() {
            return;
        }
        let before = match self.updated.remove(&id) {
            Some((before, _)) => before,
            None => visible,
        };
        self.deleted.insert(id, before);
    }

    /// Rows as this transaction sees them, given the committed rows
    pub(crate) fn overlay(&self, committed: Vec<Row>) -> Vec<Row> {
        committed
            .into_iter()
            .filter(|row| !self.deleted.contains_key(&row.id()))
            .map(|row| match self.updated.get(&row.id()) {
                Some((_, after)) => after.clone(),
                None => row,
            })
            .chain(self.inserted.values().cloned())
            .collect()
    }
}

/// Effects of a whole transaction, per table in first-touched order
#[derive(Debug, Default)]
pub(crate) struct Journal {
    tables: IndexMap<String, TableJournal>,
}

impl Journal {
    pub(crate) fn table(&self, table: &str) -> Option<&TableJournal> {
        self.tables.get(table).filter(|journal| !journal.is_empty())
    }

    pub(crate) fn table_mut(&mut self, table: &str) -> &mut TableJournal {
        self.tables.entry(table.to_string()).or_default()
    }

    pub(crate) fn clear(&mut self) {
        self.tables.clear();
    }

    /// Apply every buffered effect to `backend`. If any call fails, the calls
    /// that already succeeded are reverted before the error is returned.
    pub(crate) fn apply(&self, backend: &dyn StorageBackend) -> Result<TransactionStats> {
        let mut applied: Vec<Applied> = Vec::new();
        let mut stats = TransactionStats::default();

        for (table, journal) in &self.tables {
            let deleted: Vec<Row> = journal.deleted.values().cloned().collect();
            let before: Vec<Row> = journal.updated.values().map(|(b, _)| b.clone()).collect();
            let after: Vec<Row> = journal.updated.values().map(|(_, a)| a.clone()).collect();
            let inserted: Vec<Row> = journal.inserted.values().cloned().collect();

            let steps = [
                (Effect::Delete, deleted, Vec::new()),
                (Effect::Update, after, before),
                (Effect::Insert, inserted, Vec::new()),
            ];
            for (effect, rows, previous) in steps {
                if rows.is_empty() {
                    continue;
                }
                let result = match effect {
                    Effect::Delete => backend.apply_delete(table, &rows),
                    Effect::Update => backend.apply_update(table, &rows),
                    Effect::Insert => backend.apply_insert(table, &rows),
                };
                if let Err(err) = result {
                    revert(backend, &applied)?;
                    return Err(Error::StorageFailure(format!(
                        "{:?} on '{}' failed: {}",
                        effect, table, err
                    )));
                }
                trace!(table = %table, ?effect, rows = rows.len(), "applied");
                match effect {
                    Effect::Delete => stats.deleted += rows.len(),
                    Effect::Update => stats.updated += rows.len(),
                    Effect::Insert => stats.inserted += rows.len(),
                }
                applied.push(Applied {
                    table: table.clone(),
                    effect,
                    rows,
                    previous,
                });
            }
        }
        Ok(stats)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Delete,
    Update,
    Insert,
}

#[derive(Debug)]
struct Applied {
    table: String,
    effect: Effect,
    rows: Vec<Row>,
    /// Pre-images for updates
    previous: Vec<Row>,
}

fn revert(backend: &dyn StorageBackend, applied: &[Applied]) -> Result<()> {
    for step in applied.iter().rev() {
        let result = match step.effect {
            Effect::Insert => backend.apply_delete(&step.table, &step.rows),
            Effect::Update => backend.apply_update(&step.table, &step.previous),
            Effect::Delete => backend.apply_insert(&step.table, &step.rows),
        };
        if let Err(err) = result {
            error!(table = %step.table, effect = ?step.effect, error = %err, "failed to revert partial commit");
            return Err(Error::Internal(format!(
                "partial commit on '{}' could not be reverted: {}",
                step.table, err
            )));
        }
    }
    Ok(())
}
