use scopedb::catalog::{DataType, Schema, TableBuilder, TableDef};
use scopedb::predicate::Predicate;
use scopedb::storage::{MemoryStore, Row, StorageBackend, Value};
use scopedb::transaction::{Scope, TableLockState, TransactionState};
use scopedb::{Database, Error, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn hr_schema() -> Schema {
    Schema::builder("hr", 1)
        .table(
            TableBuilder::new("Job")
                .column_not_null("id", DataType::String)
                .column("title", DataType::String)
                .primary_key(&["id"]),
        )
        .and_then(|b| {
            b.table(
                TableBuilder::new("Employee")
                    .column_not_null("id", DataType::Integer)
                    .column("name", DataType::String)
                    .column("jobId", DataType::String)
                    .primary_key(&["id"])
                    .foreign_key("fk_JobId", "jobId", "Job.id")?,
            )
        })
        .and_then(|b| b.build())
        .unwrap()
}

fn employee(id: i64, name: &str) -> Row {
    Row::new(vec![Value::from(id), Value::from(name), Value::Null])
}

fn count_rows(db: &Database, table: &TableDef) -> usize {
    let mut txn = db.begin(Scope::reading([table.name()])).unwrap();
    let rows = txn.query(table, None).unwrap();
    txn.commit().unwrap();
    rows.len()
}

#[test]
fn test_insert_commit_then_query() {
    let db = Database::in_memory(hr_schema()).unwrap();
    let table = db.table("Employee").unwrap();

    let mut txn = db.begin(Scope::writing(["Employee"])).unwrap();
    let rows = vec![employee(1, "Ann"), employee(2, "Bob"), employee(3, "Cy")];
    let ids: HashSet<_> = rows.iter().map(Row::id).collect();
    assert_eq!(txn.insert(&table, rows).unwrap(), 3);
    let stats = txn.commit().unwrap();
    assert_eq!(stats.inserted, 3);

    let mut reader = db.begin(Scope::reading(["Employee"])).unwrap();
    let found = reader.query(&table, None).unwrap();
    reader.commit().unwrap();
    assert_eq!(found.len(), 3);
    assert_eq!(found.iter().map(Row::id).collect::<HashSet<_>>(), ids);
}

#[test]
fn test_rollback_discards_inserts() {
    let db = Database::in_memory(hr_schema()).unwrap();
    let table = db.table("Employee").unwrap();

    let mut txn = db.begin(Scope::writing(["Employee"])).unwrap();
    txn.insert(&table, vec![employee(1, "Ann"), employee(2, "Bob")])
        .unwrap();
    txn.rollback().unwrap();
    assert_eq!(txn.state(), TransactionState::RolledBack);
    txn.rollback().unwrap();

    assert_eq!(count_rows(&db, &table), 0);
}

#[test]
fn test_overlapping_writers_serialize() {
    let db = Database::in_memory(hr_schema()).unwrap();
    let table = db.table("Employee").unwrap();

    let mut first = db.begin(Scope::writing(["Employee"])).unwrap();
    let second = db.request(Scope::writing(["Employee"])).unwrap();
    assert!(second.is_queued());
    assert_eq!(second.state(), TransactionState::AdmissionPending);
    assert_eq!(
        db.lock_manager().table_state("Employee"),
        TableLockState::WriteLocked(first.id())
    );

    first.insert(&table, vec![employee(1, "Ann")]).unwrap();
    first.commit().unwrap();

    let mut second = second.wait().unwrap();
    assert_eq!(second.state(), TransactionState::Active);
    assert_eq!(second.query(&table, None).unwrap().len(), 1);
    second.commit().unwrap();
}

#[test]
fn test_writer_waits_for_readers_in_other_thread() {
    let db = Arc::new(Database::in_memory(hr_schema()).unwrap());
    let table = db.table("Employee").unwrap();

    let mut reader = db.begin(Scope::reading(["Employee"])).unwrap();
    let writer = {
        let db = Arc::clone(&db);
        let table = Arc::clone(&table);
        thread::spawn(move || {
            let mut txn = db.begin(Scope::writing(["Employee"])).unwrap();
            txn.insert(&table, vec![employee(7, "Late")]).unwrap();
            txn.commit().unwrap();
        })
    };

    while !db.lock_manager().is_queued(reader.id() + 1) {
        thread::yield_now();
    }
    // The writer is queued, so the reader still sees the table untouched.
    assert!(reader.query(&table, None).unwrap().is_empty());
    reader.commit().unwrap();

    writer.join().unwrap();
    assert_eq!(count_rows(&db, &table), 1);
}

#[test]
fn test_disjoint_scopes_are_active_together() {
    let db = Database::in_memory(hr_schema()).unwrap();
    let employee_table = db.table("Employee").unwrap();
    let job_table = db.table("Job").unwrap();

    let mut a = db.begin(Scope::writing(["Employee"])).unwrap();
    let mut b = db.begin(Scope::writing(["Job"])).unwrap();
    assert!(db.lock_manager().is_active(a.id()));
    assert!(db.lock_manager().is_active(b.id()));

    b.insert(
        &job_table,
        vec![Row::new(vec![Value::from("dev"), Value::from("Developer")])],
    )
    .unwrap();
    a.insert(&employee_table, vec![employee(1, "Ann")]).unwrap();
    b.commit().unwrap();
    a.commit().unwrap();
}

#[test]
fn test_overlapping_scope_multiple_inserts() {
    const WRITERS: i64 = 8;
    const ROWS_PER_WRITER: i64 = 25;

    let db = Arc::new(Database::in_memory(hr_schema()).unwrap());
    let table = db.table("Employee").unwrap();
    let inside = Arc::new(AtomicBool::new(false));
    let start = Arc::new(Barrier::new(WRITERS as usize));

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let db = Arc::clone(&db);
            let table = Arc::clone(&table);
            let inside = Arc::clone(&inside);
            let start = Arc::clone(&start);
            thread::spawn(move || -> Result<Vec<u64>> {
                start.wait();
                let mut txn = db.begin(Scope::writing(["Employee"]))?;
                assert!(
                    !inside.swap(true, Ordering::SeqCst),
                    "two writers of Employee were active at once"
                );
                let mut ids = Vec::new();
                for n in 0..ROWS_PER_WRITER {
                    let row = employee(writer * 1000 + n, "worker");
                    ids.push(row.id());
                    txn.insert(&table, vec![row])?;
                    thread::yield_now();
                }
                inside.store(false, Ordering::SeqCst);
                txn.commit()?;
                Ok(ids)
            })
        })
        .collect();

    let mut expected = HashSet::new();
    for handle in handles {
        expected.extend(handle.join().unwrap().unwrap());
    }

    let mut reader = db.begin(Scope::reading(["Employee"])).unwrap();
    let rows = reader.query(&table, None).unwrap();
    reader.commit().unwrap();

    assert_eq!(rows.len(), (WRITERS * ROWS_PER_WRITER) as usize);
    let found: HashSet<_> = rows.iter().map(Row::id).collect();
    assert_eq!(found, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_overlapping_writers() {
    let db = Arc::new(Database::in_memory(hr_schema()).unwrap());
    let table = db.table("Employee").unwrap();

    let tasks: Vec<_> = (0..6i64)
        .map(|writer| {
            let db = Arc::clone(&db);
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                let mut txn = db.begin_async(Scope::writing(["Employee"])).await?;
                let rows = (0..5).map(|n| employee(writer * 10 + n, "async")).collect();
                txn.insert(&table, rows)?;
                tokio::task::yield_now().await;
                txn.commit().map(|stats| stats.inserted)
            })
        })
        .collect();

    let mut inserted = 0;
    for task in tasks {
        inserted += task.await.unwrap().unwrap();
    }
    assert_eq!(inserted, 30);

    let mut reader = db.begin_async(Scope::reading(["Employee"])).await.unwrap();
    assert_eq!(reader.query(&table, None).unwrap().len(), 30);
    reader.commit().unwrap();
}

#[test]
fn test_update_and_delete_with_predicates() {
    let db = Database::in_memory(hr_schema()).unwrap();
    let table = db.table("Employee").unwrap();
    let id = table.column("id").unwrap().clone();
    let name = table.column("name").unwrap().clone();

    let mut txn = db.begin(Scope::writing(["Employee"])).unwrap();
    txn.insert(
        &table,
        (1..=5).map(|n| employee(n, "temp")).collect::<Vec<_>>(),
    )
    .unwrap();
    txn.commit().unwrap();

    let mut txn = db.begin(Scope::writing(["Employee"])).unwrap();
    assert_eq!(
        txn.set(&table, &name, Value::from("senior"), Some(&id.gte(4)))
            .unwrap(),
        2
    );
    assert_eq!(txn.delete(&table, Some(&id.lt(2))).unwrap(), 1);
    let stats = txn.commit().unwrap();
    assert_eq!((stats.updated, stats.deleted), (2, 1));

    let mut reader = db.begin(Scope::reading(["Employee"])).unwrap();
    assert_eq!(reader.query(&table, None).unwrap().len(), 4);
    let seniors = reader.query(&table, Some(&name.eq("senior"))).unwrap();
    assert_eq!(seniors.len(), 2);
    assert!(reader
        .query(&table, Some(&name.matches("temp")))
        .unwrap()
        .iter()
        .all(|row| row.get(0).and_then(Value::as_i64).unwrap_or(0) < 4));
    reader.commit().unwrap();
}

#[test]
fn test_scope_violation_is_fatal() {
    let db = Database::in_memory(hr_schema()).unwrap();
    let job = db.table("Job").unwrap();

    let mut txn = db.begin(Scope::writing(["Employee"])).unwrap();
    let err = txn.query(&job, None).unwrap_err();
    assert!(matches!(err, Error::ScopeViolation { ref table, .. } if table == "Job"));
    assert_eq!(txn.state(), TransactionState::RolledBack);
    assert_eq!(db.lock_manager().table_state("Employee"), TableLockState::Idle);
}

#[test]
fn test_predicate_from_other_table_is_rejected() {
    let db = Database::in_memory(hr_schema()).unwrap();
    let employee_table = db.table("Employee").unwrap();
    let job = db.table("Job").unwrap();
    let title: Predicate = job.column("title").unwrap().is_null();

    let mut txn = db.begin(Scope::reading(["Employee", "Job"])).unwrap();
    assert!(matches!(
        txn.query(&employee_table, Some(&title)),
        Err(Error::SchemaViolation(_))
    ));
    assert_eq!(txn.state(), TransactionState::Active);
    assert!(txn.query(&job, Some(&title)).unwrap().is_empty());
    txn.commit().unwrap();
}

/// Delegates to a memory store but rejects inserts into one table
struct FailingStore {
    inner: MemoryStore,
    reject_inserts_into: &'static str,
}

impl StorageBackend for FailingStore {
    fn create_table(&self, table: &TableDef) -> Result<()> {
        self.inner.create_table(table)
    }

    fn apply_insert(&self, table: &str, rows: &[Row]) -> Result<()> {
        if table == self.reject_inserts_into {
            return Err(Error::StorageFailure("disk full".to_string()));
        }
        self.inner.apply_insert(table, rows)
    }

    fn apply_update(&self, table: &str, rows: &[Row]) -> Result<()> {
        self.inner.apply_update(table, rows)
    }

    fn apply_delete(&self, table: &str, rows: &[Row]) -> Result<()> {
        self.inner.apply_delete(table, rows)
    }

    fn query(&self, table: &str, predicate: Option<&Predicate>) -> Result<Vec<Row>> {
        self.inner.query(table, predicate)
    }
}

#[test]
fn test_storage_failure_reverts_partial_commit() {
    let store = Arc::new(FailingStore {
        inner: MemoryStore::new(),
        reject_inserts_into: "Job",
    });
    let db = Database::new(hr_schema(), store.clone()).unwrap();
    let employee_table = db.table("Employee").unwrap();
    let job = db.table("Job").unwrap();

    let mut txn = db.begin(Scope::writing(["Employee", "Job"])).unwrap();
    txn.insert(&employee_table, vec![employee(1, "Ann")]).unwrap();
    txn.insert(
        &job,
        vec![Row::new(vec![Value::from("dev"), Value::from("Developer")])],
    )
    .unwrap();

    let err = txn.commit().unwrap_err();
    assert!(matches!(err, Error::StorageFailure(_)));
    assert_eq!(txn.state(), TransactionState::RolledBack);
    assert_eq!(store.inner.row_count("Employee").unwrap(), 0);
    assert_eq!(db.lock_manager().active_count(), 0);
}

#[test]
fn test_primary_key_values_stay_unique() {
    let db = Database::in_memory(hr_schema()).unwrap();
    let table = db.table("Employee").unwrap();
    let id = table.column("id").unwrap().clone();
    let name = table.column("name").unwrap().clone();

    let mut txn = db.begin(Scope::writing(["Employee"])).unwrap();
    txn.insert(&table, vec![employee(1, "a")]).unwrap();

    // Same key under a fresh row id, on its own and inside one batch.
    let err = txn.insert(&table, vec![employee(1, "b")]).unwrap_err();
    assert!(matches!(err, Error::UniqueViolation { .. }));
    let err = txn
        .insert(&table, vec![employee(2, "b"), employee(2, "c")])
        .unwrap_err();
    assert!(matches!(err, Error::UniqueViolation { .. }));
    assert_eq!(txn.state(), TransactionState::Active);

    txn.insert(&table, vec![employee(2, "b")]).unwrap();
    let err = txn
        .set(&table, &id, Value::from(1), Some(&name.eq("b")))
        .unwrap_err();
    assert!(matches!(err, Error::UniqueViolation { .. }));
    txn.commit().unwrap();

    // Keys already committed collide too, and freeing a key allows reuse.
    let mut txn = db.begin(Scope::writing(["Employee"])).unwrap();
    let err = txn.insert(&table, vec![employee(1, "again")]).unwrap_err();
    assert!(matches!(err, Error::UniqueViolation { .. }));
    let mut moved = txn.query(&table, Some(&id.eq(2))).unwrap().remove(0);
    moved.set(0, Value::from(1));
    assert!(matches!(
        txn.update(&table, vec![moved]),
        Err(Error::UniqueViolation { .. })
    ));
    assert_eq!(txn.delete(&table, Some(&id.eq(1))).unwrap(), 1);
    txn.insert(&table, vec![employee(1, "again")]).unwrap();
    txn.commit().unwrap();

    let mut reader = db.begin(Scope::reading(["Employee"])).unwrap();
    let rows = reader.query(&table, Some(&id.eq(1))).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(1), Some(&Value::from("again")));
    assert_eq!(reader.query(&table, None).unwrap().len(), 2);
    reader.commit().unwrap();
}

#[test]
fn test_reinserting_committed_row_fails_at_insert() {
    let db = Database::in_memory(hr_schema()).unwrap();
    let table = db.table("Employee").unwrap();
    let row = employee(3, "Cy");

    let mut txn = db.begin(Scope::writing(["Employee"])).unwrap();
    txn.insert(&table, vec![row.clone()]).unwrap();
    txn.commit().unwrap();

    let mut txn = db.begin(Scope::writing(["Employee"])).unwrap();
    let err = txn.insert(&table, vec![row.clone()]).unwrap_err();
    assert!(matches!(err, Error::RowAlreadyExists { id, .. } if id == row.id()));
    assert_eq!(txn.state(), TransactionState::Active);

    txn.insert(&table, vec![employee(4, "Di")]).unwrap();
    let stats = txn.commit().unwrap();
    assert_eq!(stats.inserted, 1);
    assert_eq!(count_rows(&db, &table), 2);
}
