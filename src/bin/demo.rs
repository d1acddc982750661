use std::env;
use std::sync::Arc;

use anyhow::Context;
use scopedb::{Database, DatabaseConfig, MemoryStore, Row, Schema, Scope, Value};
use tracing_subscriber::EnvFilter;

const DEFAULT_SCHEMA: &str = r#"{
    "name": "hr",
    "tables": [
        {
            "name": "Job",
            "columns": [
                { "name": "id", "data_type": "string" },
                { "name": "title", "data_type": "string" }
            ],
            "primary_key": [ { "name": "id" } ]
        },
        {
            "name": "Employee",
            "columns": [
                { "name": "id", "data_type": "integer" },
                { "name": "name", "data_type": "string" },
                { "name": "jobId", "data_type": "string" }
            ],
            "primary_key": [ { "name": "id" } ],
            "foreign_keys": [ { "name": "fk_JobId", "local": "jobId", "ref": "Job.id" } ]
        }
    ]
}"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let mut config = DatabaseConfig::new();

    // Simple argument parsing
    for i in 1..args.len() {
        match args[i].as_str() {
            "--schema" | "-s" => {
                if let Some(path) = args.get(i + 1) {
                    config = config.schema_path(path);
                }
            }
            "--log" => {
                if let Some(filter) = args.get(i + 1) {
                    config = config.log_filter(filter);
                }
            }
            _ => {}
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    let backend = Arc::new(MemoryStore::new());
    let db = match &config.schema_path {
        Some(_) => Database::open(&config, backend).context("failed to open database")?,
        None => Database::new(Schema::from_json_str(DEFAULT_SCHEMA)?, backend)?,
    };
    let db = Arc::new(db);

    let job = db.table("Job")?;
    let mut setup = db.begin_async(Scope::writing(["Job"])).await?;
    setup.insert(
        &job,
        vec![Row::new(vec![Value::from("dev"), Value::from("Developer")])],
    )?;
    setup.commit()?;

    // Writers of Employee queue behind each other; the Job reader runs alongside.
    let mut tasks = Vec::new();
    for worker in 0..4i64 {
        let db = Arc::clone(&db);
        tasks.push(tokio::spawn(async move {
            let employee = db.table("Employee")?;
            let mut txn = db
                .begin_async(Scope::new().write("Employee").read("Job"))
                .await?;
            let rows = (0..3)
                .map(|n| {
                    Row::new(vec![
                        Value::from(worker * 10 + n),
                        Value::from(format!("worker-{}-{}", worker, n)),
                        Value::from("dev"),
                    ])
                })
                .collect();
            txn.insert(&employee, rows)?;
            txn.commit()?;
            Ok::<_, scopedb::Error>(())
        }));
    }
    {
        let db = Arc::clone(&db);
        tasks.push(tokio::spawn(async move {
            let job = db.table("Job")?;
            let mut txn = db.begin_async(Scope::reading(["Job"])).await?;
            let jobs = txn.query(&job, None)?;
            tracing::info!(jobs = jobs.len(), "read jobs");
            txn.commit()?;
            Ok(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    let employee = db.table("Employee")?;
    let mut txn = db.begin_async(Scope::reading(["Employee"])).await?;
    let rows = txn.query(&employee, None)?;
    txn.commit()?;
    println!("{} employees committed", rows.len());
    Ok(())
}
