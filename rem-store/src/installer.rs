//! Schema installer
//!
//! Four ordered idempotent scripts: entity tables & registry, indices +
//! triggers + REM functions, queue management, billing. Each script runs in
//! one transaction; the whole installer is rerunnable.

use crate::Db;
use rem_core::StoreError;

const SCRIPTS: [(&str, &str); 4] = [
    ("01_entities", include_str!("../sql/01_entities.sql")),
    ("02_indices", include_str!("../sql/02_indices.sql")),
    ("03_queue", include_str!("../sql/03_queue.sql")),
    ("04_billing", include_str!("../sql/04_billing.sql")),
];

/// Run all installer scripts in order.
pub async fn install(db: &Db) -> Result<(), StoreError> {
    for (name, sql) in SCRIPTS {
        run_script(db, name, sql).await?;
    }
    tracing::info!("schema install complete");
    Ok(())
}

async fn run_script(db: &Db, name: &str, sql: &str) -> Result<(), StoreError> {
    let mut conn = db.conn().await?;
    let tx = conn
        .transaction()
        .await
        .map_err(crate::db_error)?;
    tx.batch_execute(sql).await.map_err(|e| {
        StoreError::Database(format!("installer script {name} failed: {e}"))
    })?;
    tx.commit().await.map_err(crate::db_error)?;
    tracing::info!(script = name, "installer script applied");
    Ok(())
}
