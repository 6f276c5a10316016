use std::sync::Arc;

use logdb::Database;

/// Runs a closure against the database on the blocking pool, keeping the I/O
/// threads free of disk waits.
pub async fn with_db_blocking<R, F>(db: Arc<dyn Database>, f: F) -> Result<R, tokio::task::JoinError>
where
    R: Send + 'static,
    F: FnOnce(&dyn Database) -> R + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(db.as_ref())).await
}
