use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Pool, Sqlite,
};
use std::path::{Path, PathBuf};
use tokio::time::Duration;
use tracing::{info, instrument};

use crate::error::PipelineError;
use crate::TARGET_DB;

/// Local record of every entry already published.
///
/// The whole store lives in a single SQLite file so it can be shipped to and
/// from remote storage between runs. Journal mode is `DELETE` rather than WAL:
/// once [`StateStore::close`] returns, the file on disk is complete on its own.
pub struct StateStore {
    pool: Pool<Sqlite>,
    path: PathBuf,
}

impl StateStore {
    /// Get access to the database pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[instrument(target = "db_query", level = "info")]
    pub async fn open(path: &Path) -> Result<Self, PipelineError> {
        info!(target: TARGET_DB, "Opening state store at {}", path.display());

        let connect_options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete)
            .busy_timeout(Duration::from_secs(5))
            .synchronous(SqliteSynchronous::Full);

        // One writer, one connection: the run is strictly sequential.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await?;

        let store = StateStore {
            pool,
            path: path.to_path_buf(),
        };
        store.initialize_schema().await?;

        Ok(store)
    }

    /// Flushes and releases the file handle. Consumes the store so nothing can
    /// write to it after the file has been handed to the persistence backend.
    #[instrument(target = "db_query", level = "info", skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
        info!(target: TARGET_DB, "Closed state store at {}", self.path.display());
    }
}
