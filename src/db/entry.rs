use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;
use tracing::{debug, error, instrument};

use super::core::StateStore;
use crate::error::PipelineError;
use crate::TARGET_DB;

// SQLite caps bound parameters per statement; stay well below it.
const MAX_GUIDS_PER_QUERY: usize = 500;

impl StateStore {
    pub async fn contains(&self, guid: &str) -> Result<bool, PipelineError> {
        let found = sqlx::query("SELECT 1 FROM entries WHERE guid = ?1")
            .bind(guid)
            .fetch_optional(self.pool())
            .await?
            .is_some();
        Ok(found)
    }

    /// Returns the subset of `guids` that are already recorded.
    #[instrument(target = "db_query", level = "debug", skip_all, fields(candidates = guids.len()))]
    pub async fn contains_any(&self, guids: &[&str]) -> Result<HashSet<String>, PipelineError> {
        let mut existing = HashSet::new();

        for chunk in guids.chunks(MAX_GUIDS_PER_QUERY) {
            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT guid FROM entries WHERE guid IN (");
            let mut separated = query.separated(", ");
            for guid in chunk {
                separated.push_bind(*guid);
            }
            separated.push_unseparated(")");

            let found: Vec<String> = query
                .build_query_scalar::<String>()
                .fetch_all(self.pool())
                .await?;
            existing.extend(found);
        }

        debug!(target: TARGET_DB, "{} of {} guids already recorded", existing.len(), guids.len());
        Ok(existing)
    }

    /// Records `guid` as published. A guid that is already present is an
    /// integrity failure, never silently ignored.
    #[instrument(target = "db_query", level = "info", skip(self))]
    pub async fn record(&self, guid: &str) -> Result<(), PipelineError> {
        match sqlx::query("INSERT INTO entries (guid) VALUES (?1)")
            .bind(guid)
            .execute(self.pool())
            .await
        {
            Ok(_) => {
                debug!(target: TARGET_DB, "Recorded entry {}", guid);
                Ok(())
            }
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                error!(target: TARGET_DB, "Entry {} was already recorded", guid);
                Err(PipelineError::Integrity {
                    guid: guid.to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn count(&self) -> Result<i64, PipelineError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }
}
