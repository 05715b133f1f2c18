use tracing::debug;

use super::core::StateStore;
use crate::TARGET_DB;

impl StateStore {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                guid VARCHAR(255) NOT NULL PRIMARY KEY
            );
            "#,
        )
        .execute(&mut *conn)
        .await?;

        debug!(target: TARGET_DB, "Schema initialized");
        Ok(())
    }
}
