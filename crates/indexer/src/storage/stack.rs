//! Stack storage operations.

use sqlx::Row;

use super::{commit_time_from_db, is_foreign_key_violation, NewStack, StackRecord, Storage};
use crate::error::{IndexerError, Result};

impl Storage {
    /// Insert a stack row.
    ///
    /// Returns the new row id, or `DependencyNotFound` if the owning project is
    /// not (yet) visible. The parent check is the foreign key itself, so it is
    /// evaluated under the write lock.
    pub async fn create_stack(&self, stack: &NewStack) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO stacks (project_id, name, version, timestamp)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&stack.project_id)
        .bind(&stack.name)
        .bind(stack.version)
        .bind(stack.timestamp.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                IndexerError::DependencyNotFound {
                    entity: "project",
                    id: stack.project_id.clone(),
                }
            } else {
                IndexerError::from_write("stack", e)
            }
        })?;

        Ok(result.last_insert_rowid())
    }

    /// List the stacks of one project ordered by row id.
    pub async fn list_stacks_for(&self, project_id: &str) -> Result<Vec<StackRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, name, version, timestamp
            FROM stacks
            WHERE project_id = ?
            ORDER BY id
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_stack).collect()
    }

    /// List every stack ordered by row id.
    pub async fn list_stacks(&self) -> Result<Vec<StackRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, name, version, timestamp
            FROM stacks
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_stack).collect()
    }

    fn row_to_stack(row: sqlx::sqlite::SqliteRow) -> Result<StackRecord> {
        Ok(StackRecord {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            name: row.try_get("name")?,
            version: row.try_get("version")?,
            timestamp: commit_time_from_db(row.try_get("timestamp")?)?,
        })
    }
}
