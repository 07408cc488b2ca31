//! Issue and transaction-trail storage operations.
//!
//! Issues never change without a matching audit row: both writes go through
//! one SQLite transaction per event.

use issuetrack_core::{CommitTime, IssueStatus};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{commit_time_from_db, IssueRecord, Storage, TransactionRecord};
use crate::error::{IndexerError, Result};

impl Storage {
    /// Create a batch of issues in `Reported` state, each with its initial
    /// audit row, as one atomic unit.
    ///
    /// A duplicate issue id or a missing project fails the whole batch with
    /// `ConstraintViolation`; nothing is committed.
    pub async fn create_issues(
        &self,
        project_id: &str,
        issue_ids: &[String],
        timestamp: CommitTime,
    ) -> Result<u64> {
        let status = IssueStatus::Reported;
        let mut tx = self.pool.begin().await?;

        for issue_id in issue_ids {
            sqlx::query(
                r#"
                INSERT INTO issues (id, project_id, status, timestamp)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(issue_id)
            .bind(project_id)
            .bind(status.as_str())
            .bind(timestamp.timestamp())
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexerError::from_write("issue", e))?;
        }

        for issue_id in issue_ids {
            Self::append_transaction(&mut tx, issue_id, status, timestamp).await?;
        }

        tx.commit().await?;

        Ok(issue_ids.len() as u64)
    }

    /// Whether any issue has been mirrored yet.
    pub async fn has_issues(&self) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM issues LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Move every listed issue to `status` and append one audit row per issue,
    /// as one atomic unit.
    ///
    /// Returns the number of issue rows updated. Ids with no issue row fail the
    /// batch (the audit row would reference nothing).
    pub async fn update_issue_status(
        &self,
        issue_ids: &[String],
        status: IssueStatus,
        timestamp: CommitTime,
    ) -> Result<u64> {
        if issue_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        let mut update: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE issues SET status = ");
        update.push_bind(status.as_str());
        update.push(", timestamp = ");
        update.push_bind(timestamp.timestamp());
        update.push(" WHERE id IN (");
        let mut ids = update.separated(", ");
        for issue_id in issue_ids {
            ids.push_bind(issue_id);
        }
        ids.push_unseparated(")");

        let updated = update
            .build()
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexerError::from_write("issue", e))?
            .rows_affected();

        for issue_id in issue_ids {
            Self::append_transaction(&mut tx, issue_id, status, timestamp).await?;
        }

        tx.commit().await?;

        Ok(updated)
    }

    async fn append_transaction(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        issue_id: &str,
        status: IssueStatus,
        timestamp: CommitTime,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (issue_id, status, timestamp)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(issue_id)
        .bind(status.as_str())
        .bind(timestamp.timestamp())
        .execute(&mut **tx)
        .await
        .map_err(|e| IndexerError::from_write("transaction", e))?;

        Ok(())
    }

    /// Get an issue by id.
    pub async fn get_issue(&self, id: &str) -> Result<Option<IssueRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id, status, timestamp
            FROM issues
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_issue).transpose()
    }

    /// List all issues ordered by id.
    pub async fn list_issues(&self) -> Result<Vec<IssueRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, status, timestamp
            FROM issues
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_issue).collect()
    }

    /// List the audit trail of one issue in the order it was written.
    pub async fn list_transactions_for(&self, issue_id: &str) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, issue_id, status, timestamp
            FROM transactions
            WHERE issue_id = ?
            ORDER BY timestamp, id
            "#,
        )
        .bind(issue_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transaction).collect()
    }

    /// List every audit row ordered by row id.
    pub async fn list_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, issue_id, status, timestamp
            FROM transactions
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transaction).collect()
    }

    fn row_to_issue(row: sqlx::sqlite::SqliteRow) -> Result<IssueRecord> {
        let status: String = row.try_get("status")?;

        Ok(IssueRecord {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            status: status.parse()?,
            timestamp: commit_time_from_db(row.try_get("timestamp")?)?,
        })
    }

    fn row_to_transaction(row: sqlx::sqlite::SqliteRow) -> Result<TransactionRecord> {
        let status: String = row.try_get("status")?;

        Ok(TransactionRecord {
            id: row.try_get("id")?,
            issue_id: row.try_get("issue_id")?,
            status: status.parse()?,
            timestamp: commit_time_from_db(row.try_get("timestamp")?)?,
        })
    }
}
