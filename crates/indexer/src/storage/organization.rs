//! Organization and project storage operations.

use sqlx::Row;

use super::{
    commit_time_from_db, is_foreign_key_violation, OrganizationRecord, ProjectRecord, Storage,
};
use crate::error::{IndexerError, Result};

impl Storage {
    /// Insert an organization keyed by its chain id.
    ///
    /// Returns `true` if a row was created, `false` if the id already existed
    /// (replays are no-ops).
    pub async fn create_organization(&self, org: &OrganizationRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO organizations (id, name, description, contact, timestamp)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&org.id)
        .bind(&org.name)
        .bind(&org.description)
        .bind(&org.contact)
        .bind(org.timestamp.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::from_write("organization", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Check whether an organization exists.
    pub async fn organization_exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM organizations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(found.is_some())
    }

    /// Get an organization by id.
    pub async fn get_organization(&self, id: &str) -> Result<Option<OrganizationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, contact, timestamp
            FROM organizations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_organization).transpose()
    }

    /// List all organizations ordered by id.
    pub async fn list_organizations(&self) -> Result<Vec<OrganizationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, contact, timestamp
            FROM organizations
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_organization).collect()
    }

    /// Insert a project keyed by its chain id.
    ///
    /// Returns `true` if a row was created, `false` if the id already existed,
    /// and `DependencyNotFound` if the owning organization is missing.
    pub async fn create_project(&self, project: &ProjectRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO projects (id, organization_id, name, timestamp)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&project.id)
        .bind(&project.organization_id)
        .bind(&project.name)
        .bind(project.timestamp.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                IndexerError::DependencyNotFound {
                    entity: "organization",
                    id: project.organization_id.clone(),
                }
            } else {
                IndexerError::from_write("project", e)
            }
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Check whether a project exists.
    pub async fn project_exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(found.is_some())
    }

    /// Get a project by id.
    pub async fn get_project(&self, id: &str) -> Result<Option<ProjectRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, name, timestamp
            FROM projects
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_project).transpose()
    }

    /// List all projects ordered by id.
    pub async fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, name, timestamp
            FROM projects
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_project).collect()
    }

    fn row_to_organization(row: sqlx::sqlite::SqliteRow) -> Result<OrganizationRecord> {
        Ok(OrganizationRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            contact: row.try_get("contact")?,
            timestamp: commit_time_from_db(row.try_get("timestamp")?)?,
        })
    }

    fn row_to_project(row: sqlx::sqlite::SqliteRow) -> Result<ProjectRecord> {
        Ok(ProjectRecord {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            name: row.try_get("name")?,
            timestamp: commit_time_from_db(row.try_get("timestamp")?)?,
        })
    }
}
