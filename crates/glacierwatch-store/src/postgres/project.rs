//! ProjectStore implementation for PostgreSQL.

use async_trait::async_trait;
use glacierwatch_core::error::{GlacierError, Result};
use glacierwatch_core::models::{Glacier, Project};
use sqlx::Row;

use super::PostgresStore;
use crate::ports::ProjectStore;

#[async_trait]
impl ProjectStore for PostgresStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT project_id, name, description, area_of_interest, created_at \
             FROM projects WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| GlacierError::Database(format!("Failed to fetch project: {e}")))?;

        row.map(|row| {
            Ok(Project {
                project_id: get(&row, "project_id")?,
                name: get(&row, "name")?,
                description: get(&row, "description")?,
                area_of_interest: get(&row, "area_of_interest")?,
                created_at: get(&row, "created_at")?,
            })
        })
        .transpose()
    }

    async fn glaciers_in_project(&self, project_id: &str) -> Result<Vec<Glacier>> {
        let rows = sqlx::query(
            "SELECT glacier_id, name, geometry, area_m2 FROM glaciers WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| GlacierError::Database(format!("Failed to fetch glaciers: {e}")))?;

        rows.into_iter()
            .map(|row| {
                Ok(Glacier {
                    glacier_id: get(&row, "glacier_id")?,
                    name: get(&row, "name")?,
                    geometry: get(&row, "geometry")?,
                    area_m2: get(&row, "area_m2")?,
                })
            })
            .collect()
    }
}

fn get<'r, T>(row: &'r sqlx::postgres::PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| GlacierError::Database(e.to_string()))
}
