use std::collections::BTreeSet;

use sqlx::{Row, sqlite::SqliteRow};

use super::{
    IterationInput, IterationRecord, Store, StoreError, TeamIterationInput, TeamIterationRecord,
    Upserted,
};

const ITERATION_COLUMNS: &str = "identifier, node_id, name, path, start_date, finish_date, time_frame, attributes, project_id, is_active";
const TEAM_ITERATION_COLUMNS: &str = "ti.id, ti.team_id, ti.iteration_id, ti.name, ti.path, ti.start_date, ti.finish_date, ti.time_frame, ti.assigned, ti.is_active";

fn iteration_from_row(row: &SqliteRow) -> Result<IterationRecord, StoreError> {
    Ok(IterationRecord {
        identifier: row.try_get("identifier")?,
        node_id: row.try_get("node_id")?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        start_date: row.try_get("start_date")?,
        finish_date: row.try_get("finish_date")?,
        time_frame: row.try_get("time_frame")?,
        attributes: row.try_get("attributes")?,
        project_id: row.try_get("project_id")?,
        is_active: row.try_get("is_active")?,
    })
}

fn team_iteration_from_row(row: &SqliteRow) -> Result<TeamIterationRecord, StoreError> {
    Ok(TeamIterationRecord {
        id: row.try_get("id")?,
        team_id: row.try_get("team_id")?,
        iteration_id: row.try_get("iteration_id")?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        start_date: row.try_get("start_date")?,
        finish_date: row.try_get("finish_date")?,
        time_frame: row.try_get("time_frame")?,
        assigned: row.try_get("assigned")?,
        is_active: row.try_get("is_active")?,
    })
}

impl Store {
    pub async fn upsert_iteration(&self, iteration: &IterationInput) -> Result<Upserted, StoreError> {
        let existed = self.iteration_exists(&iteration.identifier).await?;
        sqlx::query(
            "INSERT INTO iterations (
                identifier, node_id, name, path, start_date, finish_date,
                time_frame, attributes, project_id
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(identifier) DO UPDATE SET
                node_id = excluded.node_id,
                name = excluded.name,
                path = excluded.path,
                start_date = excluded.start_date,
                finish_date = excluded.finish_date,
                time_frame = excluded.time_frame,
                attributes = excluded.attributes,
                project_id = excluded.project_id",
        )
        .bind(&iteration.identifier)
        .bind(iteration.node_id)
        .bind(&iteration.name)
        .bind(&iteration.path)
        .bind(iteration.start_date)
        .bind(iteration.finish_date)
        .bind(&iteration.time_frame)
        .bind(&iteration.attributes)
        .bind(&iteration.project_id)
        .execute(&self.pool)
        .await?;
        Ok(Upserted::from_existing(existed))
    }

    pub async fn iteration_exists(&self, identifier: &str) -> Result<bool, StoreError> {
        Ok(sqlx::query("SELECT 1 FROM iterations WHERE identifier = ?1")
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?
            .is_some())
    }

    pub async fn get_iteration(&self, identifier: &str) -> Result<Option<IterationRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ITERATION_COLUMNS} FROM iterations WHERE identifier = ?1"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(iteration_from_row).transpose()
    }

    pub async fn list_iterations(&self, project_id: &str) -> Result<Vec<IterationRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ITERATION_COLUMNS} FROM iterations WHERE project_id = ?1 ORDER BY path ASC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(iteration_from_row).collect()
    }

    /// Resolves a work item's iteration reference: the numeric node id first,
    /// then the iteration path.
    pub async fn resolve_iteration(
        &self,
        project_id: &str,
        node_id: Option<i64>,
        path: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        if let Some(node_id) = node_id {
            let found: Option<String> = sqlx::query_scalar(
                "SELECT identifier FROM iterations WHERE project_id = ?1 AND node_id = ?2",
            )
            .bind(project_id)
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;
            if found.is_some() {
                return Ok(found);
            }
        }
        let Some(path) = path else {
            return Ok(None);
        };
        Ok(sqlx::query_scalar(
            "SELECT identifier FROM iterations WHERE project_id = ?1 AND path = ?2 ORDER BY identifier LIMIT 1",
        )
        .bind(project_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn set_iteration_active(&self, identifier: &str, active: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE iterations SET is_active = ?2 WHERE identifier = ?1")
            .bind(identifier)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Paths of the project's locally active iterations plus the paths of active
    /// team-iterations belonging to the project's teams.
    pub async fn active_iteration_paths(&self, project_id: &str) -> Result<BTreeSet<String>, StoreError> {
        let iteration_paths: Vec<String> = sqlx::query_scalar(
            "SELECT path FROM iterations WHERE project_id = ?1 AND is_active = 1",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        let team_paths: Vec<String> = sqlx::query_scalar(
            "SELECT ti.path FROM team_iterations ti
             JOIN teams t ON t.id = ti.team_id
             WHERE t.project_id = ?1 AND ti.is_active = 1 AND ti.path IS NOT NULL",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(iteration_paths.into_iter().chain(team_paths).collect())
    }

    /// Source fields and `assigned` are overwritten; `is_active` is left alone.
    pub async fn upsert_team_iteration(
        &self,
        team_iteration: &TeamIterationInput,
    ) -> Result<Upserted, StoreError> {
        let existed = sqlx::query("SELECT 1 FROM team_iterations WHERE id = ?1")
            .bind(&team_iteration.id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        sqlx::query(
            "INSERT INTO team_iterations (
                id, team_id, iteration_id, name, path, start_date, finish_date,
                time_frame, assigned
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                team_id = excluded.team_id,
                iteration_id = excluded.iteration_id,
                name = excluded.name,
                path = excluded.path,
                start_date = excluded.start_date,
                finish_date = excluded.finish_date,
                time_frame = excluded.time_frame,
                assigned = excluded.assigned",
        )
        .bind(&team_iteration.id)
        .bind(&team_iteration.team_id)
        .bind(&team_iteration.iteration_id)
        .bind(&team_iteration.name)
        .bind(&team_iteration.path)
        .bind(team_iteration.start_date)
        .bind(team_iteration.finish_date)
        .bind(&team_iteration.time_frame)
        .bind(team_iteration.assigned)
        .execute(&self.pool)
        .await?;
        Ok(Upserted::from_existing(existed))
    }

    pub async fn get_team_iteration(&self, id: &str) -> Result<Option<TeamIterationRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TEAM_ITERATION_COLUMNS} FROM team_iterations ti WHERE ti.id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(team_iteration_from_row).transpose()
    }

    pub async fn list_team_iterations(&self, team_id: &str) -> Result<Vec<TeamIterationRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TEAM_ITERATION_COLUMNS} FROM team_iterations ti WHERE ti.team_id = ?1 ORDER BY ti.id ASC"
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(team_iteration_from_row).collect()
    }

    /// Clears `assigned` on the team's rows whose key is not in `keep`. Returns
    /// the number of rows changed.
    pub async fn mark_unassigned_except(&self, team_id: &str, keep: &[String]) -> Result<u64, StoreError> {
        let mut changed = 0;
        for record in self.list_team_iterations(team_id).await? {
            if record.assigned && !keep.contains(&record.id) {
                changed += sqlx::query("UPDATE team_iterations SET assigned = 0 WHERE id = ?1")
                    .bind(&record.id)
                    .execute(&self.pool)
                    .await?
                    .rows_affected();
            }
        }
        Ok(changed)
    }

    /// First team-iteration of the project whose path equals `path`.
    pub async fn find_team_iteration_by_path(
        &self,
        project_id: &str,
        path: &str,
    ) -> Result<Option<TeamIterationRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TEAM_ITERATION_COLUMNS} FROM team_iterations ti
             JOIN teams t ON t.id = ti.team_id
             WHERE t.project_id = ?1 AND ti.path = ?2
             ORDER BY ti.is_active DESC, ti.id ASC
             LIMIT 1"
        ))
        .bind(project_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(team_iteration_from_row).transpose()
    }

    pub async fn set_team_iteration_active(&self, id: &str, active: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE team_iterations SET is_active = ?2 WHERE id = ?1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
