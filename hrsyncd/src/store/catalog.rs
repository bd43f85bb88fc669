use sqlx::{Row, sqlite::SqliteRow};

use super::{ProjectInput, ProjectRecord, Store, StoreError, TeamRecord, Upserted, UserRecord};

fn project_from_row(row: &SqliteRow) -> Result<ProjectRecord, StoreError> {
    Ok(ProjectRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        state: row.try_get("state")?,
        last_update_time: row.try_get("last_update_time")?,
        is_active: row.try_get("is_active")?,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<UserRecord, StoreError> {
    Ok(UserRecord {
        descriptor: row.try_get("descriptor")?,
        display_name: row.try_get("display_name")?,
        mail_address: row.try_get("mail_address")?,
        principal_name: row.try_get("principal_name")?,
        origin: row.try_get("origin")?,
        origin_id: row.try_get("origin_id")?,
        subject_kind: row.try_get("subject_kind")?,
        is_active: row.try_get("is_active")?,
    })
}

fn team_from_row(row: &SqliteRow) -> Result<TeamRecord, StoreError> {
    Ok(TeamRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        project_id: row.try_get("project_id")?,
    })
}

impl Store {
    /// Source fields are overwritten; the local `is_active` flag is left alone.
    pub async fn upsert_project(&self, project: &ProjectInput) -> Result<Upserted, StoreError> {
        let existed = sqlx::query("SELECT 1 FROM projects WHERE id = ?1")
            .bind(&project.id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        sqlx::query(
            "INSERT INTO projects (id, name, description, state, last_update_time)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                state = excluded.state,
                last_update_time = excluded.last_update_time",
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(&project.state)
        .bind(&project.last_update_time)
        .execute(&self.pool)
        .await?;
        Ok(Upserted::from_existing(existed))
    }

    pub async fn get_project(&self, id: &str) -> Result<Option<ProjectRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, description, state, last_update_time, is_active FROM projects WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, description, state, last_update_time, is_active FROM projects ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(project_from_row).collect()
    }

    /// Projects that are locally active, whatever their source state.
    pub async fn list_active_projects(&self) -> Result<Vec<ProjectRecord>, StoreError> {
        Ok(self
            .list_projects()
            .await?
            .into_iter()
            .filter(|project| project.is_active)
            .collect())
    }

    pub async fn set_project_active(&self, id: &str, active: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE projects SET is_active = ?2 WHERE id = ?1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_user(&self, user: &UserRecord) -> Result<Upserted, StoreError> {
        let existed = self.user_exists(&user.descriptor).await?;
        sqlx::query(
            "INSERT INTO users (
                descriptor, display_name, mail_address, principal_name,
                origin, origin_id, subject_kind, is_active
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(descriptor) DO UPDATE SET
                display_name = excluded.display_name,
                mail_address = excluded.mail_address,
                principal_name = excluded.principal_name,
                origin = excluded.origin,
                origin_id = excluded.origin_id,
                subject_kind = excluded.subject_kind,
                is_active = excluded.is_active",
        )
        .bind(&user.descriptor)
        .bind(&user.display_name)
        .bind(&user.mail_address)
        .bind(&user.principal_name)
        .bind(&user.origin)
        .bind(&user.origin_id)
        .bind(&user.subject_kind)
        .bind(user.is_active)
        .execute(&self.pool)
        .await?;
        Ok(Upserted::from_existing(existed))
    }

    pub async fn user_exists(&self, descriptor: &str) -> Result<bool, StoreError> {
        Ok(sqlx::query("SELECT 1 FROM users WHERE descriptor = ?1")
            .bind(descriptor)
            .fetch_optional(&self.pool)
            .await?
            .is_some())
    }

    pub async fn get_user(&self, descriptor: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT descriptor, display_name, mail_address, principal_name, origin, origin_id, subject_kind, is_active
             FROM users WHERE descriptor = ?1",
        )
        .bind(descriptor)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT descriptor, display_name, mail_address, principal_name, origin, origin_id, subject_kind, is_active
             FROM users ORDER BY descriptor ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    pub async fn upsert_team(&self, team: &TeamRecord) -> Result<Upserted, StoreError> {
        let existed = sqlx::query("SELECT 1 FROM teams WHERE id = ?1")
            .bind(&team.id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        sqlx::query(
            "INSERT INTO teams (id, name, description, project_id)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                project_id = excluded.project_id",
        )
        .bind(&team.id)
        .bind(&team.name)
        .bind(&team.description)
        .bind(&team.project_id)
        .execute(&self.pool)
        .await?;
        Ok(Upserted::from_existing(existed))
    }

    pub async fn get_team(&self, id: &str) -> Result<Option<TeamRecord>, StoreError> {
        let row = sqlx::query("SELECT id, name, description, project_id FROM teams WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(team_from_row).transpose()
    }

    pub async fn list_teams_for_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<TeamRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, description, project_id FROM teams WHERE project_id = ?1 ORDER BY name ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(team_from_row).collect()
    }

    pub async fn count_teams(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM teams")
            .fetch_one(&self.pool)
            .await?)
    }
}
