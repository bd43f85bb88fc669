use sqlx::{Row, sqlite::SqliteRow};

use super::{Store, StoreError, Upserted, WorkItemRecord};

fn work_item_from_row(row: &SqliteRow) -> Result<WorkItemRecord, StoreError> {
    Ok(WorkItemRecord {
        id: row.try_get("id")?,
        rev: row.try_get("rev")?,
        work_item_type: row.try_get("work_item_type")?,
        title: row.try_get("title")?,
        state: row.try_get("state")?,
        reason: row.try_get("reason")?,
        story_points: row.try_get("story_points")?,
        effort: row.try_get("effort")?,
        remaining_work: row.try_get("remaining_work")?,
        completed_work: row.try_get("completed_work")?,
        original_estimate: row.try_get("original_estimate")?,
        assigned_to: row.try_get("assigned_to")?,
        changed_by: row.try_get("changed_by")?,
        created_by: row.try_get("created_by")?,
        iteration_path: row.try_get("iteration_path")?,
        iteration_id: row.try_get("iteration_id")?,
        team_iteration_id: row.try_get("team_iteration_id")?,
        area_path: row.try_get("area_path")?,
        tags: row.try_get("tags")?,
        custom_fields: row.try_get("custom_fields")?,
        created_date: row.try_get("created_date")?,
        changed_date: row.try_get("changed_date")?,
        parent_id: row.try_get("parent_id")?,
        project_id: row.try_get("project_id")?,
    })
}

impl Store {
    pub async fn upsert_work_item(&self, item: &WorkItemRecord) -> Result<Upserted, StoreError> {
        let existed = sqlx::query("SELECT 1 FROM work_items WHERE id = ?1")
            .bind(item.id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        sqlx::query(
            "INSERT INTO work_items (
                id, rev, work_item_type, title, state, reason,
                story_points, effort, remaining_work, completed_work, original_estimate,
                assigned_to, changed_by, created_by,
                iteration_path, iteration_id, team_iteration_id, area_path, tags,
                custom_fields, created_date, changed_date, parent_id, project_id
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)
             ON CONFLICT(id) DO UPDATE SET
                rev = excluded.rev,
                work_item_type = excluded.work_item_type,
                title = excluded.title,
                state = excluded.state,
                reason = excluded.reason,
                story_points = excluded.story_points,
                effort = excluded.effort,
                remaining_work = excluded.remaining_work,
                completed_work = excluded.completed_work,
                original_estimate = excluded.original_estimate,
                assigned_to = excluded.assigned_to,
                changed_by = excluded.changed_by,
                created_by = excluded.created_by,
                iteration_path = excluded.iteration_path,
                iteration_id = excluded.iteration_id,
                team_iteration_id = excluded.team_iteration_id,
                area_path = excluded.area_path,
                tags = excluded.tags,
                custom_fields = excluded.custom_fields,
                created_date = excluded.created_date,
                changed_date = excluded.changed_date,
                parent_id = excluded.parent_id,
                project_id = excluded.project_id",
        )
        .bind(item.id)
        .bind(item.rev)
        .bind(&item.work_item_type)
        .bind(&item.title)
        .bind(&item.state)
        .bind(&item.reason)
        .bind(item.story_points)
        .bind(item.effort)
        .bind(item.remaining_work)
        .bind(item.completed_work)
        .bind(item.original_estimate)
        .bind(&item.assigned_to)
        .bind(&item.changed_by)
        .bind(&item.created_by)
        .bind(&item.iteration_path)
        .bind(&item.iteration_id)
        .bind(&item.team_iteration_id)
        .bind(&item.area_path)
        .bind(&item.tags)
        .bind(&item.custom_fields)
        .bind(item.created_date)
        .bind(item.changed_date)
        .bind(item.parent_id)
        .bind(&item.project_id)
        .execute(&self.pool)
        .await?;
        Ok(Upserted::from_existing(existed))
    }

    pub async fn get_work_item(&self, id: i64) -> Result<Option<WorkItemRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM work_items WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(work_item_from_row).transpose()
    }

    pub async fn list_work_items(&self, project_id: &str) -> Result<Vec<WorkItemRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM work_items WHERE project_id = ?1 ORDER BY id ASC")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(work_item_from_row).collect()
    }

    pub async fn count_work_items(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM work_items")
            .fetch_one(&self.pool)
            .await?)
    }
}
