use sqlx::{Row, sqlite::SqliteRow};

use super::{
    BambooEmployeeRecord, InatechEmployee, MappingRecord, NewMapping, Store, StoreError,
    TimeOffRecord, Upserted, now_unix,
};

fn bamboo_from_row(row: &SqliteRow) -> Result<BambooEmployeeRecord, StoreError> {
    Ok(BambooEmployeeRecord {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        work_email: row.try_get("work_email")?,
        job_title: row.try_get("job_title")?,
        department: row.try_get("department")?,
        location: row.try_get("location")?,
        status: row.try_get("status")?,
    })
}

fn inatech_from_row(row: &SqliteRow) -> Result<InatechEmployee, StoreError> {
    Ok(InatechEmployee {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        is_active: row.try_get("is_active")?,
    })
}

fn mapping_from_row(row: &SqliteRow) -> Result<MappingRecord, StoreError> {
    Ok(MappingRecord {
        id: row.try_get("id")?,
        inatech_employee_id: row.try_get("inatech_employee_id")?,
        bamboo_employee_id: row.try_get("bamboo_employee_id")?,
        devops_descriptor: row.try_get("devops_descriptor")?,
        created_at: row.try_get("created_at")?,
    })
}

const MAPPING_COLUMNS: &str =
    "id, inatech_employee_id, bamboo_employee_id, devops_descriptor, created_at";

impl Store {
    pub async fn upsert_bamboo_employee(
        &self,
        employee: &BambooEmployeeRecord,
    ) -> Result<Upserted, StoreError> {
        let existed = self.bamboo_employee_exists(employee.id).await?;
        sqlx::query(
            "INSERT INTO bamboo_employees (
                id, display_name, first_name, last_name, work_email,
                job_title, department, location, status
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                work_email = excluded.work_email,
                job_title = excluded.job_title,
                department = excluded.department,
                location = excluded.location,
                status = excluded.status",
        )
        .bind(employee.id)
        .bind(&employee.display_name)
        .bind(&employee.first_name)
        .bind(&employee.last_name)
        .bind(&employee.work_email)
        .bind(&employee.job_title)
        .bind(&employee.department)
        .bind(&employee.location)
        .bind(&employee.status)
        .execute(&self.pool)
        .await?;
        Ok(Upserted::from_existing(existed))
    }

    pub async fn bamboo_employee_exists(&self, id: i64) -> Result<bool, StoreError> {
        Ok(sqlx::query("SELECT 1 FROM bamboo_employees WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .is_some())
    }

    pub async fn list_bamboo_employees(&self) -> Result<Vec<BambooEmployeeRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM bamboo_employees ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(bamboo_from_row).collect()
    }

    pub async fn upsert_time_off(&self, request: &TimeOffRecord) -> Result<Upserted, StoreError> {
        let existed = sqlx::query("SELECT 1 FROM time_off_requests WHERE id = ?1")
            .bind(request.id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        sqlx::query(
            "INSERT INTO time_off_requests (
                id, employee_id, type_name, status, start_date, end_date, amount, unit
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                employee_id = excluded.employee_id,
                type_name = excluded.type_name,
                status = excluded.status,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                amount = excluded.amount,
                unit = excluded.unit",
        )
        .bind(request.id)
        .bind(request.employee_id)
        .bind(&request.type_name)
        .bind(&request.status)
        .bind(&request.start_date)
        .bind(&request.end_date)
        .bind(request.amount)
        .bind(&request.unit)
        .execute(&self.pool)
        .await?;
        Ok(Upserted::from_existing(existed))
    }

    pub async fn get_time_off(&self, id: i64) -> Result<Option<TimeOffRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM time_off_requests WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(TimeOffRecord {
            id: row.try_get("id")?,
            employee_id: row.try_get("employee_id")?,
            type_name: row.try_get("type_name")?,
            status: row.try_get("status")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            amount: row.try_get("amount")?,
            unit: row.try_get("unit")?,
        }))
    }

    /// Roster rows are loaded by the upload pipeline; this is its write path.
    pub async fn upsert_inatech_employee(&self, employee: &InatechEmployee) -> Result<Upserted, StoreError> {
        let existed = self.get_inatech_employee(employee.id).await?.is_some();
        sqlx::query(
            "INSERT INTO inatech_employees (id, name, email, is_active)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                is_active = excluded.is_active",
        )
        .bind(employee.id)
        .bind(&employee.name)
        .bind(&employee.email)
        .bind(employee.is_active)
        .execute(&self.pool)
        .await?;
        Ok(Upserted::from_existing(existed))
    }

    pub async fn get_inatech_employee(&self, id: i64) -> Result<Option<InatechEmployee>, StoreError> {
        let row = sqlx::query("SELECT id, name, email, is_active FROM inatech_employees WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(inatech_from_row).transpose()
    }

    /// Creates the employee's mapping row, or fills its empty columns when one
    /// exists. Columns already set are never overwritten; a target linked to
    /// another employee violates the unique constraint.
    pub async fn link_mapping(&self, mapping: &NewMapping) -> Result<MappingRecord, StoreError> {
        sqlx::query(
            "INSERT INTO employee_mappings (
                inatech_employee_id, bamboo_employee_id, devops_descriptor, created_at
             )
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(inatech_employee_id) DO UPDATE SET
                bamboo_employee_id = COALESCE(
                    employee_mappings.bamboo_employee_id, excluded.bamboo_employee_id
                ),
                devops_descriptor = COALESCE(
                    employee_mappings.devops_descriptor, excluded.devops_descriptor
                )",
        )
        .bind(mapping.inatech_employee_id)
        .bind(mapping.bamboo_employee_id)
        .bind(&mapping.devops_descriptor)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;
        let row = sqlx::query(&format!(
            "SELECT {MAPPING_COLUMNS} FROM employee_mappings WHERE inatech_employee_id = ?1"
        ))
        .bind(mapping.inatech_employee_id)
        .fetch_one(&self.pool)
        .await?;
        mapping_from_row(&row)
    }

    pub async fn mapping_for_inatech(&self, inatech_id: i64) -> Result<Option<MappingRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {MAPPING_COLUMNS} FROM employee_mappings WHERE inatech_employee_id = ?1"
        ))
        .bind(inatech_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(mapping_from_row).transpose()
    }

    pub async fn mapping_for_bamboo(&self, bamboo_id: i64) -> Result<Option<MappingRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {MAPPING_COLUMNS} FROM employee_mappings WHERE bamboo_employee_id = ?1"
        ))
        .bind(bamboo_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(mapping_from_row).transpose()
    }

    pub async fn mapping_for_descriptor(&self, descriptor: &str) -> Result<Option<MappingRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {MAPPING_COLUMNS} FROM employee_mappings WHERE devops_descriptor = ?1"
        ))
        .bind(descriptor)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(mapping_from_row).transpose()
    }

    pub async fn list_mappings(&self) -> Result<Vec<MappingRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MAPPING_COLUMNS} FROM employee_mappings ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(mapping_from_row).collect()
    }
}
