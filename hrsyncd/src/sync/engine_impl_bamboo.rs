impl SyncEngine {
    fn bamboo(&self) -> Result<&BambooClient, SyncError> {
        self.bamboo.as_ref().ok_or(SyncError::BambooNotConfigured)
    }

    pub async fn sync_bamboo_employees(&self) -> Result<ResourceTally, SyncError> {
        let bamboo = self.bamboo()?;
        self.checkpointed(BAMBOO_SERVICE, "bamboo_employees", None, SyncType::Full, || {
            self.pull_bamboo_employees(bamboo)
        })
        .await
    }

    /// Time-off requests overlapping `start..=end` (`YYYY-MM-DD`).
    pub async fn sync_time_off(&self, start: &str, end: &str) -> Result<ResourceTally, SyncError> {
        let bamboo = self.bamboo()?;
        self.checkpointed(BAMBOO_SERVICE, "time_off_requests", None, SyncType::Full, || {
            self.pull_time_off(bamboo, start, end)
        })
        .await
    }

    async fn pull_bamboo_employees(&self, bamboo: &BambooClient) -> Result<ResourceTally, SyncError> {
        let employees = bamboo.employee_directory().await?;
        let mut tally = ResourceTally::default();
        for employee in employees {
            let Ok(id) = employee.id.trim().parse::<i64>() else {
                warn!(error = %RecordError::MalformedId(employee.id.clone()), "rejected employee");
                tally.errors += 1;
                continue;
            };
            let record = BambooEmployeeRecord {
                id,
                display_name: employee.display_name,
                first_name: employee.first_name,
                last_name: employee.last_name,
                work_email: employee.work_email,
                job_title: employee.job_title,
                department: employee.department,
                location: employee.location,
                status: employee.status,
            };
            tally.record(self.store.upsert_bamboo_employee(&record).await?);
        }
        Ok(tally)
    }

    async fn pull_time_off(
        &self,
        bamboo: &BambooClient,
        start: &str,
        end: &str,
    ) -> Result<ResourceTally, SyncError> {
        let requests = bamboo.time_off_requests(start, end).await?;
        let mut tally = ResourceTally::default();
        for request in requests {
            let Ok(id) = request.id.trim().parse::<i64>() else {
                warn!(error = %RecordError::MalformedId(request.id.clone()), "rejected time off request");
                tally.errors += 1;
                continue;
            };
            let employee_id = match request
                .employee_id
                .as_deref()
                .and_then(|value| value.trim().parse::<i64>().ok())
            {
                Some(employee_id) if self.store.bamboo_employee_exists(employee_id).await? => {
                    Some(employee_id)
                }
                _ => None,
            };
            let record = TimeOffRecord {
                id,
                employee_id,
                type_name: request.kind.and_then(|kind| kind.name),
                status: request.status.and_then(|status| status.status),
                start_date: request.start,
                end_date: request.end,
                amount: request
                    .amount
                    .as_ref()
                    .and_then(|amount| amount.amount.as_deref())
                    .and_then(|amount| amount.trim().parse().ok()),
                unit: request.amount.and_then(|amount| amount.unit),
            };
            tally.record(self.store.upsert_time_off(&record).await?);
        }
        Ok(tally)
    }
}
