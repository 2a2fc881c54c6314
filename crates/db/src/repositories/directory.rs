use std::collections::BTreeMap;

use chrono::Utc;
use tokio::sync::RwLock;

use hrflow_core::capabilities::HrDirectory;
use hrflow_core::domain::hr::{
    Candidate, DepartmentPayroll, Employee, EmployeeId, LeaveApplication, LeaveBalance, LeaveId,
    LeaveRecord, LeaveStatus, PayPeriod, PayrollSummary,
};
use hrflow_core::errors::{CapabilityError, DomainError};

use super::RepositoryError;
use crate::fixtures::HrSeedDataset;

/// HR directory held in process memory. Submitted leave requests are kept and
/// show up in later history and pending-approval queries.
pub struct InMemoryHrDirectory {
    employees: Vec<Employee>,
    balances: BTreeMap<EmployeeId, Vec<LeaveBalance>>,
    candidates: Vec<Candidate>,
    leaves: RwLock<Vec<LeaveRecord>>,
}

impl InMemoryHrDirectory {
    pub fn from_dataset(dataset: HrSeedDataset) -> Self {
        Self {
            employees: dataset.employees,
            balances: dataset.balances,
            candidates: dataset.candidates,
            leaves: RwLock::new(dataset.leave_records),
        }
    }

    /// The demo organisation from `config/fixtures/hr_seed.json`.
    pub fn seeded() -> Result<Self, RepositoryError> {
        Ok(Self::from_dataset(HrSeedDataset::load()?))
    }

    fn employee(&self, id: &EmployeeId) -> Option<&Employee> {
        self.employees.iter().find(|employee| employee.id.0.eq_ignore_ascii_case(&id.0))
    }

    fn require_employee(&self, id: &EmployeeId) -> Result<&Employee, CapabilityError> {
        self.employee(id).ok_or_else(|| CapabilityError::NotFound(format!("employee {}", id.0)))
    }

    fn department_of(&self, id: &EmployeeId) -> Option<&str> {
        self.employee(id).map(|employee| employee.department.as_str())
    }
}

#[async_trait::async_trait]
impl HrDirectory for InMemoryHrDirectory {
    async fn find_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, CapabilityError> {
        Ok(self.employee(id).cloned())
    }

    async fn get_leave_balance(
        &self,
        employee: &EmployeeId,
    ) -> Result<Vec<LeaveBalance>, CapabilityError> {
        let employee = self.require_employee(employee)?;
        Ok(self.balances.get(&employee.id).cloned().unwrap_or_default())
    }

    async fn get_leave_history(
        &self,
        employee: &EmployeeId,
        limit: usize,
    ) -> Result<Vec<LeaveRecord>, CapabilityError> {
        let employee = self.require_employee(employee)?;
        let leaves = self.leaves.read().await;
        Ok(leaves
            .iter()
            .filter(|record| record.employee_id == employee.id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_pending_leaves(
        &self,
        department: Option<&str>,
    ) -> Result<Vec<LeaveRecord>, CapabilityError> {
        let leaves = self.leaves.read().await;
        Ok(leaves
            .iter()
            .filter(|record| record.status == LeaveStatus::Pending)
            .filter(|record| match department {
                Some(wanted) => self
                    .department_of(&record.employee_id)
                    .is_some_and(|have| have.eq_ignore_ascii_case(wanted)),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn submit_leave_request(
        &self,
        application: LeaveApplication,
    ) -> Result<LeaveRecord, CapabilityError> {
        let employee_id = self.require_employee(&application.employee_id)?.id.clone();
        if application.end_date < application.start_date {
            let range = DomainError::InvalidLeaveRange {
                start: application.start_date.to_string(),
                end: application.end_date.to_string(),
            };
            return Err(CapabilityError::Rejected(range.to_string()));
        }

        let mut leaves = self.leaves.write().await;
        let record = LeaveRecord {
            id: LeaveId(format!("LV-{}", 1000 + leaves.len())),
            working_days: application.working_days(),
            employee_id,
            leave_type: application.leave_type,
            start_date: application.start_date,
            end_date: application.end_date,
            status: LeaveStatus::Pending,
            reason: application.reason,
            created_at: Utc::now(),
        };
        leaves.insert(0, record.clone());
        Ok(record)
    }

    async fn search_candidates_by_skills(
        &self,
        skills: &[String],
        position: Option<&str>,
    ) -> Result<Vec<Candidate>, CapabilityError> {
        Ok(self
            .candidates
            .iter()
            .filter(|candidate| candidate.match_score(skills, position) > 0.0)
            .cloned()
            .collect())
    }

    async fn find_candidate_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Candidate>, CapabilityError> {
        let wanted = name.trim();
        Ok(self
            .candidates
            .iter()
            .find(|candidate| candidate.name.eq_ignore_ascii_case(wanted))
            .cloned())
    }

    async fn list_candidates(&self, limit: usize) -> Result<Vec<Candidate>, CapabilityError> {
        Ok(self.candidates.iter().take(limit).cloned().collect())
    }

    async fn calculate_payroll_for_user(
        &self,
        employee: &EmployeeId,
        period: PayPeriod,
    ) -> Result<PayrollSummary, CapabilityError> {
        Ok(PayrollSummary::compute(self.require_employee(employee)?, period))
    }

    async fn calculate_department_payroll(
        &self,
        department: &str,
        period: PayPeriod,
    ) -> Result<DepartmentPayroll, CapabilityError> {
        let summaries = self
            .employees
            .iter()
            .filter(|employee| employee.department.eq_ignore_ascii_case(department))
            .map(|employee| PayrollSummary::compute(employee, period))
            .collect::<Vec<_>>();
        if summaries.is_empty() {
            return Err(CapabilityError::NotFound(format!("department {department}")));
        }
        let name = summaries
            .first()
            .map(|summary| summary.department.clone())
            .unwrap_or_else(|| department.to_string());
        Ok(DepartmentPayroll::from_summaries(name, period, summaries))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use hrflow_core::capabilities::HrDirectory;
    use hrflow_core::domain::hr::{
        EmployeeId, LeaveApplication, LeaveStatus, LeaveType, PayPeriod,
    };
    use hrflow_core::errors::CapabilityError;

    use super::InMemoryHrDirectory;

    fn directory() -> InMemoryHrDirectory {
        InMemoryHrDirectory::seeded().expect("seed")
    }

    fn emp(id: &str) -> EmployeeId {
        EmployeeId(id.to_string())
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[tokio::test]
    async fn submitted_leave_shows_up_in_history_and_pending_queue() {
        let directory = directory();
        let record = directory
            .submit_leave_request(LeaveApplication {
                employee_id: emp("EMP001"),
                leave_type: LeaveType::Annual,
                start_date: date(2026, 6, 1),
                end_date: date(2026, 6, 5),
                reason: Some("summer".to_string()),
            })
            .await
            .expect("submit");

        assert_eq!(record.status, LeaveStatus::Pending);
        assert_eq!(record.working_days, 5);

        let history = directory.get_leave_history(&emp("EMP001"), 10).await.expect("history");
        assert_eq!(history.first().map(|leave| &leave.id), Some(&record.id));

        let pending = directory.list_pending_leaves(Some("engineering")).await.expect("pending");
        assert!(pending.iter().any(|leave| leave.id == record.id));
        assert!(pending.iter().all(|leave| leave.employee_id != emp("EMP003")));
    }

    #[tokio::test]
    async fn reversed_range_is_rejected() {
        let error = directory()
            .submit_leave_request(LeaveApplication {
                employee_id: emp("EMP001"),
                leave_type: LeaveType::Sick,
                start_date: date(2026, 6, 5),
                end_date: date(2026, 6, 1),
                reason: None,
            })
            .await
            .expect_err("reversed");
        assert!(matches!(error, CapabilityError::Rejected(_)));
    }

    #[tokio::test]
    async fn unknown_employee_is_not_found() {
        let error = directory().get_leave_balance(&emp("EMP404")).await.expect_err("missing");
        assert!(matches!(error, CapabilityError::NotFound(_)));
        assert_eq!(directory().find_employee(&emp("EMP404")).await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn skill_search_skips_non_matching_candidates() {
        let found = directory()
            .search_candidates_by_skills(&["java".to_string()], None)
            .await
            .expect("search");
        let names = found.iter().map(|candidate| candidate.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Alice Smith", "Bob Jones"]);
    }

    #[tokio::test]
    async fn candidate_lookup_ignores_case() {
        let found = directory().find_candidate_by_name("  carol white ").await.expect("lookup");
        assert_eq!(found.map(|candidate| candidate.id.0), Some("C-3".to_string()));
    }

    #[tokio::test]
    async fn department_payroll_sums_members() {
        let period = PayPeriod::containing(date(2026, 3, 10));
        let payroll =
            directory().calculate_department_payroll("sales", period).await.expect("payroll");
        assert_eq!(payroll.department, "Sales");
        assert_eq!(payroll.employees.len(), 2);

        let error = directory()
            .calculate_department_payroll("Facilities", period)
            .await
            .expect_err("no members");
        assert!(matches!(error, CapabilityError::NotFound(_)));
    }
}
