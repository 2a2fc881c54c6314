use async_trait::async_trait;

use crate::domain::hr::{
    Candidate, DepartmentPayroll, Employee, EmployeeId, LeaveApplication, LeaveBalance,
    LeaveRecord, PayPeriod, PayrollSummary,
};
use crate::errors::CapabilityError;

/// Domain-data capability backing the leave, candidate and payroll handlers.
#[async_trait]
pub trait HrDirectory: Send + Sync {
    async fn find_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, CapabilityError>;

    async fn get_leave_balance(
        &self,
        employee: &EmployeeId,
    ) -> Result<Vec<LeaveBalance>, CapabilityError>;

    async fn get_leave_history(
        &self,
        employee: &EmployeeId,
        limit: usize,
    ) -> Result<Vec<LeaveRecord>, CapabilityError>;

    async fn list_pending_leaves(
        &self,
        department: Option<&str>,
    ) -> Result<Vec<LeaveRecord>, CapabilityError>;

    async fn submit_leave_request(
        &self,
        application: LeaveApplication,
    ) -> Result<LeaveRecord, CapabilityError>;

    async fn search_candidates_by_skills(
        &self,
        skills: &[String],
        position: Option<&str>,
    ) -> Result<Vec<Candidate>, CapabilityError>;

    async fn find_candidate_by_name(&self, name: &str)
        -> Result<Option<Candidate>, CapabilityError>;

    async fn list_candidates(&self, limit: usize) -> Result<Vec<Candidate>, CapabilityError>;

    async fn calculate_payroll_for_user(
        &self,
        employee: &EmployeeId,
        period: PayPeriod,
    ) -> Result<PayrollSummary, CapabilityError>;

    async fn calculate_department_payroll(
        &self,
        department: &str,
        period: PayPeriod,
    ) -> Result<DepartmentPayroll, CapabilityError>;
}
