//! Fixtures shared by the unit tests in this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use hrflow_core::capabilities::{
    ContextEntry, HrDirectory, MemoryStore, PatternUpdate, UserPatterns,
};
use hrflow_core::domain::hr::{
    Candidate, DepartmentPayroll, Employee, EmployeeId, LeaveApplication, LeaveBalance,
    LeaveRecord, PayPeriod, PayrollSummary,
};
use hrflow_core::errors::CapabilityError;
use hrflow_db::InMemoryHrDirectory;

fn offline() -> CapabilityError {
    CapabilityError::Unavailable("memory store offline".to_string())
}

/// The seeded demo organisation, counting how many leave requests were filed.
pub struct StubDirectory {
    inner: InMemoryHrDirectory,
    submitted: AtomicUsize,
}

impl StubDirectory {
    pub fn seeded() -> Self {
        let inner = InMemoryHrDirectory::seeded().expect("bundled HR seed parses");
        Self { inner, submitted: AtomicUsize::new(0) }
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HrDirectory for StubDirectory {
    async fn find_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, CapabilityError> {
        self.inner.find_employee(id).await
    }

    async fn get_leave_balance(
        &self,
        employee: &EmployeeId,
    ) -> Result<Vec<LeaveBalance>, CapabilityError> {
        self.inner.get_leave_balance(employee).await
    }

    async fn get_leave_history(
        &self,
        employee: &EmployeeId,
        limit: usize,
    ) -> Result<Vec<LeaveRecord>, CapabilityError> {
        self.inner.get_leave_history(employee, limit).await
    }

    async fn list_pending_leaves(
        &self,
        department: Option<&str>,
    ) -> Result<Vec<LeaveRecord>, CapabilityError> {
        self.inner.list_pending_leaves(department).await
    }

    async fn submit_leave_request(
        &self,
        application: LeaveApplication,
    ) -> Result<LeaveRecord, CapabilityError> {
        let record = self.inner.submit_leave_request(application).await?;
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn search_candidates_by_skills(
        &self,
        skills: &[String],
        position: Option<&str>,
    ) -> Result<Vec<Candidate>, CapabilityError> {
        self.inner.search_candidates_by_skills(skills, position).await
    }

    async fn find_candidate_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Candidate>, CapabilityError> {
        self.inner.find_candidate_by_name(name).await
    }

    async fn list_candidates(&self, limit: usize) -> Result<Vec<Candidate>, CapabilityError> {
        self.inner.list_candidates(limit).await
    }

    async fn calculate_payroll_for_user(
        &self,
        employee: &EmployeeId,
        period: PayPeriod,
    ) -> Result<PayrollSummary, CapabilityError> {
        self.inner.calculate_payroll_for_user(employee, period).await
    }

    async fn calculate_department_payroll(
        &self,
        department: &str,
        period: PayPeriod,
    ) -> Result<DepartmentPayroll, CapabilityError> {
        self.inner.calculate_department_payroll(department, period).await
    }
}

/// Memory store that records what it was given.
#[derive(Default)]
pub struct StubMemory {
    pub contexts: Mutex<Vec<(String, ContextEntry)>>,
    pub patterns: Mutex<HashMap<String, UserPatterns>>,
    failing: AtomicBool,
    hanging: AtomicBool,
}

impl StubMemory {
    /// Every call waits forever.
    pub fn hanging() -> Self {
        let memory = Self::default();
        memory.hanging.store(true, Ordering::SeqCst);
        memory
    }

    pub fn failing() -> Self {
        let memory = Self::default();
        memory.failing.store(true, Ordering::SeqCst);
        memory
    }

    pub fn with_history(user_id: &str, entries: Vec<ContextEntry>) -> Self {
        let memory = Self::default();
        if let Ok(mut contexts) = memory.contexts.lock() {
            contexts.extend(entries.into_iter().map(|entry| (user_id.to_string(), entry)));
        }
        memory
    }

    pub fn stored_count(&self) -> usize {
        self.contexts.lock().map(|contexts| contexts.len()).unwrap_or_default()
    }

    async fn check(&self) -> Result<(), CapabilityError> {
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            Err(CapabilityError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MemoryStore for StubMemory {
    async fn get_recent_context(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ContextEntry>, CapabilityError> {
        self.check().await?;
        let contexts = self.contexts.lock().map_err(|_| offline())?;
        Ok(contexts
            .iter()
            .rev()
            .filter(|(user, _)| user == user_id)
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn get_learned_patterns(&self, user_id: &str) -> Result<UserPatterns, CapabilityError> {
        self.check().await?;
        let patterns = self.patterns.lock().map_err(|_| offline())?;
        Ok(patterns.get(user_id).cloned().unwrap_or_default())
    }

    async fn store_context(
        &self,
        user_id: &str,
        _session_id: &str,
        entry: ContextEntry,
    ) -> Result<(), CapabilityError> {
        self.check().await?;
        self.contexts.lock().map_err(|_| offline())?.push((user_id.to_string(), entry));
        Ok(())
    }

    async fn update_user_patterns(
        &self,
        user_id: &str,
        update: PatternUpdate,
    ) -> Result<(), CapabilityError> {
        self.check().await?;
        let mut patterns = self.patterns.lock().map_err(|_| offline())?;
        let user = patterns.entry(user_id.to_string()).or_default();
        let pattern = user.intents.entry(update.intent).or_default();
        pattern.accumulate(update.confidence, update.observed_at);
        user.preferred_agent = Some(update.agent);
        Ok(())
    }
}
