use std::collections::BTreeMap;

use serde::Deserialize;

use hrflow_core::domain::hr::{
    Candidate, Employee, EmployeeId, LeaveBalance, LeaveRecord, LeaveType,
};

use crate::repositories::RepositoryError;

const SEED_EMPLOYEE_IDS: &[&str] = &["EMP001", "EMP002", "EMP003", "EMP004", "EMP005"];

const SEED_CANDIDATE_IDS: &[&str] = &["C-1", "C-2", "C-3", "C-4", "C-5"];

fn decode(message: String) -> RepositoryError {
    RepositoryError::Decode(message)
}

#[derive(Debug, Deserialize)]
struct SeedBalance {
    employee_id: EmployeeId,
    leave_type: LeaveType,
    entitled_days: u32,
    used_days: u32,
}

#[derive(Debug, Deserialize)]
struct SeedDocument {
    employees: Vec<Employee>,
    leave_balances: Vec<SeedBalance>,
    leave_records: Vec<LeaveRecord>,
    candidates: Vec<Candidate>,
}

/// Deterministic demo organisation backing the in-memory HR directory.
#[derive(Clone, Debug, Default)]
pub struct HrSeedDataset {
    pub employees: Vec<Employee>,
    pub balances: BTreeMap<EmployeeId, Vec<LeaveBalance>>,
    /// Newest first.
    pub leave_records: Vec<LeaveRecord>,
    pub candidates: Vec<Candidate>,
}

impl HrSeedDataset {
    /// JSON fixture content for the demo organisation.
    pub const JSON: &str = include_str!("../../../config/fixtures/hr_seed.json");

    pub fn load() -> Result<Self, RepositoryError> {
        Self::parse(Self::JSON)
    }

    pub fn parse(raw: &str) -> Result<Self, RepositoryError> {
        let document: SeedDocument =
            serde_json::from_str(raw).map_err(|error| decode(format!("hr seed: {error}")))?;

        let mut balances: BTreeMap<EmployeeId, Vec<LeaveBalance>> = BTreeMap::new();
        for seed in document.leave_balances {
            balances.entry(seed.employee_id).or_default().push(LeaveBalance {
                leave_type: seed.leave_type,
                entitled_days: seed.entitled_days,
                used_days: seed.used_days,
            });
        }

        let mut leave_records = document.leave_records;
        leave_records.sort_by(|left, right| right.created_at.cmp(&left.created_at));

        let dataset = Self {
            employees: document.employees,
            balances,
            leave_records,
            candidates: document.candidates,
        };
        dataset.verify()?;
        Ok(dataset)
    }

    /// Checks referential integrity: every balance and leave record belongs to
    /// a known employee and identifiers are unique.
    pub fn verify(&self) -> Result<(), RepositoryError> {
        let known = |id: &EmployeeId| self.employees.iter().any(|employee| &employee.id == id);

        if let Some(id) = self.balances.keys().find(|id| !known(id)) {
            return Err(decode(format!("balance for unknown employee {}", id.0)));
        }
        for record in &self.leave_records {
            if !known(&record.employee_id) {
                return Err(decode(format!(
                    "leave {} references unknown employee {}",
                    record.id.0, record.employee_id.0
                )));
            }
            if record.end_date < record.start_date {
                return Err(decode(format!("leave {} ends before it starts", record.id.0)));
            }
        }

        let mut employee_ids = self.employees.iter().map(|e| e.id.0.as_str()).collect::<Vec<_>>();
        employee_ids.sort_unstable();
        employee_ids.dedup();
        if employee_ids.len() != self.employees.len() {
            return Err(decode("duplicate employee id".to_string()));
        }

        let mut leave_ids = self.leave_records.iter().map(|r| r.id.0.as_str()).collect::<Vec<_>>();
        leave_ids.sort_unstable();
        leave_ids.dedup();
        if leave_ids.len() != self.leave_records.len() {
            return Err(decode("duplicate leave id".to_string()));
        }

        Ok(())
    }

    pub fn employee_ids() -> &'static [&'static str] {
        SEED_EMPLOYEE_IDS
    }

    pub fn candidate_ids() -> &'static [&'static str] {
        SEED_CANDIDATE_IDS
    }
}

#[cfg(test)]
mod tests {
    use hrflow_core::domain::hr::{EmployeeId, LeaveStatus};

    use super::HrSeedDataset;

    #[test]
    fn json_fixture_is_valid() {
        let dataset = HrSeedDataset::load().expect("seed parses");

        let employee_ids =
            dataset.employees.iter().map(|employee| employee.id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(employee_ids, HrSeedDataset::employee_ids());

        let candidate_ids =
            dataset.candidates.iter().map(|candidate| candidate.id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(candidate_ids, HrSeedDataset::candidate_ids());
    }

    #[test]
    fn leave_records_are_newest_first() {
        let dataset = HrSeedDataset::load().expect("seed parses");
        let created =
            dataset.leave_records.iter().map(|record| record.created_at).collect::<Vec<_>>();
        let mut sorted = created.clone();
        sorted.sort_by(|left, right| right.cmp(left));
        assert_eq!(created, sorted);
        assert!(dataset
            .leave_records
            .iter()
            .any(|record| record.status == LeaveStatus::Pending));
    }

    #[test]
    fn balances_are_grouped_per_employee() {
        let dataset = HrSeedDataset::load().expect("seed parses");
        let ada = &dataset.balances[&EmployeeId("EMP001".to_string())];
        assert_eq!(ada.len(), 3);
        assert_eq!(ada[0].remaining_days(), 20);
    }

    #[test]
    fn unknown_employee_reference_is_rejected() {
        let raw = r#"{
            "employees": [],
            "leave_balances": [
                {
                    "employee_id": "EMP404",
                    "leave_type": "annual",
                    "entitled_days": 1,
                    "used_days": 0
                }
            ],
            "leave_records": [],
            "candidates": []
        }"#;

        let error = HrSeedDataset::parse(raw).expect_err("dangling balance");
        assert!(error.to_string().contains("EMP404"));
    }

    #[test]
    fn malformed_fixture_is_a_decode_error() {
        let error = HrSeedDataset::parse("{\"employees\": 3}").expect_err("bad shape");
        assert!(error.to_string().starts_with("decode error: hr seed"));
    }
}
