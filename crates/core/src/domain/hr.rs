use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmployeeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaveId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveType {
    Annual,
    Sick,
    Personal,
    Maternity,
    Paternity,
    Unpaid,
}

impl LeaveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Sick => "sick",
            Self::Personal => "personal",
            Self::Maternity => "maternity",
            Self::Paternity => "paternity",
            Self::Unpaid => "unpaid",
        }
    }
}

impl fmt::Display for LeaveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveBalance {
    pub leave_type: LeaveType,
    pub entitled_days: u32,
    pub used_days: u32,
}

impl LeaveBalance {
    pub fn remaining_days(&self) -> u32 {
        self.entitled_days.saturating_sub(self.used_days)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveApplication {
    pub employee_id: EmployeeId,
    pub leave_type: LeaveType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: Option<String>,
}

impl LeaveApplication {
    pub fn working_days(&self) -> u32 {
        working_days_between(self.start_date, self.end_date)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRecord {
    pub id: LeaveId,
    pub employee_id: EmployeeId,
    pub leave_type: LeaveType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub working_days: u32,
    pub status: LeaveStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Counts Monday..=Friday days in the inclusive range; zero when `end` precedes `start`.
pub fn working_days_between(start: NaiveDate, end: NaiveDate) -> u32 {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
        .count() as u32
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub department: String,
    pub role: String,
    pub monthly_salary: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
    pub position: String,
    pub skills: Vec<String>,
    pub years_experience: u32,
    pub location: Option<String>,
}

impl Candidate {
    /// Share of the requested skills this candidate has, with a small bonus when
    /// the position matches. Always within `0.0..=1.0`.
    pub fn match_score(&self, skills: &[String], position: Option<&str>) -> f64 {
        let skill_score = if skills.is_empty() {
            0.0
        } else {
            let matched = skills
                .iter()
                .filter(|wanted| self.skills.iter().any(|have| have.eq_ignore_ascii_case(wanted)))
                .count();
            matched as f64 / skills.len() as f64
        };

        let position_match = position
            .map(|wanted| self.position.to_ascii_lowercase().contains(&wanted.to_ascii_lowercase()))
            .unwrap_or(false);

        let score = match (skills.is_empty(), position_match) {
            (true, true) => 1.0,
            (true, false) => 0.0,
            (false, true) => skill_score * 0.8 + 0.2,
            (false, false) => skill_score * 0.8,
        };
        score.clamp(0.0, 1.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayPeriod {
    pub year: i32,
    pub month: u32,
}

impl PayPeriod {
    pub fn containing(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }
}

impl fmt::Display for PayPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollSummary {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub department: String,
    pub period: PayPeriod,
    pub gross_pay: Decimal,
    pub tax: Decimal,
    pub pension: Decimal,
    pub net_pay: Decimal,
}

impl PayrollSummary {
    /// Flat 20% tax and 5% pension contribution, rounded to cents.
    pub fn compute(employee: &Employee, period: PayPeriod) -> Self {
        let gross_pay = employee.monthly_salary.round_dp(2);
        let tax = (gross_pay * Decimal::new(20, 2)).round_dp(2);
        let pension = (gross_pay * Decimal::new(5, 2)).round_dp(2);
        Self {
            employee_id: employee.id.clone(),
            employee_name: employee.name.clone(),
            department: employee.department.clone(),
            period,
            gross_pay,
            tax,
            pension,
            net_pay: gross_pay - tax - pension,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentPayroll {
    pub department: String,
    pub period: PayPeriod,
    pub employees: Vec<PayrollSummary>,
    pub total_gross: Decimal,
    pub total_net: Decimal,
}

impl DepartmentPayroll {
    pub fn from_summaries(
        department: impl Into<String>,
        period: PayPeriod,
        employees: Vec<PayrollSummary>,
    ) -> Self {
        let total_gross = employees.iter().map(|summary| summary.gross_pay).sum();
        let total_net = employees.iter().map(|summary| summary.net_pay).sum();
        Self { department: department.into(), period, employees, total_gross, total_net }
    }
}
