use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::hr::{LeaveType, PayPeriod};

/// Labels the text-understanding capability is allowed to answer with.
pub const ALLOWED_INTENT_LABELS: &[&str] = &[
    "leave_request",
    "leave_status",
    "leave_history",
    "leave_approval",
    "candidate_search",
    "payroll_calculation",
    "greeting",
    "help",
    "general",
];

/// Normalized label describing what the user wants.
///
/// Unrecognized labels are kept verbatim in `Other` so routing stays total: the
/// dispatcher still inspects their prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Intent {
    LeaveRequest,
    LeaveStatus,
    LeaveHistory,
    LeaveApproval,
    CandidateSearch,
    PayrollCalculation,
    Greeting,
    Help,
    #[default]
    General,
    Error,
    Other(String),
}

impl Intent {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "leave_request" => Self::LeaveRequest,
            "leave_status" => Self::LeaveStatus,
            "leave_history" => Self::LeaveHistory,
            "leave_approval" => Self::LeaveApproval,
            "candidate_search" => Self::CandidateSearch,
            "payroll_calculation" => Self::PayrollCalculation,
            "greeting" => Self::Greeting,
            "help" => Self::Help,
            "general" => Self::General,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// Parses only labels from [`ALLOWED_INTENT_LABELS`].
    pub fn parse_allowed(label: &str) -> Option<Self> {
        let normalized = label.trim().trim_matches(|ch: char| ch == '"' || ch == '.');
        let normalized = normalized.to_ascii_lowercase();
        ALLOWED_INTENT_LABELS.contains(&normalized.as_str()).then(|| Self::parse(&normalized))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::LeaveRequest => "leave_request",
            Self::LeaveStatus => "leave_status",
            Self::LeaveHistory => "leave_history",
            Self::LeaveApproval => "leave_approval",
            Self::CandidateSearch => "candidate_search",
            Self::PayrollCalculation => "payroll_calculation",
            Self::Greeting => "greeting",
            Self::Help => "help",
            Self::General => "general",
            Self::Error => "error",
            Self::Other(label) => label.as_str(),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Intent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Intent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Structured fields extracted from free text.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entities {
    pub leave_type: Option<LeaveType>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<String>,
    pub position: Option<String>,
    pub candidate_name: Option<String>,
    pub department: Option<String>,
    pub employee_id: Option<String>,
    pub pay_period: Option<PayPeriod>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl Entities {
    /// Fill-only merge: fields already present are never overwritten or erased.
    pub fn merge_missing(&mut self, other: Entities) {
        fill(&mut self.leave_type, other.leave_type);
        fill(&mut self.start_date, other.start_date);
        fill(&mut self.end_date, other.end_date);
        fill(&mut self.reason, other.reason);
        fill(&mut self.position, other.position);
        fill(&mut self.candidate_name, other.candidate_name);
        fill(&mut self.department, other.department);
        fill(&mut self.employee_id, other.employee_id);
        fill(&mut self.pay_period, other.pay_period);
        for skill in other.skills {
            if !self.skills.iter().any(|existing| existing.eq_ignore_ascii_case(&skill)) {
                self.skills.push(skill);
            }
        }
        for (key, value) in other.extra {
            self.extra.entry(key).or_insert(value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Output of the intent classifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: Intent,
    pub confidence: f64,
    pub entities: Entities,
}

impl IntentClassification {
    pub fn new(intent: Intent, confidence: f64, entities: Entities) -> Self {
        Self { intent, confidence: confidence.clamp(0.0, 1.0), entities }
    }

    pub fn failed() -> Self {
        Self { intent: Intent::Error, confidence: 0.0, entities: Entities::default() }
    }
}

/// Output of the context enricher.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancedIntent {
    pub intent: Intent,
    pub enhanced_entities: Entities,
    pub personalization: BTreeMap<String, Value>,
    pub emotional_context: Option<String>,
    pub confidence_adjustment: f64,
}

impl EnhancedIntent {
    /// The no-op enrichment: intent unchanged, nothing added.
    pub fn passthrough(intent: Intent) -> Self {
        Self { intent, ..Self::default() }
    }

    pub fn is_passthrough(&self) -> bool {
        self.enhanced_entities.is_empty()
            && self.personalization.is_empty()
            && self.emotional_context.is_none()
            && self.confidence_adjustment == 0.0
    }
}
