use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named, discrete actions a handler may run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    CheckLeaveBalance,
    ValidateLeaveDates,
    CreateLeaveRequest,
    GetLeaveHistory,
    ListPendingApprovals,
    SearchCandidates,
    RankCandidates,
    GetCandidateDetails,
    CalculatePayroll,
    CalculateDepartmentPayroll,
}

impl ToolName {
    pub const ALL: [ToolName; 10] = [
        Self::CheckLeaveBalance,
        Self::ValidateLeaveDates,
        Self::CreateLeaveRequest,
        Self::GetLeaveHistory,
        Self::ListPendingApprovals,
        Self::SearchCandidates,
        Self::RankCandidates,
        Self::GetCandidateDetails,
        Self::CalculatePayroll,
        Self::CalculateDepartmentPayroll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckLeaveBalance => "check_leave_balance",
            Self::ValidateLeaveDates => "validate_leave_dates",
            Self::CreateLeaveRequest => "create_leave_request",
            Self::GetLeaveHistory => "get_leave_history",
            Self::ListPendingApprovals => "list_pending_approvals",
            Self::SearchCandidates => "search_candidates",
            Self::RankCandidates => "rank_candidates",
            Self::GetCandidateDetails => "get_candidate_details",
            Self::CalculatePayroll => "calculate_payroll",
            Self::CalculateDepartmentPayroll => "calculate_department_payroll",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownToolName(pub String);

impl FromStr for ToolName {
    type Err = UnknownToolName;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|tool| tool.as_str() == normalized)
            .ok_or_else(|| UnknownToolName(value.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Capability,
    RuleTable,
}

/// Which tools to run for a request, and in what order.
///
/// `execution_order` only ever names tools that are also in `tools_to_use`, and
/// both are subsets of the handler's available tools.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDecision {
    pub tools_to_use: Vec<ToolName>,
    pub execution_order: Vec<ToolName>,
    pub requires_approval: bool,
    pub reasoning: String,
    pub source: DecisionSource,
}

impl ToolDecision {
    pub fn empty(reasoning: impl Into<String>, source: DecisionSource) -> Self {
        Self {
            tools_to_use: Vec::new(),
            execution_order: Vec::new(),
            requires_approval: false,
            reasoning: reasoning.into(),
            source,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub tool: ToolName,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn succeeded(tool: ToolName, output: Value) -> Self {
        Self { tool, success: true, output: Some(output), error: None }
    }

    pub fn failed(tool: ToolName, error: impl Into<String>) -> Self {
        Self { tool, success: false, output: None, error: Some(error.into()) }
    }
}

/// Result of deciding and running tools for one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub decision: ToolDecision,
    pub tool_responses: Vec<ToolResponse>,
    pub execution_success: bool,
    pub requires_human_approval: bool,
    /// One entry per distinct reason approval is needed, in execution order.
    #[serde(default)]
    pub approval_notices: Vec<String>,
}

impl ToolOutcome {
    /// Nothing ran; the handler's response already answers the request.
    pub fn skipped(reasoning: impl Into<String>) -> Self {
        Self {
            decision: ToolDecision::empty(reasoning, DecisionSource::RuleTable),
            tool_responses: Vec::new(),
            execution_success: true,
            requires_human_approval: false,
            approval_notices: Vec::new(),
        }
    }
}

/// The session-state view of tool execution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResults {
    pub tools_used: Vec<ToolName>,
    pub execution_results: BTreeMap<String, Value>,
}

impl ToolResults {
    pub fn record(&mut self, outcome: &ToolOutcome) {
        for response in &outcome.tool_responses {
            self.tools_used.push(response.tool);
            let value = serde_json::to_value(response).unwrap_or(Value::Null);
            self.execution_results.insert(response.tool.as_str().to_string(), value);
        }
    }
}
