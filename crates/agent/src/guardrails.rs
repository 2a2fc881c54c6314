use hrflow_core::domain::tool::ToolName;

/// Side-effecting actions the approval policy knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalAction {
    CreateLeaveRequest,
    DepartmentPayroll,
    IndividualPayroll,
    CandidateSearch,
    CandidateRanking,
    CandidateDetails,
    ReadOnly,
}

impl ApprovalAction {
    pub fn for_tool(tool: ToolName) -> Self {
        match tool {
            ToolName::CreateLeaveRequest => Self::CreateLeaveRequest,
            ToolName::CalculateDepartmentPayroll => Self::DepartmentPayroll,
            ToolName::CalculatePayroll => Self::IndividualPayroll,
            ToolName::SearchCandidates => Self::CandidateSearch,
            ToolName::RankCandidates => Self::CandidateRanking,
            ToolName::GetCandidateDetails => Self::CandidateDetails,
            ToolName::CheckLeaveBalance
            | ToolName::ValidateLeaveDates
            | ToolName::GetLeaveHistory
            | ToolName::ListPendingApprovals => Self::ReadOnly,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    NotRequired,
    /// `notice` is the sentence shown to the user next to the reply.
    Required { notice: &'static str },
}

impl ApprovalDecision {
    pub fn is_required(&self) -> bool {
        matches!(self, Self::Required { .. })
    }

    pub fn notice(&self) -> Option<&'static str> {
        match self {
            Self::Required { notice } => Some(*notice),
            Self::NotRequired => None,
        }
    }
}

/// Fixed table deciding which actions need a human to sign off. Capability
/// output never influences it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApprovalPolicy;

impl ApprovalPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, action: ApprovalAction) -> ApprovalDecision {
        match action {
            ApprovalAction::CreateLeaveRequest => ApprovalDecision::Required {
                notice: "Your manager needs to approve this leave request before it takes effect.",
            },
            ApprovalAction::DepartmentPayroll => ApprovalDecision::Required {
                notice: "Department payroll runs must be approved before they are released.",
            },
            ApprovalAction::IndividualPayroll
            | ApprovalAction::CandidateSearch
            | ApprovalAction::CandidateRanking
            | ApprovalAction::CandidateDetails
            | ApprovalAction::ReadOnly => ApprovalDecision::NotRequired,
        }
    }

    pub fn requires_approval(&self, action: ApprovalAction) -> bool {
        self.evaluate(action).is_required()
    }

    pub fn notice(&self, action: ApprovalAction) -> Option<&'static str> {
        self.evaluate(action).notice()
    }

    /// True when any of the tools needs approval.
    pub fn tools_require_approval(&self, tools: &[ToolName]) -> bool {
        tools.iter().any(|tool| self.requires_approval(ApprovalAction::for_tool(*tool)))
    }

    /// Distinct notices for the tools that need approval, in tool order.
    pub fn tool_notices(&self, tools: &[ToolName]) -> Vec<&'static str> {
        let mut notices = Vec::new();
        let raised = tools.iter().filter_map(|tool| self.notice(ApprovalAction::for_tool(*tool)));
        for notice in raised {
            if !notices.contains(&notice) {
                notices.push(notice);
            }
        }
        notices
    }
}

#[cfg(test)]
mod tests {
    use hrflow_core::domain::tool::ToolName;

    use super::{ApprovalAction, ApprovalDecision, ApprovalPolicy};

    #[test]
    fn approval_table() {
        let policy = ApprovalPolicy::new();
        assert!(policy.requires_approval(ApprovalAction::CreateLeaveRequest));
        assert!(policy.requires_approval(ApprovalAction::DepartmentPayroll));
        assert!(!policy.requires_approval(ApprovalAction::IndividualPayroll));
        assert!(!policy.requires_approval(ApprovalAction::CandidateSearch));
        assert!(!policy.requires_approval(ApprovalAction::CandidateRanking));
        assert!(!policy.requires_approval(ApprovalAction::CandidateDetails));
    }

    #[test]
    fn leave_creation_carries_a_notice() {
        let decision = ApprovalPolicy::new().evaluate(ApprovalAction::CreateLeaveRequest);
        assert!(decision.is_required());
        assert!(decision.notice().is_some_and(|notice| notice.contains("manager")));
        assert_eq!(ApprovalPolicy::new().evaluate(ApprovalAction::ReadOnly).notice(), None);
        assert_eq!(
            ApprovalPolicy::new().evaluate(ApprovalAction::IndividualPayroll),
            ApprovalDecision::NotRequired
        );
    }

    #[test]
    fn tool_notices_are_distinct_and_ordered() {
        let policy = ApprovalPolicy::new();
        let notices = policy.tool_notices(&[
            ToolName::CalculateDepartmentPayroll,
            ToolName::CheckLeaveBalance,
            ToolName::CreateLeaveRequest,
            ToolName::CalculateDepartmentPayroll,
        ]);

        assert_eq!(notices.len(), 2);
        assert!(notices[0].starts_with("Department payroll"));
        assert!(notices[1].contains("leave request"));
        assert!(policy.tool_notices(&[ToolName::SearchCandidates]).is_empty());
    }

    #[test]
    fn tool_lists_follow_the_table() {
        let policy = ApprovalPolicy::new();
        assert!(policy.tools_require_approval(&[
            ToolName::ValidateLeaveDates,
            ToolName::CreateLeaveRequest
        ]));
        assert!(!policy.tools_require_approval(&[
            ToolName::SearchCandidates,
            ToolName::RankCandidates
        ]));
        assert!(!policy.tools_require_approval(&[ToolName::CalculatePayroll]));
        assert!(policy.tools_require_approval(&[ToolName::CalculateDepartmentPayroll]));
    }
}
