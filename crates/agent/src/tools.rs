use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use hrflow_core::domain::intent::Intent;
use hrflow_core::domain::tool::{
    DecisionSource, ToolDecision, ToolName, ToolOutcome, ToolResponse,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::guardrails::ApprovalPolicy;
use crate::handlers::{Handler, HandlerRequest, ToolError};
use crate::llm::{CacheScope, TextService};

const PLAN_FORMAT: &str = "Reply with JSON only: {\"tools_to_use\": [..], \
     \"execution_order\": [..], \"reasoning\": \"..\"}";

/// Tools used when the capability can't produce a plan.
pub fn fallback_tools(intent: &Intent) -> &'static [ToolName] {
    match intent {
        Intent::LeaveRequest => &[ToolName::ValidateLeaveDates, ToolName::CreateLeaveRequest],
        Intent::LeaveStatus => &[ToolName::CheckLeaveBalance],
        Intent::LeaveHistory => &[ToolName::GetLeaveHistory],
        Intent::LeaveApproval => &[ToolName::ListPendingApprovals],
        Intent::CandidateSearch => &[ToolName::SearchCandidates, ToolName::RankCandidates],
        Intent::PayrollCalculation => &[ToolName::CalculatePayroll],
        _ => &[],
    }
}

#[derive(Debug, Deserialize)]
struct CapabilityPlan {
    #[serde(default, alias = "toolsToUse")]
    tools_to_use: Vec<String>,
    #[serde(default, alias = "executionOrder")]
    execution_order: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

/// Keeps only known, available tools, first occurrence wins.
fn filter_available(names: &[String], available: &[ToolName]) -> Vec<ToolName> {
    let mut kept = Vec::new();
    for name in names {
        let Ok(tool) = name.parse::<ToolName>() else {
            continue;
        };
        if available.contains(&tool) && !kept.contains(&tool) {
            kept.push(tool);
        }
    }
    kept
}

/// Slices the first JSON object out of a completion that may carry prose or
/// code fences around it.
pub(crate) fn json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

/// Decides which tools a handler runs and runs them in order.
#[derive(Clone)]
pub struct ToolExecutor {
    text: TextService,
    policy: ApprovalPolicy,
    max_tools: usize,
    tool_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(
        text: TextService,
        policy: ApprovalPolicy,
        max_tools: usize,
        tool_timeout: Duration,
    ) -> Self {
        Self { text, policy, max_tools, tool_timeout }
    }

    pub async fn decide_tools(
        &self,
        request: &HandlerRequest,
        available: &[ToolName],
    ) -> ToolDecision {
        if available.is_empty() {
            return ToolDecision::empty("handler declares no tools", DecisionSource::RuleTable);
        }

        let plan = self.plan_with_capability(request, available).await;
        let (mut order, reasoning, source) = match plan {
            Some((order, reasoning)) => (order, reasoning, DecisionSource::Capability),
            None => {
                let order = fallback_tools(&request.intent)
                    .iter()
                    .copied()
                    .filter(|tool| available.contains(tool))
                    .collect::<Vec<_>>();
                let reasoning = format!("rule table for intent `{}`", request.intent);
                (order, reasoning, DecisionSource::RuleTable)
            }
        };
        order.truncate(self.max_tools);

        ToolDecision {
            tools_to_use: order.clone(),
            requires_approval: self.policy.tools_require_approval(&order),
            execution_order: order,
            reasoning,
            source,
        }
    }

    /// Returns the validated execution order, or `None` when the capability
    /// failed or answered with something unusable.
    async fn plan_with_capability(
        &self,
        request: &HandlerRequest,
        available: &[ToolName],
    ) -> Option<(Vec<ToolName>, String)> {
        let names = available.iter().map(ToolName::as_str).collect::<Vec<_>>().join(", ");
        let prompt = format!(
            "Pick the tools needed for this HR request. Available tools: {names}.\n\
             Intent: {intent}\nRequest: {message}",
            intent = request.intent,
            message = request.message,
        );

        let scope = CacheScope::User(request.user.user_id.clone());
        let reply = match self.text.ask(scope, &prompt, PLAN_FORMAT).await {
            Ok(reply) => reply,
            Err(error) => {
                debug!(
                    event_name = "tools.plan.capability_failed",
                    session_id = %request.user.session_id,
                    error = %error,
                    "tool planning fell back to rule table"
                );
                return None;
            }
        };

        let plan = match json_object(&reply).map(serde_json::from_str::<CapabilityPlan>) {
            Some(Ok(plan)) => plan,
            _ => {
                debug!(
                    event_name = "tools.plan.unparseable",
                    session_id = %request.user.session_id,
                    "tool plan was not valid JSON; using rule table"
                );
                return None;
            }
        };

        let chosen = filter_available(&plan.tools_to_use, available);
        let mut order = filter_available(&plan.execution_order, &chosen);
        for tool in &chosen {
            if !order.contains(tool) {
                order.push(*tool);
            }
        }
        Some((order, plan.reasoning))
    }

    /// Runs every tool in `decision.execution_order`; a failing tool is
    /// recorded and the rest still run.
    pub async fn execute_in_order(
        &self,
        decision: ToolDecision,
        handler: &dyn Handler,
        request: &HandlerRequest,
    ) -> ToolOutcome {
        let available = handler.available_tools();
        let mut tool_responses = Vec::with_capacity(decision.execution_order.len());

        for tool in &decision.execution_order {
            let tool = *tool;
            if !available.contains(&tool) {
                let error = ToolError::NotAvailable(tool).to_string();
                tool_responses.push(ToolResponse::failed(tool, error));
                continue;
            }

            let guarded = AssertUnwindSafe(handler.run_tool(tool, request)).catch_unwind();
            let result = match tokio::time::timeout(self.tool_timeout, guarded).await {
                Ok(Ok(result)) => result,
                Ok(Err(_panic)) => Err(ToolError::Panicked),
                Err(_elapsed) => Err(ToolError::Timeout(self.tool_timeout.as_secs())),
            };

            match result {
                Ok(output) => tool_responses.push(ToolResponse::succeeded(tool, output)),
                Err(error) => {
                    warn!(
                        event_name = "tools.execution.failed",
                        session_id = %request.user.session_id,
                        tool = tool.as_str(),
                        error = %error,
                        "tool failed; continuing with remaining tools"
                    );
                    tool_responses.push(ToolResponse::failed(tool, error.to_string()));
                }
            }
        }

        let execution_success = tool_responses.iter().all(|response| response.success);
        // Only tools that actually ran to completion can leave something awaiting approval.
        let completed = tool_responses
            .iter()
            .filter(|response| response.success)
            .map(|response| response.tool)
            .collect::<Vec<_>>();
        let approval_notices = self
            .policy
            .tool_notices(&completed)
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        ToolOutcome {
            decision,
            tool_responses,
            execution_success,
            requires_human_approval: !approval_notices.is_empty(),
            approval_notices,
        }
    }

    /// Decide, then execute, against the handler's own tool list.
    pub async fn execute_with_tools(
        &self,
        handler: &dyn Handler,
        request: &HandlerRequest,
    ) -> ToolOutcome {
        let decision = self.decide_tools(request, handler.available_tools()).await;
        self.execute_in_order(decision, handler, request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use hrflow_core::domain::intent::{Entities, Intent};
    use hrflow_core::domain::response::HandlerResponse;
    use hrflow_core::domain::tool::{DecisionSource, ToolName};
    use serde_json::{json, Value};

    use super::{json_object, ToolExecutor};
    use crate::guardrails::ApprovalPolicy;
    use crate::handlers::testing::request;
    use crate::handlers::{Handler, HandlerError, HandlerRequest, ToolError};
    use crate::llm::testing::ScriptedLlm;
    use crate::llm::TextService;

    const AVAILABLE: &[ToolName] =
        &[ToolName::ValidateLeaveDates, ToolName::CreateLeaveRequest, ToolName::CheckLeaveBalance];

    struct FakeLeave;

    #[async_trait]
    impl Handler for FakeLeave {
        fn name(&self) -> &'static str {
            "fake_leave"
        }

        fn available_tools(&self) -> &'static [ToolName] {
            AVAILABLE
        }

        async fn process(
            &self,
            _request: &HandlerRequest,
        ) -> Result<HandlerResponse, HandlerError> {
            Ok(HandlerResponse::ok("fake_leave", "ok"))
        }

        async fn run_tool(
            &self,
            tool: ToolName,
            _request: &HandlerRequest,
        ) -> Result<Value, ToolError> {
            match tool {
                ToolName::ValidateLeaveDates => Err(ToolError::MissingInput("start_date")),
                ToolName::CheckLeaveBalance => panic!("balance service exploded"),
                other => Ok(json!({ "tool": other.as_str() })),
            }
        }
    }

    fn executor(llm: ScriptedLlm) -> ToolExecutor {
        let text = TextService::uncached(Arc::new(llm), Duration::from_secs(1));
        ToolExecutor::new(text, ApprovalPolicy::new(), 4, Duration::from_secs(1))
    }

    fn leave_request() -> HandlerRequest {
        request("book leave", Intent::LeaveRequest, Entities::default(), "employee")
    }

    #[test]
    fn json_object_strips_fences() {
        assert_eq!(json_object("```json\n{\"a\": 1}\n```"), Some("{\"a\": 1}"));
        assert_eq!(json_object("no json here"), None);
    }

    #[tokio::test]
    async fn capability_plan_is_filtered_to_available_tools() {
        let reply = r#"{
            "tools_to_use": ["create_leave_request", "delete_database", "check_leave_balance"],
            "execution_order": ["check_leave_balance", "create_leave_request", "calculate_payroll"],
            "reasoning": "check then create"}"#;
        let executor = executor(ScriptedLlm::new(vec![Ok(reply.to_string())]));

        let decision = executor.decide_tools(&leave_request(), AVAILABLE).await;

        assert_eq!(decision.source, DecisionSource::Capability);
        assert_eq!(
            decision.execution_order,
            vec![ToolName::CheckLeaveBalance, ToolName::CreateLeaveRequest]
        );
        assert!(decision.execution_order.iter().all(|tool| decision.tools_to_use.contains(tool)));
        assert_eq!(decision.execution_order.len(), decision.tools_to_use.len());
        assert!(decision.requires_approval);
    }

    #[tokio::test]
    async fn capability_cannot_waive_approval() {
        let reply = r#"{"tools_to_use": ["create_leave_request"], "requires_approval": false}"#;
        let executor = executor(ScriptedLlm::new(vec![Ok(reply.to_string())]));

        let decision = executor.decide_tools(&leave_request(), AVAILABLE).await;
        assert!(decision.requires_approval);
    }

    #[tokio::test]
    async fn invalid_json_uses_rule_table() {
        let executor = executor(ScriptedLlm::new(vec![Ok("use the leave tools".to_string())]));

        let decision = executor.decide_tools(&leave_request(), AVAILABLE).await;

        assert_eq!(decision.source, DecisionSource::RuleTable);
        assert_eq!(
            decision.execution_order,
            vec![ToolName::ValidateLeaveDates, ToolName::CreateLeaveRequest]
        );
    }

    #[tokio::test]
    async fn max_tools_bounds_the_plan() {
        let text = TextService::uncached(Arc::new(ScriptedLlm::failing()), Duration::from_secs(1));
        let executor = ToolExecutor::new(text, ApprovalPolicy::new(), 1, Duration::from_secs(1));

        let decision = executor.decide_tools(&leave_request(), AVAILABLE).await;
        assert_eq!(decision.execution_order, vec![ToolName::ValidateLeaveDates]);
        assert_eq!(decision.tools_to_use, vec![ToolName::ValidateLeaveDates]);
    }

    #[tokio::test]
    async fn failing_tools_are_recorded_and_the_rest_still_run() {
        let reply = r#"{"tools_to_use":
            ["validate_leave_dates", "check_leave_balance", "create_leave_request"]}"#;
        let executor = executor(ScriptedLlm::new(vec![Ok(reply.to_string())]));

        let outcome = executor.execute_with_tools(&FakeLeave, &leave_request()).await;

        assert!(!outcome.execution_success);
        assert!(outcome.requires_human_approval);
        assert_eq!(outcome.approval_notices.len(), 1);
        assert!(outcome.approval_notices[0].contains("leave request"));
        let results = outcome
            .tool_responses
            .iter()
            .map(|response| (response.tool, response.success))
            .collect::<Vec<_>>();
        assert_eq!(
            results,
            vec![
                (ToolName::ValidateLeaveDates, false),
                (ToolName::CheckLeaveBalance, false),
                (ToolName::CreateLeaveRequest, true),
            ]
        );
        assert!(outcome.tool_responses.iter().all(|response| AVAILABLE.contains(&response.tool)));
    }

    #[tokio::test]
    async fn failed_approval_tools_do_not_flag_approval() {
        let reply = r#"{"tools_to_use": ["validate_leave_dates"]}"#;
        let executor = executor(ScriptedLlm::new(vec![Ok(reply.to_string())]));
        let decision = executor.decide_tools(&leave_request(), AVAILABLE).await;
        assert_eq!(decision.execution_order, vec![ToolName::ValidateLeaveDates]);

        let outcome = executor.execute_in_order(decision, &FakeLeave, &leave_request()).await;
        assert!(!outcome.execution_success);
        assert!(!outcome.requires_human_approval);
        assert!(outcome.approval_notices.is_empty());
    }
}
