use std::sync::Arc;

use async_trait::async_trait;
use hrflow_core::capabilities::HrDirectory;
use hrflow_core::domain::hr::{
    working_days_between, LeaveApplication, LeaveBalance, LeaveRecord, LeaveStatus, LeaveType,
};
use hrflow_core::domain::intent::Intent;
use hrflow_core::domain::response::{ActionData, HandlerResponse};
use hrflow_core::domain::tool::ToolName;
use hrflow_core::errors::CapabilityError;
use serde_json::{json, Value};
use tracing::info;

use super::{select_branch, Handler, HandlerError, HandlerRequest, ToolError};
use crate::guardrails::{ApprovalAction, ApprovalPolicy};

const AGENT_NAME: &str = "leave_agent";
const HISTORY_LIMIT: usize = 5;
const DUPLICATE_SCAN_LIMIT: usize = 50;

const LEAVE_TOOLS: &[ToolName] = &[
    ToolName::CheckLeaveBalance,
    ToolName::ValidateLeaveDates,
    ToolName::CreateLeaveRequest,
    ToolName::GetLeaveHistory,
    ToolName::ListPendingApprovals,
];

#[derive(Clone, Debug, PartialEq, Eq)]
enum LeaveBranch {
    CollectDetails { missing: Vec<&'static str> },
    Submit { leave_type: LeaveType },
    Balances,
    History,
    PendingApprovals,
    RefuseApprovals,
}

type LeaveRule = (&'static str, fn(&HandlerRequest) -> Option<LeaveBranch>);

const LEAVE_RULES: &[LeaveRule] = &[
    ("incomplete_request", incomplete_request),
    ("complete_request", complete_request),
    ("balance", balance_query),
    ("history", history_query),
    ("approvals", approvals_query),
    ("approvals_refused", approvals_refused),
];

fn missing_fields(request: &HandlerRequest) -> Vec<&'static str> {
    let entities = &request.entities;
    let mut missing = Vec::new();
    if entities.leave_type.is_none() {
        missing.push("leave_type");
    }
    if entities.start_date.is_none() {
        missing.push("start_date");
    }
    if entities.end_date.is_none() {
        missing.push("end_date");
    }
    missing
}

fn incomplete_request(request: &HandlerRequest) -> Option<LeaveBranch> {
    if request.intent != Intent::LeaveRequest {
        return None;
    }
    let missing = missing_fields(request);
    (!missing.is_empty()).then_some(LeaveBranch::CollectDetails { missing })
}

fn complete_request(request: &HandlerRequest) -> Option<LeaveBranch> {
    if request.intent != Intent::LeaveRequest {
        return None;
    }
    request.entities.leave_type.map(|leave_type| LeaveBranch::Submit { leave_type })
}

fn balance_query(request: &HandlerRequest) -> Option<LeaveBranch> {
    (request.intent == Intent::LeaveStatus).then_some(LeaveBranch::Balances)
}

fn history_query(request: &HandlerRequest) -> Option<LeaveBranch> {
    (request.intent == Intent::LeaveHistory).then_some(LeaveBranch::History)
}

fn approvals_query(request: &HandlerRequest) -> Option<LeaveBranch> {
    (request.intent == Intent::LeaveApproval && request.user.is_privileged())
        .then_some(LeaveBranch::PendingApprovals)
}

fn approvals_refused(request: &HandlerRequest) -> Option<LeaveBranch> {
    (request.intent == Intent::LeaveApproval).then_some(LeaveBranch::RefuseApprovals)
}

/// Outcome of checking a leave application before it is submitted.
#[derive(Clone, Debug, PartialEq)]
enum SubmissionCheck {
    Ready(LeaveApplication),
    Invalid { message: String, fields: Vec<&'static str> },
    InsufficientBalance { leave_type: LeaveType, remaining: u32, requested: u32 },
}

pub struct LeaveHandler {
    directory: Arc<dyn HrDirectory>,
    policy: ApprovalPolicy,
}

impl LeaveHandler {
    pub fn new(directory: Arc<dyn HrDirectory>, policy: ApprovalPolicy) -> Self {
        Self { directory, policy }
    }

    async fn check_submission(
        &self,
        request: &HandlerRequest,
    ) -> Result<SubmissionCheck, CapabilityError> {
        let entities = &request.entities;
        let (Some(leave_type), Some(start_date), Some(end_date)) =
            (entities.leave_type, entities.start_date, entities.end_date)
        else {
            return Ok(SubmissionCheck::Invalid {
                message: "I still need the leave type and dates.".to_string(),
                fields: missing_fields(request),
            });
        };

        if let Some(message) = date_problem(request, start_date, end_date) {
            return Ok(SubmissionCheck::Invalid { message, fields: vec!["start_date", "end_date"] });
        }

        let application = LeaveApplication {
            employee_id: request.subject(),
            leave_type,
            start_date,
            end_date,
            reason: entities.reason.clone(),
        };
        let requested = application.working_days();

        if leave_type != LeaveType::Unpaid {
            let balances = self.directory.get_leave_balance(&application.employee_id).await?;
            let remaining = balances
                .iter()
                .find(|balance| balance.leave_type == leave_type)
                .map(LeaveBalance::remaining_days)
                .unwrap_or(0);
            if remaining < requested {
                return Ok(SubmissionCheck::InsufficientBalance {
                    leave_type,
                    remaining,
                    requested,
                });
            }
        }

        Ok(SubmissionCheck::Ready(application))
    }

    /// Submits the application unless an identical pending request exists.
    async fn submit_once(
        &self,
        application: LeaveApplication,
    ) -> Result<LeaveRecord, CapabilityError> {
        let existing = self
            .directory
            .get_leave_history(&application.employee_id, DUPLICATE_SCAN_LIMIT)
            .await?
            .into_iter()
            .find(|record| {
                record.status == LeaveStatus::Pending
                    && record.leave_type == application.leave_type
                    && record.start_date == application.start_date
                    && record.end_date == application.end_date
            });
        if let Some(record) = existing {
            return Ok(record);
        }

        let record = self.directory.submit_leave_request(application).await?;
        info!(
            event_name = "leave.request.submitted",
            leave_id = %record.id.0,
            employee_id = %record.employee_id.0,
            working_days = record.working_days,
            "leave request submitted for approval"
        );
        Ok(record)
    }

    async fn submit(&self, request: &HandlerRequest) -> Result<HandlerResponse, HandlerError> {
        match self.check_submission(request).await? {
            SubmissionCheck::Invalid { message, fields } => {
                Ok(HandlerResponse::ok(AGENT_NAME, message)
                    .with_action(ActionData::FormCompletion {
                        missing_fields: fields.into_iter().map(str::to_string).collect(),
                        collected: request.entities.clone(),
                    })
                    .without_tools())
            }
            SubmissionCheck::InsufficientBalance { leave_type, remaining, requested } => {
                Ok(HandlerResponse::ok(
                    AGENT_NAME,
                    format!(
                        "You asked for {requested} working days of {leave_type} leave, but only \
                         {remaining} remain. Try shorter dates or unpaid leave."
                    ),
                )
                .without_tools())
            }
            SubmissionCheck::Ready(application) => {
                let record = self.submit_once(application).await?;
                let notice = self.policy.notice(ApprovalAction::CreateLeaveRequest);
                Ok(HandlerResponse::ok(
                    AGENT_NAME,
                    format!(
                        "I've submitted your {} leave from {} to {} ({} working days). It is now \
                         waiting for approval.",
                        record.leave_type, record.start_date, record.end_date, record.working_days
                    ),
                )
                .with_action(ActionData::LeaveApproval {
                    leave_id: record.id.0.clone(),
                    employee_id: record.employee_id.0.clone(),
                    working_days: record.working_days,
                })
                .with_approval(notice)
                .with_data(json!(record)))
            }
        }
    }

    async fn balances(&self, request: &HandlerRequest) -> Result<HandlerResponse, HandlerError> {
        let balances = self.directory.get_leave_balance(&request.subject()).await?;
        if balances.is_empty() {
            return Ok(HandlerResponse::ok(
                AGENT_NAME,
                "I couldn't find any leave balances for you.",
            ));
        }

        let lines = balances
            .iter()
            .map(|balance| {
                format!(
                    "- {}: {} of {} days remaining",
                    balance.leave_type,
                    balance.remaining_days(),
                    balance.entitled_days
                )
            })
            .collect::<Vec<_>>();
        Ok(HandlerResponse::ok(
            AGENT_NAME,
            format!("Here are your leave balances:\n{}", lines.join("\n")),
        )
        .with_data(json!(balances)))
    }

    async fn history(&self, request: &HandlerRequest) -> Result<HandlerResponse, HandlerError> {
        let records = self.directory.get_leave_history(&request.subject(), HISTORY_LIMIT).await?;
        if records.is_empty() {
            return Ok(HandlerResponse::ok(AGENT_NAME, "You haven't taken any leave yet."));
        }

        let lines = records.iter().map(describe_record).collect::<Vec<_>>();
        Ok(HandlerResponse::ok(
            AGENT_NAME,
            format!("Your most recent leave:\n{}", lines.join("\n")),
        )
        .with_data(json!(records)))
    }

    async fn pending_approvals(
        &self,
        request: &HandlerRequest,
    ) -> Result<HandlerResponse, HandlerError> {
        let department = approval_scope(request);
        let pending = self.directory.list_pending_leaves(department).await?;
        if pending.is_empty() {
            return Ok(HandlerResponse::ok(
                AGENT_NAME,
                "There are no leave requests waiting for you.",
            ));
        }

        let lines = pending.iter().map(describe_record).collect::<Vec<_>>();
        let leave_ids = pending.iter().map(|record| record.id.0.clone()).collect();
        let text = format!(
            "{} leave requests are waiting for review:\n{}",
            pending.len(),
            lines.join("\n")
        );
        Ok(HandlerResponse::ok(AGENT_NAME, text)
            .with_action(ActionData::ReviewPendingApprovals { leave_ids })
            .with_data(json!(pending)))
    }
}

/// HR and admins review every department; managers only their own.
fn approval_scope(request: &HandlerRequest) -> Option<&str> {
    match request.user.role.trim().to_ascii_lowercase().as_str() {
        "hr" | "admin" => None,
        _ => Some(request.user.department.as_str()),
    }
}

fn date_problem(
    request: &HandlerRequest,
    start: chrono::NaiveDate,
    end: chrono::NaiveDate,
) -> Option<String> {
    if end < start {
        return Some(format!("The end date {end} is before the start date {start}."));
    }
    if start < request.today {
        return Some(format!("The start date {start} is in the past."));
    }
    if working_days_between(start, end) == 0 {
        return Some("Those dates only cover a weekend, so no leave is needed.".to_string());
    }
    None
}

fn describe_record(record: &LeaveRecord) -> String {
    format!(
        "- {} {} leave {} to {} ({} days, {:?})",
        record.employee_id.0,
        record.leave_type,
        record.start_date,
        record.end_date,
        record.working_days,
        record.status
    )
}

#[async_trait]
impl Handler for LeaveHandler {
    fn name(&self) -> &'static str {
        AGENT_NAME
    }

    fn available_tools(&self) -> &'static [ToolName] {
        LEAVE_TOOLS
    }

    async fn process(&self, request: &HandlerRequest) -> Result<HandlerResponse, HandlerError> {
        let (rule, branch) =
            select_branch(LEAVE_RULES, request).unwrap_or(("fallback", LeaveBranch::Balances));
        tracing::debug!(
            event_name = "leave.branch.selected",
            session_id = %request.user.session_id,
            rule,
            "leave branch selected"
        );

        match branch {
            LeaveBranch::CollectDetails { missing } => {
                let wanted = missing
                    .iter()
                    .map(|field| field.replace('_', " "))
                    .collect::<Vec<_>>()
                    .join(", ");
                let prompt = format!("I can help you request leave. Please tell me the {wanted}.");
                Ok(HandlerResponse::ok(AGENT_NAME, prompt)
                    .with_action(ActionData::FormCompletion {
                        missing_fields: missing.into_iter().map(str::to_string).collect(),
                        collected: request.entities.clone(),
                    })
                    .without_tools())
            }
            LeaveBranch::Submit { .. } => self.submit(request).await,
            LeaveBranch::Balances => self.balances(request).await,
            LeaveBranch::History => self.history(request).await,
            LeaveBranch::PendingApprovals => self.pending_approvals(request).await,
            LeaveBranch::RefuseApprovals => Ok(HandlerResponse::ok(
                AGENT_NAME,
                "Only managers and HR staff can review leave approvals. I can show your own \
                 requests instead.",
            )
            .without_tools()),
        }
    }

    async fn run_tool(&self, tool: ToolName, request: &HandlerRequest) -> Result<Value, ToolError> {
        match tool {
            ToolName::CheckLeaveBalance => {
                let balances = self.directory.get_leave_balance(&request.subject()).await?;
                Ok(json!(balances))
            }
            ToolName::ValidateLeaveDates => {
                let start =
                    request.entities.start_date.ok_or(ToolError::MissingInput("start_date"))?;
                let end = request.entities.end_date.ok_or(ToolError::MissingInput("end_date"))?;
                if let Some(problem) = date_problem(request, start, end) {
                    return Err(ToolError::Rejected(problem));
                }
                Ok(json!({
                    "start_date": start,
                    "end_date": end,
                    "working_days": working_days_between(start, end),
                }))
            }
            ToolName::CreateLeaveRequest => match self.check_submission(request).await? {
                SubmissionCheck::Ready(application) => {
                    let record = self.submit_once(application).await?;
                    Ok(json!(record))
                }
                SubmissionCheck::Invalid { message, .. } => Err(ToolError::Rejected(message)),
                SubmissionCheck::InsufficientBalance { remaining, requested, .. } => {
                    Err(ToolError::Rejected(format!(
                        "insufficient balance: {remaining} remaining, {requested} requested"
                    )))
                }
            },
            ToolName::GetLeaveHistory => {
                let records =
                    self.directory.get_leave_history(&request.subject(), HISTORY_LIMIT).await?;
                Ok(json!(records))
            }
            ToolName::ListPendingApprovals => {
                if !request.user.is_privileged() {
                    return Err(ToolError::Rejected(
                        "only managers and HR staff can list pending approvals".to_string(),
                    ));
                }
                let pending = self.directory.list_pending_leaves(approval_scope(request)).await?;
                Ok(json!(pending))
            }
            other => Err(ToolError::NotAvailable(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use hrflow_core::domain::hr::LeaveType;
    use hrflow_core::domain::intent::{Entities, Intent};
    use hrflow_core::domain::response::ActionData;
    use hrflow_core::domain::tool::ToolName;

    use super::LeaveHandler;
    use crate::guardrails::ApprovalPolicy;
    use crate::handlers::testing::request;
    use crate::handlers::{Handler, ToolError};
    use crate::testing::StubDirectory;

    fn handler() -> (LeaveHandler, Arc<StubDirectory>) {
        let directory = Arc::new(StubDirectory::seeded());
        (LeaveHandler::new(directory.clone(), ApprovalPolicy::new()), directory)
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[tokio::test]
    async fn vague_request_asks_for_every_missing_field() {
        let (handler, _) = handler();
        let request = request(
            "I need leave next week",
            Intent::LeaveRequest,
            Entities::default(),
            "employee",
        );

        let response = handler.process(&request).await.expect("processed");

        assert!(response.success);
        assert!(response.requires_action);
        let missing = match response.action_data {
            Some(ActionData::FormCompletion { missing_fields, .. }) => missing_fields,
            other => panic!("unexpected action: {other:?}"),
        };
        assert_eq!(missing, vec!["leave_type", "start_date", "end_date"]);
        assert!(!response.requires_approval);
        assert!(response.skip_tools);
    }

    #[tokio::test]
    async fn partial_request_lists_only_absent_fields() {
        let (handler, _) = handler();
        let entities = Entities { leave_type: Some(LeaveType::Sick), ..Entities::default() };
        let request = request("sick leave please", Intent::LeaveRequest, entities, "employee");

        let response = handler.process(&request).await.expect("processed");
        let missing = match response.action_data {
            Some(ActionData::FormCompletion { missing_fields, .. }) => missing_fields,
            other => panic!("unexpected action: {other:?}"),
        };
        assert_eq!(missing, vec!["start_date", "end_date"]);
    }

    #[tokio::test]
    async fn complete_request_is_submitted_and_needs_approval() {
        let (handler, directory) = handler();
        let entities = Entities {
            leave_type: Some(LeaveType::Annual),
            start_date: date(2026, 3, 2),
            end_date: date(2026, 3, 6),
            ..Entities::default()
        };
        let request = request("annual leave", Intent::LeaveRequest, entities, "employee");

        let response = handler.process(&request).await.expect("processed");
        assert!(response.success);
        assert!(response.requires_approval);
        let notice = response.approval_notice.as_deref().unwrap_or_default();
        assert!(notice.contains("manager"));
        assert!(!response.skip_tools);
        assert!(matches!(
            response.action_data,
            Some(ActionData::LeaveApproval { working_days: 5, .. })
        ));

        // The create tool must not file a second request for the same dates.
        handler.run_tool(ToolName::CreateLeaveRequest, &request).await.expect("tool ran");
        assert_eq!(directory.submitted_count(), 1);
    }

    #[tokio::test]
    async fn past_dates_are_rejected_by_validation_tool() {
        let (handler, _) = handler();
        let entities = Entities {
            leave_type: Some(LeaveType::Annual),
            start_date: date(2026, 2, 2),
            end_date: date(2026, 2, 3),
            ..Entities::default()
        };
        let request = request("annual leave", Intent::LeaveRequest, entities, "employee");

        let result = handler.run_tool(ToolName::ValidateLeaveDates, &request).await;
        assert!(matches!(result, Err(ToolError::Rejected(_))));
    }

    #[tokio::test]
    async fn approvals_are_refused_for_employees() {
        let (handler, _) = handler();
        let request =
            request("approve leave", Intent::LeaveApproval, Entities::default(), "employee");

        let response = handler.process(&request).await.expect("processed");
        assert!(response.success);
        assert!(!response.requires_action);
        assert!(response.skip_tools);
        assert!(response.response.contains("Only managers"));
    }

    #[tokio::test]
    async fn managers_see_pending_approvals() {
        let (handler, _) = handler();
        let request =
            request("pending approvals", Intent::LeaveApproval, Entities::default(), "manager");

        let response = handler.process(&request).await.expect("processed");
        assert!(matches!(response.action_data, Some(ActionData::ReviewPendingApprovals { .. })));
    }

    #[tokio::test]
    async fn unknown_leave_label_falls_back_to_balances() {
        let (handler, _) = handler();
        let request = request(
            "leave",
            Intent::Other("leave_status_detailed".to_string()),
            Entities::default(),
            "employee",
        );

        let response = handler.process(&request).await.expect("processed");
        assert!(response.response.contains("leave balances"));
    }
}
