//! Domain handlers and the boundary that keeps their failures contained.
//!
//! Each handler owns a fixed set of tools and picks a sub-branch with an
//! ordered rule list. Errors and panics raised inside `process` never escape:
//! [`process_guarded`] turns them into an unsuccessful [`HandlerResponse`].

pub mod ats;
pub mod leave;
pub mod payroll;
pub mod router;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use futures_util::FutureExt;
use hrflow_core::capabilities::HrDirectory;
use hrflow_core::domain::hr::EmployeeId;
use hrflow_core::domain::intent::{Entities, Intent};
use hrflow_core::domain::response::HandlerResponse;
use hrflow_core::domain::session::{SessionState, UserContext};
use hrflow_core::domain::tool::ToolName;
use hrflow_core::errors::{ApplicationError, CapabilityError, DomainError};
use hrflow_core::flows::PipelineNode;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::guardrails::ApprovalPolicy;
use crate::llm::TextService;

pub use ats::AtsHandler;
pub use leave::LeaveHandler;
pub use payroll::PayrollHandler;
pub use router::RouterHandler;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<HandlerError> for ApplicationError {
    fn from(error: HandlerError) -> Self {
        match error {
            HandlerError::Capability(error) => Self::Capability(error),
            HandlerError::Domain(error) => Self::Domain(error),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool `{0}` is not available to this handler")]
    NotAvailable(ToolName),
    #[error("tool input is missing `{0}`")]
    MissingInput(&'static str),
    #[error("tool rejected the request: {0}")]
    Rejected(String),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("tool timed out after {0}s")]
    Timeout(u64),
    #[error("tool panicked")]
    Panicked,
}

/// Everything a handler sees of the session.
#[derive(Clone, Debug, PartialEq)]
pub struct HandlerRequest {
    pub message: String,
    pub intent: Intent,
    pub entities: Entities,
    pub user: UserContext,
    pub today: NaiveDate,
}

impl HandlerRequest {
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            message: state.latest_message().to_string(),
            intent: state.intent.clone(),
            entities: state.entities.clone(),
            user: state.user_context().clone(),
            today: Utc::now().date_naive(),
        }
    }

    /// The employee a request is about: privileged callers may name someone
    /// else, everyone else always acts on their own record.
    pub fn subject(&self) -> EmployeeId {
        match &self.entities.employee_id {
            Some(other) if self.user.is_privileged() => EmployeeId(other.clone()),
            _ => EmployeeId(self.user.user_id.clone()),
        }
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    /// Agent name reported in responses.
    fn name(&self) -> &'static str;

    fn available_tools(&self) -> &'static [ToolName];

    async fn process(&self, request: &HandlerRequest) -> Result<HandlerResponse, HandlerError>;

    async fn run_tool(&self, tool: ToolName, request: &HandlerRequest) -> Result<Value, ToolError>;
}

/// Runs `process` with errors, panics and overruns converted into an
/// unsuccessful response.
pub async fn process_guarded(
    handler: &dyn Handler,
    request: &HandlerRequest,
    timeout: Duration,
) -> HandlerResponse {
    let guarded = AssertUnwindSafe(handler.process(request)).catch_unwind();
    match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(Ok(response))) => response,
        Ok(Ok(Err(error))) => {
            warn!(
                event_name = "handler.process.failed",
                session_id = %request.user.session_id,
                handler = handler.name(),
                error = %error,
                "handler returned an error"
            );
            let mut response = HandlerResponse::failure(handler.name(), error.to_string());
            response.response = ApplicationError::from(error)
                .into_interface(request.user.session_id.as_str())
                .user_message()
                .to_string();
            response
        }
        Ok(Err(_panic)) => {
            warn!(
                event_name = "handler.process.panicked",
                session_id = %request.user.session_id,
                handler = handler.name(),
                "handler panicked"
            );
            HandlerResponse::failure(handler.name(), "handler panicked")
        }
        Err(_elapsed) => {
            warn!(
                event_name = "handler.process.timed_out",
                session_id = %request.user.session_id,
                handler = handler.name(),
                timeout_secs = timeout.as_secs(),
                "handler timed out"
            );
            HandlerResponse::failure(
                handler.name(),
                format!("handler timed out after {}s", timeout.as_secs()),
            )
        }
    }
}

/// Handlers keyed by the dispatcher node that activates them.
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: HashMap<PipelineNode, Arc<dyn Handler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave, candidate, payroll and general handlers over one directory.
    pub fn standard(
        directory: Arc<dyn HrDirectory>,
        text: TextService,
        policy: ApprovalPolicy,
    ) -> Self {
        Self::new()
            .with(PipelineNode::Leave, Arc::new(LeaveHandler::new(directory.clone(), policy)))
            .with(PipelineNode::Ats, Arc::new(AtsHandler::new(directory.clone())))
            .with(PipelineNode::Payroll, Arc::new(PayrollHandler::new(directory, policy)))
            .with(PipelineNode::Router, Arc::new(RouterHandler::new(text)))
    }

    pub fn with(mut self, node: PipelineNode, handler: Arc<dyn Handler>) -> Self {
        self.register(node, handler);
        self
    }

    pub fn register(&mut self, node: PipelineNode, handler: Arc<dyn Handler>) {
        self.handlers.insert(node, handler);
    }

    pub fn get(&self, node: PipelineNode) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&node).cloned()
    }
}

/// First rule that yields a branch wins.
pub(crate) fn select_branch<B>(
    rules: &[(&'static str, fn(&HandlerRequest) -> Option<B>)],
    request: &HandlerRequest,
) -> Option<(&'static str, B)> {
    rules.iter().find_map(|(name, rule)| rule(request).map(|branch| (*name, branch)))
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::NaiveDate;
    use hrflow_core::domain::intent::{Entities, Intent};
    use hrflow_core::domain::session::UserContext;

    use super::HandlerRequest;

    pub fn request(
        message: &str,
        intent: Intent,
        entities: Entities,
        role: &str,
    ) -> HandlerRequest {
        HandlerRequest {
            message: message.to_string(),
            intent,
            entities,
            user: UserContext {
                user_id: "EMP001".to_string(),
                username: "ada".to_string(),
                role: role.to_string(),
                department: "Engineering".to_string(),
                session_id: "sess-test".to_string(),
            },
            today: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use hrflow_core::domain::intent::{Entities, Intent};
    use hrflow_core::domain::response::HandlerResponse;
    use hrflow_core::domain::tool::ToolName;
    use hrflow_core::errors::CapabilityError;
    use serde_json::Value;

    use super::testing::request;
    use super::{process_guarded, Handler, HandlerError, HandlerRequest, ToolError};

    struct Exploding {
        panic: bool,
    }

    #[async_trait]
    impl Handler for Exploding {
        fn name(&self) -> &'static str {
            "exploding_agent"
        }

        fn available_tools(&self) -> &'static [ToolName] {
            &[]
        }

        async fn process(
            &self,
            _request: &HandlerRequest,
        ) -> Result<HandlerResponse, HandlerError> {
            if self.panic {
                panic!("boom");
            }
            Err(CapabilityError::Unavailable("directory offline".to_string()).into())
        }

        async fn run_tool(
            &self,
            tool: ToolName,
            _request: &HandlerRequest,
        ) -> Result<Value, ToolError> {
            Err(ToolError::NotAvailable(tool))
        }
    }

    #[tokio::test]
    async fn errors_become_unsuccessful_responses() {
        let request = request("hi", Intent::General, Entities::default(), "employee");
        let response =
            process_guarded(&Exploding { panic: false }, &request, Duration::from_secs(1)).await;

        assert!(!response.success);
        assert_eq!(response.agent, "exploding_agent");
        assert!(response.error.as_deref().is_some_and(|error| error.contains("directory offline")));
        assert!(!response.response.contains("directory offline"));
        assert_eq!(
            response.response,
            "The HR assistant is temporarily unavailable. Please retry shortly."
        );
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let request = request("hi", Intent::General, Entities::default(), "employee");
        let response =
            process_guarded(&Exploding { panic: true }, &request, Duration::from_secs(1)).await;

        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("handler panicked"));
    }

    #[test]
    fn subject_respects_privilege() {
        let entities = Entities { employee_id: Some("EMP009".to_string()), ..Entities::default() };

        let employee = request(
            "payroll for EMP009",
            Intent::PayrollCalculation,
            entities.clone(),
            "employee",
        );
        assert_eq!(employee.subject().0, "EMP001");

        let manager =
            request("payroll for EMP009", Intent::PayrollCalculation, entities, "manager");
        assert_eq!(manager.subject().0, "EMP009");
    }
}
