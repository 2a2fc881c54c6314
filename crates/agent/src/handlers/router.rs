use async_trait::async_trait;
use hrflow_core::domain::intent::Intent;
use hrflow_core::domain::response::HandlerResponse;
use hrflow_core::domain::tool::ToolName;
use serde_json::Value;
use tracing::warn;

use super::{select_branch, Handler, HandlerError, HandlerRequest, ToolError};
use crate::llm::{CacheScope, TextService};

const AGENT_NAME: &str = "router_agent";

const ANSWER_FORMAT: &str = "Answer in at most three sentences.";

const ORIENTATION: &str = "I'm the HR assistant. I can request leave, check leave balances \
     and history, review pending approvals, search candidates, and calculate payroll. Try \
     \"What's my leave balance?\" or \"Find Java developers\".";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RouterBranch {
    Greeting,
    Help,
    Answer,
}

type RouterRule = (&'static str, fn(&HandlerRequest) -> Option<RouterBranch>);

const ROUTER_RULES: &[RouterRule] = &[("greeting", greeting), ("help", help)];

fn greeting(request: &HandlerRequest) -> Option<RouterBranch> {
    (request.intent == Intent::Greeting).then_some(RouterBranch::Greeting)
}

fn help(request: &HandlerRequest) -> Option<RouterBranch> {
    (request.intent == Intent::Help).then_some(RouterBranch::Help)
}

/// General conversation: greetings, help, and anything no domain handler owns.
pub struct RouterHandler {
    text: TextService,
}

impl RouterHandler {
    pub fn new(text: TextService) -> Self {
        Self { text }
    }

    async fn answer(&self, request: &HandlerRequest) -> HandlerResponse {
        let prompt = format!(
            "You are a concise, friendly HR assistant. If the question needs HR records you \
             do not have, say so.\nEmployee role: {}\nDepartment: {}\nQuestion: {}",
            request.user.role, request.user.department, request.message
        );

        let scope = CacheScope::User(request.user.user_id.clone());
        match self.text.ask(scope, &prompt, ANSWER_FORMAT).await {
            Ok(answer) if !answer.trim().is_empty() => {
                HandlerResponse::ok(AGENT_NAME, answer.trim()).generated()
            }
            Ok(_) => HandlerResponse::ok(AGENT_NAME, ORIENTATION),
            Err(error) => {
                warn!(
                    event_name = "router.answer.degraded",
                    session_id = %request.user.session_id,
                    error = %error,
                    "general answer unavailable; sending orientation"
                );
                HandlerResponse::ok(AGENT_NAME, ORIENTATION)
            }
        }
    }
}

#[async_trait]
impl Handler for RouterHandler {
    fn name(&self) -> &'static str {
        AGENT_NAME
    }

    fn available_tools(&self) -> &'static [ToolName] {
        &[]
    }

    async fn process(&self, request: &HandlerRequest) -> Result<HandlerResponse, HandlerError> {
        let branch = select_branch(ROUTER_RULES, request).map(|(_, branch)| branch);
        Ok(match branch.unwrap_or(RouterBranch::Answer) {
            RouterBranch::Greeting => HandlerResponse::ok(
                AGENT_NAME,
                format!(
                    "Hello {}! How can I help with your HR questions today?",
                    request.user.username
                ),
            ),
            RouterBranch::Help => HandlerResponse::ok(AGENT_NAME, ORIENTATION),
            RouterBranch::Answer => self.answer(request).await,
        })
    }

    async fn run_tool(
        &self,
        tool: ToolName,
        _request: &HandlerRequest,
    ) -> Result<Value, ToolError> {
        Err(ToolError::NotAvailable(tool))
    }
}
