use chrono::Utc;
use hrflow_core::domain::response::{ActionData, ChatResponse, ResponseMetadata};
use hrflow_core::domain::session::SessionState;

pub const FALLBACK_RESPONSE: &str =
    "I'm sorry, I couldn't put together an answer. Could you rephrase your request?";

pub const STATIC_APOLOGY: &str = "I'm sorry, something went wrong. Please try again later.";

const APPROVAL_NOTICE: &str =
    "This request needs approval from a manager or HR before it takes effect.";

const PARTIAL_NOTICE: &str =
    "Some steps could not be completed, so parts of this answer may be missing.";

fn metadata(state: &SessionState) -> ResponseMetadata {
    ResponseMetadata {
        intent: state.intent.to_string(),
        confidence: state.confidence,
        tools_used: state.tool_results.tools_used.clone(),
        requires_human_approval: state.requires_human_approval(),
        execution_success: state.execution_success,
        context_aware: state.agentic_context.context_aware,
        memory_enhanced: state.agentic_context.memory_enhanced,
        ai_generated: state.agentic_context.ai_generated,
        learning: state.agent_response.learning_results.clone(),
        failed_node: state.error_state().map(|error| error.node.as_str().to_string()),
    }
}

/// Builds the final reply from the accumulated agent response.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseFormatter;

impl ResponseFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn format(&self, state: &SessionState) -> ChatResponse {
        let agent_response = &state.agent_response;
        let body = [
            agent_response.formatted_response.as_deref(),
            agent_response.response.as_deref(),
            agent_response.error_response.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|text| !text.is_empty());

        let mut response = body.unwrap_or(FALLBACK_RESPONSE).to_string();
        let asking_for_input =
            matches!(agent_response.action_data, Some(ActionData::FormCompletion { .. }));
        if state.requires_human_approval() && !asking_for_input {
            response.push_str("\n\n");
            match state.approval_notices() {
                [] => response.push_str(APPROVAL_NOTICE),
                notices => response.push_str(&notices.join(" ")),
            }
        }
        if !state.execution_success && !asking_for_input {
            response.push_str("\n\n");
            response.push_str(PARTIAL_NOTICE);
        }

        ChatResponse {
            success: body.is_some() && agent_response.success.unwrap_or(false),
            response,
            agent: agent_response.agent.clone().unwrap_or_else(|| "hr_assistant".to_string()),
            confidence: state.confidence,
            requires_action: agent_response.requires_action,
            action_data: agent_response.action_data.clone(),
            session_id: state.session_id().to_string(),
            timestamp: Utc::now(),
            metadata: metadata(state),
        }
    }
}

/// Terminal stage for any recorded failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorHandler;

impl ErrorHandler {
    pub fn new() -> Self {
        Self
    }

    /// Never fails: without an error state it falls back to [`STATIC_APOLOGY`].
    pub fn respond(&self, state: &SessionState) -> ChatResponse {
        let Some(error) = state.error_state() else {
            return ChatResponse::apology(state.session_id(), STATIC_APOLOGY);
        };

        let text = format!(
            "I'm sorry, I ran into a problem while {}. Please try again in a moment.",
            error.node.describe()
        );
        ChatResponse {
            success: false,
            response: text,
            agent: "error_handler".to_string(),
            confidence: state.confidence,
            requires_action: false,
            action_data: None,
            session_id: state.session_id().to_string(),
            timestamp: Utc::now(),
            metadata: metadata(state),
        }
    }
}
