use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::intent::Entities;
use crate::domain::tool::ToolName;

/// Inbound message as received from the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
    pub user_context: RequestUser,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestUser {
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub department: String,
}

/// Machine-readable follow-up attached to a reply when `requires_action` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionData {
    FormCompletion {
        missing_fields: Vec<String>,
        collected: Entities,
    },
    LeaveApproval {
        leave_id: String,
        employee_id: String,
        working_days: u32,
    },
    PayrollApproval {
        department: String,
        period: String,
        employee_count: usize,
    },
    ReviewPendingApprovals {
        leave_ids: Vec<String>,
    },
}

impl ActionData {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FormCompletion { .. } => "form_completion",
            Self::LeaveApproval { .. } => "leave_approval",
            Self::PayrollApproval { .. } => "payroll_approval",
            Self::ReviewPendingApprovals { .. } => "review_pending_approvals",
        }
    }
}

/// What every handler returns from `process`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandlerResponse {
    pub success: bool,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_response: Option<String>,
    pub requires_action: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_data: Option<ActionData>,
    pub requires_approval: bool,
    /// Shown to the user when `requires_approval` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_notice: Option<String>,
    /// The handler settled the request on its own (a refusal, a form prompt);
    /// no tools run after it.
    #[serde(default)]
    pub skip_tools: bool,
    pub agent: String,
    /// Structured payload behind the prose (candidate lists, payroll figures).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Set when the prose came from the text-understanding capability.
    #[serde(default)]
    pub ai_generated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HandlerResponse {
    pub fn ok(agent: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: response.into(),
            formatted_response: None,
            requires_action: false,
            action_data: None,
            requires_approval: false,
            approval_notice: None,
            skip_tools: false,
            agent: agent.into(),
            data: None,
            ai_generated: false,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(agent: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            response: "I wasn't able to complete that request. Please try again or contact HR."
                .to_string(),
            formatted_response: None,
            requires_action: false,
            action_data: None,
            requires_approval: false,
            approval_notice: None,
            skip_tools: false,
            agent: agent.into(),
            data: None,
            ai_generated: false,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    pub fn with_action(mut self, action: ActionData) -> Self {
        self.requires_action = true;
        self.action_data = Some(action);
        self
    }

    /// `Some(notice)` marks the response as needing human approval.
    pub fn with_approval(mut self, notice: Option<&str>) -> Self {
        self.requires_approval = notice.is_some();
        self.approval_notice = notice.map(str::to_string);
        self
    }

    pub fn without_tools(mut self) -> Self {
        self.skip_tools = true;
        self
    }

    pub fn with_formatted(mut self, formatted: impl Into<String>) -> Self {
        self.formatted_response = Some(formatted.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn generated(mut self) -> Self {
        self.ai_generated = true;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningResults {
    pub learning_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patterns_updated: Option<bool>,
}

impl LearningResults {
    pub fn unavailable() -> Self {
        Self { learning_available: false, mode: None, patterns_updated: None }
    }
}

/// Accumulating response record threaded through the pipeline.
///
/// Stages only fill fields that are still empty; nothing already written is
/// removed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: Option<bool>,
    pub agent: Option<String>,
    pub response: Option<String>,
    pub formatted_response: Option<String>,
    pub error_response: Option<String>,
    pub requires_action: bool,
    pub action_data: Option<ActionData>,
    pub handler_error: Option<String>,
    pub learning_results: Option<LearningResults>,
    pub extras: BTreeMap<String, Value>,
}

impl AgentResponse {
    pub fn merge_handler(&mut self, handler: &HandlerResponse) {
        self.success.get_or_insert(handler.success);
        self.agent.get_or_insert_with(|| handler.agent.clone());
        if self.response.is_none() {
            self.response = Some(handler.response.clone());
        }
        if self.formatted_response.is_none() {
            self.formatted_response = handler.formatted_response.clone();
        }
        if handler.requires_action {
            self.requires_action = true;
        }
        if self.action_data.is_none() {
            self.action_data = handler.action_data.clone();
        }
        if self.handler_error.is_none() {
            self.handler_error = handler.error.clone();
        }
        if let Some(data) = &handler.data {
            self.insert_extra("handler_data", data.clone());
        }
    }

    pub fn insert_extra(&mut self, key: impl Into<String>, value: Value) {
        self.extras.entry(key.into()).or_insert(value);
    }
}

/// Non-user-facing diagnostics attached to every reply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub intent: String,
    pub confidence: f64,
    pub tools_used: Vec<ToolName>,
    pub requires_human_approval: bool,
    pub execution_success: bool,
    pub context_aware: bool,
    pub memory_enhanced: bool,
    pub ai_generated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning: Option<LearningResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<String>,
}

/// Final payload returned to the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub success: bool,
    pub response: String,
    pub agent: String,
    pub confidence: f64,
    pub requires_action: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_data: Option<ActionData>,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: ResponseMetadata,
}

impl ChatResponse {
    /// Last-resort reply used when nothing else could be produced.
    pub fn apology(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            response: message.into(),
            agent: "error_handler".to_string(),
            confidence: 0.0,
            requires_action: false,
            action_data: None,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            metadata: ResponseMetadata::default(),
        }
    }
}
