use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::intent::{EnhancedIntent, Entities, Intent, IntentClassification};
use crate::domain::response::{AgentResponse, ChatRequest};
use crate::domain::tool::ToolResults;
use crate::flows::states::PipelineNode;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub department: String,
    pub session_id: String,
}

impl UserContext {
    /// Managers, HR staff and admins may act on other people's records.
    pub fn is_privileged(&self) -> bool {
        matches!(self.role.trim().to_ascii_lowercase().as_str(), "manager" | "hr" | "admin")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorState {
    pub node: PipelineNode,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Cross-cutting flags read by the formatter only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgenticContext {
    pub context_aware: bool,
    pub memory_enhanced: bool,
    pub ai_generated: bool,
}

/// Per-request record threaded through every pipeline stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    messages: Vec<ChatMessage>,
    pub intent: Intent,
    pub confidence: f64,
    pub entities: Entities,
    user_context: UserContext,
    pub agent_response: AgentResponse,
    pub tool_results: ToolResults,
    requires_human_approval: bool,
    approval_notices: Vec<String>,
    error_state: Option<ErrorState>,
    pub agentic_context: AgenticContext,
    current_node: PipelineNode,
    pub execution_success: bool,
}

impl SessionState {
    pub fn new(request: &ChatRequest) -> Self {
        let user = &request.user_context;
        Self {
            messages: vec![ChatMessage { content: request.message.clone(), timestamp: Utc::now() }],
            intent: Intent::General,
            confidence: 0.0,
            entities: Entities::default(),
            user_context: UserContext {
                user_id: user.user_id.clone(),
                username: user.username.clone(),
                role: user.role.clone(),
                department: user.department.clone(),
                session_id: request.session_id.clone(),
            },
            agent_response: AgentResponse::default(),
            tool_results: ToolResults::default(),
            requires_human_approval: false,
            approval_notices: Vec::new(),
            error_state: None,
            agentic_context: AgenticContext::default(),
            current_node: PipelineNode::Classify,
            execution_success: true,
        }
    }

    /// The most recent message.
    pub fn latest_message(&self) -> &str {
        self.messages.last().map(|message| message.content.as_str()).unwrap_or_default()
    }

    pub fn user_context(&self) -> &UserContext {
        &self.user_context
    }

    pub fn session_id(&self) -> &str {
        &self.user_context.session_id
    }

    pub fn current_node(&self) -> PipelineNode {
        self.current_node
    }

    pub fn enter(&mut self, node: PipelineNode) {
        self.current_node = node;
    }

    pub fn apply_classification(&mut self, classification: IntentClassification) {
        self.intent = classification.intent;
        self.confidence = classification.confidence;
        self.entities.merge_missing(classification.entities);
    }

    /// Applies a successful enrichment. A pass-through enrichment changes nothing.
    ///
    /// A positive adjustment replaces the blended confidence rather than adding to it.
    pub fn apply_enrichment(&mut self, enhanced: EnhancedIntent) {
        if enhanced.is_passthrough() {
            return;
        }
        if !matches!(enhanced.intent, Intent::Error) && !enhanced.intent.as_str().is_empty() {
            self.intent = enhanced.intent;
        }
        self.entities.merge_missing(enhanced.enhanced_entities);
        if enhanced.confidence_adjustment > 0.0 {
            self.confidence = enhanced.confidence_adjustment.clamp(0.0, 1.0);
        }
        self.agentic_context.context_aware = true;
    }

    pub fn requires_human_approval(&self) -> bool {
        self.requires_human_approval
    }

    /// Latches approval on; there is no way to clear it. Each distinct
    /// notice is kept once, in the order it was first raised.
    pub fn require_approval(&mut self, notice: Option<&str>) {
        self.requires_human_approval = true;
        let Some(notice) = notice.map(str::trim).filter(|notice| !notice.is_empty()) else {
            return;
        };
        if !self.approval_notices.iter().any(|known| known == notice) {
            self.approval_notices.push(notice.to_string());
        }
    }

    pub fn approval_notices(&self) -> &[String] {
        &self.approval_notices
    }

    pub fn error_state(&self) -> Option<&ErrorState> {
        self.error_state.as_ref()
    }

    /// Records a stage failure. Only the first failure is kept.
    pub fn fail(&mut self, node: PipelineNode, error: impl Into<String>) -> bool {
        if self.error_state.is_some() {
            return false;
        }
        self.error_state = Some(ErrorState { node, error: error.into(), timestamp: Utc::now() });
        self.current_node = node;
        true
    }
}
