pub mod audit;
pub mod capabilities;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    NoopAuditSink,
};
pub use capabilities::{
    ContextEntry, HrDirectory, IntentPattern, MemoryStore, PatternUpdate, UserPatterns,
};
pub use config::{AppConfig, ConfigError, LearningMode, LlmProvider, LoadOptions};
pub use domain::intent::{EnhancedIntent, Entities, Intent, IntentClassification};
pub use domain::response::{ActionData, AgentResponse, ChatRequest, ChatResponse, HandlerResponse};
pub use domain::session::{SessionState, UserContext};
pub use domain::tool::{ToolDecision, ToolName, ToolOutcome, ToolResponse, ToolResults};
pub use errors::{ApplicationError, CapabilityError, DomainError, InterfaceError};
pub use flows::{Dispatcher, PipelineNode, TransitionOutcome};
