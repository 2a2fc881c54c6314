use std::fmt;

use serde::{Deserialize, Serialize};

/// Stages of the request pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineNode {
    Classify,
    Router,
    Leave,
    Ats,
    Payroll,
    ToolExecutor,
    MemoryLearner,
    ResponseFormatter,
    Error,
    End,
}

impl PipelineNode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Router => "router",
            Self::Leave => "leave",
            Self::Ats => "ats",
            Self::Payroll => "payroll",
            Self::ToolExecutor => "tool_executor",
            Self::MemoryLearner => "memory_learner",
            Self::ResponseFormatter => "response_formatter",
            Self::Error => "error",
            Self::End => "end",
        }
    }

    pub fn is_handler(&self) -> bool {
        matches!(self, Self::Router | Self::Leave | Self::Ats | Self::Payroll)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Human-readable stage name used in user-facing apologies.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Classify => "understanding your request",
            Self::Router => "answering your question",
            Self::Leave => "processing your leave request",
            Self::Ats => "searching candidates",
            Self::Payroll => "calculating payroll",
            Self::ToolExecutor => "completing the required actions",
            Self::MemoryLearner => "saving your preferences",
            Self::ResponseFormatter => "preparing the response",
            Self::Error => "handling an earlier problem",
            Self::End => "finishing up",
        }
    }
}

impl fmt::Display for PipelineNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the dispatcher moved from one node to the next.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionReason {
    Routed { intent: String },
    Sequential,
    ErrorDiverted { failed_node: PipelineNode },
    Completed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: PipelineNode,
    pub to: PipelineNode,
    pub reason: TransitionReason,
}
