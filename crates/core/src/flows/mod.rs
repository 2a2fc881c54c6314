pub mod engine;
pub mod states;

pub use engine::{route, route_intent, Dispatcher, FlowTransitionError, LEAVE_INTENT_PREFIXES};
pub use states::{PipelineNode, TransitionOutcome, TransitionReason};
