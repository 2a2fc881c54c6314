use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::intent::Intent;
use crate::domain::session::SessionState;
use crate::flows::states::{PipelineNode, TransitionOutcome, TransitionReason};

/// Intent prefixes owned by the leave handler.
pub const LEAVE_INTENT_PREFIXES: &[&str] =
    &["leave_request", "leave_status", "leave_history", "leave_approval"];

/// Maps an intent to exactly one branch. Evaluated in fixed precedence order;
/// every label lands somewhere.
pub fn route(state: &SessionState) -> PipelineNode {
    if state.error_state().is_some() {
        return PipelineNode::Error;
    }
    route_intent(&state.intent)
}

pub fn route_intent(intent: &Intent) -> PipelineNode {
    let label = intent.as_str();
    if LEAVE_INTENT_PREFIXES.iter().any(|prefix| label.starts_with(prefix)) {
        return PipelineNode::Leave;
    }
    match intent {
        Intent::CandidateSearch => PipelineNode::Ats,
        Intent::PayrollCalculation => PipelineNode::Payroll,
        _ => PipelineNode::Router,
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("pipeline already finished; no transition out of {0}")]
    AlreadyFinished(PipelineNode),
}

/// The request-pipeline state machine.
///
/// `classify` fans out to one handler (or `error`); handlers run
/// `tool_executor -> memory_learner -> response_formatter -> end`. A recorded
/// error state diverts any non-terminal node to `error`.
#[derive(Clone, Debug, Default)]
pub struct Dispatcher;

impl Dispatcher {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_node(&self) -> PipelineNode {
        PipelineNode::Classify
    }

    pub fn next(
        &self,
        current: PipelineNode,
        state: &SessionState,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        use PipelineNode::{
            Ats, Classify, End, Error, Leave, MemoryLearner, Payroll, ResponseFormatter, Router,
            ToolExecutor,
        };

        if current == End {
            return Err(FlowTransitionError::AlreadyFinished(current));
        }

        if current != Error {
            if let Some(error_state) = state.error_state() {
                return Ok(TransitionOutcome {
                    from: current,
                    to: Error,
                    reason: TransitionReason::ErrorDiverted { failed_node: error_state.node },
                });
            }
        }

        let (to, reason) = match current {
            Classify => {
                (route(state), TransitionReason::Routed { intent: state.intent.to_string() })
            }
            Router | Leave | Ats | Payroll => (ToolExecutor, TransitionReason::Sequential),
            ToolExecutor => (MemoryLearner, TransitionReason::Sequential),
            MemoryLearner => (ResponseFormatter, TransitionReason::Sequential),
            ResponseFormatter | Error => (End, TransitionReason::Completed),
            End => return Err(FlowTransitionError::AlreadyFinished(current)),
        };

        Ok(TransitionOutcome { from: current, to, reason })
    }

    pub fn next_with_audit<S>(
        &self,
        current: PipelineNode,
        state: &SessionState,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.next(current, state);
        match &result {
            Ok(outcome) => {
                let outcome_kind = match outcome.reason {
                    TransitionReason::ErrorDiverted { .. } => AuditOutcome::Rejected,
                    _ => AuditOutcome::Success,
                };
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "dispatcher.transition_applied",
                        AuditCategory::Routing,
                        outcome_kind,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("intent", state.intent.as_str()),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "dispatcher.transition_rejected",
                        AuditCategory::Routing,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::intent::Intent;
    use crate::domain::response::{ChatRequest, RequestUser};
    use crate::domain::session::SessionState;
    use crate::flows::engine::{route, route_intent, Dispatcher, FlowTransitionError};
    use crate::flows::states::{PipelineNode, TransitionReason};

    fn state_with_intent(intent: Intent) -> SessionState {
        let mut state = SessionState::new(&ChatRequest {
            message: "hi".to_string(),
            session_id: "sess-9".to_string(),
            user_context: RequestUser {
                user_id: "EMP001".to_string(),
                username: "ada".to_string(),
                role: "employee".to_string(),
                department: "Engineering".to_string(),
            },
        });
        state.intent = intent;
        state
    }

    #[test]
    fn routing_table_matches_precedence() {
        let cases = [
            (Intent::LeaveRequest, PipelineNode::Leave),
            (Intent::LeaveStatus, PipelineNode::Leave),
            (Intent::LeaveHistory, PipelineNode::Leave),
            (Intent::LeaveApproval, PipelineNode::Leave),
            (Intent::Other("leave_status_detail".to_string()), PipelineNode::Leave),
            (Intent::CandidateSearch, PipelineNode::Ats),
            (Intent::PayrollCalculation, PipelineNode::Payroll),
            (Intent::Greeting, PipelineNode::Router),
            (Intent::Help, PipelineNode::Router),
            (Intent::General, PipelineNode::Router),
            (Intent::Other("book_flight".to_string()), PipelineNode::Router),
            (Intent::Other("leave".to_string()), PipelineNode::Router),
        ];

        for (intent, expected) in cases {
            assert_eq!(route_intent(&intent), expected, "intent {intent}");
        }
    }

    #[test]
    fn error_state_always_routes_to_error() {
        for intent in [Intent::LeaveRequest, Intent::CandidateSearch, Intent::General] {
            let mut state = state_with_intent(intent);
            state.fail(PipelineNode::Classify, "boom");
            assert_eq!(route(&state), PipelineNode::Error);
        }
    }

    #[test]
    fn handler_path_runs_to_end() {
        let dispatcher = Dispatcher::new();
        let state = state_with_intent(Intent::CandidateSearch);
        let mut node = dispatcher.initial_node();
        let mut visited = vec![node];

        while !node.is_terminal() {
            node = dispatcher.next(node, &state).expect("legal transition").to;
            visited.push(node);
        }

        assert_eq!(
            visited,
            vec![
                PipelineNode::Classify,
                PipelineNode::Ats,
                PipelineNode::ToolExecutor,
                PipelineNode::MemoryLearner,
                PipelineNode::ResponseFormatter,
                PipelineNode::End,
            ]
        );
    }

    #[test]
    fn failure_mid_pipeline_diverts_then_ends() {
        let dispatcher = Dispatcher::new();
        let mut state = state_with_intent(Intent::PayrollCalculation);
        state.fail(PipelineNode::ToolExecutor, "tool plan corrupted");

        let diverted = dispatcher.next(PipelineNode::ToolExecutor, &state).expect("divert");
        assert_eq!(diverted.to, PipelineNode::Error);
        assert_eq!(
            diverted.reason,
            TransitionReason::ErrorDiverted { failed_node: PipelineNode::ToolExecutor }
        );

        let finished = dispatcher.next(PipelineNode::Error, &state).expect("error -> end");
        assert_eq!(finished.to, PipelineNode::End);
        assert_eq!(
            dispatcher.next(PipelineNode::End, &state),
            Err(FlowTransitionError::AlreadyFinished(PipelineNode::End))
        );
    }

    #[test]
    fn transitions_emit_audit_events() {
        let dispatcher = Dispatcher::new();
        let sink = InMemoryAuditSink::default();
        let state = state_with_intent(Intent::LeaveStatus);
        let audit = AuditContext::new("sess-9", "EMP001", "req-1", "dispatcher");

        dispatcher
            .next_with_audit(PipelineNode::Classify, &state, &sink, &audit)
            .expect("classify -> leave");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "dispatcher.transition_applied");
        assert_eq!(events[0].metadata["to"], "leave");
        assert_eq!(events[0].session_id, "sess-9");
    }
}
