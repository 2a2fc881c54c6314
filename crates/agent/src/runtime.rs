//! The request pipeline: classify, route to one handler, run its tools,
//! learn, format. Every stage failure is recorded on the session and ends in
//! a stage-named apology; nothing escapes [`AgentRuntime::handle_message`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use hrflow_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use hrflow_core::capabilities::{HrDirectory, MemoryStore};
use hrflow_core::config::{AppConfig, PipelineConfig};
use hrflow_core::domain::intent::IntentClassification;
use hrflow_core::domain::response::{ChatRequest, ChatResponse};
use hrflow_core::domain::session::SessionState;
use hrflow_core::domain::tool::ToolOutcome;
use hrflow_core::flows::{Dispatcher, FlowTransitionError, PipelineNode};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::{CapabilityEstimator, ClassifierError, IntentClassifier, PatternEstimator};
use crate::enrichment::ContextEnricher;
use crate::formatter::{ErrorHandler, ResponseFormatter, STATIC_APOLOGY};
use crate::guardrails::ApprovalPolicy;
use crate::handlers::{process_guarded, Handler, HandlerRequest, HandlerSet};
use crate::learning::{InteractionSummary, MemoryLearner};
use crate::llm::{
    client_from_config, BoundedPromptCache, LlmClient, LlmError, PromptCache, TextService,
};
use crate::tools::ToolExecutor;

const AUDIT_ACTOR: &str = "hrflow-runtime";

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("no handler registered for node `{0}`")]
    MissingHandler(PipelineNode),
    #[error("tool executor reached without an active handler")]
    NoActiveHandler,
    #[error(transparent)]
    Transition(#[from] FlowTransitionError),
    #[error("stage panicked")]
    Panicked,
}

struct ActiveHandler {
    handler: Arc<dyn Handler>,
    request: HandlerRequest,
    skip_tools: bool,
}

/// Assembles an [`AgentRuntime`] from its capabilities.
pub struct RuntimeBuilder {
    pipeline: PipelineConfig,
    directory: Arc<dyn HrDirectory>,
    memory: Arc<dyn MemoryStore>,
    llm: Arc<dyn LlmClient>,
    handlers: Option<HandlerSet>,
    cache: Option<Arc<dyn PromptCache>>,
    audit: Arc<dyn AuditSink>,
    policy: ApprovalPolicy,
}

impl RuntimeBuilder {
    pub fn new(
        pipeline: PipelineConfig,
        directory: Arc<dyn HrDirectory>,
        memory: Arc<dyn MemoryStore>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            pipeline,
            directory,
            memory,
            llm,
            handlers: None,
            cache: None,
            audit: Arc::new(NoopAuditSink),
            policy: ApprovalPolicy::new(),
        }
    }

    /// Replaces the standard leave/candidate/payroll/router handlers.
    pub fn handlers(mut self, handlers: HandlerSet) -> Self {
        self.handlers = Some(handlers);
        self
    }

    pub fn prompt_cache(mut self, cache: Arc<dyn PromptCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn build(self) -> AgentRuntime {
        let pipeline = self.pipeline;
        let capability_timeout = Duration::from_secs(pipeline.capability_timeout_secs);
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(BoundedPromptCache::new(pipeline.cache_capacity)));
        let text =
            TextService::new(self.llm, cache, pipeline.prompt_word_budget, capability_timeout);

        let classifier = IntentClassifier::new(
            PatternEstimator::new(pipeline.pattern_scan_limit),
            CapabilityEstimator::new(text.clone()),
        );
        let enricher = pipeline.enrichment_enabled.then(|| {
            ContextEnricher::new(
                self.memory.clone(),
                text.clone(),
                pipeline.recent_context_limit,
                capability_timeout,
            )
        });
        let handlers = self.handlers.unwrap_or_else(|| {
            HandlerSet::standard(self.directory.clone(), text.clone(), self.policy)
        });
        // Handlers and tools may make a capability call of their own plus a
        // data lookup, so they get twice the single-call budget.
        let stage_timeout = capability_timeout * 2;

        AgentRuntime {
            dispatcher: Dispatcher::new(),
            classifier,
            enricher,
            handlers,
            tools: ToolExecutor::new(
                text,
                self.policy,
                pipeline.max_tools_per_request,
                stage_timeout,
            ),
            learner: MemoryLearner::new(self.memory, pipeline.learning_mode, capability_timeout),
            formatter: ResponseFormatter::new(),
            errors: ErrorHandler::new(),
            audit: self.audit,
            stage_timeout,
        }
    }
}

pub struct AgentRuntime {
    dispatcher: Dispatcher,
    classifier: IntentClassifier,
    enricher: Option<ContextEnricher>,
    handlers: HandlerSet,
    tools: ToolExecutor,
    learner: MemoryLearner,
    formatter: ResponseFormatter,
    errors: ErrorHandler,
    audit: Arc<dyn AuditSink>,
    stage_timeout: Duration,
}

impl AgentRuntime {
    pub fn builder(
        pipeline: PipelineConfig,
        directory: Arc<dyn HrDirectory>,
        memory: Arc<dyn MemoryStore>,
        llm: Arc<dyn LlmClient>,
    ) -> RuntimeBuilder {
        RuntimeBuilder::new(pipeline, directory, memory, llm)
    }

    /// Runtime with the text-understanding client selected by `config.llm`.
    pub fn from_config(
        config: &AppConfig,
        directory: Arc<dyn HrDirectory>,
        memory: Arc<dyn MemoryStore>,
    ) -> Result<Self, LlmError> {
        let timeout = Duration::from_secs(config.pipeline.capability_timeout_secs);
        let llm = client_from_config(&config.llm, timeout)?;
        Ok(RuntimeBuilder::new(config.pipeline.clone(), directory, memory, llm).build())
    }

    /// Answers one message. Always returns a reply.
    pub async fn handle_message(&self, request: ChatRequest) -> ChatResponse {
        let session_id = request.session_id.clone();
        match AssertUnwindSafe(self.run_pipeline(request)).catch_unwind().await {
            Ok(response) => response,
            Err(_panic) => {
                error!(
                    event_name = "pipeline.request.panicked",
                    session_id = %session_id,
                    "pipeline panicked outside any stage"
                );
                ChatResponse::apology(session_id, STATIC_APOLOGY)
            }
        }
    }

    async fn run_pipeline(&self, request: ChatRequest) -> ChatResponse {
        let correlation_id = Uuid::new_v4().to_string();
        let mut state = SessionState::new(&request);
        let audit = AuditContext::new(
            state.session_id(),
            state.user_context().user_id.clone(),
            correlation_id.clone(),
            AUDIT_ACTOR,
        );
        info!(
            event_name = "pipeline.request.received",
            session_id = %state.session_id(),
            correlation_id = %correlation_id,
            "processing chat request"
        );

        let mut active = None;
        let mut reply = None;
        let mut node = self.dispatcher.initial_node();

        while !node.is_terminal() {
            state.enter(node);
            match node {
                PipelineNode::ResponseFormatter => reply = Some(self.formatter.format(&state)),
                PipelineNode::Error => reply = Some(self.errors.respond(&state)),
                _ => {
                    let stage = AssertUnwindSafe(self.run_stage(node, &mut state, &mut active))
                        .catch_unwind()
                        .await
                        .unwrap_or(Err(StageError::Panicked));
                    if let Err(stage_error) = stage {
                        self.record_failure(node, &stage_error, &mut state, &audit);
                    }
                }
            }

            node = match self.dispatcher.next_with_audit(node, &state, self.audit.as_ref(), &audit)
            {
                Ok(outcome) => outcome.to,
                Err(transition_error) => {
                    self.record_failure(
                        node,
                        &StageError::from(transition_error),
                        &mut state,
                        &audit,
                    );
                    reply = Some(self.errors.respond(&state));
                    break;
                }
            };
        }

        let reply = reply.unwrap_or_else(|| self.errors.respond(&state));
        info!(
            event_name = "pipeline.request.completed",
            session_id = %reply.session_id,
            correlation_id = %correlation_id,
            success = reply.success,
            agent = %reply.agent,
            intent = %reply.metadata.intent,
            "chat request completed"
        );
        reply
    }

    fn record_failure(
        &self,
        node: PipelineNode,
        stage_error: &StageError,
        state: &mut SessionState,
        audit: &AuditContext,
    ) {
        let first = state.fail(node, stage_error.to_string());
        warn!(
            event_name = "pipeline.stage.failed",
            session_id = %state.session_id(),
            correlation_id = %audit.correlation_id,
            node = node.as_str(),
            error = %stage_error,
            first_failure = first,
            "pipeline stage failed"
        );
        self.audit.emit(
            AuditEvent::new(
                audit,
                "pipeline.stage_failed",
                AuditCategory::System,
                AuditOutcome::Failed,
            )
            .with_metadata("node", node.as_str())
            .with_metadata("error", stage_error.to_string()),
        );
    }

    async fn run_stage(
        &self,
        node: PipelineNode,
        state: &mut SessionState,
        active: &mut Option<ActiveHandler>,
    ) -> Result<(), StageError> {
        match node {
            PipelineNode::Classify => self.classify(state).await,
            handler_node if handler_node.is_handler() => {
                *active = Some(self.run_handler(handler_node, state).await?);
                Ok(())
            }
            PipelineNode::ToolExecutor => {
                let active = active.as_ref().ok_or(StageError::NoActiveHandler)?;
                self.execute_tools(state, active).await;
                Ok(())
            }
            PipelineNode::MemoryLearner => {
                self.learn(state).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn classify(&self, state: &mut SessionState) -> Result<(), StageError> {
        let message = state.latest_message().to_string();
        let user = state.user_context().clone();

        let classification = match self.classifier.classify(&message, &user).await {
            Ok(classification) => classification,
            Err(classifier_error) => {
                state.apply_classification(IntentClassification::failed());
                return Err(classifier_error.into());
            }
        };
        state.agent_response.insert_extra(
            "classification",
            json!({ "intent": classification.intent, "confidence": classification.confidence }),
        );
        state.apply_classification(classification);

        if let Some(enricher) = &self.enricher {
            let enrichment = enricher.enrich(&state.intent, &message, &user).await;
            state.agentic_context.memory_enhanced = enrichment.memory_found;
            if let Some(emotional_context) = &enrichment.enhanced.emotional_context {
                state.agent_response.insert_extra("emotional_context", json!(emotional_context));
            }
            if !enrichment.enhanced.personalization.is_empty() {
                state
                    .agent_response
                    .insert_extra("personalization", json!(enrichment.enhanced.personalization));
            }
            state.apply_enrichment(enrichment.enhanced);
        }
        Ok(())
    }

    async fn run_handler(
        &self,
        node: PipelineNode,
        state: &mut SessionState,
    ) -> Result<ActiveHandler, StageError> {
        let handler = self.handlers.get(node).ok_or(StageError::MissingHandler(node))?;
        let request = HandlerRequest::from_state(state);

        let response = process_guarded(handler.as_ref(), &request, self.stage_timeout).await;
        state.agent_response.merge_handler(&response);
        state.agentic_context.ai_generated |= response.ai_generated;
        if response.requires_approval {
            state.require_approval(response.approval_notice.as_deref());
        }

        Ok(ActiveHandler { handler, request, skip_tools: response.skip_tools })
    }

    async fn execute_tools(&self, state: &mut SessionState, active: &ActiveHandler) {
        let outcome = if active.skip_tools {
            debug!(
                event_name = "tools.execution.skipped",
                session_id = %state.session_id(),
                agent = active.handler.name(),
                "handler settled the request; no tools run"
            );
            ToolOutcome::skipped("handler settled the request without tools")
        } else {
            self.tools.execute_with_tools(active.handler.as_ref(), &active.request).await
        };

        state.tool_results.record(&outcome);
        state.execution_success &= outcome.execution_success;
        if outcome.requires_human_approval {
            state.require_approval(None);
        }
        for notice in &outcome.approval_notices {
            state.require_approval(Some(notice.as_str()));
        }
        state.agent_response.insert_extra(
            "tool_decision",
            json!({ "source": outcome.decision.source, "reasoning": outcome.decision.reasoning }),
        );
    }

    async fn learn(&self, state: &mut SessionState) {
        let agent_response = &state.agent_response;
        let summary = InteractionSummary {
            user_id: state.user_context().user_id.clone(),
            session_id: state.session_id().to_string(),
            message: state.latest_message().to_string(),
            intent: state.intent.to_string(),
            confidence: state.confidence,
            agent: agent_response.agent.clone().unwrap_or_else(|| "unknown".to_string()),
            success: agent_response.success.unwrap_or(false),
            tools_used: state
                .tool_results
                .tools_used
                .iter()
                .map(|tool| tool.as_str().to_string())
                .collect(),
        };

        let results = self.learner.record(summary).await;
        state.agent_response.learning_results = Some(results);
    }
}
