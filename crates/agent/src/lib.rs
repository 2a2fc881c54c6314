//! The hrflow request pipeline.
//!
//! A message is classified (pattern table blended with the text-understanding
//! capability), optionally enriched from user memory, routed by the
//! dispatcher to exactly one domain handler, followed by that handler's tools,
//! a best-effort memory write and the response formatter.
//!
//! Capabilities are injected: [`hrflow_core::capabilities::HrDirectory`] for HR
//! data, [`hrflow_core::capabilities::MemoryStore`] for long-term memory and
//! [`llm::LlmClient`] for text understanding. The capability never decides
//! approval; that comes from [`guardrails::ApprovalPolicy`].

pub mod classifier;
pub mod enrichment;
pub mod entities;
pub mod formatter;
pub mod guardrails;
pub mod handlers;
pub mod learning;
pub mod llm;
pub mod runtime;
pub mod tools;

#[cfg(test)]
mod testing;

pub use runtime::{AgentRuntime, RuntimeBuilder, StageError};
