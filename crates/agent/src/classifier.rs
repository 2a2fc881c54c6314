use std::sync::OnceLock;

use hrflow_core::domain::intent::{Intent, IntentClassification, ALLOWED_INTENT_LABELS};
use hrflow_core::domain::session::UserContext;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::entities::EntityExtractor;
use crate::llm::{CacheScope, TextService};

pub const PATTERN_MATCH_CONFIDENCE: f64 = 0.9;
pub const PATTERN_MISS_CONFIDENCE: f64 = 0.3;
pub const PATTERN_FAILURE_CONFIDENCE: f64 = 0.5;
pub const CAPABILITY_MATCH_CONFIDENCE: f64 = 0.75;
pub const CAPABILITY_MISS_CONFIDENCE: f64 = 0.4;
pub const CAPABILITY_FAILURE_CONFIDENCE: f64 = 0.3;

const PATTERN_WINS_ABOVE: f64 = 0.8;
const CAPABILITY_WINS_ABOVE: f64 = 0.7;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("message length {len} exceeds pattern scan limit {limit}")]
    MessageTooLong { len: usize, limit: usize },
    #[error("intent pattern table failed to compile")]
    PatternTable,
}

/// One estimator's verdict.
#[derive(Clone, Debug, PartialEq)]
pub struct Estimate {
    pub intent: Intent,
    pub confidence: f64,
}

impl Estimate {
    pub fn new(intent: Intent, confidence: f64) -> Self {
        Self { intent, confidence }
    }
}

/// Picks between the two estimates. A confident pattern match always wins,
/// then a confident capability answer, then whichever is higher (ties go to
/// the pattern estimator).
pub fn blend(pattern: Estimate, capability: Estimate) -> Estimate {
    if pattern.confidence > PATTERN_WINS_ABOVE {
        return pattern;
    }
    if capability.confidence > CAPABILITY_WINS_ABOVE {
        return capability;
    }
    if capability.confidence > pattern.confidence {
        capability
    } else {
        pattern
    }
}

type PatternTable = Vec<(Intent, Vec<Regex>)>;

fn pattern_table() -> Option<&'static PatternTable> {
    static TABLE: OnceLock<Option<PatternTable>> = OnceLock::new();
    TABLE
        .get_or_init(|| {
            let rows: [(Intent, &[&str]); 8] = [
                (
                    Intent::LeaveApproval,
                    &[
                        r"\b(approve|reject|review)\b.*\b(leave|leaves|time off|requests?)\b",
                        r"\bpending (leave )?(approvals?|requests?)\b",
                        r"\bleave approvals?\b",
                    ],
                ),
                (
                    Intent::LeaveHistory,
                    &[
                        r"\bleave history\b",
                        r"\b(past|previous|earlier) (leaves?|time off|absences?)\b",
                        r"\bleaves? (have i|did i) (taken|take)\b",
                    ],
                ),
                (
                    Intent::LeaveStatus,
                    &[
                        r"\bleave balance\b",
                        r"\bhow many (leave |vacation |holiday |sick )?days\b",
                        r"\b(status of|check) my (leave|request)\b",
                        r"\bdays? (off )?(left|remaining)\b",
                    ],
                ),
                (
                    Intent::LeaveRequest,
                    &[
                        concat!(
                            r"\b(request|apply for|book|take|need|want)\b.*",
                            r"\b(leave|vacation|time off|days? off|holiday)\b",
                        ),
                        r"\b(sick|annual|personal|maternity|paternity|unpaid) leave\b",
                    ],
                ),
                (
                    Intent::CandidateSearch,
                    &[
                        concat!(
                            r"\b(find|search|looking for|show|list|hire|hiring)\b.*",
                            r"\b(candidates?|developers?|engineers?|designers?|analysts?|",
                            r"applicants?|talent)\b",
                        ),
                        r"\b(candidate|applicant) (profile|details)\b",
                        r"\bprofile of\b",
                    ],
                ),
                (
                    Intent::PayrollCalculation,
                    &[r"\b(payroll|payslip|pay slip|salary|salaries|net pay|gross pay)\b"],
                ),
                (
                    Intent::Greeting,
                    &[r"^\s*(hi|hello|hey|good (morning|afternoon|evening))\b"],
                ),
                (
                    Intent::Help,
                    &[r"\b(help|what can you do|how do i use)\b"],
                ),
            ];

            let mut table = PatternTable::with_capacity(rows.len());
            for (intent, sources) in rows {
                let mut compiled = Vec::with_capacity(sources.len());
                for source in sources {
                    compiled.push(Regex::new(&format!("(?i){source}")).ok()?);
                }
                table.push((intent, compiled));
            }
            Some(table)
        })
        .as_ref()
}

/// Deterministic estimator backed by an ordered table of intent patterns.
#[derive(Clone, Debug)]
pub struct PatternEstimator {
    scan_limit: usize,
}

impl PatternEstimator {
    pub fn new(scan_limit: usize) -> Self {
        Self { scan_limit }
    }

    pub fn estimate(&self, message: &str) -> Result<Estimate, ClassifierError> {
        if message.len() > self.scan_limit {
            return Err(ClassifierError::MessageTooLong {
                len: message.len(),
                limit: self.scan_limit,
            });
        }
        let table = pattern_table().ok_or(ClassifierError::PatternTable)?;

        let matched = table
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|pattern| pattern.is_match(message)))
            .map(|(intent, _)| intent.clone());

        Ok(match matched {
            Some(intent) => Estimate::new(intent, PATTERN_MATCH_CONFIDENCE),
            None => Estimate::new(Intent::General, PATTERN_MISS_CONFIDENCE),
        })
    }
}

/// Estimator that asks the text-understanding capability for a label.
#[derive(Clone)]
pub struct CapabilityEstimator {
    text: TextService,
}

impl CapabilityEstimator {
    pub fn new(text: TextService) -> Self {
        Self { text }
    }

    /// Never fails: a capability failure degrades to a low-confidence `general`.
    pub async fn estimate(&self, message: &str, user: &UserContext) -> Estimate {
        let prompt = format!(
            "Classify the HR assistant request into exactly one label from: {labels}.\n\
             The user is a {role} in {department}.\n\
             Request: {message}",
            labels = ALLOWED_INTENT_LABELS.join(", "),
            role = user.role,
            department = user.department,
        );

        let scope = CacheScope::User(user.user_id.clone());
        match self.text.ask(scope, &prompt, "Reply with the label only.").await {
            Ok(reply) => {
                let label = reply.split_whitespace().next().unwrap_or_default();
                match Intent::parse_allowed(label) {
                    Some(intent) => Estimate::new(intent, CAPABILITY_MATCH_CONFIDENCE),
                    None => Estimate::new(Intent::General, CAPABILITY_MISS_CONFIDENCE),
                }
            }
            Err(error) => {
                warn!(
                    event_name = "classifier.capability.degraded",
                    session_id = %user.session_id,
                    error = %error,
                    "capability estimator failed; using fallback"
                );
                Estimate::new(Intent::General, CAPABILITY_FAILURE_CONFIDENCE)
            }
        }
    }
}

/// Combines the pattern and capability estimators and extracts entities.
#[derive(Clone)]
pub struct IntentClassifier {
    patterns: PatternEstimator,
    capability: CapabilityEstimator,
    extractor: EntityExtractor,
}

impl IntentClassifier {
    pub fn new(patterns: PatternEstimator, capability: CapabilityEstimator) -> Self {
        Self { patterns, capability, extractor: EntityExtractor::new() }
    }

    /// Only an empty message is a classifier failure; each estimator degrades
    /// on its own.
    pub async fn classify(
        &self,
        message: &str,
        user: &UserContext,
    ) -> Result<IntentClassification, ClassifierError> {
        if message.trim().is_empty() {
            return Err(ClassifierError::EmptyMessage);
        }

        let pattern = self.patterns.estimate(message).unwrap_or_else(|error| {
            warn!(
                event_name = "classifier.pattern.degraded",
                session_id = %user.session_id,
                error = %error,
                "pattern estimator failed; using fallback"
            );
            Estimate::new(Intent::General, PATTERN_FAILURE_CONFIDENCE)
        });

        // A confident pattern match can't be overridden, so skip the round-trip.
        let chosen = if pattern.confidence > PATTERN_WINS_ABOVE {
            pattern
        } else {
            let capability = self.capability.estimate(message, user).await;
            blend(pattern, capability)
        };

        debug!(
            event_name = "classifier.intent.classified",
            session_id = %user.session_id,
            intent = %chosen.intent,
            confidence = chosen.confidence,
            "intent classified"
        );

        let entities = self.extractor.extract(message);
        Ok(IntentClassification::new(chosen.intent, chosen.confidence, entities))
    }
}
