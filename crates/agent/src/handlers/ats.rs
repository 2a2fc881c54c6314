use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use hrflow_core::capabilities::HrDirectory;
use hrflow_core::domain::hr::Candidate;
use hrflow_core::domain::response::HandlerResponse;
use hrflow_core::domain::tool::ToolName;
use serde::Serialize;
use serde_json::{json, Value};

use super::{select_branch, Handler, HandlerError, HandlerRequest, ToolError};

const AGENT_NAME: &str = "ats_agent";
const RECENT_LIMIT: usize = 5;
const SHORTLIST_LIMIT: usize = 5;

const ATS_TOOLS: &[ToolName] =
    &[ToolName::SearchCandidates, ToolName::RankCandidates, ToolName::GetCandidateDetails];

#[derive(Clone, Debug, PartialEq, Eq)]
enum AtsBranch {
    Details { name: String },
    Search,
    Recent,
}

type AtsRule = (&'static str, fn(&HandlerRequest) -> Option<AtsBranch>);

const ATS_RULES: &[AtsRule] = &[("details", details_query), ("search", search_query)];

fn details_query(request: &HandlerRequest) -> Option<AtsBranch> {
    request.entities.candidate_name.clone().map(|name| AtsBranch::Details { name })
}

fn search_query(request: &HandlerRequest) -> Option<AtsBranch> {
    let entities = &request.entities;
    (!entities.skills.is_empty() || entities.position.is_some()).then_some(AtsBranch::Search)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankedCandidate {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub match_score: f64,
}

/// Orders by descending score, then by name so equal scores stay stable.
pub fn rank_candidates(
    candidates: Vec<Candidate>,
    skills: &[String],
    position: Option<&str>,
) -> Vec<RankedCandidate> {
    let mut ranked = candidates
        .into_iter()
        .map(|candidate| {
            let match_score = candidate.match_score(skills, position);
            RankedCandidate { candidate, match_score }
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|left, right| {
        right
            .match_score
            .partial_cmp(&left.match_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.candidate.name.cmp(&right.candidate.name))
    });
    ranked
}

pub struct AtsHandler {
    directory: Arc<dyn HrDirectory>,
}

impl AtsHandler {
    pub fn new(directory: Arc<dyn HrDirectory>) -> Self {
        Self { directory }
    }

    async fn search(&self, request: &HandlerRequest) -> Result<Vec<RankedCandidate>, HandlerError> {
        let entities = &request.entities;
        let found = self
            .directory
            .search_candidates_by_skills(&entities.skills, entities.position.as_deref())
            .await?;
        Ok(rank_candidates(found, &entities.skills, entities.position.as_deref()))
    }

    async fn details(&self, name: &str) -> Result<HandlerResponse, HandlerError> {
        let Some(candidate) = self.directory.find_candidate_by_name(name).await? else {
            return Ok(HandlerResponse::ok(
                AGENT_NAME,
                format!("I couldn't find a candidate called {name}."),
            ));
        };

        let text = format!(
            "{} is a {} with {} years of experience. Skills: {}.{}",
            candidate.name,
            candidate.position,
            candidate.years_experience,
            candidate.skills.join(", "),
            candidate
                .location
                .as_ref()
                .map(|location| format!(" Based in {location}."))
                .unwrap_or_default()
        );
        Ok(HandlerResponse::ok(AGENT_NAME, text).with_data(json!(candidate)))
    }
}

fn describe_shortlist(ranked: &[RankedCandidate]) -> String {
    ranked
        .iter()
        .take(SHORTLIST_LIMIT)
        .enumerate()
        .map(|(index, entry)| {
            format!(
                "{}. {} ({}), {:.0}% match",
                index + 1,
                entry.candidate.name,
                entry.candidate.position,
                entry.match_score * 100.0
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Handler for AtsHandler {
    fn name(&self) -> &'static str {
        AGENT_NAME
    }

    fn available_tools(&self) -> &'static [ToolName] {
        ATS_TOOLS
    }

    async fn process(&self, request: &HandlerRequest) -> Result<HandlerResponse, HandlerError> {
        let branch = select_branch(ATS_RULES, request).map(|(_, branch)| branch);
        match branch.unwrap_or(AtsBranch::Recent) {
            AtsBranch::Details { name } => self.details(&name).await,
            AtsBranch::Search => {
                let ranked = self.search(request).await?;
                if ranked.is_empty() {
                    return Ok(HandlerResponse::ok(
                        AGENT_NAME,
                        "No candidates match those requirements yet.",
                    )
                    .with_data(json!([])));
                }
                let text = format!(
                    "I found {} matching candidates:\n{}",
                    ranked.len(),
                    describe_shortlist(&ranked)
                );
                Ok(HandlerResponse::ok(AGENT_NAME, text).with_data(json!(ranked)))
            }
            AtsBranch::Recent => {
                let recent = self.directory.list_candidates(RECENT_LIMIT).await?;
                let lines = recent
                    .iter()
                    .map(|candidate| format!("- {} ({})", candidate.name, candidate.position))
                    .collect::<Vec<_>>();
                Ok(HandlerResponse::ok(
                    AGENT_NAME,
                    format!(
                        "Tell me the skills or role you're hiring for. Recent candidates:\n{}",
                        lines.join("\n")
                    ),
                )
                .with_data(json!(recent)))
            }
        }
    }

    async fn run_tool(&self, tool: ToolName, request: &HandlerRequest) -> Result<Value, ToolError> {
        let entities = &request.entities;
        match tool {
            ToolName::SearchCandidates => {
                let found = self
                    .directory
                    .search_candidates_by_skills(&entities.skills, entities.position.as_deref())
                    .await?;
                Ok(json!(found))
            }
            ToolName::RankCandidates => {
                let found = self
                    .directory
                    .search_candidates_by_skills(&entities.skills, entities.position.as_deref())
                    .await?;
                Ok(json!(rank_candidates(found, &entities.skills, entities.position.as_deref())))
            }
            ToolName::GetCandidateDetails => {
                let name = entities
                    .candidate_name
                    .as_deref()
                    .ok_or(ToolError::MissingInput("candidate_name"))?;
                let candidate = self.directory.find_candidate_by_name(name).await?;
                Ok(json!(candidate))
            }
            other => Err(ToolError::NotAvailable(other)),
        }
    }
}
