//! LLM-driven planner with a keyword-router fallback (spec §4.5).
//!
//! `Planner::plan` asks the LLM for a JSON [`ExecutionPlan`]; if the LLM is
//! unreachable, its answer doesn't parse, or its declared confidence is
//! below [`MIN_CONFIDENCE`], planning falls back to [`keyword_route`], which
//! always succeeds with a single-step plan.

use crate::error::PlannerError;
use crate::llm::{ChatRequest, LlmClient};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

/// One step of an [`ExecutionPlan`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStep {
    pub id: String,
    pub capability: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub can_parallelize: bool,
}

/// A validated plan ready for the [`WorkflowCoordinator`](crate::coordinator::WorkflowCoordinator).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPlan {
    pub steps: Vec<TaskStep>,
    /// Maps a step id to the ids it depends on.
    #[serde(default)]
    pub dependencies: std::collections::HashMap<String, Vec<String>>,
    pub reasoning: String,
    pub confidence: f32,
}

impl ExecutionPlan {
    /// Every dependency id refers to a step that exists in `steps`, and no
    /// step depends (directly or transitively) on itself.
    pub fn validate(&self) -> Result<(), PlannerError> {
        let ids: std::collections::HashSet<&str> =
            self.steps.iter().map(|s| s.id.as_str()).collect();
        for (step, deps) in &self.dependencies {
            if !ids.contains(step.as_str()) {
                return Err(PlannerError::MalformedPlan(format!(
                    "dependency entry for unknown step '{}'",
                    step
                )));
            }
            for dep in deps {
                if !ids.contains(dep.as_str()) {
                    return Err(PlannerError::MalformedPlan(format!(
                        "step '{}' depends on unknown step '{}'",
                        step, dep
                    )));
                }
            }
        }
        if has_cycle(&self.dependencies) {
            return Err(PlannerError::MalformedPlan("dependency cycle".to_string()));
        }
        Ok(())
    }
}

fn has_cycle(dependencies: &std::collections::HashMap<String, Vec<String>>) -> bool {
    #[derive(PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    fn visit<'a>(
        node: &'a str,
        deps: &'a std::collections::HashMap<String, Vec<String>>,
        marks: &mut std::collections::HashMap<&'a str, Mark>,
    ) -> bool {
        match marks.get(node) {
            Some(Mark::Visiting) => return true,
            Some(Mark::Done) => return false,
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        if let Some(children) = deps.get(node) {
            for child in children {
                if visit(child, deps, marks) {
                    return true;
                }
            }
        }
        marks.insert(node, Mark::Done);
        false
    }

    let mut marks = std::collections::HashMap::new();
    dependencies.keys().any(|k| visit(k, dependencies, &mut marks))
}

/// Minimum LLM-declared confidence accepted without falling back to the
/// keyword router.
pub const MIN_CONFIDENCE: f32 = 0.5;

/// Deadline for the planner's LLM round-trip before falling back.
const PLAN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature,
        }
    }

    /// Produce an [`ExecutionPlan`] for `request`, falling back to
    /// [`keyword_route`] on any LLM failure, parse failure, or low confidence.
    pub async fn plan(&self, request: &str) -> ExecutionPlan {
        match timeout(PLAN_TIMEOUT, self.ask_llm(request)).await {
            Ok(Ok(plan)) if plan.confidence >= MIN_CONFIDENCE && plan.validate().is_ok() => plan,
            Ok(Ok(plan)) => {
                log::warn!(
                    "planner LLM returned low-confidence or invalid plan ({}), falling back",
                    plan.confidence
                );
                keyword_route(request)
            }
            Ok(Err(err)) => {
                log::warn!("planner LLM call failed: {}, falling back", err);
                keyword_route(request)
            }
            Err(_) => {
                log::warn!("planner LLM call timed out, falling back");
                keyword_route(request)
            }
        }
    }

    async fn ask_llm(&self, request: &str) -> Result<ExecutionPlan, PlannerError> {
        let prompt = format!(
            "Return ONLY a JSON object with keys steps, dependencies, reasoning, confidence \
             describing how to fulfill this request: {}",
            request
        );
        let response = self
            .llm
            .complete(ChatRequest {
                prompt,
                model: self.model.clone(),
                temperature: self.temperature,
                max_tokens: 1024,
            })
            .await
            .map_err(|e| PlannerError::LLMUnavailable(e.to_string()))?;

        let plan: ExecutionPlan = serde_json::from_str(&response.response)
            .map_err(|e| PlannerError::MalformedPlan(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }
}

struct KeywordCapability {
    capability: &'static str,
    keywords: &'static [&'static str],
}

const KEYWORD_TABLE: &[KeywordCapability] = &[
    KeywordCapability {
        capability: "weather.current",
        keywords: &["weather", "temperature", "forecast", "rain", "sunny", "humidity"],
    },
    KeywordCapability {
        capability: "finance.quote",
        keywords: &["stock", "price", "market", "quote", "ticker", "shares"],
    },
    KeywordCapability {
        capability: "travel.plan",
        keywords: &["flight", "hotel", "itinerary", "travel", "trip", "booking"],
    },
];

/// Deterministic single-step plan derived from keyword matches, used when
/// the LLM can't produce (or be trusted for) a plan. Always succeeds;
/// requests matching no known capability route to `general.answer`.
pub fn keyword_route(request: &str) -> ExecutionPlan {
    let lower = request.to_lowercase();
    let capability = KEYWORD_TABLE
        .iter()
        .find(|entry| entry.keywords.iter().any(|kw| lower.contains(kw)))
        .map(|entry| entry.capability)
        .unwrap_or("general.answer");

    ExecutionPlan {
        steps: vec![TaskStep {
            id: "step-1".to_string(),
            capability: capability.to_string(),
            description: request.to_string(),
            parameters: serde_json::json!({ "request": request }),
            priority: 0,
            can_parallelize: false,
        }],
        dependencies: std::collections::HashMap::new(),
        reasoning: format!("keyword router matched capability '{}'", capability),
        confidence: 1.0,
    }
}
