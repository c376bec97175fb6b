// ── Engram: Sequential Reasoner ─────────────────────────────────────────────
//
// Compound queries ("find the deploy notes, then check who approved them")
// are split into ordered sub-queries. Each step runs as a hypothesis through
// a `HypothesisExecutor` with a deadline; the top result of a step refines
// the evidence the next step sees, even when the step only finished part of
// its retrieval. The chain stops on a confident step, on an exhausted
// length/time budget, or on cancellation (checked between steps).

use crate::atoms::engram_types::{
    ContextEvidence, HypothesisOutcome, ReasonerConfig, ReasoningStep, ReasoningTrace,
};
use crate::atoms::error::EngineResult;
use crate::engine::engram::cancel::CancelToken;
use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;

/// How long past its deadline an executor may run before its step is dropped.
const STEP_GRACE: Duration = Duration::from_millis(50);

/// Sentence ends, semicolons, and sequencing connectives (a connective right
/// after a sentence end is swallowed too). A bare "and" is not a boundary:
/// "cats and dogs" is one question.
static STEP_BOUNDARY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:;|[.!?]+(?:\s|$)|,?\s+(?:and then|after that|then|also)\s)\s*(?:(?:and then|after that|then|also)\s+)?",
    )
    .ok()
});

/// Runs one sub-query against memory. Implementations should return what
/// they have by `deadline`, with `partial` set when they cut work short.
#[async_trait]
pub trait HypothesisExecutor: Send + Sync {
    async fn execute(
        &self,
        sub_query: &str,
        evidence: &ContextEvidence,
        deadline: Instant,
    ) -> EngineResult<HypothesisOutcome>;
}

/// Ordered, non-empty sub-queries of `query`.
pub fn decompose(query: &str) -> Vec<String> {
    let parts: Vec<String> = match STEP_BOUNDARY.as_ref() {
        Some(re) => re.split(query).map(|p| p.trim().to_string()).collect(),
        None => vec![query.trim().to_string()],
    };
    parts.into_iter().filter(|p| p.chars().any(|c| c.is_alphanumeric())).collect()
}

/// Fold a step's top result into the evidence for the next step.
fn refine(evidence: &mut ContextEvidence, outcome: &HypothesisOutcome) {
    if let Some(domain) = outcome.context.domain.as_ref().filter(|d| !d.trim().is_empty()) {
        evidence.recent_topic = Some(domain.clone());
    }
    evidence.context.merge_missing(&outcome.context);
}

pub struct SequentialReasoner {
    config: ReasonerConfig,
}

impl SequentialReasoner {
    pub fn new(config: ReasonerConfig) -> Self {
        Self { config }
    }

    /// Only compound queries go through the chain.
    pub fn applies_to(&self, query: &str) -> bool {
        decompose(query).len() >= 2
    }

    pub async fn run(
        &self,
        query: &str,
        evidence: &ContextEvidence,
        executor: &dyn HypothesisExecutor,
        cancel: &CancelToken,
    ) -> ReasoningTrace {
        let sub_queries = decompose(query);
        let truncated = sub_queries.len() > self.config.max_steps;
        let step_timeout = Duration::from_millis(self.config.step_timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(self.config.chain_timeout_ms);

        let mut trace = ReasoningTrace {
            steps: Vec::new(),
            refined: evidence.clone(),
            best: None,
            cancelled: false,
            budget_exhausted: false,
            confident: false,
        };

        for (index, sub_query) in sub_queries.into_iter().take(self.config.max_steps).enumerate() {
            if cancel.is_cancelled() {
                trace.cancelled = true;
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                trace.budget_exhausted = true;
                break;
            }
            let budget = step_timeout.min(deadline - now);
            let step = executor.execute(&sub_query, &trace.refined, now + budget);

            let outcome = match tokio::time::timeout(budget + STEP_GRACE, step).await {
                Ok(Ok(outcome)) => Some(outcome),
                Ok(Err(e)) => {
                    warn!("[engram:query] Reasoning step {} failed: {}", index, e);
                    None
                }
                Err(_) => {
                    debug!("[engram:query] Reasoning step {} timed out after {:?}", index, budget);
                    None
                }
            };

            let Some(outcome) = outcome else {
                trace.steps.push(ReasoningStep { index, sub_query, outcome: None, degraded: true });
                continue;
            };

            if outcome.partial {
                debug!("[engram:query] Reasoning step {} returned partial results", index);
            }
            refine(&mut trace.refined, &outcome);
            let better = trace.best.as_ref().map_or(true, |b| outcome.confidence > b.confidence);
            if better && outcome.top_id.is_some() {
                trace.best = Some(outcome.clone());
            }
            let confident = outcome.confidence >= self.config.confidence_threshold;
            let degraded = outcome.partial;
            trace.steps.push(ReasoningStep { index, sub_query, outcome: Some(outcome), degraded });
            if confident {
                trace.confident = true;
                break;
            }
        }

        if truncated && !trace.confident && !trace.cancelled {
            trace.budget_exhausted = true;
        }
        debug!(
            "[engram:query] Reasoning chain: {} steps, confident={}, cancelled={}, exhausted={}",
            trace.steps.len(),
            trace.confident,
            trace.cancelled,
            trace.budget_exhausted
        );
        trace
    }
}

impl Default for SequentialReasoner {
    fn default() -> Self {
        Self::new(ReasonerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::engram_types::ContextDescriptor;
    use parking_lot::Mutex;

    #[test]
    fn decompose_splits_on_connectives_not_and() {
        assert_eq!(
            decompose("Find the deploy notes, then check who approved them. Also list the rollbacks"),
            vec!["Find the deploy notes", "check who approved them", "list the rollbacks"]
        );
        assert_eq!(decompose("cats and dogs"), vec!["cats and dogs"]);
        assert_eq!(decompose("open the file and then save it; close it"), vec!["open the file", "save it", "close it"]);
        assert_eq!(decompose("What is it?"), vec!["What is it"]);
        assert_eq!(decompose("version 3.5 notes"), vec!["version 3.5 notes"]);
    }

    /// Returns scripted outcomes and records the evidence each step saw.
    struct Scripted {
        outcomes: Vec<(f32, Option<&'static str>, u64)>,
        seen: Mutex<Vec<ContextEvidence>>,
    }

    #[async_trait]
    impl HypothesisExecutor for Scripted {
        async fn execute(
            &self,
            _sub: &str,
            evidence: &ContextEvidence,
            _deadline: Instant,
        ) -> EngineResult<HypothesisOutcome> {
            let step = {
                let mut seen = self.seen.lock();
                seen.push(evidence.clone());
                seen.len() - 1
            };
            let (confidence, domain, delay_ms) = self.outcomes[step];
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(HypothesisOutcome {
                top_id: Some(format!("item-{}", step)),
                top_content: None,
                context: domain.map(ContextDescriptor::with_domain).unwrap_or_default(),
                confidence,
                partial: false,
            })
        }
    }

    /// Waits out its deadline on the first step and returns what it has by then.
    struct Unhurried {
        seen: Mutex<Vec<ContextEvidence>>,
    }

    #[async_trait]
    impl HypothesisExecutor for Unhurried {
        async fn execute(
            &self,
            _sub: &str,
            evidence: &ContextEvidence,
            deadline: Instant,
        ) -> EngineResult<HypothesisOutcome> {
            let first = {
                let mut seen = self.seen.lock();
                seen.push(evidence.clone());
                seen.len() == 1
            };
            if first {
                tokio::time::sleep_until(deadline).await;
                return Ok(HypothesisOutcome {
                    top_id: Some("runbook".into()),
                    top_content: None,
                    context: ContextDescriptor::with_domain("ops"),
                    confidence: 0.4,
                    partial: true,
                });
            }
            Ok(HypothesisOutcome { confidence: 0.2, ..Default::default() })
        }
    }

    #[tokio::test]
    async fn steps_refine_evidence_and_stop_when_confident() {
        let exec = Scripted {
            outcomes: vec![(0.3, Some("ops"), 0), (0.9, None, 0), (0.1, None, 0)],
            seen: Mutex::new(Vec::new()),
        };
        let trace = SequentialReasoner::default()
            .run("first thing; second thing; third thing", &ContextEvidence::default(), &exec, &CancelToken::new())
            .await;
        assert_eq!(trace.steps.len(), 2);
        assert!(trace.confident);
        assert_eq!(trace.best.as_ref().and_then(|b| b.top_id.clone()).as_deref(), Some("item-1"));
        let seen = exec.seen.lock();
        assert_eq!(seen[1].recent_topic.as_deref(), Some("ops"));
        assert_eq!(trace.refined.context.domain.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn slow_step_is_degraded_and_chain_advances() {
        let exec = Scripted {
            outcomes: vec![(0.2, None, 200), (0.5, None, 0)],
            seen: Mutex::new(Vec::new()),
        };
        let cfg = ReasonerConfig { step_timeout_ms: 20, chain_timeout_ms: 2_000, ..Default::default() };
        let trace = SequentialReasoner::new(cfg)
            .run("slow one; fast one", &ContextEvidence::default(), &exec, &CancelToken::new())
            .await;
        assert_eq!(trace.steps.len(), 2);
        assert!(trace.steps[0].degraded);
        assert!(!trace.steps[1].degraded);
        assert!(!trace.confident);
        assert!(!trace.budget_exhausted);
    }

    #[tokio::test]
    async fn partial_step_still_refines_the_next_one() {
        let exec = Unhurried { seen: Mutex::new(Vec::new()) };
        let cfg = ReasonerConfig { step_timeout_ms: 30, chain_timeout_ms: 2_000, ..Default::default() };
        let trace = SequentialReasoner::new(cfg)
            .run("check the runbook; who approved it", &ContextEvidence::default(), &exec, &CancelToken::new())
            .await;
        assert_eq!(trace.steps.len(), 2);
        assert!(trace.steps[0].degraded);
        let first = trace.steps[0].outcome.as_ref().unwrap();
        assert!(first.partial);
        assert_eq!(first.top_id.as_deref(), Some("runbook"));
        assert!(!trace.steps[1].degraded);
        assert_eq!(exec.seen.lock()[1].recent_topic.as_deref(), Some("ops"));
        assert_eq!(trace.best.as_ref().and_then(|b| b.top_id.as_deref()), Some("runbook"));
    }

    #[tokio::test]
    async fn cancellation_and_length_budget() {
        let exec = Scripted { outcomes: vec![(0.1, None, 0); 4], seen: Mutex::new(Vec::new()) };
        let cancel = CancelToken::new();
        cancel.cancel();
        let trace = SequentialReasoner::default().run("a1; b2", &ContextEvidence::default(), &exec, &cancel).await;
        assert!(trace.cancelled);
        assert!(trace.steps.is_empty());

        let cfg = ReasonerConfig { max_steps: 2, ..Default::default() };
        let trace = SequentialReasoner::new(cfg)
            .run("a1; b2; c3", &ContextEvidence::default(), &exec, &CancelToken::new())
            .await;
        assert_eq!(trace.steps.len(), 2);
        assert!(trace.budget_exhausted);
    }
}
