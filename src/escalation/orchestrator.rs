use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::core::model::PageFusionResult;
use crate::escalation::{apply_replacement, EscalationError, EscalationRequest, VisionResponse, VisionService};

fn default_max_concurrent() -> usize {
    2
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_escalations() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_escalations")]
    pub max_escalations: usize,
    /// Page images are looked up as `<image_dir>/<page_id>.png`.
    #[serde(default)]
    pub image_dir: Option<PathBuf>,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout_secs(),
            max_escalations: default_max_escalations(),
            image_dir: None,
        }
    }
}

/// Per-run cap on paid escalation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationBudget {
    pub escalations_used: usize,
    pub escalations_max: usize,
}

impl EscalationBudget {
    pub fn new(escalations_max: usize) -> Self {
        Self {
            escalations_used: 0,
            escalations_max,
        }
    }

    pub fn remaining(&self) -> usize {
        self.escalations_max.saturating_sub(self.escalations_used)
    }

    pub fn try_reserve(&mut self) -> bool {
        if self.remaining() == 0 {
            return false;
        }
        self.escalations_used += 1;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    Pending,
    Dispatched,
    NotNeeded,
    BudgetExhausted,
    Replaced,
    Refused,
    Failed,
    TimedOut,
}

impl EscalationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EscalationState::Pending | EscalationState::Dispatched)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EscalationOutcome {
    pub state: EscalationState,
    /// The replacement when `state == Replaced`, the prior result otherwise.
    pub result: PageFusionResult,
    pub error: Option<EscalationError>,
}

/// Runs budgeted escalations against a caller-supplied [`VisionService`]; no service is bundled.
pub struct EscalationOrchestrator {
    service: Arc<dyn VisionService>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    image_dir: Option<PathBuf>,
}

impl EscalationOrchestrator {
    pub fn new(service: Arc<dyn VisionService>, settings: &EscalationSettings) -> Self {
        Self {
            service,
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            timeout: Duration::from_secs(settings.timeout_secs),
            image_dir: settings.image_dir.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Escalates every flagged page the budget allows and returns one outcome
    /// per input page, in input order.
    ///
    /// Budget is reserved in page order before anything is dispatched, so the
    /// same input always escalates the same pages.
    pub async fn run(&self, pages: Vec<PageFusionResult>, budget: &mut EscalationBudget) -> Vec<EscalationOutcome> {
        let mut states = vec![EscalationState::Pending; pages.len()];
        for (state, page) in states.iter_mut().zip(&pages) {
            *state = if !page.needs_escalation {
                EscalationState::NotNeeded
            } else if budget.try_reserve() {
                EscalationState::Dispatched
            } else {
                info!(page = %page.page_id, "escalation budget exhausted, keeping fused result");
                EscalationState::BudgetExhausted
            };
        }

        let mut tasks = JoinSet::new();
        for (index, page) in pages.iter().enumerate() {
            if states[index] != EscalationState::Dispatched {
                continue;
            }
            let image_path = self
                .image_dir
                .as_ref()
                .map(|dir| dir.join(format!("{}.png", page.page_id)));
            let request = EscalationRequest::from_result(page, image_path);
            let service = Arc::clone(&self.service);
            let semaphore = Arc::clone(&self.semaphore);
            let timeout = self.timeout;

            info!(page = %page.page_id, reason = ?page.escalation_reason, "dispatching page to vision service");
            tasks.spawn(async move {
                let response = match semaphore.acquire_owned().await {
                    Ok(_permit) => match tokio::time::timeout(timeout, service.transcribe(&request)).await {
                        Ok(response) => response,
                        Err(_) => Err(EscalationError::Timeout(timeout)),
                    },
                    Err(err) => Err(EscalationError::Service(err.to_string())),
                };
                (index, response)
            });
        }

        let mut responses: Vec<Option<Result<VisionResponse, EscalationError>>> = vec![None; pages.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, response)) => responses[index] = Some(response),
                Err(err) => warn!(error = %err, "escalation task failed to complete"),
            }
        }

        let service_id = self.service.service_id().to_string();
        pages
            .into_iter()
            .zip(states)
            .zip(responses)
            .map(|((page, state), response)| {
                if state != EscalationState::Dispatched {
                    return EscalationOutcome {
                        state,
                        result: page,
                        error: None,
                    };
                }
                settle(page, &service_id, response)
            })
            .collect()
    }
}

fn settle(
    page: PageFusionResult,
    service_id: &str,
    response: Option<Result<VisionResponse, EscalationError>>,
) -> EscalationOutcome {
    let (state, error) = match response {
        Some(Ok(VisionResponse::Lines(lines))) => match apply_replacement(&page, service_id, &lines) {
            Some(replaced) => {
                info!(page = %page.page_id, lines = replaced.fused_lines.len(), "page replaced by vision transcription");
                return EscalationOutcome {
                    state: EscalationState::Replaced,
                    result: replaced,
                    error: None,
                };
            }
            None => (
                EscalationState::Failed,
                EscalationError::Service("empty transcription".to_string()),
            ),
        },
        Some(Ok(VisionResponse::Refused(reason))) => (EscalationState::Refused, EscalationError::Refused(reason)),
        Some(Err(err @ EscalationError::Refused(_))) => (EscalationState::Refused, err),
        Some(Err(err @ EscalationError::Timeout(_))) => (EscalationState::TimedOut, err),
        Some(Err(err @ EscalationError::Service(_))) => (EscalationState::Failed, err),
        None => (
            EscalationState::Failed,
            EscalationError::Service("escalation task aborted".to_string()),
        ),
    };
    warn!(page = %page.page_id, state = ?state, error = %error, "escalation kept the fused result");
    EscalationOutcome {
        state,
        result: page,
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{FusedLine, FusionMethod};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    enum Script {
        Lines(&'static [&'static str]),
        Refuse,
        Fail,
        Hang,
    }

    struct ScriptedService {
        scripts: BTreeMap<String, Script>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedService {
        fn new(scripts: &[(&str, Script)]) -> Self {
            Self {
                scripts: scripts
                    .iter()
                    .map(|(id, script)| (id.to_string(), script.clone()))
                    .collect(),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VisionService for ScriptedService {
        fn service_id(&self) -> &str {
            "vision"
        }

        async fn transcribe(&self, request: &EscalationRequest) -> Result<VisionResponse, EscalationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;

            let response = match self.scripts.get(&request.page_id) {
                Some(Script::Lines(lines)) => Ok(VisionResponse::Lines(lines.iter().map(|l| l.to_string()).collect())),
                Some(Script::Refuse) => Ok(VisionResponse::Refused("content policy".to_string())),
                Some(Script::Fail) | None => Err(EscalationError::Service("HTTP 500".to_string())),
                Some(Script::Hang) => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(EscalationError::Service("unreachable".to_string()))
                }
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            response
        }
    }

    fn page(id: &str, flagged: bool) -> PageFusionResult {
        PageFusionResult {
            page_id: id.to_string(),
            fused_lines: vec![FusedLine {
                row_index: 0,
                text: "Tum to 1S7".to_string(),
                method: FusionMethod::LengthFallback,
                source_engines: vec!["easyocr".to_string()],
                confidence: 0.1,
            }],
            outlier_engines: BTreeSet::new(),
            disagreement_score: if flagged { 0.7 } else { 0.1 },
            corruption_score: 0.0,
            missing_content_score: 0.0,
            needs_escalation: flagged,
            escalation_reason: flagged.then(|| "high_disagreement".to_string()),
            engines: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn orchestrator(service: Arc<ScriptedService>, max_concurrent: usize) -> EscalationOrchestrator {
        let settings = EscalationSettings {
            max_concurrent,
            ..EscalationSettings::default()
        };
        EscalationOrchestrator::new(service, &settings)
    }

    fn states(outcomes: &[EscalationOutcome]) -> Vec<EscalationState> {
        outcomes.iter().map(|outcome| outcome.state).collect()
    }

    #[tokio::test]
    async fn replaces_only_flagged_pages() {
        let service = Arc::new(ScriptedService::new(&[("p2", Script::Lines(&["Turn to 157"]))]));
        let mut budget = EscalationBudget::new(5);
        let outcomes = orchestrator(service.clone(), 2)
            .run(vec![page("p1", false), page("p2", true)], &mut budget)
            .await;

        assert_eq!(states(&outcomes), vec![EscalationState::NotNeeded, EscalationState::Replaced]);
        assert_eq!(outcomes[0].result, page("p1", false));
        assert_eq!(outcomes[1].result.text(), "Turn to 157");
        assert_eq!(outcomes[1].result.fused_lines[0].method, FusionMethod::Escalated);
        assert_eq!(budget.escalations_used, 1);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refusals_and_errors_keep_prior_result() {
        let service = Arc::new(ScriptedService::new(&[
            ("p1", Script::Refuse),
            ("p2", Script::Fail),
            ("p3", Script::Lines(&["", " "])),
        ]));
        let mut budget = EscalationBudget::new(5);
        let pages = vec![page("p1", true), page("p2", true), page("p3", true)];
        let outcomes = orchestrator(service, 2).run(pages.clone(), &mut budget).await;

        assert_eq!(
            states(&outcomes),
            vec![EscalationState::Refused, EscalationState::Failed, EscalationState::Failed]
        );
        for (outcome, prior) in outcomes.iter().zip(&pages) {
            assert_eq!(&outcome.result, prior);
            assert!(outcome.error.is_some());
        }
    }

    #[tokio::test]
    async fn budget_is_spent_in_page_order() {
        let service = Arc::new(ScriptedService::new(&[
            ("p1", Script::Lines(&["one"])),
            ("p2", Script::Lines(&["two"])),
            ("p3", Script::Lines(&["three"])),
        ]));
        let mut budget = EscalationBudget::new(2);
        let outcomes = orchestrator(service.clone(), 4)
            .run(vec![page("p1", true), page("p2", true), page("p3", true)], &mut budget)
            .await;

        assert_eq!(
            states(&outcomes),
            vec![
                EscalationState::Replaced,
                EscalationState::Replaced,
                EscalationState::BudgetExhausted
            ]
        );
        assert_eq!(budget.remaining(), 0);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let service = Arc::new(ScriptedService::new(&[("p1", Script::Hang)]));
        let mut budget = EscalationBudget::new(1);
        let outcomes = orchestrator(service, 1)
            .with_timeout(Duration::from_millis(50))
            .run(vec![page("p1", true)], &mut budget)
            .await;

        assert_eq!(states(&outcomes), vec![EscalationState::TimedOut]);
        assert_eq!(outcomes[0].error, Some(EscalationError::Timeout(Duration::from_millis(50))));
        assert_eq!(outcomes[0].result, page("p1", true));
    }

    #[tokio::test]
    async fn concurrency_is_capped() {
        let scripts: Vec<(&str, Script)> = ["p1", "p2", "p3", "p4"]
            .into_iter()
            .map(|id| (id, Script::Lines(&["ok"])))
            .collect();
        let service = Arc::new(ScriptedService::new(&scripts));
        let mut budget = EscalationBudget::new(10);
        let pages = ["p1", "p2", "p3", "p4"].into_iter().map(|id| page(id, true)).collect();
        let outcomes = orchestrator(service.clone(), 1).run(pages, &mut budget).await;

        assert!(outcomes.iter().all(|o| o.state == EscalationState::Replaced));
        assert_eq!(service.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn terminal_states() {
        assert!(!EscalationState::Pending.is_terminal());
        assert!(!EscalationState::Dispatched.is_terminal());
        assert!(EscalationState::BudgetExhausted.is_terminal());
        assert!(EscalationState::TimedOut.is_terminal());
    }
}
