//! # Research Orchestrator
//!
//! Fans one research request out to the section agents, joins at a
//! shared deadline, merges the results into the next report version,
//! persists with an optimistic version check, and records a handful of
//! derived memory facts.
//!
//! A run never fails because an agent failed - failed sections are
//! recorded and the prior payload stays on display. The run fails only
//! on invalid input, cancellation, or an unresolvable version conflict;
//! a broken store downgrades the result to an `unsaved` report.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::agents::{
    AgentSet, FundamentalsAgent, LeadershipAgent, MarketNewsAgent, PersonaStrategyAgent,
    ResearchRequest, RunContext, SectionAgent, TechServicesAgent, VisualizationAgent,
};
use crate::error::{CoreError, CoreResult};
use crate::memory::{MemoryStore, NewFact};
use crate::models::{LlmProvider, ModelConfig};
use crate::providers::FinanceProvider;
use crate::report::{merge_run, Report, ReportIdentity, SectionKind, SectionResult, SectionStatus};
use crate::state::personas::Persona;
use crate::state::reports::{ReportRepository, SaveError};

use super::events::{ResearchEvent, ResearchEventKind};

/// At most this many derived facts are written per run.
const MAX_RUN_FACTS: usize = 5;

/// Configuration for the research orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Shared per-run deadline for every agent, in seconds
    pub agent_deadline_secs: u64,
    /// Global LLM provider (default: Anthropic)
    #[serde(default)]
    pub global_provider: LlmProvider,
    /// Global model override for all sections
    pub global_model: Option<String>,
    /// Base URL override for LLM API (for OpenAI-compatible endpoints)
    pub base_url: Option<String>,
    /// Per-section model overrides (section label -> model name)
    #[serde(default)]
    pub per_section_models: HashMap<String, String>,
    /// How many memory facts are loaded into agent context
    pub context_fact_limit: usize,
    /// Cap for the news section's item list
    pub news_max_items: usize,
    /// Days of stock history for the visualization section
    pub stock_days: u32,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            agent_deadline_secs: 90,
            global_provider: LlmProvider::Anthropic,
            global_model: None,
            base_url: None,
            per_section_models: HashMap::new(),
            context_fact_limit: 8,
            news_max_items: 6,
            stock_days: 365,
        }
    }
}

impl ResearchConfig {
    /// Model config for a specific section: per-section override ->
    /// global -> provider default.
    pub fn model_config(&self, kind: SectionKind) -> ModelConfig {
        let provider = self.global_provider.clone();
        let model = self
            .per_section_models
            .get(kind.label())
            .or(self.global_model.as_ref())
            .cloned()
            .unwrap_or_else(|| provider.default_model().to_string());
        let base_url = if provider.supports_base_url() {
            self.base_url.clone()
        } else {
            None
        };
        ModelConfig {
            provider,
            model,
            base_url,
        }
    }

    /// Build the production agent set for this configuration.
    pub fn build_agents(&self, finance: Arc<dyn FinanceProvider>) -> AgentSet {
        let agents: Vec<Arc<dyn SectionAgent>> = vec![
            Arc::new(FundamentalsAgent::new(
                self.model_config(SectionKind::Fundamentals),
            )),
            Arc::new(LeadershipAgent::new(
                self.model_config(SectionKind::Leadership),
            )),
            Arc::new(MarketNewsAgent::new(
                self.model_config(SectionKind::News),
                self.news_max_items,
            )),
            Arc::new(TechServicesAgent::new(
                self.model_config(SectionKind::TechServices),
            )),
            Arc::new(PersonaStrategyAgent::new(
                self.model_config(SectionKind::Strategy),
            )),
            Arc::new(VisualizationAgent::new(
                self.model_config(SectionKind::Visualization),
                finance,
                self.stock_days,
            )),
        ];
        AgentSet::new(agents)
    }
}

/// The research orchestrator
pub struct ResearchOrchestrator {
    config: ResearchConfig,
    agents: AgentSet,
    reports: Arc<dyn ReportRepository>,
    memory: Arc<dyn MemoryStore>,
    event_tx: Option<mpsc::Sender<ResearchEvent>>,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl ResearchOrchestrator {
    pub fn new(
        agents: AgentSet,
        reports: Arc<dyn ReportRepository>,
        memory: Arc<dyn MemoryStore>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            config,
            agents,
            reports,
            memory,
            event_tx: None,
            cancel_rx: None,
        }
    }

    /// Set event channel for streaming run progress
    pub fn with_event_channel(mut self, tx: mpsc::Sender<ResearchEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Attach a user-initiated stop signal. When it flips to `true`,
    /// outstanding agents are aborted and nothing is persisted.
    pub fn with_cancel_signal(mut self, rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(rx);
        self
    }

    /// Run all six sections for (persona, company).
    #[tracing::instrument(skip(self, persona, request), fields(company = %request.company_key))]
    pub async fn run_full_research(
        &self,
        persona: &Persona,
        request: &ResearchRequest,
        save: bool,
    ) -> CoreResult<Report> {
        let kinds: BTreeSet<SectionKind> = SectionKind::ALL.into_iter().collect();
        self.run(persona, request, &kinds, save).await
    }

    /// Re-run only the requested sections; everything else is retained
    /// from the prior version. Used when chat asks to dig deeper.
    #[tracing::instrument(skip(self, persona, request, sections), fields(company = %request.company_key))]
    pub async fn run_targeted_update(
        &self,
        persona: &Persona,
        request: &ResearchRequest,
        sections: &BTreeSet<SectionKind>,
        save: bool,
    ) -> CoreResult<Report> {
        if sections.is_empty() {
            return Err(CoreError::InvalidRequest(
                "targeted update requires at least one section".to_string(),
            ));
        }
        self.run(persona, request, sections, save).await
    }

    async fn run(
        &self,
        persona: &Persona,
        request: &ResearchRequest,
        kinds: &BTreeSet<SectionKind>,
        save: bool,
    ) -> CoreResult<Report> {
        self.emit(
            ResearchEvent::new(ResearchEventKind::RunStarted, &request.company_key).with_data(
                serde_json::json!({
                    "sections": kinds.iter().map(|k| k.label()).collect::<Vec<_>>()
                }),
            ),
        )
        .await;

        // A broken read degrades to a cold run; only the save step is
        // allowed to surface persistence trouble.
        let prior = match self
            .reports
            .get_latest(&persona.user_id, &persona.id, &request.company_key)
        {
            Ok(prior) => prior,
            Err(e) => {
                tracing::warn!("could not load prior report: {e:#}");
                None
            }
        };

        let facts = self
            .memory
            .search(
                &persona.user_id,
                &persona.id,
                &request.company_name,
                self.config.context_fact_limit,
            )
            .unwrap_or_else(|e| {
                tracing::warn!("memory search failed: {e:#}");
                Vec::new()
            });

        let context = Arc::new(RunContext::new(persona.clone(), prior.clone(), facts));
        let deadline = Instant::now() + Duration::from_secs(self.config.agent_deadline_secs);

        let mut join_set: JoinSet<SectionResult> = JoinSet::new();
        for kind in kinds.iter().copied() {
            let Some(agent) = self.agents.get(kind) else {
                tracing::warn!(section = %kind, "no agent registered; skipping");
                continue;
            };
            let agent = Arc::clone(agent);
            let request = request.clone();
            let context = Arc::clone(&context);

            self.emit(
                ResearchEvent::new(ResearchEventKind::AgentStarted, &request.company_key)
                    .with_section(kind),
            )
            .await;

            join_set.spawn(async move {
                match tokio::time::timeout_at(deadline, agent.produce(&request, &context)).await {
                    Ok(result) => result,
                    // The late result is dropped with the aborted task.
                    Err(_) => SectionResult::timed_out(kind),
                }
            });
        }

        let fresh = self.join_agents(&mut join_set, &request.company_key).await?;

        let identity = ReportIdentity {
            user_id: persona.user_id.clone(),
            persona_id: persona.id.clone(),
            company_key: request.company_key.clone(),
            company_name: request.company_name.clone(),
        };
        let candidate = merge_run(prior.as_ref(), &identity, &fresh);
        self.emit(
            ResearchEvent::new(ResearchEventKind::ReportMerged, &request.company_key)
                .with_data(serde_json::json!({ "version": candidate.version })),
        )
        .await;

        self.record_facts(persona, request, prior.as_ref(), &candidate);

        let report = if save {
            let expected = prior.as_ref().map(|p| p.version).unwrap_or(0);
            self.save_with_retry(candidate, expected, &identity, &fresh)
                .await?
        } else {
            let mut candidate = candidate;
            candidate.unsaved = true;
            candidate
        };

        self.emit(
            ResearchEvent::new(ResearchEventKind::RunCompleted, &request.company_key).with_data(
                serde_json::json!({ "version": report.version, "unsaved": report.unsaved }),
            ),
        )
        .await;

        Ok(report)
    }

    /// The join point: the only place the run suspends. Waits for every
    /// agent or the cancel signal, whichever comes first.
    async fn join_agents(
        &self,
        join_set: &mut JoinSet<SectionResult>,
        company_key: &str,
    ) -> CoreResult<Vec<SectionResult>> {
        let mut cancel_rx = self.cancel_rx.clone();
        let mut fresh = Vec::new();

        loop {
            tokio::select! {
                joined = join_set.join_next() => match joined {
                    Some(Ok(result)) => {
                        let kind = if result.status == SectionStatus::Failed {
                            ResearchEventKind::AgentFailed
                        } else {
                            ResearchEventKind::AgentCompleted
                        };
                        let mut event =
                            ResearchEvent::new(kind, company_key).with_section(result.kind);
                        if let Some(reason) = &result.error {
                            event = event.with_data(serde_json::json!({ "reason": reason }));
                        }
                        self.emit(event).await;
                        fresh.push(result);
                    }
                    Some(Err(e)) => {
                        // A panicked agent task; its slot records no attempt.
                        tracing::warn!("section agent task failed to join: {e}");
                    }
                    None => break,
                },
                _ = wait_cancelled(&mut cancel_rx) => {
                    join_set.abort_all();
                    self.emit(ResearchEvent::new(ResearchEventKind::RunCancelled, company_key))
                        .await;
                    return Err(CoreError::Cancelled);
                }
            }
        }

        Ok(fresh)
    }

    /// Optimistic save; on conflict, re-merge the already collected
    /// results onto the newer version and retry exactly once.
    async fn save_with_retry(
        &self,
        candidate: Report,
        expected: u64,
        identity: &ReportIdentity,
        fresh: &[SectionResult],
    ) -> CoreResult<Report> {
        match self.reports.save(&candidate, expected) {
            Ok(stored) => {
                self.emit(
                    ResearchEvent::new(ResearchEventKind::ReportSaved, &identity.company_key)
                        .with_data(serde_json::json!({ "version": stored.version })),
                )
                .await;
                Ok(stored)
            }
            Err(SaveError::Conflict { latest }) => {
                self.emit(
                    ResearchEvent::new(ResearchEventKind::SaveConflict, &identity.company_key)
                        .with_data(serde_json::json!({ "latest": latest })),
                )
                .await;
                tracing::info!(latest, "save conflict; re-merging against newer version");

                let newer = self
                    .reports
                    .get_latest(&identity.user_id, &identity.persona_id, &identity.company_key)?
                    .ok_or_else(|| {
                        CoreError::Other(anyhow::anyhow!(
                            "conflict reported but no newer report found"
                        ))
                    })?;

                let retry = merge_run(Some(&newer), identity, fresh);
                match self.reports.save(&retry, newer.version) {
                    Ok(stored) => {
                        self.emit(
                            ResearchEvent::new(
                                ResearchEventKind::ReportSaved,
                                &identity.company_key,
                            )
                            .with_data(serde_json::json!({ "version": stored.version })),
                        )
                        .await;
                        Ok(stored)
                    }
                    Err(SaveError::Conflict { latest }) => Err(CoreError::VersionConflict {
                        expected: newer.version,
                        latest,
                    }),
                    Err(SaveError::Storage(e)) => {
                        tracing::warn!("report save unavailable after retry: {e}");
                        let mut retry = retry;
                        retry.unsaved = true;
                        Ok(retry)
                    }
                }
            }
            Err(SaveError::Storage(e)) => {
                tracing::warn!("report save unavailable: {e}; returning unsaved report");
                let mut candidate = candidate;
                candidate.unsaved = true;
                Ok(candidate)
            }
        }
    }

    /// Write derived facts so chat and compare can reference the run
    /// without re-deriving it. Append failures are absorbed.
    fn record_facts(
        &self,
        persona: &Persona,
        request: &ResearchRequest,
        prior: Option<&Report>,
        merged: &Report,
    ) {
        for fact in derive_facts(persona, request, prior, merged) {
            if let Err(e) = self.memory.add(fact) {
                tracing::warn!("failed to record memory fact: {e:#}");
            }
        }
    }

    async fn emit(&self, event: ResearchEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

/// Resolves when the cancel flag flips to true; pends forever when no
/// signal is attached or the sender goes away without cancelling.
async fn wait_cancelled(rx: &mut Option<watch::Receiver<bool>>) {
    match rx {
        Some(rx) => loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        },
        None => std::future::pending().await,
    }
}

fn derive_facts(
    persona: &Persona,
    request: &ResearchRequest,
    prior: Option<&Report>,
    merged: &Report,
) -> Vec<NewFact> {
    let mut facts = Vec::new();

    if let Some(strategy) = merged
        .sections
        .strategy
        .payload()
        .and_then(|p| p.as_strategy())
    {
        if !strategy.why_it_matters.is_empty() {
            facts.push(NewFact::research(
                &persona.user_id,
                &persona.id,
                format!(
                    "Completed research on {}. Key insight: {}",
                    request.company_name,
                    snippet(&strategy.why_it_matters, 200)
                ),
            ));
        }
    }

    // Leadership changes only make sense against a prior report.
    if let (Some(prior), Some(leadership)) = (
        prior,
        merged
            .sections
            .leadership
            .payload()
            .and_then(|p| p.as_leadership()),
    ) {
        let known: Vec<&str> = prior
            .sections
            .leadership
            .payload()
            .and_then(|p| p.as_leadership())
            .map(|l| l.leaders.iter().map(|x| x.name.as_str()).collect())
            .unwrap_or_default();
        for leader in leadership
            .leaders
            .iter()
            .filter(|l| !known.contains(&l.name.as_str()))
            .take(2)
        {
            facts.push(NewFact::research(
                &persona.user_id,
                &persona.id,
                format!(
                    "New leadership contact at {}: {} ({})",
                    request.company_name, leader.name, leader.title
                ),
            ));
        }
    }

    if let Some(news) = merged.sections.news.payload().and_then(|p| p.as_news()) {
        if !news.key_themes.is_empty() {
            facts.push(NewFact::research(
                &persona.user_id,
                &persona.id,
                format!(
                    "Recent news themes for {}: {}",
                    request.company_name,
                    news.key_themes.join(", ")
                ),
            ));
        }
    }

    facts.truncate(MAX_RUN_FACTS);
    facts
}

fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::PersonaStrategy;
    use crate::memory::SqliteMemoryStore;
    use crate::report::SectionPayload;
    use crate::state::{DossierDb, SqliteReportRepository};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn persona() -> Persona {
        Persona {
            id: "p1".to_string(),
            user_id: "u1".to_string(),
            name: "Priya - SE".to_string(),
            role: Some("Security Engineer".to_string()),
            company: Some("Armor1".to_string()),
            region: Some("India".to_string()),
            goal: Some("Land fintech accounts".to_string()),
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_payload(kind: SectionKind) -> SectionPayload {
        match kind {
            SectionKind::Fundamentals => SectionPayload::Fundamentals(
                serde_json::from_value(serde_json::json!({
                    "profile": {"company_name": "Stripe", "industry": "Fintech"},
                    "key_numbers": {},
                }))
                .unwrap(),
            ),
            SectionKind::Leadership => SectionPayload::Leadership(
                serde_json::from_value(serde_json::json!({
                    "company_name": "Stripe",
                    "leaders": [{"name": "Patrick Collison", "title": "CEO"}],
                }))
                .unwrap(),
            ),
            SectionKind::News => SectionPayload::News(
                serde_json::from_value(serde_json::json!({
                    "company_name": "Stripe",
                    "key_themes": ["payments expansion"],
                }))
                .unwrap(),
            ),
            SectionKind::TechServices => SectionPayload::TechServices(
                serde_json::from_value(serde_json::json!({"company_name": "Stripe"})).unwrap(),
            ),
            SectionKind::Strategy => SectionPayload::Strategy(PersonaStrategy {
                why_it_matters: "Large fintech footprint".to_string(),
                ..Default::default()
            }),
            SectionKind::Visualization => {
                SectionPayload::Visualization(crate::agents::StockSeries::not_listed("Stripe"))
            }
        }
    }

    struct StubAgent {
        kind: SectionKind,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StubAgent {
        fn fast(kind: SectionKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(kind: SectionKind, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                kind,
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SectionAgent for StubAgent {
        fn kind(&self) -> SectionKind {
            self.kind
        }

        async fn produce(&self, _: &ResearchRequest, _: &RunContext) -> SectionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            SectionResult::ok(sample_payload(self.kind), Vec::new())
        }
    }

    fn stub_set(stubs: &[Arc<StubAgent>]) -> AgentSet {
        AgentSet::new(
            stubs
                .iter()
                .map(|s| Arc::clone(s) as Arc<dyn SectionAgent>)
                .collect(),
        )
    }

    fn sqlite_fixture(path: &str) -> (Arc<dyn ReportRepository>, Arc<dyn MemoryStore>) {
        let _ = fs::remove_file(path);
        let db = DossierDb::open_at(path).unwrap();
        (
            Arc::new(SqliteReportRepository::new(&db)),
            Arc::new(SqliteMemoryStore::new(&db)),
        )
    }

    fn config(deadline_secs: u64) -> ResearchConfig {
        ResearchConfig {
            agent_deadline_secs: deadline_secs,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_run_merges_and_saves() {
        let path = ".dossier/test_orch_full.db";
        let stubs: Vec<Arc<StubAgent>> =
            SectionKind::ALL.iter().map(|k| StubAgent::fast(*k)).collect();
        let (reports, memory) = sqlite_fixture(path);
        let orchestrator =
            ResearchOrchestrator::new(stub_set(&stubs), Arc::clone(&reports), memory, config(30));

        let request = ResearchRequest::new("Stripe").unwrap();
        let report = orchestrator
            .run_full_research(&persona(), &request, true)
            .await
            .unwrap();

        assert_eq!(report.version, 1);
        assert!(!report.unsaved);
        assert_eq!(report.current_section_count(), 6);
        for stub in &stubs {
            assert_eq!(stub.calls(), 1);
        }

        let latest = reports.get_latest("u1", "p1", "stripe").unwrap().unwrap();
        assert_eq!(latest.version, 1);

        let _ = fs::remove_file(path);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_agent_fails_section_and_prior_payload_survives() {
        let path = ".dossier/test_orch_timeout.db";
        let (reports, memory) = sqlite_fixture(path);

        // First run: everything fast, version 1 with six good sections.
        let fast: Vec<Arc<StubAgent>> =
            SectionKind::ALL.iter().map(|k| StubAgent::fast(*k)).collect();
        let orchestrator = ResearchOrchestrator::new(
            stub_set(&fast),
            Arc::clone(&reports),
            Arc::clone(&memory),
            config(30),
        );
        let request = ResearchRequest::new("Stripe").unwrap();
        orchestrator
            .run_full_research(&persona(), &request, true)
            .await
            .unwrap();

        // Second run: the news agent blows past the shared deadline.
        let stubs: Vec<Arc<StubAgent>> = SectionKind::ALL
            .iter()
            .map(|k| {
                if *k == SectionKind::News {
                    StubAgent::slow(*k, Duration::from_secs(3600))
                } else {
                    StubAgent::fast(*k)
                }
            })
            .collect();
        let orchestrator =
            ResearchOrchestrator::new(stub_set(&stubs), Arc::clone(&reports), memory, config(5));

        let report = orchestrator
            .run_full_research(&persona(), &request, true)
            .await
            .unwrap();

        assert_eq!(report.version, 2);
        assert_eq!(report.current_section_count(), 6, "prior news retained");

        let news = report.sections.slot(SectionKind::News);
        assert!(news.current.is_some());
        let attempt = news.last_attempt.as_ref().unwrap();
        assert_eq!(attempt.status, SectionStatus::Failed);
        assert_eq!(attempt.reason.as_deref(), Some("timeout"));

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_targeted_update_only_runs_requested_sections() {
        let path = ".dossier/test_orch_targeted.db";
        let stubs: Vec<Arc<StubAgent>> =
            SectionKind::ALL.iter().map(|k| StubAgent::fast(*k)).collect();
        let (reports, memory) = sqlite_fixture(path);
        let orchestrator =
            ResearchOrchestrator::new(stub_set(&stubs), Arc::clone(&reports), memory, config(30));

        let request = ResearchRequest::new("Stripe").unwrap();
        orchestrator
            .run_full_research(&persona(), &request, true)
            .await
            .unwrap();

        let mut sections = BTreeSet::new();
        sections.insert(SectionKind::News);
        let report = orchestrator
            .run_targeted_update(&persona(), &request, &sections, true)
            .await
            .unwrap();

        assert_eq!(report.version, 2);
        for stub in &stubs {
            let expected = if stub.kind == SectionKind::News { 2 } else { 1 };
            assert_eq!(stub.calls(), expected, "section {}", stub.kind);
        }

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_targeted_update_rejects_empty_section_set() {
        let path = ".dossier/test_orch_empty_set.db";
        let stubs: Vec<Arc<StubAgent>> =
            SectionKind::ALL.iter().map(|k| StubAgent::fast(*k)).collect();
        let (reports, memory) = sqlite_fixture(path);
        let orchestrator =
            ResearchOrchestrator::new(stub_set(&stubs), reports, memory, config(30));

        let request = ResearchRequest::new("Stripe").unwrap();
        let result = orchestrator
            .run_targeted_update(&persona(), &request, &BTreeSet::new(), true)
            .await;
        assert!(matches!(result, Err(CoreError::InvalidRequest(_))));

        let _ = fs::remove_file(path);
    }

    /// Repository that simulates a concurrent writer landing version 1
    /// between this run's load and save.
    struct ConflictOnceRepo {
        saves: AtomicUsize,
        interloper: Mutex<Report>,
    }

    impl ConflictOnceRepo {
        fn new() -> Self {
            let mut interloper = Report::empty("u1", "p1", "stripe", "Stripe");
            interloper.version = 1;
            Self {
                saves: AtomicUsize::new(0),
                interloper: Mutex::new(interloper),
            }
        }
    }

    impl ReportRepository for ConflictOnceRepo {
        fn get_latest(&self, _: &str, _: &str, _: &str) -> anyhow::Result<Option<Report>> {
            if self.saves.load(Ordering::SeqCst) == 0 {
                Ok(None)
            } else {
                Ok(Some(self.interloper.lock().unwrap().clone()))
            }
        }

        fn save(&self, report: &Report, expected: u64) -> Result<Report, SaveError> {
            let attempt = self.saves.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                Err(SaveError::Conflict { latest: 1 })
            } else {
                let mut stored = report.clone();
                stored.version = expected + 1;
                Ok(stored)
            }
        }

        fn list_companies(&self, _: &str, _: &str) -> anyhow::Result<Vec<crate::state::CompanyRef>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_save_conflict_re_merges_against_newer_version() {
        let path = ".dossier/test_orch_conflict.db";
        let _ = fs::remove_file(path);
        let db = DossierDb::open_at(path).unwrap();
        let memory: Arc<dyn MemoryStore> = Arc::new(SqliteMemoryStore::new(&db));

        let repo = Arc::new(ConflictOnceRepo::new());
        let stubs: Vec<Arc<StubAgent>> =
            SectionKind::ALL.iter().map(|k| StubAgent::fast(*k)).collect();
        let orchestrator = ResearchOrchestrator::new(
            stub_set(&stubs),
            Arc::clone(&repo) as Arc<dyn ReportRepository>,
            memory,
            config(30),
        );

        let request = ResearchRequest::new("Stripe").unwrap();
        let report = orchestrator
            .run_full_research(&persona(), &request, true)
            .await
            .unwrap();

        // Re-merged onto the interloper's version 1, landed as version 2.
        assert_eq!(report.version, 2);
        assert_eq!(repo.saves.load(Ordering::SeqCst), 2);

        let _ = fs::remove_file(path);
    }

    /// Repository whose save path is down.
    struct BrokenSaveRepo;

    impl ReportRepository for BrokenSaveRepo {
        fn get_latest(&self, _: &str, _: &str, _: &str) -> anyhow::Result<Option<Report>> {
            Ok(None)
        }

        fn save(&self, _: &Report, _: u64) -> Result<Report, SaveError> {
            Err(SaveError::Storage("disk on fire".to_string()))
        }

        fn list_companies(&self, _: &str, _: &str) -> anyhow::Result<Vec<crate::state::CompanyRef>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_storage_failure_returns_unsaved_report() {
        let path = ".dossier/test_orch_broken_save.db";
        let _ = fs::remove_file(path);
        let db = DossierDb::open_at(path).unwrap();
        let memory: Arc<dyn MemoryStore> = Arc::new(SqliteMemoryStore::new(&db));

        let stubs: Vec<Arc<StubAgent>> =
            SectionKind::ALL.iter().map(|k| StubAgent::fast(*k)).collect();
        let orchestrator = ResearchOrchestrator::new(
            stub_set(&stubs),
            Arc::new(BrokenSaveRepo),
            memory,
            config(30),
        );

        let request = ResearchRequest::new("Stripe").unwrap();
        let report = orchestrator
            .run_full_research(&persona(), &request, true)
            .await
            .unwrap();

        assert!(report.unsaved, "caller still gets the merged report");
        assert_eq!(report.current_section_count(), 6);

        let _ = fs::remove_file(path);
    }

    /// Repository that counts saves so cancellation can assert none happened.
    struct CountingRepo {
        saves: AtomicUsize,
    }

    impl ReportRepository for CountingRepo {
        fn get_latest(&self, _: &str, _: &str, _: &str) -> anyhow::Result<Option<Report>> {
            Ok(None)
        }

        fn save(&self, report: &Report, expected: u64) -> Result<Report, SaveError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            let mut stored = report.clone();
            stored.version = expected + 1;
            Ok(stored)
        }

        fn list_companies(&self, _: &str, _: &str) -> anyhow::Result<Vec<crate::state::CompanyRef>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_agents_and_persists_nothing() {
        let path = ".dossier/test_orch_cancel.db";
        let _ = fs::remove_file(path);
        let db = DossierDb::open_at(path).unwrap();
        let memory: Arc<dyn MemoryStore> = Arc::new(SqliteMemoryStore::new(&db));

        let stubs: Vec<Arc<StubAgent>> = SectionKind::ALL
            .iter()
            .map(|k| StubAgent::slow(*k, Duration::from_secs(3600)))
            .collect();
        let repo = Arc::new(CountingRepo {
            saves: AtomicUsize::new(0),
        });

        let (cancel_tx, cancel_rx) = watch::channel(true);
        let orchestrator = ResearchOrchestrator::new(
            stub_set(&stubs),
            Arc::clone(&repo) as Arc<dyn ReportRepository>,
            memory,
            config(7200),
        )
        .with_cancel_signal(cancel_rx);

        let request = ResearchRequest::new("Stripe").unwrap();
        let result = orchestrator
            .run_full_research(&persona(), &request, true)
            .await;

        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert_eq!(repo.saves.load(Ordering::SeqCst), 0);
        drop(cancel_tx);

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_run_writes_derived_memory_facts() {
        let path = ".dossier/test_orch_facts.db";
        let _ = fs::remove_file(path);
        let db = DossierDb::open_at(path).unwrap();
        let reports: Arc<dyn ReportRepository> = Arc::new(SqliteReportRepository::new(&db));
        let memory = Arc::new(SqliteMemoryStore::new(&db));

        let stubs: Vec<Arc<StubAgent>> =
            SectionKind::ALL.iter().map(|k| StubAgent::fast(*k)).collect();
        let orchestrator = ResearchOrchestrator::new(
            stub_set(&stubs),
            reports,
            Arc::clone(&memory) as Arc<dyn MemoryStore>,
            config(30),
        );

        let request = ResearchRequest::new("Stripe").unwrap();
        orchestrator
            .run_full_research(&persona(), &request, true)
            .await
            .unwrap();

        let facts = memory.recent("u1", "p1", 10).unwrap();
        assert!(!facts.is_empty());
        assert!(facts
            .iter()
            .any(|f| f.statement.contains("Completed research on Stripe")));

        let _ = fs::remove_file(path);
    }
}
