//! Orchestrator
//!
//! Sequences one query through the context-evolution loop:
//!
//! 1. BUILD_CONTEXT from a point-in-time playbook snapshot
//! 2. GENERATE and EXECUTE through the external collaborators
//! 3. EVALUATE, then REFLECT + CURATE (failure) or CURATE_REINFORCE (confirmed success)
//! 4. COMMIT with optimistic concurrency, re-curating on conflict
//! 5. LOG the pass to episodic memory
//!
//! Generation, execution and reflection run without any lock held. Only the
//! commit and the log append are serialized, so episodic order always matches
//! playbook commit order.
//!
//! # Failure handling
//!
//! Every failure (timeout, generation, reflection, persistence) ends the pass in
//! FAILED with no playbook mutation, and the attempt is still logged with an
//! error marker. The only error returned to the caller is `Cancelled`, which
//! writes nothing at all.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ace_sdk::errors::{AceError, ModelError};
use ace_sdk::{ExecutionOutcome, Feedback, LanguageModel, SchemaRetriever, Snippet, SqlExecutor};

use super::cancel::CancellationToken;
use super::context::ContextBuilder;
use super::curator::{CuratedBatch, CurationPlan, Curator};
use super::evaluator::{Evaluator, ScoreCard};
use super::generator::{Generation, Generator};
use super::reflector::{Insight, ReflectionInput, Reflector};
use super::stage::{Stage, StageTrail};
use crate::config::{Config, OrchestratorConfig};
use crate::episodic::{EpisodicLog, ErrorMarker, ExecutionSummary, RunRecord};
use crate::playbook::{
    CommitResult, CommitWarning, PlaybookItem, PlaybookStore, Section, StoreError,
};

/// Caller-facing outcome of one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub sql: Option<String>,
    pub execution_summary: Option<ExecutionSummary>,
    pub scorecard: Option<ScoreCard>,
    pub insight: Option<Insight>,
    pub playbook_version_after: u64,
    pub stages: Vec<Stage>,
    pub warnings: Vec<String>,
    pub error: Option<ErrorMarker>,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

impl From<&RunRecord> for RunResult {
    fn from(record: &RunRecord) -> Self {
        Self {
            run_id: record.run_id.clone(),
            sql: record.generated_sql.clone(),
            execution_summary: record.execution_result_summary.clone(),
            scorecard: record.scorecard.clone(),
            insight: record.insight.clone(),
            playbook_version_after: record.playbook_version_after,
            stages: record.stages.clone(),
            warnings: record.warnings.clone(),
            error: record.error.clone(),
        }
    }
}

/// Generated and executed attempt kept for later feedback
#[derive(Debug, Clone)]
struct Draft {
    query: String,
    generation: Generation,
    outcome: ExecutionOutcome,
    version_read: u64,
}

/// Bounded FIFO of drafts keyed by run id
struct DraftCache {
    capacity: usize,
    order: VecDeque<String>,
    drafts: HashMap<String, Draft>,
}

impl DraftCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            drafts: HashMap::new(),
        }
    }

    fn insert(&mut self, run_id: &str, draft: Draft) {
        if self.drafts.insert(run_id.to_string(), draft).is_none() {
            self.order.push_back(run_id.to_string());
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                debug!(run_id = %evicted, "Evicting draft");
                self.drafts.remove(&evicted);
            }
        }
    }

    fn get(&self, run_id: &str) -> Option<Draft> {
        self.drafts.get(run_id).cloned()
    }
}

/// State of one pass through the stage machine
struct Pass {
    trail: StageTrail,
    record: RunRecord,
}

impl Pass {
    fn new(run_id: &str, query: &str, first: Stage) -> Self {
        Self {
            trail: StageTrail::starting_at(first),
            record: RunRecord {
                run_id: run_id.to_string(),
                query: query.to_string(),
                generated_sql: None,
                reasoning: String::new(),
                playbook_ids_used: Vec::new(),
                tables_accessed: Vec::new(),
                execution_result_summary: None,
                user_feedback: None,
                scorecard: None,
                insight: None,
                delta_ops_applied: Vec::new(),
                playbook_version_before: 0,
                playbook_version_after: 0,
                timestamp: Utc::now(),
                stages: Vec::new(),
                warnings: Vec::new(),
                error: None,
            },
        }
    }

    fn resume(run_id: &str, draft: &Draft, feedback: Feedback) -> Self {
        let mut pass = Self::new(run_id, &draft.query, Stage::Evaluate);
        pass.absorb(draft);
        pass.record.user_feedback = Some(feedback);
        pass
    }

    fn absorb(&mut self, draft: &Draft) {
        let record = &mut self.record;
        record.generated_sql = Some(draft.generation.sql.clone());
        record.reasoning = draft.generation.reasoning.clone();
        record.playbook_ids_used = draft.generation.playbook_ids_used.clone();
        record.tables_accessed = draft.generation.tables_accessed.clone();
        record.execution_result_summary = Some(ExecutionSummary::from(&draft.outcome));
        record.playbook_version_before = draft.version_read;
        record.playbook_version_after = draft.version_read;
    }

    fn advance(&mut self, next: Stage) -> Result<(), AceError> {
        self.trail
            .advance(next)
            .map_err(|e| AceError::Internal(e.to_string()))
    }
}

/// Drives the context-evolution loop
pub struct Orchestrator {
    retriever: Arc<dyn SchemaRetriever>,
    executor: Arc<dyn SqlExecutor>,
    store: Arc<dyn PlaybookStore>,
    log: Arc<dyn EpisodicLog>,
    context_builder: ContextBuilder,
    generator: Generator,
    evaluator: Evaluator,
    reflector: Reflector,
    curator: Curator,
    config: OrchestratorConfig,
    /// Serializes commit + log append
    sequencer: Mutex<()>,
    drafts: Mutex<DraftCache>,
}

impl Orchestrator {
    /// Create an orchestrator with default component settings
    pub fn new(
        model: Arc<dyn LanguageModel>,
        retriever: Arc<dyn SchemaRetriever>,
        executor: Arc<dyn SqlExecutor>,
        store: Arc<dyn PlaybookStore>,
        log: Arc<dyn EpisodicLog>,
    ) -> Self {
        let config = Config::default_config();
        Self::from_config(&config, model, retriever, executor, store, log)
    }

    /// Create an orchestrator with every component configured from `config`
    pub fn from_config(
        config: &Config,
        model: Arc<dyn LanguageModel>,
        retriever: Arc<dyn SchemaRetriever>,
        executor: Arc<dyn SqlExecutor>,
        store: Arc<dyn PlaybookStore>,
        log: Arc<dyn EpisodicLog>,
    ) -> Self {
        Self {
            retriever,
            executor,
            store,
            log,
            context_builder: ContextBuilder::from_config(&config.context),
            generator: Generator::new(Arc::clone(&model)),
            evaluator: Evaluator::from_config(&config.evaluator),
            reflector: Reflector::new(Arc::clone(&model)),
            curator: Curator::from_config(&config.curator, model)
                .with_semantic_timeout(config.orchestrator.curate_timeout()),
            config: config.orchestrator.clone(),
            sequencer: Mutex::new(()),
            drafts: Mutex::new(DraftCache::new(config.orchestrator.draft_cache_size)),
        }
    }

    /// Replace the curator (e.g. to change the used-item policy)
    pub fn with_curator(mut self, curator: Curator) -> Self {
        self.curator = curator;
        self
    }

    pub fn with_orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.drafts = Mutex::new(DraftCache::new(config.draft_cache_size));
        self.config = config;
        self
    }

    /// Handle one query end to end
    pub async fn run(&self, query: &str, feedback: Option<Feedback>) -> Result<RunResult, AceError> {
        self.run_with_cancel(query, feedback, &CancellationToken::new())
            .await
    }

    /// Handle one query, abandoning it if `cancel` fires before COMMIT
    pub async fn run_with_cancel(
        &self,
        query: &str,
        feedback: Option<Feedback>,
        cancel: &CancellationToken,
    ) -> Result<RunResult, AceError> {
        let run_id = Uuid::new_v4().to_string();
        info!(%run_id, "Starting run: {}", query);

        let mut pass = Pass::new(&run_id, query, Stage::BuildContext);
        pass.record.user_feedback = feedback;

        let proposal = match self.prepare(&mut pass, cancel).await {
            Ok(draft) => {
                self.drafts.lock().await.insert(&run_id, draft.clone());
                match pass.advance(Stage::Evaluate) {
                    Ok(()) => self.learn(&mut pass, &draft, feedback, cancel).await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        self.finish(pass, proposal, cancel).await
    }

    /// Re-enter a previous run at EVALUATE with user feedback
    ///
    /// Uses the already generated SQL and execution result; nothing is
    /// regenerated or re-executed.
    pub async fn feedback(&self, run_id: &str, feedback: Feedback) -> Result<RunResult, AceError> {
        self.feedback_with_cancel(run_id, feedback, &CancellationToken::new())
            .await
    }

    pub async fn feedback_with_cancel(
        &self,
        run_id: &str,
        feedback: Feedback,
        cancel: &CancellationToken,
    ) -> Result<RunResult, AceError> {
        let draft = self
            .drafts
            .lock()
            .await
            .get(run_id)
            .ok_or_else(|| AceError::UnknownRun(run_id.to_string()))?;

        info!(%run_id, %feedback, "Re-entering run with feedback");

        let mut pass = Pass::resume(run_id, &draft, feedback);
        let proposal = self.learn(&mut pass, &draft, Some(feedback), cancel).await;
        self.finish(pass, proposal, cancel).await
    }

    /// Operator "fix & learn": commit one lesson outside the run loop
    pub async fn teach(&self, section: Section, content: &str) -> Result<CommitResult, AceError> {
        let plan = CurationPlan::Teach {
            section,
            content: content.to_string(),
        };
        let snapshot = self.store.read().await?;
        let batch = self.curator.curate(&plan, &snapshot.playbook).await;
        if batch.ops.is_empty() {
            return Err(AceError::Curation(batch.warnings.join("; ")));
        }

        let _sequence = self.sequencer.lock().await;
        let mut warnings = Vec::new();
        let committed = self
            .commit_with_retry(
                &plan,
                batch,
                snapshot.version,
                &CancellationToken::new(),
                &mut warnings,
            )
            .await?;

        for warning in &warnings {
            warn!(%section, "{}", warning);
        }

        committed.ok_or_else(|| AceError::Curation("lesson produced no playbook change".to_string()))
    }

    /// BUILD_CONTEXT → GENERATE → EXECUTE
    async fn prepare(&self, pass: &mut Pass, cancel: &CancellationToken) -> Result<Draft, AceError> {
        let query = pass.record.query.clone();

        let snapshot = self.store.read().await?;
        pass.record.playbook_version_before = snapshot.version;
        pass.record.playbook_version_after = snapshot.version;

        let retrieved = self
            .guarded(
                Stage::BuildContext,
                self.config.execute_timeout(),
                cancel,
                async { Ok(self.retriever.search(&query).await) },
            )
            .await;
        let snippets = match retrieved {
            Ok(Ok(snippets)) => snippets,
            Err(AceError::Cancelled) => return Err(AceError::Cancelled),
            Ok(Err(e)) => self.degrade_retrieval(pass, &e),
            Err(e) => self.degrade_retrieval(pass, &e),
        };

        let chain = self
            .context_builder
            .build(&query, &snippets, &snapshot.playbook);
        debug!(
            run_id = %pass.record.run_id,
            entries = chain.entries.len(),
            truncated = chain.truncated,
            tokens = chain.estimated_tokens(),
            "Context built"
        );

        pass.advance(Stage::Generate)?;
        let generate_limit = self.config.generate_timeout();
        let generation = self
            .guarded(
                Stage::Generate,
                generate_limit,
                cancel,
                self.generator.generate(&chain),
            )
            .await
            .map_err(|e| match e {
                AceError::Model(ModelError::Timeout) => AceError::Timeout {
                    stage: stage_label(Stage::Generate),
                    secs: generate_limit.as_secs(),
                },
                other => other,
            })?;

        pass.record.generated_sql = Some(generation.sql.clone());
        pass.record.reasoning = generation.reasoning.clone();
        pass.record.playbook_ids_used = generation.playbook_ids_used.clone();
        pass.record.tables_accessed = generation.tables_accessed.clone();

        pass.advance(Stage::Execute)?;
        let outcome = self
            .guarded(
                Stage::Execute,
                self.config.execute_timeout(),
                cancel,
                async {
                    Ok(match self.executor.execute(&generation.sql).await {
                        Ok(rows) => ExecutionOutcome::Succeeded(rows),
                        Err(e) => ExecutionOutcome::Failed { message: e.0 },
                    })
                },
            )
            .await?;

        if let Some(message) = outcome.error_message() {
            debug!(run_id = %pass.record.run_id, "Execution failed: {}", message);
        }
        pass.record.execution_result_summary = Some(ExecutionSummary::from(&outcome));

        Ok(Draft {
            query,
            generation,
            outcome,
            version_read: snapshot.version,
        })
    }

    /// EVALUATE → (REFLECT → CURATE | CURATE_REINFORCE)
    ///
    /// Returns the curation plan and its first batch, or `None` when nothing
    /// is to be learned from this pass.
    async fn learn(
        &self,
        pass: &mut Pass,
        draft: &Draft,
        feedback: Option<Feedback>,
        cancel: &CancellationToken,
    ) -> Result<Option<Proposal>, AceError> {
        let scorecard = self.evaluator.evaluate(
            &draft.query,
            &draft.generation.sql,
            &draft.outcome,
            feedback,
        );
        debug!(
            run_id = %pass.record.run_id,
            overall = scorecard.overall,
            reflect = scorecard.reflect,
            "Run evaluated"
        );
        pass.record.scorecard = Some(scorecard.clone());

        let used = draft.generation.playbook_ids_used.clone();

        let plan = if scorecard.reflect {
            pass.advance(Stage::Reflect)?;
            let snapshot = self.store.read().await?;
            let used_items: Vec<PlaybookItem> = used
                .iter()
                .filter_map(|id| snapshot.playbook.get(*id).cloned())
                .collect();
            let input = ReflectionInput {
                query: &draft.query,
                sql: &draft.generation.sql,
                outcome: &draft.outcome,
                feedback,
                used_items: &used_items,
            };
            let reflect_limit = self.config.reflect_timeout();
            let insight = self
                .guarded(
                    Stage::Reflect,
                    reflect_limit,
                    cancel,
                    self.reflector.reflect(&input),
                )
                .await
                .map_err(|e| match e {
                    AceError::Timeout { secs, .. } => {
                        AceError::Reflection(format!("reflection timed out after {}s", secs))
                    }
                    other => other,
                })?;
            info!(
                run_id = %pass.record.run_id,
                category = %insight.error_category,
                section = %insight.section,
                "Insight extracted"
            );
            pass.record.insight = Some(insight.clone());
            pass.advance(Stage::Curate)?;
            CurationPlan::Learn { insight, used }
        } else if feedback == Some(Feedback::Correct) {
            pass.advance(Stage::CurateReinforce)?;
            CurationPlan::Reinforce { used }
        } else {
            return Ok(None);
        };

        let snapshot = self.store.read().await?;
        let batch = self.curator.curate(&plan, &snapshot.playbook).await;
        if let Some(id) = batch.matched {
            debug!(run_id = %pass.record.run_id, %id, "Lesson matched existing item");
        }

        Ok(Some(Proposal {
            plan,
            batch,
            version_read: snapshot.version,
        }))
    }

    /// COMMIT → LOG → DONE, or FAILED → log
    async fn finish(
        &self,
        mut pass: Pass,
        proposal: Result<Option<Proposal>, AceError>,
        cancel: &CancellationToken,
    ) -> Result<RunResult, AceError> {
        let proposal = match proposal {
            Err(AceError::Cancelled) => return Err(self.cancelled(&pass)),
            other => other,
        };

        let _sequence = self.sequencer.lock().await;

        let outcome = match proposal {
            Ok(Some(proposal)) => self.commit_proposal(&mut pass, proposal, cancel).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        match outcome {
            Err(AceError::Cancelled) => return Err(self.cancelled(&pass)),
            Err(e) => {
                error!(
                    run_id = %pass.record.run_id,
                    stage = %pass.trail.current(),
                    kind = e.kind(),
                    "Run failed: {}",
                    e
                );
                pass.trail.fail();
                pass.record.delta_ops_applied.clear();
                pass.record.playbook_version_after = pass.record.playbook_version_before;
                pass.record.error = Some(ErrorMarker::from(&e));
            }
            Ok(()) => {
                for stage in [Stage::Log, Stage::Done] {
                    if let Err(e) = pass.advance(stage) {
                        error!(run_id = %pass.record.run_id, "{}", e);
                        pass.trail.fail();
                        pass.record.error = Some(ErrorMarker::from(&e));
                        break;
                    }
                }
            }
        }

        pass.record.stages = pass.trail.stages().to_vec();
        pass.record.timestamp = Utc::now();

        match self.log.append(pass.record.clone()).await {
            Ok(written) => {
                info!(
                    run_id = %written.run_id,
                    version = written.playbook_version_after,
                    failed = written.failed(),
                    "Run logged"
                );
                Ok(RunResult::from(&written))
            }
            Err(e) => {
                error!(run_id = %pass.record.run_id, "Failed to append episodic log: {}", e);
                let mut result = RunResult::from(&pass.record);
                if result.error.is_none() {
                    result.error = Some(ErrorMarker::from(&e));
                }
                Ok(result)
            }
        }
    }

    async fn commit_proposal(
        &self,
        pass: &mut Pass,
        proposal: Proposal,
        cancel: &CancellationToken,
    ) -> Result<(), AceError> {
        let Proposal {
            plan,
            batch,
            version_read,
        } = proposal;

        if batch.ops.is_empty() {
            debug!(run_id = %pass.record.run_id, "Nothing to commit");
            pass.record.warnings.extend(batch.warnings);
            return Ok(());
        }

        if cancel.is_cancelled() {
            return Err(AceError::Cancelled);
        }
        pass.advance(Stage::Commit)?;

        let committed = self
            .commit_with_retry(&plan, batch, version_read, cancel, &mut pass.record.warnings)
            .await?;

        if let Some(result) = committed {
            pass.record.playbook_version_before = result.version_before;
            pass.record.playbook_version_after = result.version_after;
            pass.record.delta_ops_applied = result.applied;
        }
        Ok(())
    }

    /// Commit `batch`, re-reading and re-curating on version conflicts
    ///
    /// Returns `None` when a re-curated batch turned out empty.
    async fn commit_with_retry(
        &self,
        plan: &CurationPlan,
        mut batch: CuratedBatch,
        mut version_read: u64,
        cancel: &CancellationToken,
        warnings: &mut Vec<String>,
    ) -> Result<Option<CommitResult>, AceError> {
        let limit = self.config.commit_timeout();
        let retries = self.config.max_commit_retries;

        for attempt in 0..=retries {
            if attempt > 0 {
                let fresh = self.store.read().await?;
                version_read = fresh.version;
                batch = self.curator.curate(plan, &fresh.playbook).await;
                if batch.ops.is_empty() {
                    warnings.extend(batch.warnings);
                    return Ok(None);
                }
            }

            if cancel.is_cancelled() {
                return Err(AceError::Cancelled);
            }

            // The budget bounds the wait for the store; a started commit is never abandoned
            match self.store.commit_within(version_read, &batch.ops, limit).await {
                Ok(result) => {
                    info!(
                        attempt,
                        version = result.version_after,
                        applied = result.applied.len(),
                        skipped = result.warnings.len(),
                        "Playbook commit succeeded"
                    );
                    warnings.extend(batch.warnings);
                    warnings.extend(result.warnings.iter().map(describe_warning));
                    return Ok(Some(result));
                }
                Err(StoreError::Conflict { expected, actual }) => {
                    warn!(attempt, expected, actual, "Playbook commit conflict, re-curating");
                }
                Err(StoreError::Busy { .. }) => {
                    return Err(AceError::Timeout {
                        stage: stage_label(Stage::Commit),
                        secs: limit.as_secs(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AceError::Persistence(format!(
            "playbook commit still conflicting after {} retries",
            retries
        )))
    }

    /// Await `fut` under the stage's time budget, racing cancellation
    async fn guarded<T, F>(
        &self,
        stage: Stage,
        limit: Duration,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<T, AceError>
    where
        F: Future<Output = Result<T, AceError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AceError::Cancelled),
            result = tokio::time::timeout(limit, fut) => match result {
                Ok(inner) => inner,
                Err(_) => {
                    warn!(%stage, secs = limit.as_secs(), "Stage timed out");
                    Err(AceError::Timeout {
                        stage: stage_label(stage),
                        secs: limit.as_secs(),
                    })
                }
            },
        }
    }

    fn degrade_retrieval(&self, pass: &mut Pass, e: &dyn std::fmt::Display) -> Vec<Snippet> {
        warn!(
            run_id = %pass.record.run_id,
            "Schema retrieval failed, continuing without snippets: {}",
            e
        );
        pass.record
            .warnings
            .push(format!("schema retrieval failed: {}", e));
        Vec::new()
    }

    fn cancelled(&self, pass: &Pass) -> AceError {
        info!(
            run_id = %pass.record.run_id,
            stage = %pass.trail.current(),
            "Run cancelled before commit, nothing logged"
        );
        AceError::Cancelled
    }
}

/// Curation output waiting for COMMIT
struct Proposal {
    plan: CurationPlan,
    batch: CuratedBatch,
    version_read: u64,
}

fn stage_label(stage: Stage) -> String {
    stage.as_str().to_lowercase()
}

fn describe_warning(warning: &CommitWarning) -> String {
    format!("skipped op {} ({}): {}", warning.index, warning.op, warning.reason)
}
