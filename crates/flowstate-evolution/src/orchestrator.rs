//! EvolutionOrchestrator — the four-phase evolution pipeline
//!
//! Phases run strictly in order; each waits for the previous one:
//! 1. Understand: the context producer absorbs the corpus.
//! 2. Recognize & apply: matches above `APPLY_CONFIDENCE_THRESHOLD` are applied,
//!    the rest are recorded as skipped.
//! 3. Test evolution: observe applied patterns, generate tests, validate coverage.
//! 4. Optimize & maintain: optimize around the applied pattern ids, then run
//!    maintenance with the current quality scalar.
//!
//! A failing phase ends the run with `PhaseFailure`. Nothing is retried and
//! nothing already done is rolled back.

use crate::aggregator::MetricsAggregator;
use crate::producer::{
    ContextProducer, CoverageReport, PatternMatch, PatternProducer, ProducerError, ProducerResult,
    TestProducer,
};
use flowstate_core::{CorpusId, Error, Result, StateChannel};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Matches must be strictly above this to be applied automatically.
pub const APPLY_CONFIDENCE_THRESHOLD: f64 = 0.9;

/// Quality handed to `maintain` when no metrics snapshot exists yet.
pub const FALLBACK_QUALITY: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Understand,
    RecognizeApply,
    TestEvolution,
    OptimizeMaintain,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Understand,
        Phase::RecognizeApply,
        Phase::TestEvolution,
        Phase::OptimizeMaintain,
    ];
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Understand => "understand",
            Phase::RecognizeApply => "recognize-apply",
            Phase::TestEvolution => "test-evolution",
            Phase::OptimizeMaintain => "optimize-maintain",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Started,
    Completed,
    Failed(String),
    Cancelled,
}

/// Progress notification published for every phase boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseEvent {
    pub run_id: Uuid,
    pub phase: Phase,
    pub status: PhaseStatus,
    /// Pattern ids applied earlier in the run. Set from the test phase on,
    /// so a later failure still reports what stays applied.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub applied: Vec<String>,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct EvolutionReport {
    pub run_id: Uuid,
    pub corpus: CorpusId,
    pub applied: Vec<PatternMatch>,
    pub skipped: Vec<PatternMatch>,
    pub tests_generated: usize,
    pub coverage: CoverageReport,
    pub quality: f64,
}

impl EvolutionReport {
    pub fn applied_ids(&self) -> Vec<String> {
        self.applied.iter().map(|m| m.pattern_id.clone()).collect()
    }
}

pub struct EvolutionOrchestrator {
    patterns: Arc<dyn PatternProducer>,
    tests: Arc<dyn TestProducer>,
    context: Arc<dyn ContextProducer>,
    aggregator: MetricsAggregator,
    progress: StateChannel<PhaseEvent>,
}

impl EvolutionOrchestrator {
    pub fn new(
        patterns: Arc<dyn PatternProducer>,
        tests: Arc<dyn TestProducer>,
        context: Arc<dyn ContextProducer>,
    ) -> Self {
        let aggregator =
            MetricsAggregator::from_producers(patterns.as_ref(), tests.as_ref(), context.as_ref());
        Self {
            patterns,
            tests,
            context,
            aggregator,
            progress: StateChannel::new(),
        }
    }

    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }

    /// Phase boundary events for every run.
    pub fn progress(&self) -> StateChannel<PhaseEvent> {
        self.progress.clone()
    }

    /// Quality scalar for maintenance: the latest snapshot's mean, or
    /// `FALLBACK_QUALITY` before the aggregator is ready.
    pub fn current_quality(&self) -> f64 {
        self.aggregator
            .snapshot()
            .map(|s| s.quality())
            .unwrap_or(FALLBACK_QUALITY)
    }

    pub async fn evolve(&self, corpus: &CorpusId) -> Result<EvolutionReport> {
        self.evolve_with_cancel(corpus, CancellationToken::new()).await
    }

    /// Run the pipeline, stopping at the next await point once `cancel` fires.
    pub async fn evolve_with_cancel(
        &self,
        corpus: &CorpusId,
        cancel: CancellationToken,
    ) -> Result<EvolutionReport> {
        let run_id = Uuid::new_v4();
        info!("Evolution {} started on corpus {}", run_id, corpus);

        self.run_phase(run_id, Phase::Understand, &[], &cancel, self.context.understand(corpus))
            .await?;

        let (applied, skipped) = self
            .run_phase(run_id, Phase::RecognizeApply, &[], &cancel, async {
                let matches = self.patterns.recognize(corpus).await?;
                let (applied, skipped): (Vec<_>, Vec<_>) = matches
                    .into_iter()
                    .partition(|m| m.confidence > APPLY_CONFIDENCE_THRESHOLD);
                for m in &skipped {
                    debug!(
                        "Pattern {} below threshold ({:.2}), not applied",
                        m.pattern_id, m.confidence
                    );
                }
                for m in &applied {
                    self.patterns.apply(m).await?;
                    debug!("Pattern {} applied ({:.2})", m.pattern_id, m.confidence);
                }
                Ok::<_, ProducerError>((applied, skipped))
            })
            .await?;
        info!(
            "Evolution {}: {} patterns applied, {} skipped",
            run_id,
            applied.len(),
            skipped.len()
        );

        let applied_ids: Vec<String> = applied.iter().map(|m| m.pattern_id.clone()).collect();
        let (tests_generated, coverage) = self
            .run_phase(run_id, Phase::TestEvolution, &applied_ids, &cancel, async {
                self.tests.observe_patterns(&applied).await?;
                let generated = self.tests.generate_tests().await?;
                let coverage = self.tests.validate_coverage().await?;
                Ok::<_, ProducerError>((generated.len(), coverage))
            })
            .await?;

        let quality = self
            .run_phase(run_id, Phase::OptimizeMaintain, &applied_ids, &cancel, async {
                self.context.optimize(&applied_ids).await?;
                let quality = self.current_quality();
                self.context.maintain(quality).await?;
                Ok::<_, ProducerError>(quality)
            })
            .await?;

        info!(
            "Evolution {} complete: coverage {:.2}, quality {:.2}",
            run_id, coverage.coverage, quality
        );
        Ok(EvolutionReport {
            run_id,
            corpus: corpus.clone(),
            applied,
            skipped,
            tests_generated,
            coverage,
            quality,
        })
    }

    async fn run_phase<T, F>(
        &self,
        run_id: Uuid,
        phase: Phase,
        applied: &[String],
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T>
    where
        F: Future<Output = ProducerResult<T>>,
    {
        let emit = |status| {
            self.progress.publish(PhaseEvent {
                run_id,
                phase,
                status,
                applied: applied.to_vec(),
            })
        };
        emit(PhaseStatus::Started);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = work => Some(result),
        };

        match outcome {
            None => {
                warn!("Evolution {} cancelled during {}", run_id, phase);
                emit(PhaseStatus::Cancelled);
                Err(Error::cancelled(phase))
            }
            Some(Err(e)) => {
                warn!(
                    "Evolution {} phase {} failed: {} ({} patterns stay applied)",
                    run_id,
                    phase,
                    e,
                    applied.len()
                );
                emit(PhaseStatus::Failed(e.to_string()));
                Err(Error::phase_failure(phase, e.to_string()))
            }
            Some(Ok(value)) => {
                emit(PhaseStatus::Completed);
                Ok(value)
            }
        }
    }
}
