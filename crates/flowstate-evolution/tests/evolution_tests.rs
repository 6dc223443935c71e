//! Tests for flowstate-evolution: MetricsAggregator join semantics and the
//! four-phase EvolutionOrchestrator against scripted producers.

use flowstate_core::{
    ContextMetrics, CorpusId, Error, MetricsSnapshot, PatternMetrics, StateChannel, TestMetrics,
};
use flowstate_evolution::*;
use std::sync::{Arc, Mutex};

type CallLog = Arc<Mutex<Vec<String>>>;

fn record(log: &CallLog, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

// ---------------------------------------------------------------------------
// Scripted producers
// ---------------------------------------------------------------------------

struct ScriptedPatterns {
    log: CallLog,
    matches: Vec<PatternMatch>,
    applied: Mutex<Vec<String>>,
    fail_recognize: bool,
    metrics: StateChannel<PatternMetrics>,
}

#[async_trait::async_trait]
impl PatternProducer for ScriptedPatterns {
    async fn recognize(&self, corpus: &CorpusId) -> ProducerResult<Vec<PatternMatch>> {
        record(&self.log, format!("recognize:{}", corpus));
        if self.fail_recognize {
            return Err(ProducerError::failed("matcher offline"));
        }
        Ok(self.matches.clone())
    }

    async fn apply(&self, pattern: &PatternMatch) -> ProducerResult<()> {
        record(&self.log, format!("apply:{}", pattern.pattern_id));
        self.applied.lock().unwrap().push(pattern.pattern_id.clone());
        Ok(())
    }

    fn metrics(&self) -> StateChannel<PatternMetrics> {
        self.metrics.clone()
    }
}

#[derive(Default)]
struct TestScript {
    fail_validate: bool,
    cancel_on_generate: Option<CancellationToken>,
}

struct ScriptedTests {
    log: CallLog,
    observed: Mutex<Vec<String>>,
    script: TestScript,
    metrics: StateChannel<TestMetrics>,
}

#[async_trait::async_trait]
impl TestProducer for ScriptedTests {
    async fn observe_patterns(&self, patterns: &[PatternMatch]) -> ProducerResult<()> {
        record(&self.log, "observe");
        self.observed
            .lock()
            .unwrap()
            .extend(patterns.iter().map(|p| p.pattern_id.clone()));
        Ok(())
    }

    async fn generate_tests(&self) -> ProducerResult<Vec<TestArtifact>> {
        record(&self.log, "generate");
        if let Some(token) = &self.script.cancel_on_generate {
            token.cancel();
        }
        let observed = self.observed.lock().unwrap().clone();
        Ok(observed
            .into_iter()
            .map(|id| TestArtifact {
                name: format!("test_{}", id),
                pattern_id: Some(id),
            })
            .collect())
    }

    async fn validate_coverage(&self) -> ProducerResult<CoverageReport> {
        record(&self.log, "validate");
        if self.script.cancel_on_generate.is_some() {
            std::future::pending::<()>().await;
        }
        if self.script.fail_validate {
            return Err(ProducerError::failed("coverage below floor"));
        }
        Ok(CoverageReport {
            coverage: 0.75,
            passed: 3,
            failed: 0,
        })
    }

    fn metrics(&self) -> StateChannel<TestMetrics> {
        self.metrics.clone()
    }
}

struct ScriptedContext {
    log: CallLog,
    fail_understand: bool,
    optimized: Mutex<Vec<String>>,
    maintained: Mutex<Vec<f64>>,
    metrics: StateChannel<ContextMetrics>,
}

#[async_trait::async_trait]
impl ContextProducer for ScriptedContext {
    async fn understand(&self, corpus: &CorpusId) -> ProducerResult<()> {
        record(&self.log, format!("understand:{}", corpus));
        if self.fail_understand {
            return Err(ProducerError::Unavailable("context store".into()));
        }
        Ok(())
    }

    async fn optimize(&self, pattern_ids: &[String]) -> ProducerResult<()> {
        record(&self.log, format!("optimize:{}", pattern_ids.join(",")));
        self.optimized.lock().unwrap().extend_from_slice(pattern_ids);
        Ok(())
    }

    async fn maintain(&self, quality: f64) -> ProducerResult<()> {
        record(&self.log, "maintain");
        self.maintained.lock().unwrap().push(quality);
        Ok(())
    }

    fn metrics(&self) -> StateChannel<ContextMetrics> {
        self.metrics.clone()
    }
}

struct Rig {
    log: CallLog,
    patterns: Arc<ScriptedPatterns>,
    tests: Arc<ScriptedTests>,
    context: Arc<ScriptedContext>,
}

impl Rig {
    fn new(matches: Vec<PatternMatch>) -> Self {
        Self::with(matches, false, TestScript::default(), false)
    }

    fn with(
        matches: Vec<PatternMatch>,
        fail_recognize: bool,
        script: TestScript,
        fail_understand: bool,
    ) -> Self {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        Self {
            patterns: Arc::new(ScriptedPatterns {
                log: log.clone(),
                matches,
                applied: Mutex::new(Vec::new()),
                fail_recognize,
                metrics: StateChannel::new(),
            }),
            tests: Arc::new(ScriptedTests {
                log: log.clone(),
                observed: Mutex::new(Vec::new()),
                script,
                metrics: StateChannel::new(),
            }),
            context: Arc::new(ScriptedContext {
                log: log.clone(),
                fail_understand,
                optimized: Mutex::new(Vec::new()),
                maintained: Mutex::new(Vec::new()),
                metrics: StateChannel::new(),
            }),
            log,
        }
    }

    fn orchestrator(&self) -> EvolutionOrchestrator {
        EvolutionOrchestrator::new(
            self.patterns.clone(),
            self.tests.clone(),
            self.context.clone(),
        )
    }

    fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn applied(&self) -> Vec<String> {
        self.patterns.applied.lock().unwrap().clone()
    }
}

fn pattern_metrics(recognized: usize, quality: f64) -> PatternMetrics {
    PatternMetrics {
        recognized_count: recognized,
        applied_count: 0,
        quality,
    }
}

fn collect_snapshots(channel: &StateChannel<MetricsSnapshot>) -> Arc<Mutex<Vec<MetricsSnapshot>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    // Subscriptions stay active until cancelled, so the handle can go.
    let _ = channel.subscribe(move |s: &MetricsSnapshot| sink.lock().unwrap().push(s.clone()));
    seen
}

// ===========================================================================
// MetricsAggregator
// ===========================================================================

#[test]
fn aggregator_waits_for_all_three_producers() {
    let patterns = StateChannel::new();
    let tests = StateChannel::new();
    let context = StateChannel::new();
    let agg = MetricsAggregator::new(&patterns, &tests, &context);
    let seen = collect_snapshots(&agg.observe());

    patterns.publish(pattern_metrics(1, 0.5));
    tests.publish(TestMetrics {
        coverage: 0.4,
        reliability: 0.9,
    });
    assert!(agg.snapshot().is_none());
    assert!(!agg.is_ready());
    assert!(seen.lock().unwrap().is_empty());

    context.publish(ContextMetrics {
        understanding: 0.6,
        coherence: 0.7,
    });
    assert!(agg.is_ready());
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn aggregator_second_publish_keeps_other_sources() {
    let patterns = StateChannel::new();
    let tests = StateChannel::new();
    let context = StateChannel::new();
    let agg = MetricsAggregator::new(&patterns, &tests, &context);
    let seen = collect_snapshots(&agg.observe());

    let test_metrics = TestMetrics {
        coverage: 0.4,
        reliability: 0.9,
    };
    let context_metrics = ContextMetrics {
        understanding: 0.6,
        coherence: 0.7,
    };
    patterns.publish(pattern_metrics(1, 0.5));
    tests.publish(test_metrics.clone());
    context.publish(context_metrics.clone());
    patterns.publish(pattern_metrics(7, 0.95));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    let latest = seen.last().unwrap();
    assert_eq!(latest.patterns, pattern_metrics(7, 0.95));
    assert_eq!(latest.tests, test_metrics);
    assert_eq!(latest.context, context_metrics);
    assert_eq!(agg.snapshot().as_ref(), Some(latest));
}

#[test]
fn aggregator_recomputes_once_per_publish() {
    let patterns = StateChannel::new();
    let tests = StateChannel::new();
    let context = StateChannel::new();
    let agg = MetricsAggregator::new(&patterns, &tests, &context);
    let seen = collect_snapshots(&agg.observe());

    patterns.publish(pattern_metrics(1, 0.1));
    tests.publish(TestMetrics::default());
    context.publish(ContextMetrics::default());
    tests.publish(TestMetrics {
        coverage: 1.0,
        reliability: 1.0,
    });
    context.publish(ContextMetrics {
        understanding: 1.0,
        coherence: 1.0,
    });
    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[test]
fn aggregator_joins_values_published_before_construction() {
    let patterns = StateChannel::with_value(pattern_metrics(2, 0.5));
    let tests = StateChannel::with_value(TestMetrics::default());
    let context = StateChannel::with_value(ContextMetrics::default());
    let agg = MetricsAggregator::new(&patterns, &tests, &context);
    assert_eq!(agg.snapshot().unwrap().patterns.recognized_count, 2);
}

#[test]
fn aggregator_detach_freezes_snapshot() {
    let patterns = StateChannel::with_value(pattern_metrics(2, 0.5));
    let tests = StateChannel::with_value(TestMetrics::default());
    let context = StateChannel::with_value(ContextMetrics::default());
    let agg = MetricsAggregator::new(&patterns, &tests, &context);

    agg.detach();
    assert_eq!(patterns.subscriber_count(), 0);
    patterns.publish(pattern_metrics(9, 0.5));
    assert_eq!(agg.snapshot().unwrap().patterns.recognized_count, 2);
}

#[test]
fn aggregator_drop_unsubscribes() {
    let patterns: StateChannel<PatternMetrics> = StateChannel::new();
    let tests: StateChannel<TestMetrics> = StateChannel::new();
    let context: StateChannel<ContextMetrics> = StateChannel::new();
    {
        let _agg = MetricsAggregator::new(&patterns, &tests, &context);
        assert_eq!(tests.subscriber_count(), 1);
    }
    assert_eq!(tests.subscriber_count(), 0);
}

// ===========================================================================
// EvolutionOrchestrator
// ===========================================================================

#[tokio::test]
async fn evolve_applies_only_above_threshold() {
    let rig = Rig::new(vec![
        PatternMatch::new("hi", 0.95),
        PatternMatch::new("lo", 0.85),
        PatternMatch::new("edge", APPLY_CONFIDENCE_THRESHOLD),
    ]);
    let report = rig.orchestrator().evolve(&CorpusId::new("repo")).await.unwrap();

    assert_eq!(rig.applied(), vec!["hi"]);
    assert_eq!(report.applied_ids(), vec!["hi"]);
    let skipped: Vec<&str> = report.skipped.iter().map(|m| m.pattern_id.as_str()).collect();
    assert_eq!(skipped, vec!["lo", "edge"]);
    assert_eq!(report.tests_generated, 1);
    assert_eq!(report.coverage.coverage, 0.75);
    assert_eq!(report.corpus.as_str(), "repo");
}

#[tokio::test]
async fn evolve_runs_phases_in_order() {
    let rig = Rig::new(vec![PatternMatch::new("p1", 0.99), PatternMatch::new("p2", 0.5)]);
    rig.orchestrator().evolve(&CorpusId::new("c")).await.unwrap();

    assert_eq!(
        rig.calls(),
        vec![
            "understand:c",
            "recognize:c",
            "apply:p1",
            "observe",
            "generate",
            "validate",
            "optimize:p1",
            "maintain",
        ]
    );
}

#[tokio::test]
async fn optimize_receives_pattern_ids_of_applied_matches() {
    let rig = Rig::new(vec![PatternMatch::new("a", 0.97), PatternMatch::new("b", 0.93)]);
    rig.orchestrator().evolve(&CorpusId::new("c")).await.unwrap();
    assert_eq!(*rig.context.optimized.lock().unwrap(), vec!["a", "b"]);
    assert_eq!(*rig.tests.observed.lock().unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_phase_failure_keeps_applied_patterns() {
    let rig = Rig::with(
        vec![PatternMatch::new("keep", 0.95)],
        false,
        TestScript {
            fail_validate: true,
            ..Default::default()
        },
        false,
    );
    let err = rig
        .orchestrator()
        .evolve(&CorpusId::new("c"))
        .await
        .unwrap_err();

    match err {
        Error::PhaseFailure { phase, message } => {
            assert_eq!(phase, "test-evolution");
            assert!(message.contains("coverage below floor"));
        }
        other => panic!("expected PhaseFailure, got {other:?}"),
    }
    assert_eq!(rig.applied(), vec!["keep"]);
    assert!(rig.calls().contains(&"validate".to_string()));
    assert!(!rig.calls().iter().any(|c| c.starts_with("optimize")));
}

#[tokio::test]
async fn understand_failure_stops_before_recognition() {
    let rig = Rig::with(
        vec![PatternMatch::new("p", 0.99)],
        false,
        TestScript::default(),
        true,
    );
    let err = rig
        .orchestrator()
        .evolve(&CorpusId::new("c"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PhaseFailure { ref phase, .. } if phase == "understand"));
    assert_eq!(rig.calls(), vec!["understand:c"]);
}

#[tokio::test]
async fn recognize_failure_is_phase_two() {
    let rig = Rig::with(vec![], true, TestScript::default(), false);
    let err = rig
        .orchestrator()
        .evolve(&CorpusId::new("c"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PhaseFailure { ref phase, .. } if phase == "recognize-apply"));
    assert!(rig.applied().is_empty());
}

#[tokio::test]
async fn maintain_uses_fallback_quality_without_snapshot() {
    let rig = Rig::new(vec![]);
    let report = rig.orchestrator().evolve(&CorpusId::new("c")).await.unwrap();
    assert_eq!(report.quality, FALLBACK_QUALITY);
    assert_eq!(*rig.context.maintained.lock().unwrap(), vec![FALLBACK_QUALITY]);
}

#[tokio::test]
async fn maintain_uses_snapshot_quality() {
    let rig = Rig::new(vec![]);
    let orchestrator = rig.orchestrator();
    rig.patterns.metrics.publish(pattern_metrics(3, 1.0));
    rig.tests.metrics.publish(TestMetrics {
        coverage: 0.5,
        reliability: 0.5,
    });
    rig.context.metrics.publish(ContextMetrics {
        understanding: 0.0,
        coherence: 0.5,
    });
    assert!((orchestrator.current_quality() - 0.5).abs() < 1e-9);

    let report = orchestrator.evolve(&CorpusId::new("c")).await.unwrap();
    assert!((report.quality - 0.5).abs() < 1e-9);
    assert_eq!(orchestrator.aggregator().snapshot().unwrap().patterns.recognized_count, 3);
}

#[tokio::test]
async fn cancelled_token_stops_before_first_phase() {
    let rig = Rig::new(vec![PatternMatch::new("p", 0.99)]);
    let token = CancellationToken::new();
    token.cancel();
    let err = rig
        .orchestrator()
        .evolve_with_cancel(&CorpusId::new("c"), token)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled { ref phase } if phase == "understand"));
    assert!(rig.calls().is_empty());
}

#[tokio::test]
async fn cancellation_mid_phase_keeps_prior_phases() {
    let token = CancellationToken::new();
    let rig = Rig::with(
        vec![PatternMatch::new("p", 0.99)],
        false,
        TestScript {
            cancel_on_generate: Some(token.clone()),
            ..Default::default()
        },
        false,
    );
    let err = rig
        .orchestrator()
        .evolve_with_cancel(&CorpusId::new("c"), token)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled { ref phase } if phase == "test-evolution"));
    assert_eq!(rig.applied(), vec!["p"]);
    assert!(!rig.calls().contains(&"maintain".to_string()));
}

#[tokio::test]
async fn progress_reports_every_phase_boundary() {
    let rig = Rig::new(vec![PatternMatch::new("p", 0.99)]);
    let orchestrator = rig.orchestrator();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let _sub = orchestrator
        .progress()
        .subscribe(move |e: &PhaseEvent| sink.lock().unwrap().push(e.clone()));

    let report = orchestrator.evolve(&CorpusId::new("c")).await.unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 8);
    for (i, phase) in Phase::ALL.iter().enumerate() {
        assert_eq!(events[2 * i].phase, *phase);
        assert_eq!(events[2 * i].status, PhaseStatus::Started);
        assert_eq!(events[2 * i + 1].phase, *phase);
        assert_eq!(events[2 * i + 1].status, PhaseStatus::Completed);
    }
    assert!(events.iter().all(|e| e.run_id == report.run_id));
}

#[tokio::test]
async fn progress_marks_failed_phase() {
    let rig = Rig::with(
        vec![],
        false,
        TestScript {
            fail_validate: true,
            ..Default::default()
        },
        false,
    );
    let orchestrator = rig.orchestrator();
    let _ = orchestrator.evolve(&CorpusId::new("c")).await;
    let last = orchestrator.progress().current_value().unwrap();
    assert_eq!(last.phase, Phase::TestEvolution);
    assert!(matches!(last.status, PhaseStatus::Failed(ref m) if m.contains("coverage")));
}

#[tokio::test]
async fn failed_event_reports_patterns_that_stay_applied() {
    let rig = Rig::with(
        vec![PatternMatch::new("keep", 0.95), PatternMatch::new("drop", 0.5)],
        false,
        TestScript {
            fail_validate: true,
            ..Default::default()
        },
        false,
    );
    let orchestrator = rig.orchestrator();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let _sub = orchestrator
        .progress()
        .subscribe(move |e: &PhaseEvent| sink.lock().unwrap().push(e.clone()));

    assert!(orchestrator.evolve(&CorpusId::new("c")).await.is_err());

    let events = events.lock().unwrap();
    let failed = events.last().unwrap();
    assert!(matches!(failed.status, PhaseStatus::Failed(_)));
    assert_eq!(failed.applied, vec!["keep"]);
    assert!(events
        .iter()
        .filter(|e| e.phase == Phase::RecognizeApply)
        .all(|e| e.applied.is_empty()));
}
