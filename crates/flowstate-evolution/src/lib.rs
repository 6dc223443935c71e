//! Flowstate Evolution — metric aggregation and the autonomous evolution loop
//!
//! Architecture:
//! - Producers (pattern, test, context) each publish a metrics channel and
//!   expose async operations; their algorithms live outside this crate.
//! - MetricsAggregator: combine-latest join of the three metric channels.
//! - EvolutionOrchestrator: understand → recognize/apply → test → optimize/maintain.

pub mod aggregator;
pub mod orchestrator;
pub mod producer;

pub use aggregator::MetricsAggregator;
pub use orchestrator::{
    EvolutionOrchestrator, EvolutionReport, Phase, PhaseEvent, PhaseStatus,
    APPLY_CONFIDENCE_THRESHOLD, FALLBACK_QUALITY,
};
pub use producer::{
    ContextProducer, CoverageReport, PatternMatch, PatternProducer, ProducerError, ProducerResult,
    TestArtifact, TestProducer,
};
pub use tokio_util::sync::CancellationToken;
