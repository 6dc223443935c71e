//! Producer contracts
//!
//! The pattern, test and context producers are external collaborators. The
//! evolution loop needs only their latest-metrics channel and the async
//! operations below.

use flowstate_core::{ContextMetrics, CorpusId, PatternMetrics, StateChannel, TestMetrics};
use serde::{Deserialize, Serialize};

/// Result type for producer operations
pub type ProducerResult<T> = Result<T, ProducerError>;

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("operation failed: {0}")]
    Failed(String),

    #[error("producer unavailable: {0}")]
    Unavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ProducerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A recognized pattern occurrence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl PatternMatch {
    pub fn new(pattern_id: impl Into<String>, confidence: f64) -> Self {
        Self {
            pattern_id: pattern_id.into(),
            confidence,
            location: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestArtifact {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub coverage: f64,
    pub passed: usize,
    pub failed: usize,
}

#[async_trait::async_trait]
pub trait PatternProducer: Send + Sync {
    async fn recognize(&self, corpus: &CorpusId) -> ProducerResult<Vec<PatternMatch>>;

    async fn apply(&self, pattern: &PatternMatch) -> ProducerResult<()>;

    fn metrics(&self) -> StateChannel<PatternMetrics>;
}

#[async_trait::async_trait]
pub trait TestProducer: Send + Sync {
    async fn observe_patterns(&self, patterns: &[PatternMatch]) -> ProducerResult<()>;

    async fn generate_tests(&self) -> ProducerResult<Vec<TestArtifact>>;

    async fn validate_coverage(&self) -> ProducerResult<CoverageReport>;

    fn metrics(&self) -> StateChannel<TestMetrics>;
}

#[async_trait::async_trait]
pub trait ContextProducer: Send + Sync {
    async fn understand(&self, corpus: &CorpusId) -> ProducerResult<()>;

    /// Optimize around the given pattern ids.
    async fn optimize(&self, pattern_ids: &[String]) -> ProducerResult<()>;

    /// Maintenance pass with the current quality scalar in `[0, 1]`.
    async fn maintain(&self, quality: f64) -> ProducerResult<()>;

    fn metrics(&self) -> StateChannel<ContextMetrics>;
}
