//! Core types for Flowstate

use serde::{Deserialize, Serialize};
use std::sync::Arc;

macro_rules! string_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(Arc::from(s.into()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(key: $name) -> Self {
                key.0.to_string()
            }
        }
    };
}

string_key!(
    /// Tracked entity identifier - cheaply cloneable
    EntityId
);

string_key!(
    /// Flow session identifier - cheaply cloneable
    SessionKey
);

string_key!(
    /// Code corpus handed to the evolution pipeline
    CorpusId
);

/// Clamp a metric into `[0, 1]`. NaN collapses to zero.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resonance {
    pub frequency: f64,
    pub amplitude: f64,
    pub harmony: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl Default for Resonance {
    fn default() -> Self {
        Self {
            frequency: 0.8,
            amplitude: 0.9,
            harmony: 0.8,
            field: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Protection {
    /// Disturbances at or below this intensity are absorbed.
    pub strength: f64,
    pub level: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl Default for Protection {
    fn default() -> Self {
        Self {
            strength: 0.8,
            level: 0.8,
            field: None,
        }
    }
}

/// Protective and resonance state of one tracked entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub id: EntityId,
    pub spatial_context: String,
    pub resonance: Resonance,
    pub depth: f64,
    pub protection: Protection,
}

impl Presence {
    pub fn new(id: EntityId, spatial_context: impl Into<String>) -> Self {
        Self {
            id,
            spatial_context: spatial_context.into(),
            resonance: Resonance::default(),
            depth: 0.8,
            protection: Protection::default(),
        }
    }

    /// Pull every unit-interval field back into `[0, 1]`.
    pub fn clamp(&mut self) {
        self.depth = clamp_unit(self.depth);
        self.protection.strength = clamp_unit(self.protection.strength);
        self.protection.level = clamp_unit(self.protection.level);
    }
}

/// An external event evaluated against a presence's protection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Disturbance {
    pub kind: String,
    pub intensity: f64,
    pub source: String,
    #[serde(default)]
    pub resonance: f64,
}

impl Disturbance {
    pub fn new(kind: impl Into<String>, intensity: f64, source: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            intensity,
            source: source.into(),
            resonance: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// Activity mode of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    #[default]
    Rest,
    Focus,
    Flow,
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlowState::Rest => "rest",
            FlowState::Focus => "focus",
            FlowState::Flow => "flow",
        };
        f.write_str(s)
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FlowLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for FlowLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlowLevel::Low => "low",
            FlowLevel::Medium => "medium",
            FlowLevel::High => "high",
        };
        f.write_str(s)
    }
}

/// Per-session flow record. `Default` is the session-start state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub current_flow: FlowState,
    pub flow_level: FlowLevel,
    pub is_protected: bool,
}

impl FlowRecord {
    /// The `(high, focus, unprotected)` triple that triggers auto-protection.
    pub fn wants_protection(&self) -> bool {
        self.flow_level == FlowLevel::High
            && self.current_flow == FlowState::Focus
            && !self.is_protected
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternMetrics {
    pub recognized_count: usize,
    pub applied_count: usize,
    pub quality: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    pub coverage: f64,
    pub reliability: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextMetrics {
    pub understanding: f64,
    pub coherence: f64,
}

/// Joined view over the latest pattern, test and context metrics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub patterns: PatternMetrics,
    pub tests: TestMetrics,
    pub context: ContextMetrics,
}

impl MetricsSnapshot {
    /// Mean of the five unit-interval metrics.
    pub fn quality(&self) -> f64 {
        let sum = clamp_unit(self.patterns.quality)
            + clamp_unit(self.tests.coverage)
            + clamp_unit(self.tests.reliability)
            + clamp_unit(self.context.understanding)
            + clamp_unit(self.context.coherence);
        sum / 5.0
    }
}
