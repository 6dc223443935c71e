//! MetricsAggregator — combine-latest over the three producer channels
//!
//! An explicit join: one last-known-value slot per producer, `None` until
//! that producer has published. Nothing is emitted until all three slots are
//! filled; after that every upstream publish recomputes the snapshot from
//! all three slots and republishes it.

use crate::producer::{ContextProducer, PatternProducer, TestProducer};
use flowstate_core::{
    ContextMetrics, MetricsSnapshot, PatternMetrics, StateChannel, Subscription, TestMetrics,
};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Default)]
struct JoinSlots {
    patterns: Option<PatternMetrics>,
    tests: Option<TestMetrics>,
    context: Option<ContextMetrics>,
}

impl JoinSlots {
    fn snapshot(&self) -> Option<MetricsSnapshot> {
        Some(MetricsSnapshot {
            patterns: self.patterns.clone()?,
            tests: self.tests.clone()?,
            context: self.context.clone()?,
        })
    }
}

pub struct MetricsAggregator {
    slots: Arc<Mutex<JoinSlots>>,
    output: StateChannel<MetricsSnapshot>,
    subscriptions: Vec<Subscription>,
}

impl MetricsAggregator {
    pub fn new(
        patterns: &StateChannel<PatternMetrics>,
        tests: &StateChannel<TestMetrics>,
        context: &StateChannel<ContextMetrics>,
    ) -> Self {
        let slots = Arc::new(Mutex::new(JoinSlots::default()));
        let output = StateChannel::new();
        let subscriptions = vec![
            join(patterns, &slots, &output, |s, m| s.patterns = Some(m)),
            join(tests, &slots, &output, |s, m| s.tests = Some(m)),
            join(context, &slots, &output, |s, m| s.context = Some(m)),
        ];
        Self { slots, output, subscriptions }
    }

    pub fn from_producers(
        patterns: &dyn PatternProducer,
        tests: &dyn TestProducer,
        context: &dyn ContextProducer,
    ) -> Self {
        Self::new(&patterns.metrics(), &tests.metrics(), &context.metrics())
    }

    /// The latest composite, or `None` until every producer has published.
    pub fn snapshot(&self) -> Option<MetricsSnapshot> {
        self.output.current_value()
    }

    pub fn observe(&self) -> StateChannel<MetricsSnapshot> {
        self.output.clone()
    }

    pub fn is_ready(&self) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.patterns.is_some() && slots.tests.is_some() && slots.context.is_some()
    }

    /// Stop following the producers. The last snapshot stays readable.
    pub fn detach(&self) {
        for sub in &self.subscriptions {
            sub.cancel();
        }
    }
}

impl Drop for MetricsAggregator {
    fn drop(&mut self) {
        self.detach();
    }
}

fn join<T, F>(
    source: &StateChannel<T>,
    slots: &Arc<Mutex<JoinSlots>>,
    output: &StateChannel<MetricsSnapshot>,
    store: F,
) -> Subscription
where
    T: Clone + Send + 'static,
    F: Fn(&mut JoinSlots, T) + Send + Sync + 'static,
{
    let slots = slots.clone();
    let output = output.clone();
    source.subscribe(move |value: &T| {
        let snapshot = {
            let mut slots = slots.lock().unwrap_or_else(|p| p.into_inner());
            store(&mut slots, value.clone());
            slots.snapshot()
        };
        match snapshot {
            Some(snapshot) => output.publish(snapshot),
            None => debug!("metrics join waiting for remaining producers"),
        }
    })
}
