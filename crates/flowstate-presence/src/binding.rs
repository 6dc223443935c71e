//! Presentation-facing bindings
//!
//! A `Binding` mirrors the latest value of a channel for a UI layer and
//! unsubscribes on `detach` or drop. `FlowBinding` adds the guarded setters
//! for one flow session.

use crate::flow::FlowController;
use flowstate_core::{
    FlowLevel, FlowRecord, FlowState, Result, SessionKey, StateChannel, Subscription,
};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct Binding<T> {
    value: Arc<Mutex<Option<T>>>,
    subscription: Subscription,
}

impl<T: Clone + Send + 'static> Binding<T> {
    pub fn attach(channel: &StateChannel<T>) -> Self {
        let value = Arc::new(Mutex::new(None));
        let slot = value.clone();
        let subscription = channel.subscribe(move |v: &T| {
            let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
            *guard = Some(v.clone());
        });
        Self { value, subscription }
    }

    /// The last value delivered before detach.
    pub fn get(&self) -> Option<T> {
        self.value.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl<T> Binding<T> {
    pub fn detach(&self) {
        self.subscription.cancel();
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_active()
    }
}

impl<T> Drop for Binding<T> {
    fn drop(&mut self) {
        self.subscription.cancel();
    }
}

/// Bound flow state plus guarded setter callbacks for one session.
pub struct FlowBinding {
    controller: Arc<FlowController>,
    key: SessionKey,
    state: Binding<FlowRecord>,
}

impl FlowBinding {
    pub fn attach(controller: Arc<FlowController>, key: SessionKey) -> Result<Self> {
        let state = Binding::attach(&controller.observe(&key)?);
        debug!("Flow binding attached to {}", key);
        Ok(Self { controller, key, state })
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn state(&self) -> Option<FlowRecord> {
        self.state.get()
    }

    pub fn set_flow(&self, state: FlowState) -> Result<FlowRecord> {
        self.controller.set_flow(&self.key, state)
    }

    pub fn set_flow_level(&self, level: FlowLevel) -> Result<FlowRecord> {
        self.controller.set_flow_level(&self.key, level)
    }

    pub fn protect(&self) -> Result<bool> {
        self.controller.protect(&self.key)
    }

    pub fn release(&self) -> Result<FlowRecord> {
        self.controller.release(&self.key)
    }

    pub fn detach(&self) {
        self.state.detach();
        debug!("Flow binding detached from {}", self.key);
    }

    pub fn is_attached(&self) -> bool {
        self.state.is_attached()
    }
}
