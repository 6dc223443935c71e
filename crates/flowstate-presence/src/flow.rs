//! Flow controller — per-session flow state with protection guards
//!
//! Each session owns a `FlowRecord` channel. While a record is protected,
//! `set_flow` and `set_flow_level` are rejected until `release`.
//!
//! Auto-protect runs as a post-update hook after every flow transition:
//! when the record lands on (high, focus, unprotected) and the policy is
//! enabled, `protect` is invoked. Once protected, the hook's condition is
//! false, so it never fires twice. `release` is not a flow transition and
//! does not run the hook.

use dashmap::DashMap;
use flowstate_core::{Error, FlowLevel, FlowRecord, FlowState, Result, SessionKey, StateChannel};
use tracing::{debug, info, warn};

pub struct FlowController {
    sessions: DashMap<SessionKey, StateChannel<FlowRecord>>,
    auto_protect: bool,
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FlowController {
    pub fn new(auto_protect: bool) -> Self {
        Self {
            sessions: DashMap::new(),
            auto_protect,
        }
    }

    pub fn auto_protect(&self) -> bool {
        self.auto_protect
    }

    /// Begin a session at `{rest, medium, unprotected}`. An already running
    /// session keeps its record.
    pub fn start_session(&self, key: impl Into<SessionKey>) -> StateChannel<FlowRecord> {
        let key = key.into();
        self.sessions
            .entry(key.clone())
            .or_insert_with(|| {
                info!("Flow session {} started", key);
                StateChannel::with_value(FlowRecord::default())
            })
            .clone()
    }

    pub fn end_session(&self, key: &SessionKey) -> Result<FlowRecord> {
        let (_, channel) = self
            .sessions
            .remove(key)
            .ok_or_else(|| Error::session_not_found(key.as_str()))?;
        info!("Flow session {} ended", key);
        Ok(channel.current_value().unwrap_or_default())
    }

    pub fn observe(&self, key: &SessionKey) -> Result<StateChannel<FlowRecord>> {
        self.sessions
            .get(key)
            .map(|c| c.clone())
            .ok_or_else(|| Error::session_not_found(key.as_str()))
    }

    pub fn record(&self, key: &SessionKey) -> Result<FlowRecord> {
        Ok(self.observe(key)?.current_value().unwrap_or_default())
    }

    pub fn sessions(&self) -> Vec<SessionKey> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn set_flow(&self, key: &SessionKey, state: FlowState) -> Result<FlowRecord> {
        self.transition(key, |record| record.current_flow = state)
    }

    pub fn set_flow_level(&self, key: &SessionKey, level: FlowLevel) -> Result<FlowRecord> {
        self.transition(key, |record| record.flow_level = level)
    }

    /// Engage protection. Takes effect only at `FlowLevel::High`; returns
    /// whether the session is protected afterwards.
    pub fn protect(&self, key: &SessionKey) -> Result<bool> {
        let channel = self.observe(key)?;
        let mut record = channel.current_value().unwrap_or_default();
        if record.is_protected {
            return Ok(true);
        }
        if record.flow_level != FlowLevel::High {
            debug!("Session {}: protect ignored at level {}", key, record.flow_level);
            return Ok(false);
        }
        record.is_protected = true;
        channel.publish(record);
        info!("Session {} protected", key);
        Ok(true)
    }

    pub fn release(&self, key: &SessionKey) -> Result<FlowRecord> {
        let channel = self.observe(key)?;
        let mut record = channel.current_value().unwrap_or_default();
        record.is_protected = false;
        channel.publish(record.clone());
        info!("Session {} released", key);
        Ok(record)
    }

    fn transition<F>(&self, key: &SessionKey, apply: F) -> Result<FlowRecord>
    where
        F: FnOnce(&mut FlowRecord),
    {
        let channel = self.observe(key)?;
        let mut record = channel.current_value().unwrap_or_default();
        if record.is_protected {
            warn!("Session {}: mutation rejected while protected", key);
            return Err(Error::protected(key.as_str()));
        }
        apply(&mut record);
        debug!(
            "Session {} -> {} / {}",
            key, record.current_flow, record.flow_level
        );
        channel.publish(record);
        self.after_transition(key, &channel)
    }

    /// Post-update hook. Reads the published record back so a reentrant
    /// observer that already changed it is respected.
    fn after_transition(
        &self,
        key: &SessionKey,
        channel: &StateChannel<FlowRecord>,
    ) -> Result<FlowRecord> {
        let record = channel.current_value().unwrap_or_default();
        if self.auto_protect && record.wants_protection() {
            info!("Session {}: high focus reached, auto-protecting", key);
            self.protect(key)?;
            return Ok(channel.current_value().unwrap_or_default());
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_does_not_refire_after_protection() {
        let fc = FlowController::new(true);
        let key = SessionKey::new("s");
        let channel = fc.start_session(key.clone());
        let publishes = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = publishes.clone();
        let _sub = channel.subscribe(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        fc.set_flow_level(&key, FlowLevel::High).unwrap();
        fc.set_flow(&key, FlowState::Focus).unwrap();
        // replay + level + flow + auto-protect
        assert_eq!(publishes.load(std::sync::atomic::Ordering::SeqCst), 4);
        assert!(fc.protect(&key).unwrap());
        assert_eq!(publishes.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[test]
    fn release_does_not_run_hook() {
        let fc = FlowController::new(true);
        let key = SessionKey::new("s");
        fc.start_session(key.clone());
        fc.set_flow_level(&key, FlowLevel::High).unwrap();
        fc.set_flow(&key, FlowState::Focus).unwrap();
        let released = fc.release(&key).unwrap();
        assert!(!released.is_protected);
        assert!(!fc.record(&key).unwrap().is_protected);
    }
}
