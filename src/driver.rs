//! JSON-lines command driver
//!
//! One command object per input line, one response object per output line.
//! Commands are tagged by `cmd`:
//!
//! ```text
//! {"cmd":"enter","id":"ana","context":"studio"}
//! {"cmd":"disturb","id":"ana","kind":"noise","intensity":0.9}
//! {"cmd":"start_session","session":"s1"}
//! {"cmd":"set_level","session":"s1","level":"high"}
//! {"cmd":"set_flow","session":"s1","state":"focus"}
//! {"cmd":"show","session":"s1"}
//! ```

use chrono::{DateTime, Utc};
use flowstate_core::{Disturbance, EntityId, FlowLevel, FlowState, SessionKey};
use flowstate_presence::{FlowController, PresenceRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Enter {
        id: String,
        #[serde(default)]
        context: String,
    },
    Disturb {
        id: String,
        kind: String,
        intensity: f64,
        #[serde(default)]
        source: String,
        #[serde(default)]
        resonance: f64,
    },
    StartSession {
        session: String,
    },
    SetFlow {
        session: String,
        state: FlowState,
    },
    SetLevel {
        session: String,
        level: FlowLevel,
    },
    Protect {
        session: String,
    },
    Release {
        session: String,
    },
    EndSession {
        session: String,
    },
    /// Show one presence, one session, or everything when neither is given.
    Show {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        session: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub ts: DateTime<Utc>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn ok(result: Value) -> Self {
        Self {
            ts: Utc::now(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn err(error: impl ToString) -> Self {
        Self {
            ts: Utc::now(),
            ok: false,
            result: None,
            error: Some(error.to_string()),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"ok":false,"error":"response encoding failed: {}"}}"#, e)
        })
    }
}

pub struct Driver {
    registry: PresenceRegistry,
    flow: FlowController,
}

impl Driver {
    pub fn new(auto_protect: bool) -> Self {
        Self {
            registry: PresenceRegistry::new(),
            flow: FlowController::new(auto_protect),
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    /// Parse and run one input line. Blank lines yield `None`.
    pub fn handle_line(&self, line: &str) -> Option<Response> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<Command>(line) {
            Ok(command) => Some(self.handle(command)),
            Err(e) => {
                warn!("Unparseable command: {}", e);
                Some(Response::err(format!("invalid command: {}", e)))
            }
        }
    }

    pub fn handle(&self, command: Command) -> Response {
        debug!("Command: {:?}", command);
        match self.dispatch(command) {
            Ok(result) => Response::ok(result),
            Err(e) => Response::err(e),
        }
    }

    fn dispatch(&self, command: Command) -> flowstate_core::Result<Value> {
        let value = match command {
            Command::Enter { id, context } => {
                self.registry.enter(id.as_str(), context);
                serde_json::to_value(self.registry.current(&EntityId::new(id))?)?
            }
            Command::Disturb {
                id,
                kind,
                intensity,
                source,
                resonance,
            } => {
                let disturbance = Disturbance {
                    resonance,
                    ..Disturbance::new(kind, intensity, source)
                };
                let breaks = self
                    .registry
                    .handle_disturbance(&EntityId::new(id), &disturbance)?;
                json!({ "breakthrough": breaks, "disturbance": disturbance })
            }
            Command::StartSession { session } => {
                let channel = self.flow.start_session(session.as_str());
                serde_json::to_value(channel.current_value().unwrap_or_default())?
            }
            Command::SetFlow { session, state } => {
                serde_json::to_value(self.flow.set_flow(&SessionKey::new(session), state)?)?
            }
            Command::SetLevel { session, level } => serde_json::to_value(
                self.flow.set_flow_level(&SessionKey::new(session), level)?,
            )?,
            Command::Protect { session } => {
                let protected = self.flow.protect(&SessionKey::new(session))?;
                json!({ "protected": protected })
            }
            Command::Release { session } => {
                serde_json::to_value(self.flow.release(&SessionKey::new(session))?)?
            }
            Command::EndSession { session } => {
                serde_json::to_value(self.flow.end_session(&SessionKey::new(session))?)?
            }
            Command::Show { id, session } => self.show(id, session)?,
        };
        Ok(value)
    }

    fn show(&self, id: Option<String>, session: Option<String>) -> flowstate_core::Result<Value> {
        match (id, session) {
            (Some(id), _) => {
                let presence = self.registry.current(&EntityId::new(id))?;
                Ok(serde_json::to_value(presence)?)
            }
            (None, Some(session)) => {
                let record = self.flow.record(&SessionKey::new(session))?;
                Ok(serde_json::to_value(record)?)
            }
            (None, None) => {
                let mut presences = serde_json::Map::new();
                for id in self.registry.ids() {
                    let presence = self.registry.current(&id)?;
                    presences.insert(id.to_string(), serde_json::to_value(presence)?);
                }
                let mut sessions = serde_json::Map::new();
                for key in self.flow.sessions() {
                    let record = self.flow.record(&key)?;
                    sessions.insert(key.to_string(), serde_json::to_value(record)?);
                }
                Ok(json!({ "presences": presences, "sessions": sessions }))
            }
        }
    }
}
