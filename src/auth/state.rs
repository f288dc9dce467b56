//! Authentication state carried across redirects
//!
//! The state is an explicit, versioned struct. Stores only ever see it
//! through serde, keyed by an opaque id.

use super::Attributes;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Current layout version of [`AuthState`].
pub const STATE_VERSION: u32 = 1;

/// State store errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State information lost or expired: {0}")]
    NotFound(String),

    #[error("Wrong stage in state {id}: expected {expected}, found {found}")]
    WrongStage {
        id: String,
        expected: String,
        found: String,
    },

    #[error("Failed to serialize state: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Where logout has to be routed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutState {
    /// Source that authenticated the user, `None` when nothing is recorded.
    pub backend: Option<String>,
}

/// Metadata of the relying service provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpMetadata {
    pub entity_id: String,
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

impl SpMetadata {
    /// Loose truthiness of an option: `true`, non-zero numbers, non-empty
    /// strings other than `"0"`, and non-empty arrays or objects.
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.options.get(name).map(is_truthy)
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Serializable carrier for an error that has to survive a redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCarrier {
    pub kind: String,
    pub message: String,
    pub status: u16,
}

impl ErrorCarrier {
    /// Kind given to errors that are not one of ours.
    pub const UNSERIALIZABLE: &'static str = "unserializable";

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// State of one authentication flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub version: u32,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub return_to: Option<String>,
    #[serde(default)]
    pub logout_state: LogoutState,
    #[serde(default)]
    pub auth_source_id: Option<String>,
    #[serde(default)]
    pub sp_metadata: Option<SpMetadata>,
    #[serde(default)]
    pub attributes: Option<Attributes>,
    #[serde(default)]
    pub exception: Option<ErrorCarrier>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            stage: None,
            return_to: None,
            logout_state: LogoutState::default(),
            auth_source_id: None,
            sp_metadata: None,
            attributes: None,
            exception: None,
        }
    }
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sp_metadata(mut self, sp: SpMetadata) -> Self {
        self.sp_metadata = Some(sp);
        self
    }

    #[must_use]
    pub fn with_return_to(mut self, url: impl Into<String>) -> Self {
        self.return_to = Some(url.into());
        self
    }
}

/// Persists [`AuthState`] between two independent requests.
pub trait StateStore: Send + Sync {
    /// Save the state for `stage`, returning the opaque id.
    fn save(&self, state: &AuthState, stage: &str) -> Result<String, StateError>;

    /// Load a state previously saved for `stage`.
    fn load(&self, id: &str, stage: &str) -> Result<AuthState, StateError>;

    /// Drop every expired state.
    fn purge_expired(&self);
}

struct StoredState {
    payload: String,
    expires_at: DateTime<Utc>,
}

/// In-memory state store with a fixed time to live.
///
/// Loading does not consume the state, so a retried request can pick it up
/// again until it expires.
pub struct MemoryStateStore {
    states: DashMap<String, StoredState>,
    ttl: Duration,
}

impl MemoryStateStore {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            states: DashMap::new(),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn save(&self, state: &AuthState, stage: &str) -> Result<String, StateError> {
        let mut state = state.clone();
        state.stage = Some(stage.to_string());
        let payload = serde_json::to_string(&state)?;
        let id = uuid::Uuid::new_v4().to_string();
        self.states.insert(
            id.clone(),
            StoredState {
                payload,
                expires_at: Utc::now() + self.ttl,
            },
        );
        debug!(state_id = %id, stage, "Saved authentication state");
        Ok(id)
    }

    fn load(&self, id: &str, stage: &str) -> Result<AuthState, StateError> {
        let live = self
            .states
            .get(id)
            .map(|stored| (stored.expires_at > Utc::now()).then(|| stored.payload.clone()));
        let payload = match live {
            Some(Some(payload)) => payload,
            Some(None) => {
                self.states.remove(id);
                return Err(StateError::NotFound(id.to_string()));
            }
            None => return Err(StateError::NotFound(id.to_string())),
        };

        let state: AuthState = serde_json::from_str(&payload)?;
        match state.stage.as_deref() {
            Some(found) if found == stage => Ok(state),
            found => Err(StateError::WrongStage {
                id: id.to_string(),
                expected: stage.to_string(),
                found: found.unwrap_or_default().to_string(),
            }),
        }
    }

    fn purge_expired(&self) {
        let now = Utc::now();
        self.states.retain(|_, stored| stored.expires_at > now);
    }
}
