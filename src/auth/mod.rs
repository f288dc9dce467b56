//! Authentication module
//!
//! Provides the authentication source capability shared by every login
//! mechanism (Kerberos negotiate, static directory) and the per-request
//! context they run in.

use async_trait::async_trait;
use hyper::StatusCode;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use thiserror::Error;

pub mod registry;
pub mod state;
pub mod static_source;

pub use registry::SourceRegistry;
pub use state::{
    AuthState, ErrorCarrier, LogoutState, MemoryStateStore, SpMetadata, StateError, StateStore,
};

use crate::session::SessionStore;

/// Identity attributes: attribute name to its values.
pub type Attributes = BTreeMap<String, Vec<String>>;

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Unable to determine auth source.")]
    NoBackend,

    #[error("Could not find authentication source with id {0}")]
    UnknownSource(String),

    #[error(
        "Failed to perform channel binding using any of the configured certificate hashes."
    )]
    ChannelBindingExhausted,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Authentication source {0} cannot look up attributes")]
    AttributesUnsupported(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("{}: {}", .0.kind, .0.message)]
    StateException(ErrorCarrier),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AuthError {
    /// HTTP status this error is surfaced with.
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::State(StateError::NotFound(_))
            | AuthError::State(StateError::WrongStage { .. }) => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials | AuthError::UserNotFound(_) => StatusCode::UNAUTHORIZED,
            AuthError::StateException(carrier) => carrier.status(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable name of the error kind, used when the error crosses a redirect.
    ///
    /// Returns `None` for errors this crate does not recognize.
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            AuthError::NoBackend => Some("no_backend"),
            AuthError::UnknownSource(_) => Some("unknown_source"),
            AuthError::ChannelBindingExhausted => Some("channel_binding_exhausted"),
            AuthError::InvalidCredentials => Some("invalid_credentials"),
            AuthError::UserNotFound(_) => Some("user_not_found"),
            AuthError::Directory(_) => Some("directory"),
            AuthError::AttributesUnsupported(_) => Some("attributes_unsupported"),
            AuthError::State(_) => Some("state"),
            AuthError::StateException(_) => Some("state_exception"),
            AuthError::Other(_) => None,
        }
    }
}

/// Challenge the HTTP layer must send back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// `401` with `WWW-Authenticate: Negotiate`; the saved state resumes the flow.
    Negotiate { state_id: String },
    /// `401` with `WWW-Authenticate: Basic`; the client repeats the same request.
    Basic { realm: String },
}

/// Control result of running an authentication source.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The source authenticated the user.
    Completed(Attributes),
    /// The client has to answer a challenge before the flow can continue.
    Challenged(Challenge),
    /// Control was handed to another source; carries that source's outcome.
    Delegated { source: String, outcome: Box<Outcome> },
}

impl Outcome {
    /// The outcome at the end of any delegation chain.
    pub fn terminal(&self) -> &Outcome {
        match self {
            Outcome::Delegated { outcome, .. } => outcome.terminal(),
            other => other,
        }
    }
}

/// Per-request data the sources look at.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub client_ip: Option<IpAddr>,
    pub session_id: String,
}

impl RequestContext {
    /// The `Authorization` header, if present and non-empty.
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get("authorization")
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

/// Collaborators available to a source while it handles one request.
pub struct AuthContext<'a> {
    pub request: &'a RequestContext,
    pub registry: &'a SourceRegistry,
    pub sessions: &'a dyn SessionStore,
    pub states: &'a dyn StateStore,
}

/// An authentication source
///
/// Every login mechanism implements this; sources refer to each other only
/// by id through the [`SourceRegistry`].
#[async_trait]
pub trait AuthSource: Send + Sync {
    /// Id this source is registered under
    fn id(&self) -> &str;

    /// Authenticate the user described by `state`
    async fn authenticate(
        &self,
        ctx: &AuthContext<'_>,
        state: &mut AuthState,
    ) -> Result<Outcome, AuthError>;

    /// Log the user out
    async fn logout(&self, ctx: &AuthContext<'_>, state: &LogoutState) -> Result<(), AuthError>;

    /// Look up the attributes of a user by bare user id
    async fn get_attributes(&self, uid: &str) -> Result<Attributes, AuthError> {
        let _ = uid;
        Err(AuthError::AttributesUnsupported(self.id().to_string()))
    }
}
