//! Shared fakes for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use negotiate_idp::auth::{
    Attributes, AuthContext, AuthError, AuthSource, AuthState, Challenge, LogoutState,
    MemoryStateStore, Outcome, RequestContext, SourceRegistry,
};
use negotiate_idp::negotiate::binding::ChannelBinding;
use negotiate_idp::negotiate::engine::{Acceptor, GssError, SecurityContext, ServicePrincipal};
use negotiate_idp::session::MemorySessionStore;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// `Authorization` header value carrying `token`.
pub fn negotiate_header(token: &str) -> String {
    format!("Negotiate {}", STANDARD.encode(token))
}

pub fn basic_header(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

pub fn attributes(pairs: &[(&str, &str)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
        .collect()
}

/// Kerberos acceptor backed by a table of known tickets.
///
/// With `bound_hash` set, a context only accepts when it was built with the
/// binding of that certificate hash.
#[derive(Default)]
pub struct FakeAcceptor {
    pub binding_support: bool,
    tickets: HashMap<Vec<u8>, String>,
    bound_hash: Option<String>,
    calls: Mutex<Vec<Option<Vec<u8>>>>,
    threads: Mutex<Vec<ThreadId>>,
}

impl FakeAcceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as a ticket for `principal`.
    pub fn with_ticket(mut self, token: &str, principal: &str) -> Self {
        self.tickets
            .insert(token.as_bytes().to_vec(), principal.to_string());
        self
    }

    /// Support channel binding; the client is bound to `hash`, if any.
    pub fn with_binding(mut self, hash: Option<&str>) -> Self {
        self.binding_support = true;
        self.bound_hash = hash.map(str::to_string);
        self
    }

    /// Number of contexts created so far
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Application data of every binding passed in, in call order
    pub fn bindings(&self) -> Vec<Option<Vec<u8>>> {
        self.calls.lock().unwrap().clone()
    }

    /// Threads every context was created on
    pub fn context_threads(&self) -> Vec<ThreadId> {
        self.threads.lock().unwrap().clone()
    }
}

impl Acceptor for FakeAcceptor {
    fn supports_channel_binding(&self) -> bool {
        self.binding_support
    }

    fn context(
        &self,
        _keytab: &Path,
        _spn: &ServicePrincipal,
        binding: Option<ChannelBinding>,
    ) -> Result<Box<dyn SecurityContext>, GssError> {
        let data = binding.map(|b| b.application_data().to_vec());
        self.calls.lock().unwrap().push(data.clone());
        self.threads.lock().unwrap().push(thread::current().id());

        let bound = match (&self.bound_hash, &data) {
            (Some(hash), Some(data)) => {
                let expected = ChannelBinding::build(hash).unwrap();
                if expected.application_data() != data.as_slice() {
                    return Err(GssError::Gss("channel binding mismatch".into()));
                }
                true
            }
            (None, Some(_)) => return Err(GssError::Gss("client sent no binding".into())),
            (_, None) => false,
        };

        Ok(Box::new(FakeContext {
            tickets: self.tickets.clone(),
            principal: None,
            bound,
        }))
    }
}

struct FakeContext {
    tickets: HashMap<Vec<u8>, String>,
    principal: Option<String>,
    bound: bool,
}

impl SecurityContext for FakeContext {
    fn accept(&mut self, token: &[u8]) -> Result<bool, GssError> {
        self.principal = self.tickets.get(token).cloned();
        Ok(self.principal.is_some())
    }

    fn authenticated_user(&self) -> Result<String, GssError> {
        self.principal
            .clone()
            .ok_or_else(|| GssError::Gss("no principal".into()))
    }

    fn is_channel_bound(&self) -> bool {
        self.bound
    }
}

/// What a [`RecordingSource`] does when asked to authenticate.
#[derive(Clone)]
pub enum Behavior {
    Challenge,
    Complete(Attributes),
    FailWith(fn() -> AuthError),
}

/// Source that records how often it was used.
pub struct RecordingSource {
    id: String,
    behavior: Behavior,
    directory: HashMap<String, Attributes>,
    pub authenticated: AtomicUsize,
    pub logged_out: AtomicUsize,
}

impl RecordingSource {
    pub fn new(id: &str, behavior: Behavior) -> Self {
        Self {
            id: id.to_string(),
            behavior,
            directory: HashMap::new(),
            authenticated: AtomicUsize::new(0),
            logged_out: AtomicUsize::new(0),
        }
    }

    pub fn with_user(mut self, uid: &str, attributes: Attributes) -> Self {
        self.directory.insert(uid.to_string(), attributes);
        self
    }

    pub fn authenticate_calls(&self) -> usize {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logged_out.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthSource for RecordingSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn authenticate(
        &self,
        _ctx: &AuthContext<'_>,
        state: &mut AuthState,
    ) -> Result<Outcome, AuthError> {
        self.authenticated.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Challenge => Ok(Outcome::Challenged(Challenge::Basic {
                realm: self.id.clone(),
            })),
            Behavior::Complete(attributes) => {
                state.attributes = Some(attributes.clone());
                Ok(Outcome::Completed(attributes.clone()))
            }
            Behavior::FailWith(error) => Err(error()),
        }
    }

    async fn logout(&self, _ctx: &AuthContext<'_>, _state: &LogoutState) -> Result<(), AuthError> {
        self.logged_out.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_attributes(&self, uid: &str) -> Result<Attributes, AuthError> {
        self.directory
            .get(uid)
            .cloned()
            .ok_or_else(|| AuthError::UserNotFound(uid.to_string()))
    }
}

/// Owned collaborators of an [`AuthContext`].
pub struct Harness {
    pub request: RequestContext,
    pub registry: SourceRegistry,
    pub sessions: MemorySessionStore,
    pub states: MemoryStateStore,
}

impl Harness {
    pub fn new(registry: SourceRegistry) -> Self {
        Self {
            request: RequestContext {
                session_id: "session-1".into(),
                ..Default::default()
            },
            registry,
            sessions: MemorySessionStore::new(),
            states: MemoryStateStore::new(Duration::from_secs(300)),
        }
    }

    pub fn with_authorization(mut self, value: &str) -> Self {
        self.request
            .headers
            .insert("authorization".into(), value.to_string());
        self
    }

    pub fn ctx(&self) -> AuthContext<'_> {
        AuthContext {
            request: &self.request,
            registry: &self.registry,
            sessions: &self.sessions,
            states: &self.states,
        }
    }
}

/// Registry holding `sources`.
pub fn registry(sources: Vec<Arc<dyn AuthSource>>) -> SourceRegistry {
    sources
        .into_iter()
        .fold(SourceRegistry::new(), |registry, source| registry.with(source))
}
