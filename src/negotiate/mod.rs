//! Kerberos negotiate authentication source
//!
//! Attempts password-less login through SPNEGO. Whenever the client is not
//! eligible, presents no usable ticket, or cannot be resolved in a directory,
//! the login is handed to the configured fallback source.

pub mod binding;
pub mod directory;
pub mod eligibility;
pub mod engine;
pub mod fallback;
#[cfg(feature = "gssapi")]
pub mod gssapi;
pub mod realm;

use crate::auth::{
    AuthContext, AuthError, AuthSource, AuthState, Challenge, LogoutState, Outcome,
};
use crate::config::{ConfigError, NegotiateConfig};
use crate::metrics;
use crate::session::set_negotiation_disabled;
use async_trait::async_trait;
use binding::ChannelBindingSet;
use eligibility::EligibilityFilter;
use engine::{Acceptor, NegotiationEngine, NegotiationOutcome};
use realm::{split_principal, RealmTable};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub use fallback::fall_back;

/// Stage the state is saved under while the client answers a challenge.
pub const STAGE_ID: &str = "negotiate:stage";

/// Kerberos negotiate source
pub struct NegotiateSource {
    id: String,
    fallback: Option<String>,
    filter: EligibilityFilter,
    engine: Arc<NegotiationEngine>,
    realms: RealmTable,
}

impl NegotiateSource {
    /// Build the source from its configuration.
    ///
    /// A relative keytab path is resolved against `cert_dir`.
    pub fn new(
        id: impl Into<String>,
        config: &NegotiateConfig,
        cert_dir: Option<&Path>,
        acceptor: Arc<dyn Acceptor>,
    ) -> Result<Self, ConfigError> {
        let id = id.into();

        let keytab = config.keytab_path(cert_dir);

        let bindings = ChannelBindingSet::parse(&config.allowed_certificate_hashes)
            .map_err(|e| ConfigError::ValidationError(format!("Source '{}': {}", id, e)))?;

        let filter = EligibilityFilter::from_config(config.subnet.as_deref()).map_err(|e| {
            ConfigError::ValidationError(format!("Source '{}' has an invalid subnet: {}", id, e))
        })?;

        let engine = NegotiationEngine::new(acceptor, keytab, config.spn.clone())
            .with_channel_binding(bindings, config.enforce_channel_binding);
        let engine = Arc::new(engine);

        Ok(Self {
            fallback: config.fallback.clone(),
            filter,
            engine,
            realms: RealmTable::new(&config.realms),
            id,
        })
    }

    async fn fall_back(
        &self,
        ctx: &AuthContext<'_>,
        state: &mut AuthState,
        reason: &str,
    ) -> Result<Outcome, AuthError> {
        info!(source = %self.id, reason, "Falling back");
        metrics::record_fallback(reason);
        fall_back(ctx, state).await
    }

    /// Run the engine on the blocking pool; keytab reads and context steps block.
    async fn attempt(&self, authorization: Option<&str>) -> Result<NegotiationOutcome, AuthError> {
        if authorization.map_or(true, |header| header.trim().is_empty()) {
            return self.engine.attempt(None);
        }

        let engine = Arc::clone(&self.engine);
        let authorization = authorization.map(str::to_string);
        tokio::task::spawn_blocking(move || engine.attempt(authorization.as_deref()))
            .await
            .map_err(|e| AuthError::Other(anyhow::anyhow!("Negotiation task failed: {}", e)))?
    }
}

#[async_trait]
impl AuthSource for NegotiateSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn authenticate(
        &self,
        ctx: &AuthContext<'_>,
        state: &mut AuthState,
    ) -> Result<Outcome, AuthError> {
        // Recorded first so that every fallback below has a route.
        state.logout_state = LogoutState {
            backend: self.fallback.clone(),
        };
        state.auth_source_id = Some(self.id.clone());

        if let Some(reason) = self.filter.ineligibility(state, ctx.request, ctx.sessions) {
            return self.fall_back(ctx, state, reason).await;
        }

        let principal = match self.attempt(ctx.request.authorization()).await? {
            NegotiationOutcome::NoToken => {
                debug!(
                    source = %self.id,
                    fallback = self.fallback.as_deref().unwrap_or("none"),
                    "Sending Negotiate"
                );
                let state_id = ctx.states.save(state, STAGE_ID)?;
                metrics::record_attempt("none", "challenge");
                metrics::record_challenge();
                return Ok(Outcome::Challenged(Challenge::Negotiate { state_id }));
            }
            NegotiationOutcome::Skipped(mechanism) => {
                metrics::record_attempt(mechanism.as_str(), "skipped");
                return self.fall_back(ctx, state, "skipped").await;
            }
            NegotiationOutcome::Failure { reason } => {
                info!(source = %self.id, reason = %reason, "Client failed Negotiate");
                metrics::record_attempt("negotiate", "failure");
                return self.fall_back(ctx, state, "rejected").await;
            }
            NegotiationOutcome::Success { principal } => {
                metrics::record_attempt("negotiate", "success");
                principal
            }
        };

        let (Some((uid, realm)), Some(backend)) =
            (split_principal(&principal), self.realms.route(&principal))
        else {
            info!(source = %self.id, principal = %principal, "No backend configured for realm");
            return self.fall_back(ctx, state, "unroutable").await;
        };
        info!(source = %self.id, realm, backend, "Setting realm parameters");

        match directory::lookup_user_data(ctx.registry, backend, uid).await? {
            Some(attributes) => {
                state.attributes = Some(attributes.clone());
                state.logout_state = LogoutState {
                    backend: Some(backend.to_string()),
                };
                info!(source = %self.id, principal = %principal, "Principal authorized");
                metrics::record_login(backend);
                Ok(Outcome::Completed(attributes))
            }
            None => self.fall_back(ctx, state, "directory_miss").await,
        }
    }

    async fn logout(&self, ctx: &AuthContext<'_>, state: &LogoutState) -> Result<(), AuthError> {
        debug!(source = %self.id, backend = ?state.backend, "Logout");

        let Some(ref backend) = state.backend else {
            set_negotiation_disabled(ctx.sessions, &ctx.request.session_id, true);
            return Ok(());
        };

        let source = ctx
            .registry
            .resolve(backend)
            .ok_or_else(|| AuthError::UnknownSource(backend.clone()))?;
        source.logout(ctx, state).await
    }
}
