//! Negotiation attempt engine
//!
//! Runs one SPNEGO attempt for the `Authorization` header of a request and
//! normalizes whatever the Kerberos layer does into a [`NegotiationOutcome`].
//! Only channel-binding failures escape as errors; everything else is a
//! soft failure the caller falls back on.

use super::binding::{ChannelBinding, ChannelBindingSet};
use crate::auth::AuthError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors raised by the Kerberos layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GssError {
    #[error("GSSAPI support is not available in this build")]
    Unavailable,

    #[error("GSSAPI error: {0}")]
    Gss(String),
}

/// Service principal the acceptor runs as.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ServicePrincipal {
    /// Derived by the Kerberos library (host based `HTTP` service).
    #[default]
    Default,
    /// The `0` sentinel: accept for any principal present in the keytab.
    Any,
    /// An explicit principal name.
    Named(String),
}

impl Serialize for ServicePrincipal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ServicePrincipal::Default => serializer.serialize_none(),
            ServicePrincipal::Any => serializer.serialize_u8(0),
            ServicePrincipal::Named(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for ServicePrincipal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SpnVisitor;

        impl<'de> serde::de::Visitor<'de> for SpnVisitor {
            type Value = ServicePrincipal;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("null, the integer 0 or a service principal name")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(ServicePrincipal::Default)
            }

            fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(ServicePrincipal::Default)
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
                d.deserialize_any(self)
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                if v == 0 {
                    Ok(ServicePrincipal::Any)
                } else {
                    Err(E::invalid_value(serde::de::Unexpected::Unsigned(v), &self))
                }
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                if v == 0 {
                    Ok(ServicePrincipal::Any)
                } else {
                    Err(E::invalid_value(serde::de::Unexpected::Signed(v), &self))
                }
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(ServicePrincipal::Named(v.to_string()))
            }
        }

        deserializer.deserialize_any(SpnVisitor)
    }
}

/// One GSSAPI acceptor context.
#[cfg_attr(test, mockall::automock)]
pub trait SecurityContext: Send {
    /// Feed the client's token; `Ok(true)` once the client is authenticated.
    fn accept(&mut self, token: &[u8]) -> Result<bool, GssError>;

    /// Principal of the authenticated client, `user@REALM`.
    fn authenticated_user(&self) -> Result<String, GssError>;

    /// Whether the accepted context verified the channel binding.
    fn is_channel_bound(&self) -> bool;
}

/// Creates acceptor contexts from a keytab.
#[cfg_attr(test, mockall::automock)]
pub trait Acceptor: Send + Sync {
    /// Whether contexts can be bound to a TLS channel.
    fn supports_channel_binding(&self) -> bool;

    fn context(
        &self,
        keytab: &Path,
        spn: &ServicePrincipal,
        binding: Option<ChannelBinding>,
    ) -> Result<Box<dyn SecurityContext>, GssError>;
}

/// Acceptor used when the crate is built without Kerberos support.
///
/// Every attempt fails softly, so logins always go to the fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableAcceptor;

impl Acceptor for UnavailableAcceptor {
    fn supports_channel_binding(&self) -> bool {
        false
    }

    fn context(
        &self,
        _keytab: &Path,
        _spn: &ServicePrincipal,
        _binding: Option<ChannelBinding>,
    ) -> Result<Box<dyn SecurityContext>, GssError> {
        Err(GssError::Unavailable)
    }
}

/// Mechanism named in an `Authorization` header that is not negotiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mechanism {
    Basic,
    Other(String),
}

impl Mechanism {
    pub fn as_str(&self) -> &str {
        match self {
            Mechanism::Basic => "basic",
            Mechanism::Other(_) => "other",
        }
    }
}

/// Result of one negotiation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// No `Authorization` header; the client has to be challenged.
    NoToken,
    /// The header used a mechanism other than `Negotiate`.
    Skipped(Mechanism),
    /// Kerberos accepted the ticket of `principal` (`user@REALM`).
    Success { principal: String },
    /// The ticket was rejected or could not be processed.
    Failure { reason: String },
}

/// Negotiation attempt engine
pub struct NegotiationEngine {
    acceptor: Arc<dyn Acceptor>,
    keytab: PathBuf,
    spn: ServicePrincipal,
    bindings: ChannelBindingSet,
    enforce_binding: bool,
}

impl NegotiationEngine {
    pub fn new(acceptor: Arc<dyn Acceptor>, keytab: PathBuf, spn: ServicePrincipal) -> Self {
        Self {
            acceptor,
            keytab,
            spn,
            bindings: ChannelBindingSet::default(),
            enforce_binding: false,
        }
    }

    #[must_use]
    pub fn with_channel_binding(mut self, bindings: ChannelBindingSet, enforce: bool) -> Self {
        self.bindings = bindings;
        self.enforce_binding = enforce;
        self
    }

    /// Attempt to authenticate the client from its `Authorization` header
    pub fn attempt(&self, authorization: Option<&str>) -> Result<NegotiationOutcome, AuthError> {
        let Some(header) = authorization.map(str::trim).filter(|h| !h.is_empty()) else {
            debug!("No authorization header");
            return Ok(NegotiationOutcome::NoToken);
        };

        let (scheme, token) = header.split_once(' ').unwrap_or((header, ""));
        if scheme.eq_ignore_ascii_case("basic") {
            debug!(auth.mechanism = "basic", "Basic found. Skipping");
            return Ok(NegotiationOutcome::Skipped(Mechanism::Basic));
        }
        if !scheme.eq_ignore_ascii_case("negotiate") {
            debug!(auth.mechanism = %scheme, "No Negotiate found. Skipping");
            return Ok(NegotiationOutcome::Skipped(Mechanism::Other(scheme.to_string())));
        }

        let token = match STANDARD.decode(token.trim()) {
            Ok(token) if !token.is_empty() => token,
            Ok(_) => return Ok(failure("empty negotiate token")),
            Err(e) => {
                debug!(error = %e, "Negotiate token is not valid base64");
                return Ok(failure("invalid negotiate token encoding"));
            }
        };

        if !self.acceptor.supports_channel_binding() {
            if self.enforce_binding {
                error!("Channel binding is required, but the Kerberos library cannot bind");
                return Ok(failure("channel binding required"));
            }
            debug!(
                auth.mechanism = "negotiate",
                "Trying to authenticate (channel binding not available)"
            );
            return Ok(self.attempt_unbound(&token));
        }

        if self.bindings.is_empty() && !self.enforce_binding {
            debug!(auth.mechanism = "negotiate", "Trying to authenticate without channel binding");
            return Ok(self.attempt_unbound(&token));
        }

        debug!(
            auth.mechanism = "negotiate",
            hashes = self.bindings.len(),
            "Trying to authenticate with channel binding"
        );
        self.attempt_bound(&token)
    }

    fn attempt_unbound(&self, token: &[u8]) -> NegotiationOutcome {
        match self.accept(token, None) {
            Ok((true, ctx)) => {
                debug!("Authentication without channel binding succeeded");
                principal_outcome(ctx.as_ref(), None)
            }
            Ok((false, _)) => {
                info!("Kerberos authentication failed");
                failure("ticket rejected")
            }
            Err(e) => {
                error!(error = %e, "Kerberos authentication raised an error");
                failure(e.to_string())
            }
        }
    }

    fn attempt_bound(&self, token: &[u8]) -> Result<NegotiationOutcome, AuthError> {
        let mut accepted = None;

        for hash in self.bindings.iter() {
            let binding = match ChannelBinding::build(hash) {
                Ok(binding) => binding,
                Err(e) => {
                    warn!(hash, error = %e, "Skipping unusable certificate hash");
                    continue;
                }
            };

            match self.accept(token, Some(binding)) {
                Ok((reply, ctx)) => {
                    debug!(hash, "Authentication with channel binding succeeded using hash");
                    accepted = Some((hash, reply, ctx));
                    break;
                }
                Err(e) => {
                    debug!(
                        hash,
                        error = %e,
                        "Authentication with channel binding failed using hash"
                    );
                }
            }
        }

        let Some((hash, reply, ctx)) = accepted.filter(|(_, _, ctx)| ctx.is_channel_bound()) else {
            error!(
                hashes = self.bindings.len(),
                "Failed to perform channel binding using any of the configured certificate hashes"
            );
            return Err(AuthError::ChannelBindingExhausted);
        };

        if reply {
            Ok(principal_outcome(ctx.as_ref(), Some(hash)))
        } else {
            info!(hash, "Kerberos authentication failed");
            Ok(failure("ticket rejected"))
        }
    }

    fn accept(
        &self,
        token: &[u8],
        binding: Option<ChannelBinding>,
    ) -> Result<(bool, Box<dyn SecurityContext>), GssError> {
        let mut ctx = self.acceptor.context(&self.keytab, &self.spn, binding)?;
        let reply = ctx.accept(token)?;
        Ok((reply, ctx))
    }
}

fn failure(reason: impl Into<String>) -> NegotiationOutcome {
    NegotiationOutcome::Failure {
        reason: reason.into(),
    }
}

fn principal_outcome(ctx: &dyn SecurityContext, hash: Option<&str>) -> NegotiationOutcome {
    match ctx.authenticated_user() {
        Ok(principal) if principal.contains('@') => {
            info!(
                principal = %principal,
                hash = hash.unwrap_or("none"),
                "Kerberos principal authenticated"
            );
            NegotiationOutcome::Success { principal }
        }
        Ok(principal) => {
            warn!(principal = %principal, "Authenticated principal has no realm");
            failure("principal without realm")
        }
        Err(e) => {
            error!(error = %e, "Could not read the authenticated principal");
            failure(e.to_string())
        }
    }
}
