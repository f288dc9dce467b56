//! `libgssapi` backed acceptor
//!
//! Available with the `gssapi` feature. Channel binding is not exposed by
//! this acceptor, so with enforced binding every login falls back.
//!
//! The library reads the keytab location from `KRB5_KTNAME` only. The
//! variable is set once, when the acceptor is built, and never per request.

use super::binding::ChannelBinding;
use super::engine::{Acceptor, GssError, SecurityContext, ServicePrincipal};
use libgssapi::{
    context::{SecurityContext as _, ServerCtx},
    credential::{Cred, CredUsage},
    name::Name,
    oid::{OidSet, GSS_MECH_KRB5, GSS_MECH_SPNEGO, GSS_NT_HOSTBASED_SERVICE, GSS_NT_KRB5_PRINCIPAL},
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Host based service name used when no principal is configured.
const DEFAULT_SERVICE: &str = "HTTP";

impl From<libgssapi::error::Error> for GssError {
    fn from(e: libgssapi::error::Error) -> Self {
        GssError::Gss(e.to_string())
    }
}

/// Acceptor reading its key material from a keytab.
#[derive(Debug, Clone)]
pub struct GssapiAcceptor {
    keytab: PathBuf,
}

impl GssapiAcceptor {
    /// Acceptor for the process-wide `keytab`.
    ///
    /// Sets `KRB5_KTNAME`, so it must be called before any other thread is
    /// started: the Kerberos library reads the environment unsynchronized.
    pub fn new(keytab: impl Into<PathBuf>) -> Self {
        let keytab = keytab.into();
        std::env::set_var("KRB5_KTNAME", &keytab);
        info!(keytab = %keytab.display(), "Kerberos keytab configured");
        Self { keytab }
    }

    fn credential(&self, spn: &ServicePrincipal) -> Result<Cred, GssError> {
        let mut mechs = OidSet::new()?;
        mechs.add(&GSS_MECH_SPNEGO)?;
        mechs.add(&GSS_MECH_KRB5)?;

        let name = match spn {
            ServicePrincipal::Any => None,
            ServicePrincipal::Default => Some(
                Name::new(DEFAULT_SERVICE.as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE))?
                    .canonicalize(Some(&GSS_MECH_KRB5))?,
            ),
            ServicePrincipal::Named(principal) => Some(
                Name::new(principal.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL))?
                    .canonicalize(Some(&GSS_MECH_KRB5))?,
            ),
        };

        Ok(Cred::acquire(name.as_ref(), None, CredUsage::Accept, Some(&mechs))?)
    }
}

impl Acceptor for GssapiAcceptor {
    fn supports_channel_binding(&self) -> bool {
        false
    }

    fn context(
        &self,
        keytab: &Path,
        spn: &ServicePrincipal,
        binding: Option<ChannelBinding>,
    ) -> Result<Box<dyn SecurityContext>, GssError> {
        if binding.is_some() {
            return Err(GssError::Gss("channel binding is not supported".into()));
        }
        if keytab != self.keytab.as_path() {
            return Err(GssError::Gss(format!(
                "keytab {} is not the process keytab {}",
                keytab.display(),
                self.keytab.display()
            )));
        }

        debug!(keytab = %keytab.display(), "Acquiring acceptor credentials");

        let cred = self.credential(spn)?;
        Ok(Box::new(GssapiContext {
            ctx: ServerCtx::new(cred),
            principal: None,
        }))
    }
}

struct GssapiContext {
    ctx: ServerCtx,
    principal: Option<String>,
}

impl SecurityContext for GssapiContext {
    fn accept(&mut self, token: &[u8]) -> Result<bool, GssError> {
        self.ctx.step(token)?;
        if !self.ctx.is_complete() {
            debug!("Multi-pass SPNEGO is not supported");
            return Ok(false);
        }
        self.principal = Some(self.ctx.source_name()?.to_string());
        Ok(true)
    }

    fn authenticated_user(&self) -> Result<String, GssError> {
        self.principal
            .clone()
            .ok_or_else(|| GssError::Gss("context is not complete".into()))
    }

    fn is_channel_bound(&self) -> bool {
        false
    }
}
