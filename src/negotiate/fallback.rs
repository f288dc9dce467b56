//! Fallback dispatcher
//!
//! Hands the flow to the source recorded as the logout backend. Errors of
//! that source are wrapped into an [`ErrorCarrier`] and stored in the state
//! so they survive the redirect back to the user.

use crate::auth::{AuthContext, AuthError, AuthState, ErrorCarrier, Outcome};
use crate::metrics;
use tracing::{debug, error, warn};

/// Delegate authentication to the fallback backend recorded in `state`.
pub async fn fall_back(ctx: &AuthContext<'_>, state: &mut AuthState) -> Result<Outcome, AuthError> {
    let Some(backend) = state.logout_state.backend.clone() else {
        error!("Unable to determine auth source");
        return Err(AuthError::NoBackend);
    };

    let Some(source) = ctx.registry.resolve(&backend) else {
        error!(backend = %backend, "Could not find fallback authentication source");
        return Err(AuthError::UnknownSource(backend));
    };

    debug!(backend = %backend, "Delegating to fallback source");
    match source.authenticate(ctx, state).await {
        Ok(outcome) => Ok(Outcome::Delegated {
            source: backend,
            outcome: Box::new(outcome),
        }),
        Err(AuthError::StateException(carrier)) => {
            state.exception = Some(carrier.clone());
            Err(AuthError::StateException(carrier))
        }
        Err(e) => {
            warn!(backend = %backend, error = %e, "Fallback source failed");
            metrics::record_fallback_error(&backend);
            let carrier = ErrorCarrier {
                kind: e.kind().unwrap_or(ErrorCarrier::UNSERIALIZABLE).to_string(),
                message: e.to_string(),
                status: e.status().as_u16(),
            };
            state.exception = Some(carrier.clone());
            Err(AuthError::StateException(carrier))
        }
    }
}
