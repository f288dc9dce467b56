//! Directory lookup adapter

use crate::auth::{Attributes, AuthError, SourceRegistry};
use tracing::{debug, error, info};

/// Resolve `uid` to its attributes through the source registered as `backend`.
///
/// An unregistered backend, or one that cannot look up attributes at all,
/// is a configuration error. A user the directory does not know, or a
/// failing directory, yields `Ok(None)` so the caller falls back.
pub async fn lookup_user_data(
    registry: &SourceRegistry,
    backend: &str,
    uid: &str,
) -> Result<Option<Attributes>, AuthError> {
    let Some(source) = registry.resolve(backend) else {
        error!(backend, "Could not find authentication source for attribute lookup");
        return Err(AuthError::UnknownSource(backend.to_string()));
    };

    match source.get_attributes(uid).await {
        Ok(attributes) => {
            debug!(backend, uid, attributes = attributes.len(), "Directory lookup succeeded");
            Ok(Some(attributes))
        }
        Err(e @ AuthError::AttributesUnsupported(_)) => Err(e),
        Err(e) => {
            info!(backend, uid, error = %e, "User data lookup failed");
            Ok(None)
        }
    }
}
