//! Static user directory
//!
//! Users, password digests and attributes come straight from the
//! configuration. The source serves both as a realm backend for attribute
//! lookup and as an HTTP Basic login fallback.

use super::{
    Attributes, AuthContext, AuthError, AuthSource, AuthState, Challenge, LogoutState, Outcome,
};
use crate::config::{StaticConfig, StaticUser};
use crate::metrics;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Attribute always present in the attributes of a static user.
pub const UID_ATTRIBUTE: &str = "uid";

/// Static user directory source
pub struct StaticSource {
    id: String,
    realm: String,
    users: BTreeMap<String, StaticUser>,
}

impl StaticSource {
    pub fn new(id: impl Into<String>, config: &StaticConfig) -> Self {
        Self {
            id: id.into(),
            realm: config.realm.clone(),
            users: config.users.clone(),
        }
    }

    fn attributes_of(&self, uid: &str) -> Option<Attributes> {
        let user = self.users.get(uid)?;
        let mut attributes = user.attributes.clone();
        attributes
            .entry(UID_ATTRIBUTE.to_string())
            .or_insert_with(|| vec![uid.to_string()]);
        Some(attributes)
    }

    /// Check `username`/`password` against the directory
    pub fn verify(&self, username: &str, password: &str) -> Result<Attributes, AuthError> {
        let Some(user) = self.users.get(username) else {
            return Err(AuthError::UserNotFound(username.to_string()));
        };

        let digest = hex::encode(Sha256::digest(password.as_bytes()));
        if !digest.eq_ignore_ascii_case(&user.password_sha256) {
            return Err(AuthError::InvalidCredentials);
        }

        self.attributes_of(username)
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))
    }

    fn challenge(&self) -> Outcome {
        Outcome::Challenged(Challenge::Basic {
            realm: self.realm.clone(),
        })
    }
}

/// Decode `Basic <base64(user:password)>`.
fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

#[async_trait]
impl AuthSource for StaticSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn authenticate(
        &self,
        ctx: &AuthContext<'_>,
        state: &mut AuthState,
    ) -> Result<Outcome, AuthError> {
        let Some((username, password)) = ctx.request.authorization().and_then(parse_basic) else {
            debug!(source = %self.id, "No Basic credentials, challenging");
            return Ok(self.challenge());
        };

        match self.verify(&username, &password) {
            Ok(attributes) => {
                info!(source = %self.id, user = %username, "Static login succeeded");
                metrics::record_login(&self.id);
                if state.logout_state.backend.is_none() {
                    state.logout_state.backend = Some(self.id.clone());
                }
                state.attributes = Some(attributes.clone());
                Ok(Outcome::Completed(attributes))
            }
            Err(e) => {
                warn!(source = %self.id, user = %username, error = %e, "Static login failed");
                Ok(self.challenge())
            }
        }
    }

    async fn logout(&self, _ctx: &AuthContext<'_>, _state: &LogoutState) -> Result<(), AuthError> {
        debug!(source = %self.id, "Nothing to do on static logout");
        Ok(())
    }

    async fn get_attributes(&self, uid: &str) -> Result<Attributes, AuthError> {
        self.attributes_of(uid)
            .ok_or_else(|| AuthError::UserNotFound(uid.to_string()))
    }
}
