//! Session storage
//!
//! Per-browser session data (opt-out flags, logout routing) lives behind
//! the [`SessionStore`] capability instead of ambient globals.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

/// Session key of the "negotiation disabled" flag.
pub const NEGOTIATE_DISABLE_KEY: &str = "negotiate:disable";

/// Session key of the stored logout routing.
pub const LOGOUT_STATE_KEY: &str = "negotiate:logout";

/// Session key of the attributes of the logged-in user.
pub const ATTRIBUTES_KEY: &str = "auth:attributes";

/// Time to live of the session opt-out flag.
pub const DISABLE_FLAG_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Key/value session storage
#[cfg_attr(test, mockall::automock)]
pub trait SessionStore: Send + Sync {
    /// Value stored under `key` in `session`, if present and not expired
    fn get(&self, session: &str, key: &str) -> Option<serde_json::Value>;

    /// Store `value`; `ttl` of `None` keeps it for the whole session
    fn set(&self, session: &str, key: &str, value: serde_json::Value, ttl: Option<Duration>);

    /// Remove `key` from `session`
    fn expire(&self, session: &str, key: &str);

    /// Drop every expired entry of every session
    fn purge_expired(&self);
}

/// Whether the session opt-out flag is set.
pub fn negotiation_disabled(store: &dyn SessionStore, session: &str) -> bool {
    store
        .get(session, NEGOTIATE_DISABLE_KEY)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Set or clear the session opt-out flag for 24 hours.
pub fn set_negotiation_disabled(store: &dyn SessionStore, session: &str, disabled: bool) {
    store.set(
        session,
        NEGOTIATE_DISABLE_KEY,
        serde_json::Value::Bool(disabled),
        Some(DISABLE_FLAG_TTL),
    );
}

struct Entry {
    value: serde_json::Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory session store with lazy expiry
#[derive(Default)]
pub struct MemorySessionStore {
    entries: DashMap<(String, String), Entry>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, session: &str, key: &str) -> Option<serde_json::Value> {
        let k = (session.to_string(), key.to_string());
        let now = Utc::now();
        let live = self
            .entries
            .get(&k)
            .map(|entry| entry.is_live(now).then(|| entry.value.clone()));
        match live {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.entries.remove(&k);
                None
            }
            None => None,
        }
    }

    fn set(&self, session: &str, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl);
        self.entries.insert(
            (session.to_string(), key.to_string()),
            Entry { value, expires_at },
        );
    }

    fn expire(&self, session: &str, key: &str) {
        self.entries.remove(&(session.to_string(), key.to_string()));
    }

    fn purge_expired(&self) {
        let now = Utc::now();
        self.entries.retain(|_, entry| entry.is_live(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_expire() {
        let store = MemorySessionStore::new();
        assert!(store.get("s1", "k").is_none());

        store.set("s1", "k", json!("v"), None);
        assert_eq!(store.get("s1", "k"), Some(json!("v")));
        assert!(store.get("s2", "k").is_none());

        store.expire("s1", "k");
        assert!(store.get("s1", "k").is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let store = MemorySessionStore::new();
        store.set("s1", "k", json!(true), Some(Duration::from_secs(0)));
        assert!(store.get("s1", "k").is_none());

        store.set("s1", "k", json!(true), Some(Duration::from_secs(0)));
        store.purge_expired();
        assert!(store.entries.is_empty());
    }

    #[test]
    fn test_disable_flag() {
        let store = MemorySessionStore::new();
        assert!(!negotiation_disabled(&store, "s1"));

        set_negotiation_disabled(&store, "s1", true);
        assert!(negotiation_disabled(&store, "s1"));

        set_negotiation_disabled(&store, "s1", false);
        assert!(!negotiation_disabled(&store, "s1"));
    }
}
