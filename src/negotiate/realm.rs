//! Realm router
//!
//! One negotiate source may serve several Kerberos realms, each backed by
//! its own directory. The realm part of the principal picks the backend.

use std::collections::{BTreeMap, HashMap};

/// Realm entry matching any realm without an exact entry.
pub const WILDCARD_REALM: &str = "*";

/// Split `user@REALM` on the first `@`.
pub fn split_principal(principal: &str) -> Option<(&str, &str)> {
    principal.split_once('@')
}

/// Realm to backend id table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealmTable {
    realms: HashMap<String, String>,
    wildcard: Option<String>,
}

impl RealmTable {
    pub fn new(entries: &BTreeMap<String, String>) -> Self {
        let mut realms = HashMap::with_capacity(entries.len());
        let mut wildcard = None;
        for (realm, backend) in entries {
            if realm == WILDCARD_REALM {
                wildcard = Some(backend.clone());
            } else {
                realms.insert(realm.clone(), backend.clone());
            }
        }
        Self { realms, wildcard }
    }

    /// Backend for `principal`: exact (case-sensitive) realm, else the
    /// wildcard, else `None` when the principal is unroutable.
    pub fn route(&self, principal: &str) -> Option<&str> {
        let (_, realm) = split_principal(principal)?;
        self.realms
            .get(realm)
            .or(self.wildcard.as_ref())
            .map(String::as_str)
    }
}
