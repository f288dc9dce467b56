//! Configuration module for the negotiate identity provider
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and comprehensive validation.

use crate::auth::Attributes;
use crate::negotiate::binding::ChannelBindingSet;
use crate::negotiate::eligibility::Subnet;
use crate::negotiate::engine::ServicePrincipal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn is_sha256_hex(digest: &str) -> bool {
    digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub idp: IdpConfig,
    /// Service provider metadata options, by entity id
    #[serde(default)]
    pub service_providers: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one authentication source must be configured".into(),
            ));
        }

        if !self.server.base_url.is_empty() && !is_valid_http_url(&self.server.base_url) {
            return Err(ConfigError::ValidationError(
                "Invalid base_url: must start with http:// or https://".into(),
            ));
        }

        if self.server.purge_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "server.purge_interval_seconds must be greater than 0".into(),
            ));
        }

        self.require_source(&self.idp.auth, "idp.auth")?;

        for (id, source) in &self.sources {
            match source {
                SourceConfig::Negotiate(negotiate) => {
                    if let Some(ref fallback) = negotiate.fallback {
                        if fallback == id {
                            return Err(ConfigError::ValidationError(format!(
                                "Source '{}' cannot fall back to itself",
                                id
                            )));
                        }
                        self.require_source(fallback, &format!("sources.{}.fallback", id))?;
                    }

                    for (realm, backend) in &negotiate.realms {
                        self.require_source(backend, &format!("sources.{}.realms.{}", id, realm))?;
                    }

                    if let Some(ref subnets) = negotiate.subnet {
                        for subnet in subnets {
                            subnet.parse::<Subnet>().map_err(|e| {
                                ConfigError::ValidationError(format!(
                                    "Source '{}' has invalid subnet '{}': {}",
                                    id, subnet, e
                                ))
                            })?;
                        }
                    }

                    ChannelBindingSet::parse(&negotiate.allowed_certificate_hashes).map_err(
                        |e| {
                            ConfigError::ValidationError(format!(
                                "Source '{}' has an invalid certificate hash: {}",
                                id, e
                            ))
                        },
                    )?;
                }
                SourceConfig::Static(directory) => {
                    for (uid, user) in &directory.users {
                        if !is_sha256_hex(&user.password_sha256) {
                            return Err(ConfigError::ValidationError(format!(
                                "User '{}' of source '{}' needs a hex SHA-256 password_sha256",
                                uid, id
                            )));
                        }
                    }
                }
            }
        }

        // The Kerberos library reads one process-wide keytab location.
        let mut keytabs = self.negotiate_sources().map(|(id, negotiate)| {
            (id, negotiate.keytab_path(self.server.cert_dir.as_deref()))
        });
        if let Some((first_id, first)) = keytabs.next() {
            if let Some((id, other)) = keytabs.find(|(_, keytab)| *keytab != first) {
                return Err(ConfigError::ValidationError(format!(
                    "Sources '{}' and '{}' use different keytabs ({} and {}); \
                     every negotiate source must share one keytab",
                    first_id,
                    id,
                    first.display(),
                    other.display()
                )));
            }
        }

        Ok(())
    }

    /// Keytab shared by every negotiate source, if any is configured.
    pub fn keytab(&self) -> Option<PathBuf> {
        self.negotiate_sources()
            .next()
            .map(|(_, negotiate)| negotiate.keytab_path(self.server.cert_dir.as_deref()))
    }

    fn negotiate_sources(&self) -> impl Iterator<Item = (&str, &NegotiateConfig)> {
        self.sources.iter().filter_map(|(id, source)| match source {
            SourceConfig::Negotiate(negotiate) => Some((id.as_str(), negotiate)),
            SourceConfig::Static(_) => None,
        })
    }

    fn require_source(&self, id: &str, field: &str) -> Result<(), ConfigError> {
        if self.sources.contains_key(id) {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(format!(
                "{} refers to unknown authentication source '{}'",
                field, id
            )))
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    /// Public base URL used when building links back to this server.
    /// Empty means same-origin relative links.
    #[serde(default)]
    pub base_url: String,
    /// Directory relative keytab paths are resolved against
    #[serde(default)]
    pub cert_dir: Option<PathBuf>,
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: u64,
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    /// How often expired states and session entries are dropped
    #[serde(default = "default_purge_interval")]
    pub purge_interval_seconds: u64,
}

fn default_state_ttl() -> u64 {
    3600
}

fn default_session_cookie() -> String {
    "IDP_SESSION".to_string()
}

fn default_session_ttl() -> u64 {
    28800 // 8h
}

fn default_purge_interval() -> u64 {
    60
}

/// Identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpConfig {
    /// Source every login starts with
    pub auth: String,
}

/// Authentication source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Negotiate(NegotiateConfig),
    Static(StaticConfig),
}

/// Kerberos negotiate source configuration
///
/// # Example
///
/// ```yaml
/// type: negotiate
/// keytab: /etc/krb5.keytab
/// spn: "HTTP/idp.example.com@EXAMPLE.COM"
/// fallback: userpass
/// subnet: ["10.0.0.0/8", "2001:db8::/32"]
/// realms:
///   EXAMPLE.COM: ldap-a
///   "*": ldap-default
/// allowedCertificateHashes: ["AB:CD:..."]
/// enforceChannelBinding: false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiateConfig {
    #[serde(default)]
    pub fallback: Option<String>,
    pub keytab: PathBuf,
    #[serde(default)]
    pub spn: ServicePrincipal,
    #[serde(default)]
    pub subnet: Option<Vec<String>>,
    pub realms: BTreeMap<String, String>,
    #[serde(rename = "allowedCertificateHashes", default)]
    pub allowed_certificate_hashes: Vec<String>,
    #[serde(rename = "enforceChannelBinding", default)]
    pub enforce_channel_binding: bool,
}

impl NegotiateConfig {
    /// Keytab path; a relative one is resolved against `cert_dir`.
    pub fn keytab_path(&self, cert_dir: Option<&Path>) -> PathBuf {
        match cert_dir {
            Some(dir) if self.keytab.is_relative() => dir.join(&self.keytab),
            _ => self.keytab.clone(),
        }
    }
}

/// Static user directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticConfig {
    /// Realm announced in the Basic challenge
    #[serde(default = "default_static_realm")]
    pub realm: String,
    #[serde(default)]
    pub users: BTreeMap<String, StaticUser>,
}

fn default_static_realm() -> String {
    "Identity Provider".to_string()
}

/// One user of a static directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticUser {
    /// Hex SHA-256 digest of the password
    pub password_sha256: String,
    #[serde(default)]
    pub attributes: Attributes,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}
