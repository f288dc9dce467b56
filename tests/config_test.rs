//! Configuration Loading Tests
//!
//! Loads YAML files from disk, with environment variable expansion and
//! cross-reference validation between sources.

use negotiate_idp::config::{Config, ConfigError, SourceConfig};
use negotiate_idp::negotiate::engine::ServicePrincipal;
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

const BASE: &str = r#"
server:
  address: "0.0.0.0:8443"
  base_url: "https://idp.example.com"
  cert_dir: /etc/idp/cert
idp:
  auth: negotiate
sources:
  negotiate:
    type: negotiate
    keytab: ${NEGOTIATE_TEST_KEYTAB:-krb5.keytab}
    spn: "HTTP/idp.example.com@EXAMPLE.COM"
    fallback: userpass
    subnet: ["10.0.0.0/8", "2001:db8::/32"]
    realms:
      EXAMPLE.COM: userpass
      "*": userpass
    allowedCertificateHashes: ["AB:CD:EF:01"]
    enforceChannelBinding: true
  userpass:
    type: static
    users:
      alice:
        password_sha256: a71a7c7011f53a1bab3642ec2ce12593f05230ace8de1e3e7645f69efac1443d
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Temp file should be created");
    file.write_all(content.as_bytes())
        .expect("Config should be written");
    file
}

fn negotiate(config: &Config) -> &negotiate_idp::config::NegotiateConfig {
    match &config.sources["negotiate"] {
        SourceConfig::Negotiate(negotiate) => negotiate,
        other => panic!("Expected negotiate source, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_load_full_config() {
    std::env::remove_var("NEGOTIATE_TEST_KEYTAB");
    let file = write_config(BASE);

    let config = Config::load(file.path()).unwrap();

    assert_eq!(config.server.address, "0.0.0.0:8443");
    assert_eq!(config.server.session_cookie, "IDP_SESSION");
    assert_eq!(config.idp.auth, "negotiate");
    assert!(config.metrics.enabled);

    let negotiate = negotiate(&config);
    assert_eq!(negotiate.keytab.to_str(), Some("krb5.keytab"));
    assert_eq!(
        negotiate.spn,
        ServicePrincipal::Named("HTTP/idp.example.com@EXAMPLE.COM".into())
    );
    assert_eq!(negotiate.fallback.as_deref(), Some("userpass"));
    assert_eq!(negotiate.realms.len(), 2);
    assert_eq!(negotiate.allowed_certificate_hashes, vec!["AB:CD:EF:01"]);
    assert!(negotiate.enforce_channel_binding);
}

#[test]
#[serial]
fn test_env_var_expansion() {
    std::env::set_var("NEGOTIATE_TEST_KEYTAB", "/run/secrets/http.keytab");
    let file = write_config(BASE);

    let config = Config::load(file.path()).unwrap();
    std::env::remove_var("NEGOTIATE_TEST_KEYTAB");

    assert_eq!(
        negotiate(&config).keytab.to_str(),
        Some("/run/secrets/http.keytab")
    );
}

#[test]
fn test_missing_file() {
    assert!(matches!(
        Config::load("/nonexistent/negotiate-idp.yaml"),
        Err(ConfigError::IoError(_))
    ));
}

#[test]
fn test_malformed_yaml() {
    let file = write_config("server: [unterminated");
    assert!(matches!(
        Config::load(file.path()),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_unknown_source_type() {
    let file = write_config(&BASE.replace("type: static", "type: ldap"));
    assert!(matches!(
        Config::load(file.path()),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_cross_references_validated() {
    for (from, to) in [
        ("auth: negotiate", "auth: saml"),
        ("fallback: userpass", "fallback: ldap"),
        ("EXAMPLE.COM: userpass", "EXAMPLE.COM: ldap-a"),
    ] {
        let file = write_config(&BASE.replace(from, to));
        assert!(
            matches!(Config::load(file.path()), Err(ConfigError::ValidationError(_))),
            "{} should be rejected",
            to
        );
    }
}

#[test]
fn test_self_fallback_rejected() {
    let file = write_config(&BASE.replace("fallback: userpass", "fallback: negotiate"));
    assert!(matches!(
        Config::load(file.path()),
        Err(ConfigError::ValidationError(message)) if message.contains("itself")
    ));
}

#[test]
fn test_invalid_values_rejected() {
    for (from, to) in [
        ("10.0.0.0/8", "10.0.0.0/40"),
        ("2001:db8::/32", "not-an-address"),
        ("AB:CD:EF:01", "AB:CD:EF:0"),
        ("https://idp.example.com", "ftp://idp.example.com"),
        (
            "a71a7c7011f53a1bab3642ec2ce12593f05230ace8de1e3e7645f69efac1443d",
            "wonderland",
        ),
    ] {
        let file = write_config(&BASE.replace(from, to));
        assert!(
            matches!(Config::load(file.path()), Err(ConfigError::ValidationError(_))),
            "{} should be rejected",
            to
        );
    }
}

#[test]
fn test_spn_any_sentinel() {
    let file = write_config(&BASE.replace("spn: \"HTTP/idp.example.com@EXAMPLE.COM\"", "spn: 0"));
    let config = Config::load(file.path()).unwrap();
    assert_eq!(negotiate(&config).spn, ServicePrincipal::Any);
}
