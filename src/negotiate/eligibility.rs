//! Client eligibility filter
//!
//! Decides whether Kerberos should be attempted for a request at all.
//! Ineligibility is never an error: the caller falls back.

use crate::auth::{AuthState, RequestContext};
use crate::session::{negotiation_disabled, SessionStore};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Persistent browser cookie opting out of Kerberos auto-login.
pub const DISABLE_COOKIE: &str = "NEGOTIATE_AUTOLOGIN_DISABLE_PERMANENT";

/// Service provider metadata option disabling negotiation.
pub const SP_DISABLE_OPTION: &str = "negotiate:disable";

/// Subnet parse errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubnetError {
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("invalid prefix length '{0}'")]
    InvalidPrefix(String),
}

/// A CIDR range, or a single address when written without a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: IpAddr,
    prefix: u8,
}

impl Subnet {
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = normalize(ip);
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for Subnet {
    type Err = SubnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let network = addr
            .parse::<IpAddr>()
            .map(normalize)
            .map_err(|_| SubnetError::InvalidAddress(addr.to_string()))?;
        let max = if network.is_ipv4() { 32 } else { 128 };

        let prefix = match prefix {
            None => max,
            Some(p) => match p.parse::<u8>() {
                Ok(n) if n <= max => n,
                _ => return Err(SubnetError::InvalidPrefix(p.to_string())),
            },
        };

        Ok(Self { network, prefix })
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        v4 => v4,
    }
}

fn mask32(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

fn mask128(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0)
}

/// Client eligibility filter
#[derive(Debug, Clone, Default)]
pub struct EligibilityFilter {
    subnets: Option<Vec<Subnet>>,
}

impl EligibilityFilter {
    /// Build the filter; `None` disables the subnet allow-list.
    pub fn new(subnets: Option<Vec<Subnet>>) -> Self {
        Self { subnets }
    }

    /// Parse a configured allow-list
    pub fn from_config(subnets: Option<&[String]>) -> Result<Self, SubnetError> {
        let subnets = subnets
            .map(|list| list.iter().map(|s| s.parse::<Subnet>()).collect::<Result<Vec<_>, _>>())
            .transpose()?;
        Ok(Self::new(subnets))
    }

    /// The relying service provider disabled negotiation in its metadata.
    pub fn sp_disabled(&self, state: &AuthState) -> bool {
        let Some(sp) = state.sp_metadata.as_ref() else {
            return false;
        };
        if sp.flag(SP_DISABLE_OPTION).unwrap_or(false) {
            debug!(sp = %sp.entity_id, "Negotiate disabled by SP metadata");
            return true;
        }
        false
    }

    /// The user opted out through the session flag or the persistent cookie.
    pub fn opted_out(&self, request: &RequestContext, sessions: &dyn SessionStore) -> bool {
        if negotiation_disabled(sessions, &request.session_id) {
            debug!("Session disabled negotiate");
            return true;
        }
        if request.cookie(DISABLE_COOKIE) == Some("true") {
            debug!(cookie = DISABLE_COOKIE, "Negotiate disabled by persistent cookie");
            return true;
        }
        false
    }

    /// Subnet allow-list check. A missing client address counts as loopback.
    pub fn check_mask(&self, client_ip: Option<IpAddr>) -> bool {
        let Some(ref subnets) = self.subnets else {
            debug!("Subnet not configured, allowing every client");
            return true;
        };

        let ip = client_ip.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        match subnets.iter().find(|subnet| subnet.contains(ip)) {
            Some(subnet) => {
                debug!(client_ip = %ip, subnet = %subnet, "Client matched subnet");
                true
            }
            None => {
                debug!(client_ip = %ip, "Client is not in any configured subnet");
                false
            }
        }
    }

    /// Run the SP, opt-out and subnet checks in that order.
    ///
    /// Returns the fallback reason of the first failing check, `None` when
    /// negotiation may be attempted.
    pub fn ineligibility(
        &self,
        state: &AuthState,
        request: &RequestContext,
        sessions: &dyn SessionStore,
    ) -> Option<&'static str> {
        if self.sp_disabled(state) {
            Some("sp_disabled")
        } else if self.opted_out(request, sessions) {
            Some("opted_out")
        } else if !self.check_mask(request.client_ip) {
            Some("subnet")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SpMetadata;
    use crate::session::{MockSessionStore, NEGOTIATE_DISABLE_KEY};
    use mockall::predicate::eq;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn sessions_returning(value: Option<serde_json::Value>) -> MockSessionStore {
        let mut sessions = MockSessionStore::new();
        sessions
            .expect_get()
            .with(eq("s1"), eq(NEGOTIATE_DISABLE_KEY))
            .returning(move |_, _| value.clone());
        sessions
    }

    fn request() -> RequestContext {
        RequestContext {
            session_id: "s1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_subnet_parsing() {
        assert_eq!("10.0.0.0/8".parse::<Subnet>().unwrap().to_string(), "10.0.0.0/8");
        assert_eq!("192.168.1.7".parse::<Subnet>().unwrap().to_string(), "192.168.1.7/32");
        assert!(matches!(
            "10.0.0.0/33".parse::<Subnet>(),
            Err(SubnetError::InvalidPrefix(_))
        ));
        assert!(matches!(
            "not-an-ip/8".parse::<Subnet>(),
            Err(SubnetError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_subnet_contains() {
        let v4: Subnet = "10.0.0.0/8".parse().unwrap();
        assert!(v4.contains(ip("10.20.30.40")));
        assert!(!v4.contains(ip("11.0.0.1")));
        assert!(v4.contains(ip("::ffff:10.1.2.3")));
        assert!(!v4.contains(ip("2001:db8::1")));

        let v6: Subnet = "2001:db8::/32".parse().unwrap();
        assert!(v6.contains(ip("2001:db8:1::1")));
        assert!(!v6.contains(ip("2001:db9::1")));

        let everything: Subnet = "0.0.0.0/0".parse().unwrap();
        assert!(everything.contains(ip("8.8.8.8")));
    }

    #[test]
    fn test_check_mask() {
        let open = EligibilityFilter::default();
        assert!(open.check_mask(Some(ip("203.0.113.9"))));

        let filter =
            EligibilityFilter::from_config(Some(["10.0.0.0/8".to_string()].as_slice()))
            .unwrap();
        assert!(filter.check_mask(Some(ip("10.1.1.1"))));
        assert!(!filter.check_mask(Some(ip("192.168.0.1"))));
        // no address known: treated as 127.0.0.1
        assert!(!filter.check_mask(None));

        let loopback =
            EligibilityFilter::from_config(Some(&["127.0.0.0/8".to_string()])).unwrap();
        assert!(loopback.check_mask(None));
    }

    #[test]
    fn test_sp_disabled_truthiness() {
        let filter = EligibilityFilter::default();
        let with_option = |value: serde_json::Value| {
            AuthState::new().with_sp_metadata(SpMetadata {
                entity_id: "https://sp.example.com".into(),
                options: BTreeMap::from([(SP_DISABLE_OPTION.to_string(), value)]),
            })
        };

        assert!(!filter.sp_disabled(&AuthState::new()));
        assert!(filter.sp_disabled(&with_option(json!(true))));
        assert!(filter.sp_disabled(&with_option(json!(1))));
        assert!(filter.sp_disabled(&with_option(json!("yes"))));
        assert!(!filter.sp_disabled(&with_option(json!(false))));
        assert!(!filter.sp_disabled(&with_option(json!("0"))));
        assert!(!filter.sp_disabled(&with_option(json!(""))));
    }

    #[test]
    fn test_opted_out_by_session() {
        let filter = EligibilityFilter::default();
        let sessions = sessions_returning(Some(json!(true)));
        assert!(filter.opted_out(&request(), &sessions));
    }

    #[test]
    fn test_opted_out_by_cookie() {
        let filter = EligibilityFilter::default();
        let sessions = sessions_returning(None);

        let mut req = request();
        req.cookies.insert(DISABLE_COOKIE.into(), "true".into());
        assert!(filter.opted_out(&req, &sessions));

        req.cookies.insert(DISABLE_COOKIE.into(), "".into());
        assert!(!filter.opted_out(&req, &sessions));
    }

    #[test]
    fn test_ineligibility_reasons_in_order() {
        let filter = EligibilityFilter::from_config(Some(["10.0.0.0/8".to_string()].as_slice()))
            .unwrap();
        let sessions = sessions_returning(Some(json!(true)));

        let mut req = request();
        req.client_ip = Some(ip("192.0.2.1"));
        let sp_disabled = AuthState::new().with_sp_metadata(SpMetadata {
            entity_id: "https://sp.example.com".into(),
            options: BTreeMap::from([(SP_DISABLE_OPTION.to_string(), json!(true))]),
        });

        assert_eq!(
            filter.ineligibility(&sp_disabled, &req, &sessions),
            Some("sp_disabled")
        );
        assert_eq!(
            filter.ineligibility(&AuthState::new(), &req, &sessions),
            Some("opted_out")
        );

        let sessions = sessions_returning(Some(json!(false)));
        assert_eq!(
            filter.ineligibility(&AuthState::new(), &req, &sessions),
            Some("subnet")
        );

        req.client_ip = Some(ip("10.1.2.3"));
        assert_eq!(filter.ineligibility(&AuthState::new(), &req, &sessions), None);
    }
}
