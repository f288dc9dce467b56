//! TLS channel binding for GSSAPI contexts
//!
//! Binds an accepted Kerberos context to the TLS server certificate the
//! client saw, using the `tls-server-end-point` binding type (RFC 5929).

use thiserror::Error;

/// Channel binding type tag prefixed to the certificate hash.
pub const TLS_SERVER_END_POINT: &str = "tls-server-end-point";

/// Channel binding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("Invalid certificate hash '{hash}': {reason}")]
    InvalidHash { hash: String, reason: String },
}

/// Application data of a GSSAPI channel binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    application_data: Vec<u8>,
}

impl ChannelBinding {
    /// Build the binding for a hex certificate hash (colons already stripped).
    ///
    /// The application data is `tls-server-end-point:` followed by the raw
    /// hash bytes.
    pub fn build(certificate_hash_hex: &str) -> Result<Self, BindingError> {
        let raw = hex::decode(certificate_hash_hex).map_err(|e| BindingError::InvalidHash {
            hash: certificate_hash_hex.to_string(),
            reason: e.to_string(),
        })?;

        let mut application_data = Vec::with_capacity(TLS_SERVER_END_POINT.len() + 1 + raw.len());
        application_data.extend_from_slice(TLS_SERVER_END_POINT.as_bytes());
        application_data.push(b':');
        application_data.extend_from_slice(&raw);

        Ok(Self { application_data })
    }

    pub fn application_data(&self) -> &[u8] {
        &self.application_data
    }
}

/// Ordered list of allowed certificate hashes, colon separators stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelBindingSet {
    hashes: Vec<String>,
}

impl ChannelBindingSet {
    /// Parse configured hashes such as `AB:CD:EF...`, keeping their order.
    pub fn parse<S: AsRef<str>>(hashes: &[S]) -> Result<Self, BindingError> {
        let hashes = hashes
            .iter()
            .map(|hash| {
                let stripped = hash.as_ref().replace(':', "");
                hex::decode(&stripped).map_err(|e| BindingError::InvalidHash {
                    hash: hash.as_ref().to_string(),
                    reason: e.to_string(),
                })?;
                Ok(stripped)
            })
            .collect::<Result<Vec<_>, BindingError>>()?;

        Ok(Self { hashes })
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.hashes.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_binding() {
        let binding = ChannelBinding::build("00ff10").unwrap();
        assert_eq!(
            binding.application_data(),
            b"tls-server-end-point:\x00\xff\x10".as_slice()
        );
    }

    #[test]
    fn test_build_rejects_invalid_hex() {
        assert!(matches!(
            ChannelBinding::build("xyz"),
            Err(BindingError::InvalidHash { .. })
        ));
        assert!(ChannelBinding::build("abc").is_err());
    }

    #[test]
    fn test_set_strips_colons_and_keeps_order() {
        let set = ChannelBindingSet::parse(&["AB:CD:EF", "01:02"]).unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["ABCDEF", "0102"]);
        assert_eq!(set.len(), 2);

        let empty = ChannelBindingSet::parse::<&str>(&[]).unwrap();
        assert!(empty.is_empty());
    }
}
