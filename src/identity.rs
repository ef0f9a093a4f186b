//! Numeric workload identities and their hostname encoding.

use crate::provider::ProviderError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::GeneralName;

/// Opaque numeric identity of a workload class.
///
/// The string form is canonical decimal: parsing rejects signs, whitespace and
/// leading zeros, so every identity has exactly one textual representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NumericIdentity(u32);

impl NumericIdentity {
    /// Wraps a raw identity value.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw identity value.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for NumericIdentity {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for NumericIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a string is not a canonical numeric identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid numeric identity: {0:?}")]
pub struct ParseIdentityError(String);

impl FromStr for NumericIdentity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let canonical = !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_digit())
            && (s.len() == 1 || !s.starts_with('0'));

        if !canonical {
            return Err(ParseIdentityError(s.to_string()));
        }

        s.parse::<u32>()
            .map(Self)
            .map_err(|_| ParseIdentityError(s.to_string()))
    }
}

/// Reference encoding between identities and SNI hostnames.
///
/// An identity `id` in trust domain `td` is carried as the hostname `"<id>.<td>"`
/// and is expected to hold the URI SAN `spiffe://<td>/identity/<id>`.
/// Certificate providers may use this to implement
/// [`CertificateProvider::identity_to_hostname`](crate::CertificateProvider::identity_to_hostname)
/// and its inverse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SniEncoding {
    trust_domain: String,
}

impl SniEncoding {
    /// Creates an encoding rooted at the given trust domain.
    pub fn new(trust_domain: impl Into<String>) -> Self {
        Self {
            trust_domain: trust_domain.into(),
        }
    }

    /// Returns the trust domain.
    pub fn trust_domain(&self) -> &str {
        &self.trust_domain
    }

    /// Encodes an identity as an SNI hostname.
    pub fn encode(&self, id: NumericIdentity) -> String {
        format!("{id}.{}", self.trust_domain)
    }

    /// Decodes an SNI hostname produced by [`Self::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownIdentity`] if the hostname is outside the
    /// trust domain or its first label is not a canonical identity.
    pub fn decode(&self, hostname: &str) -> Result<NumericIdentity, ProviderError> {
        hostname
            .strip_suffix(self.trust_domain.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| ProviderError::UnknownIdentity(hostname.to_string()))
    }

    /// Returns the URI SAN an identity's certificate carries.
    pub fn spiffe_id(&self, id: NumericIdentity) -> String {
        format!("spiffe://{}/identity/{id}", self.trust_domain)
    }
}

/// Returns `true` if `leaf` lists `uri` among its URI subject alternative names.
///
/// # Errors
///
/// Returns [`ProviderError::Other`] if the SAN extension is malformed or duplicated.
pub fn leaf_has_uri_san(leaf: &X509Certificate<'_>, uri: &str) -> Result<bool, ProviderError> {
    let Some(san) = leaf
        .subject_alternative_name()
        .map_err(|e| ProviderError::Other(Box::new(e)))?
    else {
        return Ok(false);
    };

    Ok(san
        .value
        .general_names
        .iter()
        .any(|name| matches!(name, GeneralName::URI(u) if *u == uri)))
}
