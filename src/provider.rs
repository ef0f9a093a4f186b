//! The certificate provider collaborator.
//!
//! Issuance, rotation and storage of identity certificates live outside this crate.
//! The handler only needs the narrow interface below, which is typically backed by a
//! SPIFFE Workload API client.

use crate::identity::NumericIdentity;
use crate::material::{IdentityCertificate, TrustBundle};
use std::sync::Arc;
use tokio::sync::broadcast;
use x509_parser::certificate::X509Certificate;

/// Errors reported by a [`CertificateProvider`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// No certificate is provisioned for the identity.
    #[error("no certificate provisioned for identity {0}")]
    NoCertificate(NumericIdentity),

    /// The hostname does not correspond to any identity the provider serves.
    #[error("hostname {0:?} does not correspond to a known identity")]
    UnknownIdentity(String),

    /// The trust bundle cannot be loaded.
    #[error("trust bundle unavailable: {0}")]
    NoTrustBundle(String),

    /// Any other provider failure.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Notification that the certificate of an identity was rotated or removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CertificateRotationEvent {
    /// Identity whose certificate changed.
    pub identity: NumericIdentity,
    /// `true` when the identity's certificate was removed rather than renewed.
    pub deleted: bool,
}

/// Source of identity certificates, trust roots and the identity/hostname mapping.
///
/// Every method is called fresh on each authentication attempt; the handler never
/// caches what it gets back, so rotation takes effect on the next handshake.
pub trait CertificateProvider: Send + Sync + 'static {
    /// Returns the certificate and key of a local identity.
    fn certificate_for_identity(
        &self,
        id: NumericIdentity,
    ) -> Result<Arc<IdentityCertificate>, ProviderError>;

    /// Returns the current trust bundle.
    fn trust_bundle(&self) -> Result<TrustBundle, ProviderError>;

    /// Encodes an identity as an SNI hostname.
    fn identity_to_hostname(&self, id: NumericIdentity) -> String;

    /// Decodes an SNI hostname; the inverse of [`Self::identity_to_hostname`].
    fn hostname_to_identity(&self, hostname: &str) -> Result<NumericIdentity, ProviderError>;

    /// Checks that `leaf` was issued to `id`.
    fn validate_identity(
        &self,
        id: NumericIdentity,
        leaf: &X509Certificate<'_>,
    ) -> Result<bool, ProviderError>;

    /// Subscribes to certificate rotation events. The feed does not end under
    /// normal operation.
    fn subscribe_to_rotated_identities(&self) -> broadcast::Receiver<CertificateRotationEvent>;
}
