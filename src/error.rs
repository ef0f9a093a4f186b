//! Error types for `mesh-mutual-auth`.

use crate::identity::NumericIdentity;
use crate::provider::ProviderError;
use std::net::SocketAddr;

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by `mesh-mutual-auth`.
///
/// [`Error::MissingCertificateProvider`] and [`Error::Bind`] are fatal: the owning
/// process must not keep running in a half-configured state when it sees them.
/// Every other variant describes a single failed authentication attempt.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The handler is disabled because no listener port is configured.
    #[error("mutual authentication is disabled: no listener port is configured")]
    Disabled,

    /// The handler is enabled but was constructed without a certificate provider.
    #[error("no certificate provider configured, but one is required for mutual authentication")]
    MissingCertificateProvider,

    /// A configuration value could not be parsed.
    #[error("invalid mutual authentication config: {0}")]
    InvalidConfig(String),

    /// The listener socket could not be bound.
    #[error("failed to start mTLS listener on port {port}: {source}")]
    Bind {
        /// Configured listener port.
        port: u16,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// [`MutualAuthHandler::start`](crate::MutualAuthHandler::start) was called twice.
    #[error("mTLS listener has already been started")]
    AlreadyStarted,

    /// [`MutualAuthHandler::start`](crate::MutualAuthHandler::start) was called
    /// after the handler was stopped.
    #[error("mTLS auth handler has been stopped")]
    Stopped,

    /// The authentication request is malformed.
    #[error("invalid auth request: {0}")]
    InvalidRequest(String),

    /// No certificate could be obtained for an identity.
    #[error("failed to get certificate for identity {identity}: {source}")]
    CertificateUnavailable {
        /// Identity whose certificate was requested.
        identity: NumericIdentity,
        /// Provider failure.
        source: ProviderError,
    },

    /// The trust bundle could not be obtained.
    #[error("failed to get CA bundle: {0}")]
    TrustBundleUnavailable(#[source] ProviderError),

    /// An inbound SNI did not map to any identity known to the provider.
    #[error("failed to get identity for SNI {sni:?}: {source}")]
    UnknownSni {
        /// SNI requested by the peer.
        sni: String,
        /// Provider failure.
        source: ProviderError,
    },

    /// The provider encoded an identity as something that is not a DNS name.
    #[error("hostname {name:?} for identity {identity} is not a valid TLS server name")]
    InvalidServerName {
        /// Identity that was encoded.
        identity: NumericIdentity,
        /// Encoded hostname.
        name: String,
    },

    /// The TCP connection to the remote node could not be established.
    #[error("failed to dial {addr}: {source}")]
    ConnectionFailed {
        /// Remote node address.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The TLS handshake with the remote node failed.
    #[error("failed to perform TLS handshake with {addr}: {source}")]
    HandshakeFailed {
        /// Remote node address.
        addr: SocketAddr,
        /// Underlying I/O error (usually wrapping a `rustls::Error`).
        source: std::io::Error,
    },

    /// The remote node's certificate was rejected during the handshake.
    #[error("failed to verify certificate of identity {identity} at {addr}: {source}")]
    PeerVerification {
        /// Remote node address.
        addr: SocketAddr,
        /// Identity the peer was expected to prove.
        identity: NumericIdentity,
        /// Verification failure.
        source: crate::verifier::VerifyError,
    },

    /// The handshake succeeded without the peer certificate ever being verified.
    #[error("failed to get expiration time of peer certificate from {addr}")]
    NoExpirationDetermined {
        /// Remote node address.
        addr: SocketAddr,
    },

    /// Failed to create a `rustls::sign::CertifiedKey` from certificate material.
    #[error("failed building rustls certified key: {0}")]
    CertifiedKey(String),

    /// Failed to parse local certificate material.
    #[error("failed parsing certificate: {0}")]
    CertParse(String),

    /// Failed to build a rustls verifier.
    #[error("rustls verifier builder error: {0}")]
    VerifierBuilder(String),

    /// A rustls error occurred.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Returns `true` for errors after which the process must not proceed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingCertificateProvider | Self::Bind { .. })
    }
}
