#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # mesh-mutual-auth
//!
//! Mutual TLS authentication between mesh nodes whose certificates are bound to
//! opaque [`NumericIdentity`] values rather than DNS names.
//!
//! A [`MutualAuthHandler`] plays both roles at once:
//!
//! * as a TLS **client**, [`MutualAuthHandler::authenticate`] dials a remote node,
//!   presents the local identity's certificate, sends the remote identity as SNI
//!   and verifies that the server certificate chains to the trust bundle *and* was
//!   issued to that identity;
//! * as a TLS **server**, it listens on the configured port and answers each
//!   handshake with the certificate of the identity named by the client's SNI,
//!   requiring a client certificate that chains to the trust bundle.
//!
//! A successful authentication yields the earlier of the two leaf expirations,
//! after which the caller must authenticate again.
//!
//! Certificates, trust roots and the identity/hostname mapping come from a
//! [`CertificateProvider`] and are fetched fresh for every handshake, so rotation
//! needs no restart.
//!
//! ## Feature flags
//!
//! Exactly **one** `rustls` crypto provider must be enabled:
//!
//! * `ring` (default)
//! * `aws-lc-rs`
//!
//! Enabling more than one provider results in a compile-time error.

#[cfg(all(feature = "ring", feature = "aws-lc-rs"))]
compile_error!("Enable only one crypto provider feature: `ring` or `aws-lc-rs`.");

#[cfg(not(any(feature = "ring", feature = "aws-lc-rs")))]
compile_error!("Enable one crypto provider feature: `ring` (default) or `aws-lc-rs`.");

pub mod identity;
pub mod verifier;

mod client;
mod config;
mod crypto;
mod error;
mod handler;
mod listener;
mod material;
mod provider;
mod resolve;
mod server;

// Public re-exports
pub use config::{
    MutualAuthConfig, HANDSHAKE_TIMEOUT_ENV, LISTENER_PORT_ENV, MAX_CONCURRENT_HANDSHAKES_ENV,
};
pub use error::{Error, Result};
pub use handler::{AuthHandler, AuthRequest, AuthResponse, AuthType, MutualAuthHandler};
pub use identity::{NumericIdentity, SniEncoding};
pub use listener::ListenerState;
pub use material::{IdentityCertificate, TrustBundle};
pub use provider::{CertificateProvider, CertificateRotationEvent, ProviderError};
pub use verifier::{verify_peer_certificate, VerifyError};
pub use x509_parser::certificate::X509Certificate;
