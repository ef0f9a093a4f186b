//! Peer certificate verification bound to numeric identities.
//!
//! [`verify_peer_certificate`] is the whole algorithm and needs no socket. The
//! rustls adapter below only feeds it the chain received during the handshake and
//! records the outcome for the outbound authenticator.

use crate::identity::NumericIdentity;
use crate::material::TrustBundle;
use crate::provider::{CertificateProvider, ProviderError};
use log::debug;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::verify_server_cert_signed_by_trust_anchor;
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::fmt;
use std::sync::{Arc, OnceLock};
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;

/// Reasons a peer certificate is rejected.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum VerifyError {
    /// No certificate chains were supplied.
    #[error("no certificate chains found")]
    EmptyChainList,

    /// A certificate is not valid DER.
    #[error("failed to parse certificate: {0}")]
    CertificateParse(String),

    /// Every certificate of a chain is flagged as a CA.
    #[error("no leaf certificate found")]
    MissingLeafCertificate,

    /// Path validation against the trust bundle failed.
    #[error("failed to verify certificate: {0}")]
    ChainVerificationFailed(rustls::Error),

    /// The leaf was not issued to the expected identity.
    #[error("unable to validate SAN: certificate was not issued to identity {0}")]
    IdentityMismatch(NumericIdentity),

    /// The identity predicate itself failed.
    #[error("failed to validate SAN for identity {identity}: {source}")]
    IdentityValidation {
        /// Expected identity.
        identity: NumericIdentity,
        /// Provider failure.
        #[source]
        source: Arc<ProviderError>,
    },
}

/// Verifies one or more received certificate chains against `bundle`.
///
/// Each chain is split by CA flag into intermediates and a single leaf, the leaf is
/// path-validated against the bundle at `now`, and, when `expected` is set, checked
/// with [`CertificateProvider::validate_identity`]. Returns the soonest leaf
/// expiration across all chains.
///
/// # Errors
///
/// Returns the first [`VerifyError`] encountered; no chain is skipped.
pub fn verify_peer_certificate(
    provider: &dyn CertificateProvider,
    expected: Option<NumericIdentity>,
    bundle: &TrustBundle,
    chains: &[&[CertificateDer<'_>]],
    now: UnixTime,
) -> Result<OffsetDateTime, VerifyError> {
    if chains.is_empty() {
        return Err(VerifyError::EmptyChainList);
    }

    let algorithms = crate::crypto::provider().signature_verification_algorithms;
    let mut expiration: Option<OffsetDateTime> = None;

    for chain in chains {
        let mut leaf: Option<(&CertificateDer<'_>, X509Certificate<'_>)> = None;
        let mut intermediates: Vec<CertificateDer<'_>> = Vec::with_capacity(chain.len());

        for der in *chain {
            let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
                .map_err(|e| VerifyError::CertificateParse(e.to_string()))?;

            if cert.is_ca() {
                intermediates.push(der.clone());
            } else {
                leaf = Some((der, cert));
            }
        }

        let (leaf_der, leaf) = leaf.ok_or(VerifyError::MissingLeafCertificate)?;

        let parsed = ParsedCertificate::try_from(leaf_der)
            .map_err(|e| VerifyError::CertificateParse(e.to_string()))?;

        verify_server_cert_signed_by_trust_anchor(
            &parsed,
            bundle.roots(),
            &intermediates,
            now,
            algorithms.all,
        )
        .map_err(VerifyError::ChainVerificationFailed)?;

        if let Some(id) = expected {
            debug!("validating peer certificate SAN against identity {id}");
            match provider.validate_identity(id, &leaf) {
                Ok(true) => {}
                Ok(false) => return Err(VerifyError::IdentityMismatch(id)),
                Err(e) => {
                    return Err(VerifyError::IdentityValidation {
                        identity: id,
                        source: Arc::new(e),
                    })
                }
            }
        }

        let not_after = leaf.validity().not_after.to_datetime();
        expiration = Some(expiration.map_or(not_after, |t| t.min(not_after)));

        debug!("validated peer certificate {} (expires {not_after})", leaf.subject());
    }

    expiration.ok_or(VerifyError::EmptyChainList)
}

fn other_err<E>(e: E) -> rustls::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rustls::Error::Other(rustls::OtherError(Arc::new(e)))
}

// ------------ Server verifier (client side) ------------

/// Replaces rustls' hostname-based validation with [`verify_peer_certificate`].
///
/// The server name only carries the encoded remote identity; it is never matched
/// against the certificate. A verifier is built per handshake and keeps the
/// outcome of its single verification.
pub(crate) struct PeerCertVerifier {
    provider: Arc<dyn CertificateProvider>,
    bundle: TrustBundle,
    expected: NumericIdentity,
    algorithms: WebPkiSupportedAlgorithms,
    outcome: OnceLock<Result<OffsetDateTime, VerifyError>>,
}

impl PeerCertVerifier {
    pub(crate) fn new(
        provider: Arc<dyn CertificateProvider>,
        bundle: TrustBundle,
        expected: NumericIdentity,
    ) -> Self {
        Self {
            provider,
            bundle,
            expected,
            algorithms: crate::crypto::provider().signature_verification_algorithms,
            outcome: OnceLock::new(),
        }
    }

    /// Outcome of the verification, if rustls asked for one.
    pub(crate) fn outcome(&self) -> Option<&Result<OffsetDateTime, VerifyError>> {
        self.outcome.get()
    }
}

impl fmt::Debug for PeerCertVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerCertVerifier")
            .field("expected", &self.expected)
            .field("outcome", &self.outcome.get())
            .finish_non_exhaustive()
    }
}

impl ServerCertVerifier for PeerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain: Vec<CertificateDer<'_>> = std::iter::once(end_entity.clone())
            .chain(intermediates.iter().cloned())
            .collect();

        let outcome = verify_peer_certificate(
            self.provider.as_ref(),
            Some(self.expected),
            &self.bundle,
            &[chain.as_slice()],
            now,
        );

        let verdict = match &outcome {
            Ok(_) => Ok(ServerCertVerified::assertion()),
            Err(e) => Err(other_err(e.clone())),
        };

        // rustls verifies the server chain once per handshake.
        let _ = self.outcome.set(outcome);

        verdict
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
