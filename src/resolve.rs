//! Identity binding for the two handshake directions.
//!
//! Outbound, the remote identity is encoded as the SNI the client sends. Inbound,
//! the SNI selects which local identity's certificate the server presents.

use crate::error::{Error, Result};
use crate::identity::NumericIdentity;
use crate::material::IdentityCertificate;
use crate::provider::CertificateProvider;
use log::{debug, warn};
use rustls::client::ResolvesClientCert;
use rustls::pki_types::ServerName;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::SignatureScheme;
use std::fmt;
use std::sync::Arc;

/// Returns the TLS server name that pins `id` on an outbound handshake.
pub(crate) fn server_name_for(
    provider: &dyn CertificateProvider,
    id: NumericIdentity,
) -> Result<ServerName<'static>> {
    let name = provider.identity_to_hostname(id);
    ServerName::try_from(name.clone()).map_err(|_| Error::InvalidServerName { identity: id, name })
}

/// Looks up the local certificate to present for an inbound SNI.
pub(crate) fn certificate_for_server_name(
    provider: &dyn CertificateProvider,
    sni: &str,
) -> Result<Arc<IdentityCertificate>> {
    let identity = provider
        .hostname_to_identity(sni)
        .map_err(|source| Error::UnknownSni {
            sni: sni.to_string(),
            source,
        })?;

    provider
        .certificate_for_identity(identity)
        .map_err(|source| Error::CertificateUnavailable { identity, source })
}

/// Presents a fixed local certificate whenever the server asks for one.
#[derive(Clone, Debug)]
pub(crate) struct LocalCertResolver {
    certified_key: Arc<CertifiedKey>,
}

impl LocalCertResolver {
    pub(crate) fn new(certificate: &IdentityCertificate) -> Self {
        Self {
            certified_key: Arc::clone(certificate.certified_key()),
        }
    }
}

impl ResolvesClientCert for LocalCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.certified_key))
    }

    fn has_certs(&self) -> bool {
        true
    }
}

/// Chooses the server certificate from the SNI of each ClientHello.
pub(crate) struct SniCertResolver {
    provider: Arc<dyn CertificateProvider>,
}

impl SniCertResolver {
    pub(crate) fn new(provider: Arc<dyn CertificateProvider>) -> Self {
        Self { provider }
    }
}

impl fmt::Debug for SniCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SniCertResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let sni = client_hello.server_name().unwrap_or_default();
        debug!("got new TLS connection with SNI {sni:?}");

        match certificate_for_server_name(self.provider.as_ref(), sni) {
            Ok(cert) => Some(Arc::clone(cert.certified_key())),
            Err(e) => {
                warn!("no server certificate for inbound handshake: {e}");
                None
            }
        }
    }
}
