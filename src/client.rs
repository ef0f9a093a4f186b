use crate::error::{Error, Result};
use crate::handler::{AuthRequest, AuthResponse};
use crate::material::IdentityCertificate;
use crate::provider::CertificateProvider;
use crate::resolve::{server_name_for, LocalCertResolver};
use crate::verifier::PeerCertVerifier;
use log::debug;
use rustls::client::danger::ServerCertVerifier;
use rustls::client::ResolvesClientCert;
use rustls::ClientConfig;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Builds the client config for one outbound handshake.
///
/// * TLS 1.3 only
/// * presents `local` whenever the server requests a client certificate
/// * replaces rustls' built-in server validation with `verifier`
fn client_config(local: &IdentityCertificate, verifier: Arc<PeerCertVerifier>) -> Result<ClientConfig> {
    let resolver: Arc<dyn ResolvesClientCert> = Arc::new(LocalCertResolver::new(local));
    let verifier: Arc<dyn ServerCertVerifier> = verifier;

    let cfg = ClientConfig::builder_with_provider(crate::crypto::provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_cert_resolver(resolver);

    Ok(cfg)
}

fn remote_addr(request: &AuthRequest, port: u16) -> Result<SocketAddr> {
    let raw = request.remote_node_ip.trim();
    if raw.is_empty() {
        return Err(Error::InvalidRequest("remote node IP is empty".into()));
    }

    let ip: IpAddr = raw.parse().map_err(|e| {
        Error::InvalidRequest(format!("remote node IP {raw:?} is not an IP address: {e}"))
    })?;

    Ok(SocketAddr::new(ip, port))
}

/// Authenticates against the remote node named by `request`.
///
/// The returned expiration is the earlier of the local and the remote leaf
/// expirations.
// TODO: bound the dial and the handshake with a configurable timeout; both
// currently rely on the operating system's defaults.
pub(crate) async fn authenticate(
    provider: &Arc<dyn CertificateProvider>,
    port: u16,
    request: &AuthRequest,
) -> Result<AuthResponse> {
    let addr = remote_addr(request, port)?;

    let local = provider
        .certificate_for_identity(request.local_identity)
        .map_err(|source| Error::CertificateUnavailable {
            identity: request.local_identity,
            source,
        })?;

    let bundle = provider.trust_bundle().map_err(Error::TrustBundleUnavailable)?;

    let server_name = server_name_for(provider.as_ref(), request.remote_identity)?;

    let verifier = Arc::new(PeerCertVerifier::new(
        Arc::clone(provider),
        bundle,
        request.remote_identity,
    ));
    let connector = TlsConnector::from(Arc::new(client_config(&local, Arc::clone(&verifier))?));

    // The socket is dropped, and thereby closed, on every return below.
    let tcp = TcpStream::connect(addr)
        .await
        .map_err(|source| Error::ConnectionFailed { addr, source })?;

    debug!(
        "starting mTLS handshake with {addr} as identity {} for identity {}",
        request.local_identity, request.remote_identity
    );

    let mut tls = match connector.connect(server_name, tcp).await {
        Ok(tls) => tls,
        Err(source) => {
            return Err(match verifier.outcome() {
                Some(Err(e)) => Error::PeerVerification {
                    addr,
                    identity: request.remote_identity,
                    source: e.clone(),
                },
                _ => Error::HandshakeFailed { addr, source },
            });
        }
    };

    // Best-effort close_notify; authentication already succeeded.
    let _ = tls.shutdown().await;

    let peer_expiration = match verifier.outcome() {
        Some(Ok(expiration)) => *expiration,
        _ => return Err(Error::NoExpirationDetermined { addr }),
    };

    Ok(AuthResponse {
        expiration_time: local.expiration().min(peer_expiration),
    })
}
