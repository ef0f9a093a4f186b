use crate::error::{Error, Result};
use crate::provider::CertificateProvider;
use crate::resolve::SniCertResolver;
use log::{debug, error};
use rustls::server::{ResolvesServerCert, WebPkiClientVerifier};
use rustls::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

/// Builds the server config for one inbound handshake.
///
/// The resulting server configuration:
///
/// * negotiates TLS 1.3 only
/// * picks the presented certificate from the client's SNI
/// * requires a client certificate chaining to the current trust bundle
///
/// The trust bundle is fetched on every call, so a CA rotation applies to the
/// next accepted connection.
pub(crate) fn server_config(provider: &Arc<dyn CertificateProvider>) -> Result<ServerConfig> {
    let bundle = provider.trust_bundle().map_err(Error::TrustBundleUnavailable)?;

    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::clone(bundle.roots()), crate::crypto::provider())
            .build()
            .map_err(|e| Error::VerifierBuilder(e.to_string()))?;

    let resolver: Arc<dyn ResolvesServerCert> = Arc::new(SniCertResolver::new(Arc::clone(provider)));

    let cfg = ServerConfig::builder_with_provider(crate::crypto::provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_client_cert_verifier(verifier)
        .with_cert_resolver(resolver);

    Ok(cfg)
}

/// Runs the server side of the handshake for one accepted connection.
///
/// Failures are logged and end this connection only. With a `deadline`, a peer
/// that has not completed the handshake in time is disconnected.
pub(crate) async fn handle_connection(
    provider: Arc<dyn CertificateProvider>,
    stream: TcpStream,
    peer: SocketAddr,
    deadline: Option<Duration>,
) {
    let cfg = match server_config(&provider) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to prepare mTLS handshake with {peer}: {e}");
            return;
        }
    };

    let accept = TlsAcceptor::from(Arc::new(cfg)).accept(stream);
    let accepted = match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, accept).await {
            Ok(res) => res,
            Err(_) => {
                error!("failed to perform TLS handshake with {peer}: timed out after {deadline:?}");
                return;
            }
        },
        None => accept.await,
    };

    match accepted {
        Ok(mut tls) => {
            let sni = tls.get_ref().1.server_name().unwrap_or_default().to_string();
            debug!("completed mTLS handshake with {peer} for SNI {sni:?}");
            let _ = tls.shutdown().await;
        }
        Err(e) => error!("failed to perform TLS handshake with {peer}: {e}"),
    }
}
