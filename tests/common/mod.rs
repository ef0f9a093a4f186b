#![allow(dead_code)]

use mesh_mutual_auth::identity::leaf_has_uri_san;
use mesh_mutual_auth::{
    CertificateProvider, CertificateRotationEvent, IdentityCertificate, NumericIdentity,
    ProviderError, SniEncoding, TrustBundle,
};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio_rustls::TlsConnector;
use x509_parser::certificate::X509Certificate;

pub const TRUST_DOMAIN: &str = "spiffe.cilium";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn id(raw: u32) -> NumericIdentity {
    NumericIdentity::new(raw)
}

pub fn ymd(year: i32, month: u8, day: u8) -> OffsetDateTime {
    rcgen::date_time_ymd(year, month, day)
}

/// Returns a port that was free a moment ago.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// A certificate authority minted for one test.
pub struct TestCa {
    cert: rcgen::Certificate,
    key: KeyPair,
}

/// A leaf certificate with its PKCS#8 key.
pub struct TestLeaf {
    pub cert: CertificateDer<'static>,
    pub key_pkcs8: Vec<u8>,
}

impl TestLeaf {
    /// Builds the identity certificate presented on the wire: the leaf followed
    /// by `intermediates`.
    pub fn identity_certificate(
        &self,
        intermediates: &[CertificateDer<'static>],
    ) -> Arc<IdentityCertificate> {
        let mut chain = vec![self.cert.clone()];
        chain.extend(intermediates.iter().cloned());
        Arc::new(IdentityCertificate::from_der(chain, &self.key_pkcs8).unwrap())
    }
}

fn distinguished_name(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn
}

fn ca_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params
}

impl TestCa {
    pub fn new(cn: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = ca_params(cn).self_signed(&key).unwrap();
        Self { cert, key }
    }

    /// Issues an intermediate CA signed by this CA.
    pub fn intermediate(&self, cn: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let cert = ca_params(cn)
            .signed_by(&key, &self.cert, &self.key)
            .unwrap();
        Self { cert, key }
    }

    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    pub fn bundle(&self) -> TrustBundle {
        TrustBundle::from_der_certs([self.der()]).unwrap()
    }

    /// Issues a leaf for `identity` carrying its SPIFFE URI SAN.
    pub fn issue(&self, identity: NumericIdentity, not_after: OffsetDateTime) -> TestLeaf {
        let uri = SniEncoding::new(TRUST_DOMAIN).spiffe_id(identity);

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(&format!("identity {identity}"));
        params.subject_alt_names = vec![SanType::URI(Ia5String::try_from(uri).unwrap())];
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.not_after = not_after;

        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();

        TestLeaf {
            cert: cert.der().clone(),
            key_pkcs8: key.serialize_der(),
        }
    }
}

/// In-memory certificate provider for one mesh node.
pub struct StaticProvider {
    encoding: SniEncoding,
    certs: Mutex<HashMap<NumericIdentity, Arc<IdentityCertificate>>>,
    bundle: Mutex<Option<TrustBundle>>,
    fail_validation: Mutex<bool>,
    rotations: broadcast::Sender<CertificateRotationEvent>,
}

impl StaticProvider {
    pub fn new(bundle: TrustBundle) -> Arc<Self> {
        let (rotations, _) = broadcast::channel(16);
        Arc::new(Self {
            encoding: SniEncoding::new(TRUST_DOMAIN),
            certs: Mutex::new(HashMap::new()),
            bundle: Mutex::new(Some(bundle)),
            fail_validation: Mutex::new(false),
            rotations,
        })
    }

    pub fn insert(&self, identity: NumericIdentity, cert: Arc<IdentityCertificate>) {
        self.certs.lock().unwrap().insert(identity, cert);
    }

    pub fn set_bundle(&self, bundle: Option<TrustBundle>) {
        *self.bundle.lock().unwrap() = bundle;
    }

    pub fn fail_validation(&self) {
        *self.fail_validation.lock().unwrap() = true;
    }

    pub fn rotate(&self, event: CertificateRotationEvent) {
        self.rotations.send(event).unwrap();
    }
}

impl CertificateProvider for StaticProvider {
    fn certificate_for_identity(
        &self,
        id: NumericIdentity,
    ) -> Result<Arc<IdentityCertificate>, ProviderError> {
        self.certs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(ProviderError::NoCertificate(id))
    }

    fn trust_bundle(&self) -> Result<TrustBundle, ProviderError> {
        self.bundle
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ProviderError::NoTrustBundle("bundle not yet fetched".into()))
    }

    fn identity_to_hostname(&self, id: NumericIdentity) -> String {
        self.encoding.encode(id)
    }

    fn hostname_to_identity(&self, hostname: &str) -> Result<NumericIdentity, ProviderError> {
        self.encoding.decode(hostname)
    }

    fn validate_identity(
        &self,
        id: NumericIdentity,
        leaf: &X509Certificate<'_>,
    ) -> Result<bool, ProviderError> {
        if *self.fail_validation.lock().unwrap() {
            return Err(ProviderError::Other("SAN lookup unavailable".into()));
        }
        leaf_has_uri_san(leaf, &self.encoding.spiffe_id(id))
    }

    fn subscribe_to_rotated_identities(&self) -> broadcast::Receiver<CertificateRotationEvent> {
        self.rotations.subscribe()
    }
}

/// Trusts any server certificate, so a test can act as an arbitrary mTLS client.
#[derive(Debug)]
struct AnyServerCert;

impl ServerCertVerifier for AnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PKCS1_SHA256,
        ]
    }
}

/// A bare TLS client presenting `client_cert`, or no certificate at all.
pub fn plain_connector(client_cert: Option<&TestLeaf>) -> TlsConnector {
    let builder = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AnyServerCert));

    let cfg = match client_cert {
        Some(leaf) => builder
            .with_client_auth_cert(
                vec![leaf.cert.clone()],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf.key_pkcs8.clone())),
            )
            .unwrap(),
        None => builder.with_no_client_auth(),
    };

    TlsConnector::from(Arc::new(cfg))
}

/// Returns the server name carrying `identity` in SNI.
pub fn server_name(identity: NumericIdentity) -> ServerName<'static> {
    ServerName::try_from(SniEncoding::new(TRUST_DOMAIN).encode(identity)).unwrap()
}
