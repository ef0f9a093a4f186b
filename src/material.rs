use crate::error::{Error, Result};
use log::debug;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;
use std::sync::Arc;
use time::OffsetDateTime;

/// A local identity's certificate chain and signing key, ready for rustls.
///
/// The leaf's expiration is parsed once at construction; it bounds every
/// authentication performed with this certificate.
#[derive(Clone, Debug)]
pub struct IdentityCertificate {
    certified_key: Arc<CertifiedKey>,
    not_after: OffsetDateTime,
}

impl IdentityCertificate {
    /// Wraps an existing rustls `CertifiedKey`. The first certificate of the chain
    /// is taken as the leaf.
    ///
    /// ## Errors
    ///
    /// Returns [`Error::CertParse`] if the chain is empty or the leaf can't be parsed.
    pub fn new(certified_key: Arc<CertifiedKey>) -> Result<Self> {
        let leaf = certified_key
            .cert
            .first()
            .ok_or_else(|| Error::CertParse("certificate chain is empty".into()))?;

        let not_after = leaf_not_after(leaf)?;

        Ok(Self {
            certified_key,
            not_after,
        })
    }

    /// Builds an identity certificate from a leaf-first DER chain and a PKCS#8 key.
    ///
    /// ## Errors
    ///
    /// Returns [`Error::CertifiedKey`] if the key can't be loaded by the crypto
    /// provider, or [`Error::CertParse`] if the leaf can't be parsed.
    pub fn from_der(
        cert_chain: Vec<CertificateDer<'static>>,
        private_key_pkcs8_der: &[u8],
    ) -> Result<Self> {
        let key_der =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(private_key_pkcs8_der.to_vec()));

        let signing_key = crate::crypto::provider()
            .key_provider
            .load_private_key(key_der)
            .map_err(|e| Error::CertifiedKey(format!("{e:?}")))?;

        Self::new(Arc::new(CertifiedKey::new(cert_chain, signing_key)))
    }

    /// Returns the rustls certified key.
    pub fn certified_key(&self) -> &Arc<CertifiedKey> {
        &self.certified_key
    }

    /// Returns the leaf certificate's `notAfter`.
    pub fn expiration(&self) -> OffsetDateTime {
        self.not_after
    }
}

fn leaf_not_after(leaf: &CertificateDer<'_>) -> Result<OffsetDateTime> {
    let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|e| Error::CertParse(e.to_string()))?;
    Ok(cert.validity().not_after.to_datetime())
}

/// Set of trusted root certificates.
#[derive(Clone, Debug)]
pub struct TrustBundle {
    roots: Arc<RootCertStore>,
}

impl TrustBundle {
    /// Builds a bundle from DER-encoded certificate authorities.
    ///
    /// Unparsable authorities are skipped.
    ///
    /// ## Errors
    ///
    /// Returns [`Error::CertParse`] if no certificates are accepted into the store.
    pub fn from_der_certs<I>(certs: I) -> Result<Self>
    where
        I: IntoIterator<Item = CertificateDer<'static>>,
    {
        let mut store = RootCertStore::empty();

        let (added, ignored) = store.add_parsable_certificates(certs);

        debug!("loaded {added} root cert(s) into trust bundle, ignored {ignored}");

        if store.is_empty() {
            return Err(Error::CertParse(
                "no root certificates were accepted into the trust bundle".into(),
            ));
        }

        Ok(Self {
            roots: Arc::new(store),
        })
    }

    /// Wraps an existing root store.
    pub fn from_root_store(roots: Arc<RootCertStore>) -> Self {
        Self { roots }
    }

    /// Returns the root store.
    pub fn roots(&self) -> &Arc<RootCertStore> {
        &self.roots
    }
}
