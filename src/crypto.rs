use rustls::crypto::CryptoProvider;
use std::sync::{Arc, OnceLock};

/// Returns the crypto provider every TLS config of this crate is built with.
///
/// Prefers the process default when the application installed one; otherwise the
/// provider selected by cargo feature is used without touching global state.
pub(crate) fn provider() -> Arc<CryptoProvider> {
    static PROVIDER: OnceLock<Arc<CryptoProvider>> = OnceLock::new();
    Arc::clone(PROVIDER.get_or_init(|| {
        CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(feature_provider()))
    }))
}

#[cfg(feature = "ring")]
fn feature_provider() -> CryptoProvider {
    rustls::crypto::ring::default_provider()
}

#[cfg(feature = "aws-lc-rs")]
fn feature_provider() -> CryptoProvider {
    rustls::crypto::aws_lc_rs::default_provider()
}
