//! HTTPS connector using rustls.

use std::sync::Arc;

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;

use crate::trust::{ClientTrustManager, TrustManagerVerifier, provider};
use crate::{Error, Result, TransportConfig};

/// Create an HTTPS connector with rustls.
///
/// This connector supports both HTTP/1.1 and HTTP/2. Server certificates are
/// checked by the trust manager, falling back to the Mozilla root
/// certificates. Plain `http` URLs are allowed.
pub fn https_connector(
    config: &TransportConfig,
    trust: Arc<ClientTrustManager>,
) -> Result<HttpsConnector<HttpConnector>> {
    let root_store: rustls::RootCertStore =
        webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    let root_store = Arc::new(root_store);
    let verifier = TrustManagerVerifier::new(trust, Arc::clone(&root_store))?;

    let mut tls_config = rustls::ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|err| Error::tls(err.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    tls_config
        .dangerous()
        .set_certificate_verifier(Arc::new(verifier));

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(config.connect_timeout));

    Ok(HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_connector() {
        let connector = https_connector(&TransportConfig::default(), Arc::default());
        assert!(connector.is_ok());
    }
}
