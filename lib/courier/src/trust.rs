//! TLS trust evaluation per host.
//!
//! A [`ClientTrustManager`] maps hosts to [`TrustEvaluator`]s. The transport
//! installs a [`TrustManagerVerifier`] in its rustls configuration, which asks
//! the manager for the evaluator of each server it connects to:
//!
//! - no evaluators at all: default webpki validation
//! - an evaluator for the host: the evaluator decides, after default
//!   validation unless the evaluator opts out
//! - no evaluator for the host: default validation, or a TLS error when every
//!   host must be evaluated
//!
//! [`CertificateEvaluator`] pins whole certificates, [`PublicKeyEvaluator`]
//! pins the server's public keys.
//!
//! ```
//! use std::sync::Arc;
//! use courier::{CertificateEvaluator, ClientTrustManager};
//! use rustls::pki_types::CertificateDer;
//!
//! # let pinned_der: Vec<u8> = vec![0x30, 0x82];
//! let manager = ClientTrustManager::new(false);
//! manager.set_evaluator(
//!     "api.example.com",
//!     Some(Arc::new(CertificateEvaluator::new([CertificateDer::from(pinned_der)]))),
//! );
//! assert!(!manager.is_empty());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, SubjectPublicKeyInfoDer, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::{Error, Result};

/// Approves or rejects the certificate chain a server presents.
pub trait TrustEvaluator: fmt::Debug + Send + Sync {
    /// Evaluates the chain presented by `server_name`.
    fn evaluate(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Result<()>;

    /// Whether default webpki validation runs before [`evaluate`](Self::evaluate).
    fn performs_default_validation(&self) -> bool {
        true
    }
}

// ============================================================================
// Certificate pinning
// ============================================================================

/// Pins a set of DER certificates.
///
/// The server chain passes when it contains at least one pinned certificate.
/// With `accept_self_signed`, the chain is validated with the pinned
/// certificates as the only trust anchors instead of the public roots. Host
/// names are always checked by chain validation.
#[derive(Debug, Clone)]
pub struct CertificateEvaluator {
    certificates: Vec<CertificateDer<'static>>,
    accept_self_signed: bool,
    perform_default_validation: bool,
}

impl CertificateEvaluator {
    /// Pins `certificates`, with default validation and no self-signed chains.
    pub fn new(certificates: impl IntoIterator<Item = CertificateDer<'static>>) -> Self {
        Self {
            certificates: certificates.into_iter().collect(),
            accept_self_signed: false,
            perform_default_validation: true,
        }
    }

    /// Accepts chains anchored at a pinned certificate.
    #[must_use]
    pub fn accept_self_signed(mut self, enabled: bool) -> Self {
        self.accept_self_signed = enabled;
        self
    }

    /// Runs default webpki validation against the public roots.
    #[must_use]
    pub fn perform_default_validation(mut self, enabled: bool) -> Self {
        self.perform_default_validation = enabled;
        self
    }

    /// The pinned certificates.
    #[must_use]
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    fn validate_against_pins(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Result<()> {
        let mut roots = RootCertStore::empty();
        for certificate in &self.certificates {
            roots
                .add(certificate.clone())
                .map_err(|err| Error::tls(format!("invalid pinned certificate: {err}")))?;
        }
        let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider())
            .build()
            .map_err(|err| Error::tls(err.to_string()))?;
        verifier
            .verify_server_cert(end_entity, intermediates, server_name, &[], now)
            .map(|_| ())
            .map_err(|err| Error::tls(err.to_string()))
    }
}

impl TrustEvaluator for CertificateEvaluator {
    fn evaluate(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> Result<()> {
        if self.certificates.is_empty() {
            return Err(Error::tls("no pinned certificates"));
        }
        if self.accept_self_signed {
            self.validate_against_pins(end_entity, intermediates, server_name, now)?;
        }

        let pinned = std::iter::once(end_entity)
            .chain(intermediates)
            .any(|presented| self.certificates.iter().any(|pin| **pin == **presented));
        if pinned {
            Ok(())
        } else {
            Err(Error::tls("pinning failed"))
        }
    }

    fn performs_default_validation(&self) -> bool {
        self.perform_default_validation && !self.accept_self_signed
    }
}

// ============================================================================
// Public key pinning
// ============================================================================

/// Pins a set of DER `SubjectPublicKeyInfo` structures.
///
/// The server chain passes when one of its certificates carries a pinned key,
/// that is when the certificate's DER encoding embeds the pinned
/// `SubjectPublicKeyInfo` verbatim. Keys survive certificate renewal as long
/// as the server keeps its key pair.
#[derive(Debug, Clone)]
pub struct PublicKeyEvaluator {
    keys: Vec<SubjectPublicKeyInfoDer<'static>>,
    perform_default_validation: bool,
}

impl PublicKeyEvaluator {
    /// Pins `keys`, with default validation.
    pub fn new(keys: impl IntoIterator<Item = SubjectPublicKeyInfoDer<'static>>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            perform_default_validation: true,
        }
    }

    /// Runs default webpki validation against the public roots.
    #[must_use]
    pub fn perform_default_validation(mut self, enabled: bool) -> Self {
        self.perform_default_validation = enabled;
        self
    }

    /// The pinned keys.
    #[must_use]
    pub fn keys(&self) -> &[SubjectPublicKeyInfoDer<'static>] {
        &self.keys
    }

    fn carries_pinned_key(&self, certificate: &[u8]) -> bool {
        self.keys.iter().any(|key| {
            let key: &[u8] = key.as_ref();
            !key.is_empty() && certificate.windows(key.len()).any(|window| window == key)
        })
    }
}

impl TrustEvaluator for PublicKeyEvaluator {
    fn evaluate(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _now: UnixTime,
    ) -> Result<()> {
        if self.keys.is_empty() {
            return Err(Error::tls("no pinned public keys"));
        }

        let pinned = std::iter::once(end_entity)
            .chain(intermediates)
            .any(|presented| self.carries_pinned_key(presented));
        if pinned {
            Ok(())
        } else {
            Err(Error::tls("pinning failed"))
        }
    }

    fn performs_default_validation(&self) -> bool {
        self.perform_default_validation
    }
}

// ============================================================================
// Trust manager
// ============================================================================

/// Host to [`TrustEvaluator`] mapping.
pub struct ClientTrustManager {
    all_hosts_must_be_evaluated: bool,
    evaluators: RwLock<HashMap<String, Arc<dyn TrustEvaluator>>>,
}

impl Default for ClientTrustManager {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ClientTrustManager {
    /// Creates an empty manager.
    ///
    /// With `all_hosts_must_be_evaluated`, connecting to a host without an
    /// evaluator fails once at least one evaluator is registered.
    #[must_use]
    pub fn new(all_hosts_must_be_evaluated: bool) -> Self {
        Self {
            all_hosts_must_be_evaluated,
            evaluators: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a manager with evaluators.
    pub fn with_evaluators(
        all_hosts_must_be_evaluated: bool,
        evaluators: impl IntoIterator<Item = (String, Arc<dyn TrustEvaluator>)>,
    ) -> Self {
        Self {
            all_hosts_must_be_evaluated,
            evaluators: RwLock::new(evaluators.into_iter().collect()),
        }
    }

    /// Whether every host needs an evaluator.
    #[must_use]
    pub fn all_hosts_must_be_evaluated(&self) -> bool {
        self.all_hosts_must_be_evaluated
    }

    /// The evaluator registered for `host`.
    ///
    /// Returns `Ok(None)` when the host falls back to default validation.
    pub fn evaluator_for(&self, host: &str) -> Result<Option<Arc<dyn TrustEvaluator>>> {
        match self.evaluators.read().get(host) {
            Some(evaluator) => Ok(Some(Arc::clone(evaluator))),
            None if self.all_hosts_must_be_evaluated => {
                Err(Error::tls(format!("no trust evaluator for host {host}")))
            }
            None => Ok(None),
        }
    }

    /// Registers, or removes with `None`, the evaluator of `host`.
    pub fn set_evaluator(&self, host: impl Into<String>, evaluator: Option<Arc<dyn TrustEvaluator>>) {
        let host = host.into();
        let mut evaluators = self.evaluators.write();
        match evaluator {
            Some(evaluator) => {
                evaluators.insert(host, evaluator);
            }
            None => {
                evaluators.remove(&host);
            }
        }
    }

    /// Returns `true` if no evaluator is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evaluators.read().is_empty()
    }
}

impl fmt::Debug for ClientTrustManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let evaluators = self.evaluators.read();
        let mut hosts: Vec<_> = evaluators.keys().collect();
        hosts.sort();
        f.debug_struct("ClientTrustManager")
            .field("all_hosts_must_be_evaluated", &self.all_hosts_must_be_evaluated)
            .field("hosts", &hosts)
            .finish()
    }
}

// ============================================================================
// rustls verifier
// ============================================================================

pub(crate) fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// rustls certificate verifier backed by a [`ClientTrustManager`].
#[derive(Debug)]
pub struct TrustManagerVerifier {
    manager: Arc<ClientTrustManager>,
    default: Arc<WebPkiServerVerifier>,
}

impl TrustManagerVerifier {
    /// Creates a verifier falling back to webpki validation against `roots`.
    pub fn new(manager: Arc<ClientTrustManager>, roots: Arc<RootCertStore>) -> Result<Self> {
        let default = WebPkiServerVerifier::builder_with_provider(roots, provider())
            .build()
            .map_err(|err| Error::tls(err.to_string()))?;
        Ok(Self { manager, default })
    }
}

impl ServerCertVerifier for TrustManagerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if self.manager.is_empty() {
            return self
                .default
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        }

        let host = server_name.to_str();
        let evaluator = self
            .manager
            .evaluator_for(&host)
            .map_err(|err| rustls::Error::General(err.to_string()))?;
        let Some(evaluator) = evaluator else {
            return self
                .default
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        };

        if evaluator.performs_default_validation() {
            self.default
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
        }
        evaluator
            .evaluate(end_entity, intermediates, server_name, now)
            .map_err(|err| {
                tracing::warn!(%host, error = %err, "server trust evaluation failed");
                rustls::Error::General(err.to_string())
            })?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.default.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.default.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.default.supported_verify_schemes()
    }
}
