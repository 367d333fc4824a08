use anyhow::{Result, anyhow};
use rustls::{
    DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme,
    client::{
        WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use std::{
    fmt,
    sync::{Arc, Mutex},
};
use x509_parser::prelude::{FromDer, X509Certificate};

type CapturedChain = Vec<CertificateDer<'static>>;

/// A certificate verifier that records the chain it accepted while
/// delegating the actual verification to the standard `WebPKI` verifier.
///
/// # Security
///
/// - Does NOT bypass certificate validation
/// - Records a chain only when the inner verifier succeeds
/// - Thread-safe via `Arc<Mutex<>>`
#[derive(Clone)]
pub struct ChainCapturingVerifier {
    /// Verified chain, leaf first
    captured: Arc<Mutex<Option<CapturedChain>>>,
    /// The real verifier that performs actual TLS validation
    inner_verifier: Arc<WebPkiServerVerifier>,
    /// Root certificates loaded from a CA file, appended to the recorded chain
    roots: Arc<Vec<CertificateDer<'static>>>,
}

impl fmt::Debug for ChainCapturingVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainCapturingVerifier")
            .field("captured", &self.captured)
            .field("inner_verifier", &"WebPkiServerVerifier")
            .field("roots", &self.roots.len())
            .finish()
    }
}

impl ChainCapturingVerifier {
    /// Create a verifier trusting the Mozilla root set
    ///
    /// Trust anchors come from `webpki-roots`, the full root certificates
    /// from `webpki-root-certs` so recorded chains end at the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the `WebPKI` verifier cannot be built
    pub fn new() -> Result<Self> {
        let root_store: RootCertStore = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
        Self::build(root_store, default_root_certificates())
    }

    /// Create a verifier trusting only the given root certificates
    ///
    /// # Errors
    ///
    /// Returns an error if a certificate cannot be used as a trust anchor or
    /// the `WebPKI` verifier cannot be built
    pub fn with_root_certificates(roots: Vec<CertificateDer<'static>>) -> Result<Self> {
        let mut root_store = RootCertStore::empty();
        for root in &roots {
            root_store
                .add(root.clone())
                .map_err(|e| anyhow!("invalid root certificate: {e}"))?;
        }
        Self::build(root_store, roots)
    }

    fn build(root_store: RootCertStore, roots: Vec<CertificateDer<'static>>) -> Result<Self> {
        let inner_verifier = WebPkiServerVerifier::builder(Arc::new(root_store))
            .build()
            .map_err(|e| anyhow!("failed to build WebPKI verifier: {e}"))?;

        Ok(Self {
            captured: Arc::new(Mutex::new(None)),
            inner_verifier,
            roots: Arc::new(roots),
        })
    }

    /// Retrieve the verified chain
    ///
    /// Returns `None` until a handshake has been verified successfully
    #[must_use]
    pub fn get_captured(&self) -> Option<CapturedChain> {
        self.captured.lock().ok()?.clone()
    }
}

impl ServerCertVerifier for ChainCapturingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let verified = self.inner_verifier.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        )?;

        if let Ok(mut captured) = self.captured.lock() {
            *captured = Some(build_path(end_entity, intermediates, &self.roots));
        }

        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner_verifier
            .verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner_verifier
            .verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner_verifier.supported_verify_schemes()
    }
}

/// Mozilla root certificates in DER
#[must_use]
pub fn default_root_certificates() -> Vec<CertificateDer<'static>> {
    webpki_root_certs::TLS_SERVER_ROOT_CERTS.to_vec()
}

/// Raw DER of (subject, issuer)
fn raw_names(der: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    Some((
        cert.subject().as_raw().to_vec(),
        cert.issuer().as_raw().to_vec(),
    ))
}

/// Walk from the leaf through the presented intermediates by issuer name and
/// finish with the matching root, when that root is available as a certificate.
fn build_path(
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
    roots: &[CertificateDer<'static>],
) -> CapturedChain {
    let mut path = vec![end_entity.clone().into_owned()];
    let mut remaining: Vec<&CertificateDer<'_>> = intermediates.iter().collect();
    let mut current = raw_names(end_entity);

    while let Some((subject, issuer)) = current.take() {
        if subject == issuer {
            break;
        }

        let next = remaining
            .iter()
            .position(|cert| raw_names(cert).is_some_and(|(s, _)| s == issuer));
        if let Some(position) = next {
            let cert = remaining.remove(position);
            current = raw_names(cert);
            path.push(cert.clone().into_owned());
            continue;
        }

        if let Some(root) = roots
            .iter()
            .find(|root| raw_names(root).is_some_and(|(s, _)| s == issuer))
            && !path.contains(root)
        {
            path.push(root.clone());
        }
    }

    path
}

/// Verifier that accepts any certificate, used for `insecure_skip_verify`
#[derive(Debug)]
pub struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
