use super::{
    Certificate, ConnectionState, TlsConfig, TlsVersion,
    verifier::{ChainCapturingVerifier, NoVerifier},
};
use anyhow::{Context, Result, anyhow};
use rustls::{
    ClientConfig,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
};
use rustls_pemfile::{certs, private_key};
use std::{
    io::Cursor,
    net::IpAddr,
    path::Path,
    sync::{Arc, OnceLock},
};
use tokio::{fs, net::TcpStream};
use tokio_rustls::{TlsConnector, client::TlsStream};
use tracing::{debug, error};

static CRYPTO_PROVIDER_INIT: OnceLock<()> = OnceLock::new();

/// Ensure the rustls crypto provider is initialized
///
/// This should be called before any TLS operations. It's safe to call
/// multiple times as initialization only happens once.
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.get_or_init(|| {
        if let Err(err) = rustls::crypto::ring::default_provider().install_default()
            && rustls::crypto::CryptoProvider::get_default().is_none()
        {
            error!("failed to install ring crypto provider: {err:?}");
            std::process::exit(1);
        }
    });
}

/// Perform the TLS handshake over an established (and, if needed, upgraded)
/// TCP stream and snapshot the resulting connection state.
///
/// # Errors
///
/// Returns an error if the TLS configuration cannot be loaded, the handshake
/// or certificate verification fails, or a peer certificate cannot be parsed.
pub async fn handshake(
    stream: TcpStream,
    host: &str,
    tls: &TlsConfig,
    alpn: &[&[u8]],
) -> Result<(TlsStream<TcpStream>, ConnectionState)> {
    let (connector, verifier) = build_tls_connector(tls, alpn).await?;

    let name = tls.server_name_for(host);
    let server_name = server_name_from_host(name)
        .with_context(|| format!("invalid server name for TLS probe: {name}"))?;

    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .with_context(|| format!("failed to complete TLS handshake with {name}"))?;

    let verified = verifier
        .as_ref()
        .and_then(ChainCapturingVerifier::get_captured);
    let state = connection_state(&tls_stream, verified)?;
    debug!(
        version = %state.version,
        peer_certificates = state.peer_certificates.len(),
        verified_chains = state.verified_chains.len(),
        "TLS handshake completed"
    );

    Ok((tls_stream, state))
}

fn connection_state(
    stream: &TlsStream<TcpStream>,
    verified: Option<Vec<CertificateDer<'static>>>,
) -> Result<ConnectionState> {
    let (_, connection) = stream.get_ref();

    let peer_certificates = connection
        .peer_certificates()
        .unwrap_or_default()
        .iter()
        .map(|der| Certificate::from_der(der.as_ref()))
        .collect::<Result<Vec<_>>>()
        .context("invalid peer certificate")?;

    let verified_chains = verified
        .map(|chain| {
            chain
                .iter()
                .map(|der| Certificate::from_der(der.as_ref()))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()
        .context("invalid certificate in verified chain")?
        .into_iter()
        .collect();

    Ok(ConnectionState {
        version: connection
            .protocol_version()
            .map(TlsVersion::from)
            .unwrap_or_default(),
        peer_certificates,
        verified_chains,
    })
}

async fn build_tls_connector(
    tls: &TlsConfig,
    alpn: &[&[u8]],
) -> Result<(TlsConnector, Option<ChainCapturingVerifier>)> {
    ensure_crypto_provider();
    tls.validate()?;

    let (builder, verifier) = if tls.insecure_skip_verify {
        let builder = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier));
        (builder, None)
    } else {
        let verifier = match &tls.ca_file {
            Some(ca_file) => {
                let roots = load_cert_chain(ca_file.as_path()).await?;
                ChainCapturingVerifier::with_root_certificates(roots)?
            }
            None => ChainCapturingVerifier::new()?,
        };
        let builder = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier.clone()));
        (builder, Some(verifier))
    };

    let mut config = if let (Some(cert_path), Some(key_path)) = (&tls.cert_file, &tls.key_file) {
        let certs = load_cert_chain(cert_path.as_path()).await?;
        let key = load_private_key(key_path.as_path()).await?;
        builder.with_client_auth_cert(certs, key)?
    } else {
        builder.with_no_client_auth()
    };
    config.alpn_protocols = alpn.iter().map(|proto| proto.to_vec()).collect();

    Ok((TlsConnector::from(Arc::new(config)), verifier))
}

async fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let data = fs::read(path)
        .await
        .with_context(|| format!("failed to read certificate {}", path.display()))?;
    let mut reader = Cursor::new(data);
    let parsed = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("invalid certificate PEM: {e}"))?;

    if parsed.is_empty() {
        anyhow::bail!("no certificates found in {}", path.display());
    }

    Ok(parsed)
}

async fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let data = fs::read(path)
        .await
        .with_context(|| format!("failed to read private key {}", path.display()))?;

    let mut reader = Cursor::new(data);
    private_key(&mut reader)
        .map_err(|e| anyhow!("invalid private key PEM: {e}"))?
        .ok_or_else(|| anyhow!("no private key found in {}", path.display()))
}

pub(crate) fn server_name_from_host(host: &str) -> Result<ServerName<'static>> {
    host.parse::<IpAddr>().map_or_else(
        |_| {
            ServerName::try_from(host.to_string())
                .map_err(|_| anyhow!("invalid server name: {host}"))
        },
        |ip| Ok(ServerName::from(ip).to_owned()),
    )
}
