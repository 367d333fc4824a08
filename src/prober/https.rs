use super::Prober;
use crate::{config::Module, tls};
use anyhow::{Context, Result, anyhow, bail};
use axum::body::Body;
use futures::{
    FutureExt,
    future::{self, BoxFuture, Either},
};
use hyper::{
    Request, StatusCode, Uri,
    client::conn::http1,
    header::{HOST, USER_AGENT},
};
use hyper_util::rt::TokioIo;
use std::pin::pin;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tracing::debug;

const DEFAULT_HTTPS_PORT: u16 = 443;
const ALPN_HTTP_1_1: &[u8] = b"http/1.1";
const USER_AGENT_VALUE: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Performs the TLS handshake with an HTTPS endpoint and issues a request,
/// so the exporter sees the same server the HTTP clients do
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpsProber;

/// Host and port to dial, plus the value of the `Host` header
#[derive(Debug, PartialEq, Eq)]
struct HttpsTarget {
    host: String,
    port: u16,
    authority: String,
}

impl Prober for HttpsProber {
    fn probe<'a>(
        &'a self,
        target: &'a str,
        module: &'a Module,
    ) -> BoxFuture<'a, Result<tls::ConnectionState>> {
        async move {
            let HttpsTarget {
                host,
                port,
                authority,
            } = parse_target(target)?;

            let stream = TcpStream::connect((host.as_str(), port))
                .await
                .with_context(|| format!("failed to connect to {host}:{port}"))?;

            let (tls_stream, state) =
                tls::handshake(stream, &host, &module.tls_config, &[ALPN_HTTP_1_1]).await?;

            let status = request_status(tls_stream, &module.https.path, &authority).await?;
            debug!(address = target, %status, "HTTPS request completed");

            Ok::<_, anyhow::Error>(state)
        }
        .boxed()
    }
}

/// Send a GET for `path` over an established connection and return the
/// status of the response. Any status counts, the body is not read.
async fn request_status<S>(io: S, path: &str, authority: &str) -> Result<StatusCode>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = Request::get(path)
        .header(HOST, authority)
        .header(USER_AGENT, USER_AGENT_VALUE)
        .body(Body::empty())
        .with_context(|| format!("invalid request path {path}"))?;

    let (mut sender, connection) = http1::handshake::<_, Body>(TokioIo::new(io))
        .await
        .context("failed to start HTTP/1.1 session")?;

    let response = sender.send_request(request);
    let response = match future::select(pin!(response), pin!(connection)).await {
        Either::Left((response, _)) => response,
        Either::Right((closed, response)) => {
            closed.context("HTTP connection failed")?;
            response.await
        }
    };

    Ok(response.context("failed to read HTTP response")?.status())
}

/// Accept `host`, `host:port` or an `https://` URL
fn parse_target(target: &str) -> Result<HttpsTarget> {
    let url = if target.contains("://") {
        target.to_string()
    } else {
        format!("https://{target}")
    };

    let uri = url
        .parse::<Uri>()
        .with_context(|| format!("invalid target URL {target}"))?;

    match uri.scheme_str() {
        Some("https") => {}
        Some(scheme) => bail!("unsupported scheme {scheme:?} in target {target}, expected https"),
        None => bail!("missing scheme in target {target}"),
    }

    let authority = uri
        .authority()
        .ok_or_else(|| anyhow!("missing host in target {target}"))?;

    let host = authority.host();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        bail!("missing host in target {target}");
    }

    Ok(HttpsTarget {
        host: host.to_string(),
        port: authority.port_u16().unwrap_or(DEFAULT_HTTPS_PORT),
        authority: authority.as_str().to_string(),
    })
}
