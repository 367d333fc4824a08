//! Probers establish a TLS connection to a target and return the handshake state
//!
//! # Module Organization
//!
//! - `tcp` - Bare TLS over TCP, optionally upgraded with STARTTLS
//! - `https` - TLS followed by an HTTP request
//! - `starttls` - In-band upgrade negotiations (smtp, ftp, imap, pop3, postgres, mysql)

pub mod https;
pub mod starttls;
pub mod tcp;

use crate::{config::Module, tls::ConnectionState};
use anyhow::{Context, Result, anyhow, bail};
use futures::future::BoxFuture;
use std::{collections::HashMap, sync::LazyLock, time::Duration};

pub use https::HttpsProber;
pub use tcp::TcpProber;

/// A strategy that performs a protocol specific TLS handshake
pub trait Prober: Send + Sync {
    /// Connect to `target` using the module's options and return the
    /// connection state once the handshake completes
    fn probe<'a>(
        &'a self,
        target: &'a str,
        module: &'a Module,
    ) -> BoxFuture<'a, Result<ConnectionState>>;
}

static TCP: TcpProber = TcpProber;
static HTTPS: HttpsProber = HttpsProber;

/// Prober registry, keyed by the `prober` field of a module
pub static PROBERS: LazyLock<HashMap<&'static str, &'static dyn Prober>> = LazyLock::new(|| {
    let mut probers: HashMap<&'static str, &'static dyn Prober> = HashMap::new();
    probers.insert("tcp", &TCP);
    probers.insert("https", &HTTPS);
    probers.insert("http", &HTTPS);
    probers
});

/// Find the prober registered under `name`
#[must_use]
pub fn lookup(name: &str) -> Option<&'static dyn Prober> {
    PROBERS.get(name).copied()
}

/// Run a prober, giving up once `timeout` elapses
///
/// # Errors
///
/// Returns the prober's error, or a timeout error when the probe did not
/// finish in time
pub async fn probe_with_timeout(
    prober: &dyn Prober,
    target: &str,
    module: &Module,
    timeout: Duration,
) -> Result<ConnectionState> {
    tokio::time::timeout(timeout, prober.probe(target, module))
        .await
        .map_err(|_| anyhow!("probe timed out after {timeout:?}"))?
}

/// Split `host:port`, accepting `[v6]:port`
///
/// # Errors
///
/// Returns an error if the port is missing or invalid
pub fn split_host_port(target: &str) -> Result<(String, u16)> {
    let (host, port) = if let Some(rest) = target.strip_prefix('[') {
        let (host, port) = rest
            .split_once("]:")
            .with_context(|| format!("missing port in address {target}"))?;
        (host, port)
    } else {
        let (host, port) = target
            .rsplit_once(':')
            .with_context(|| format!("missing port in address {target}"))?;
        if host.contains(':') {
            bail!("too many colons in address {target}");
        }
        (host, port)
    };

    if host.is_empty() {
        bail!("missing host in address {target}");
    }
    let port = port
        .parse::<u16>()
        .with_context(|| format!("invalid port in address {target}"))?;

    Ok((host.to_string(), port))
}
