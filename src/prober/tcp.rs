use super::{Prober, split_host_port, starttls};
use crate::{config::Module, tls};
use anyhow::{Context, Result};
use futures::{FutureExt, future::BoxFuture};
use tokio::net::TcpStream;
use tracing::debug;

/// Connects to `host:port` and performs the TLS handshake, running the
/// module's STARTTLS negotiation first when one is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl Prober for TcpProber {
    fn probe<'a>(
        &'a self,
        target: &'a str,
        module: &'a Module,
    ) -> BoxFuture<'a, Result<tls::ConnectionState>> {
        async move {
            let (host, port) = split_host_port(target)?;

            let mut stream = TcpStream::connect((host.as_str(), port))
                .await
                .with_context(|| format!("failed to connect to {target}"))?;
            debug!(address = target, "TCP connection established");

            if let Some(protocol) = module.tcp.starttls {
                starttls::negotiate(&mut stream, protocol).await?;
                debug!(address = target, %protocol, "STARTTLS negotiated");
            }

            let (_, state) = tls::handshake(stream, &host, &module.tls_config, &[]).await?;
            Ok::<_, anyhow::Error>(state)
        }
        .boxed()
    }
}
