use crate::{
    config::{Config, DEFAULT_MODULE},
    exporter,
    metrics::{encode_metrics, encode_samples},
    prober::{self, probe_with_timeout},
};
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use std::{net::IpAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{Instrument, error, info, info_span};

/// Header Prometheus uses to announce the scrape timeout
pub const TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";
const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub metrics_path: String,
    pub probe_path: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProbeParams {
    pub target: Option<String>,
    pub module: Option<String>,
}

impl ProbeParams {
    /// The first occurrence of a parameter wins, repeats are ignored
    #[must_use]
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "target" => &mut params.target,
                "module" => &mut params.module,
                _ => continue,
            };
            slot.get_or_insert(value);
        }
        params
    }
}

/// Start the exporter
///
/// # Errors
///
/// Returns an error if the service fails to bind to the port
pub async fn start(
    config: Config,
    listen: Option<IpAddr>,
    port: u16,
    metrics_path: String,
    probe_path: String,
) -> Result<()> {
    let modules = config.modules.len();
    let state = AppState {
        config: Arc::new(config),
        metrics_path,
        probe_path,
    };
    let app = router(state.clone());

    // Bind to socket with smart fallback
    let (listener, bind_addr) = match listen {
        Some(addr) => {
            let socket_addr = std::net::SocketAddr::new(addr, port);
            let listener = TcpListener::bind(socket_addr)
                .await
                .with_context(|| format!("failed to bind {socket_addr}"))?;
            (listener, socket_addr.to_string())
        }
        None => {
            // try IPv6 first, fallback to IPv4
            if let Ok(l) = TcpListener::bind(format!("[::]:{port}")).await {
                (l, format!("[::]:{port}"))
            } else {
                let socket_addr = format!("0.0.0.0:{port}");
                let listener = TcpListener::bind(&socket_addr)
                    .await
                    .with_context(|| format!("failed to bind {socket_addr}"))?;
                (listener, socket_addr)
            }
        }
    };

    info!(
        address = %bind_addr,
        metrics_path = %state.metrics_path,
        probe_path = %state.probe_path,
        modules,
        "listening"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

/// Build the HTTP routes
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route(&state.metrics_path, get(metrics_handler))
        .route(&state.probe_path, get(probe_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        r#"<html>
<head><title>certpulse</title></head>
<body>
<h1>certpulse</h1>
<p><a href="{probe}?target=example.com:443">Probe example.com:443 for TLS certificate metrics</a></p>
<p><a href="{metrics}">Metrics</a></p>
</body>
</html>
"#,
        probe = state.probe_path,
        metrics = state.metrics_path,
    ))
}

async fn metrics_handler() -> Response {
    match encode_metrics() {
        Ok(buffer) => ([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], buffer).into_response(),
        Err(err) => {
            error!("{err:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new()).into_response()
        }
    }
}

async fn probe_handler(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    let params = ProbeParams::from_pairs(pairs);
    let module_name = params
        .module
        .as_deref()
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_MODULE);
    let Some(module) = state.config.module(module_name) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("Unknown module {module_name:?}"),
        )
            .into_response();
    };

    let scrape_timeout = match scrape_timeout(&headers) {
        Ok(timeout) => timeout,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to parse timeout from Prometheus header: {err:#}"),
            )
                .into_response();
        }
    };

    let Some(target) = params.target.as_deref().filter(|t| !t.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Target parameter is missing").into_response();
    };

    let Some(prober) = prober::lookup(&module.prober) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("Unknown prober {:?}", module.prober),
        )
            .into_response();
    };

    let timeout = module.effective_timeout(scrape_timeout);
    let span = info_span!(
        "probe",
        address = target,
        module = module_name,
        prober = %module.prober,
        ?timeout
    );

    let result = probe_with_timeout(prober, target, module, timeout)
        .instrument(span.clone())
        .await;
    let samples = span.in_scope(|| exporter::derive(module_name, &module.prober, &result));

    match encode_samples(&samples) {
        Ok(body) => ([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(err) => {
            error!("{err:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")).into_response()
        }
    }
}

/// Scrape timeout announced by Prometheus, 10s when absent or zero
fn scrape_timeout(headers: &HeaderMap) -> Result<Duration> {
    let Some(value) = headers.get(TIMEOUT_HEADER) else {
        return Ok(DEFAULT_SCRAPE_TIMEOUT);
    };

    let seconds = value
        .to_str()
        .context("header is not valid text")?
        .trim()
        .parse::<f64>()
        .with_context(|| format!("invalid number {value:?}"))?;
    let timeout = Duration::try_from_secs_f64(seconds).context("out of range")?;

    if timeout.is_zero() {
        Ok(DEFAULT_SCRAPE_TIMEOUT)
    } else {
        Ok(timeout)
    }
}
