use crate::{cli::actions::Action, config::Config};
use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use std::net::IpAddr;
use tracing::info;

/// A route path must be absolute and must not shadow the landing page
fn validate_path(name: &str, path: &str) -> Result<()> {
    if !path.starts_with('/') {
        bail!("{name} must start with '/': {path}");
    }
    if path == "/" {
        bail!("{name} cannot be '/'");
    }
    Ok(())
}

/// Convert `ArgMatches` into typed Action enum with validation
///
/// # Errors
///
/// Returns an error if an argument is invalid or the configuration file
/// cannot be loaded
pub fn dispatch(matches: &ArgMatches) -> Result<Action> {
    // Extract and validate listen address
    let listen = matches
        .get_one::<String>("listen")
        .map(|addr| {
            addr.parse::<IpAddr>()
                .with_context(|| format!("Invalid IP address: {addr}"))
        })
        .transpose()?;

    let port = matches.get_one::<u16>("port").copied().unwrap_or(9219);

    let metrics_path = matches
        .get_one::<String>("metrics-path")
        .cloned()
        .unwrap_or_else(|| "/metrics".to_string());
    let probe_path = matches
        .get_one::<String>("probe-path")
        .cloned()
        .unwrap_or_else(|| "/probe".to_string());
    validate_path("metrics path", &metrics_path)?;
    validate_path("probe path", &probe_path)?;
    if metrics_path == probe_path {
        bail!("metrics path and probe path must differ: {metrics_path}");
    }

    let config = match matches.get_one::<String>("config") {
        Some(path) => {
            let config = Config::from_file(path)?;
            info!(path = %path, modules = config.modules.len(), "configuration loaded");
            config
        }
        None => Config::default(),
    };

    Ok(Action::Serve {
        config,
        listen,
        port,
        metrics_path,
        probe_path,
    })
}
