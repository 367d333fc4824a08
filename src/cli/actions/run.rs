use super::Action;

/// Execute the action's business logic by delegating to the appropriate module
pub async fn execute(action: Action) -> anyhow::Result<()> {
    match action {
        Action::Serve {
            config,
            listen,
            port,
            metrics_path,
            probe_path,
        } => crate::server::start(config, listen, port, metrics_path, probe_path).await,
    }
}
