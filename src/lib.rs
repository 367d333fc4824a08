pub mod cli;
pub mod config;
pub mod exporter;
pub mod metrics;
pub mod prober;
pub mod server;
pub mod tls;
