use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

/// Pure clap command definitions with zero business logic
#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new(env!("CARGO_PKG_NAME"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("listen")
                .env("CERTPULSE_LISTEN")
                .help("IP address to bind to (default: [::]:port, accepts both IPv6 and IPv4)")
                .long("listen")
                .long_help(
                    "IP address to bind to:\n\
                    Not specified (default) binds to [::]:port which accepts both IPv6 and IPv4 connections.\n\
                    Falls back to 0.0.0.0:port if IPv6 is unavailable.\n\n\
                    Specific IPv4 examples: '0.0.0.0', '127.0.0.1'\n\
                    Specific IPv6: '::', '::1'"
                )
                .short('l')
                .value_name("IP"),
        )
        .arg(
            Arg::new("port")
                .default_value("9219")
                .env("CERTPULSE_PORT")
                .help("listening port")
                .long("port")
                .short('p')
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("metrics-path")
                .default_value("/metrics")
                .env("CERTPULSE_METRICS_PATH")
                .help("Path under which to expose the exporter's own metrics")
                .long("metrics-path")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("probe-path")
                .default_value("/probe")
                .env("CERTPULSE_PROBE_PATH")
                .help("Path under which to expose the probe endpoint")
                .long("probe-path")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("config")
                .env("CERTPULSE_CONFIG")
                .help("Path to the YAML configuration file defining the modules")
                .long("config")
                .long_help(
                    "Path to the YAML configuration file defining the modules.\n\
                    Without a file the modules tcp, http and https are available.\n\n\
                    Example: /etc/certpulse/certpulse.yml"
                )
                .short('c')
                .value_name("PATH"),
        )
        .arg(
            Arg::new("verbosity")
                .help("Increase verbosity, -vv for debug, -vvv for trace")
                .long("verbose")
                .short('v')
                .action(ArgAction::Count),
        )
}
