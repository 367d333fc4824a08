use crate::exporter::Sample;
use anyhow::{Context, Result};
use prometheus::{
    Encoder, GaugeVec, IntGaugeVec, Opts, Registry, register_int_gauge_vec_with_registry,
};
use std::sync::LazyLock;

/// Name, help text and label schema of a metric derived from a probe
#[derive(Debug, PartialEq, Eq)]
pub struct MetricDesc {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

const CERT_LABELS: &[&str] = &[
    "serial_no",
    "issuer_cn",
    "cn",
    "dnsnames",
    "ips",
    "emails",
    "ou",
];

const VERIFIED_CERT_LABELS: &[&str] = &[
    "chain_no",
    "serial_no",
    "issuer_cn",
    "cn",
    "dnsnames",
    "ips",
    "emails",
    "ou",
];

pub const TLS_CONNECT_SUCCESS: MetricDesc = MetricDesc {
    name: "ssl_tls_connect_success",
    help: "If the TLS connection was a success",
    labels: &[],
};

pub const TLS_VERSION_INFO: MetricDesc = MetricDesc {
    name: "ssl_tls_version_info",
    help: "The TLS version used",
    labels: &["version"],
};

pub const PROBER: MetricDesc = MetricDesc {
    name: "ssl_prober",
    help: "The prober used by the exporter to connect to the target",
    labels: &["prober"],
};

pub const CERT_NOT_BEFORE: MetricDesc = MetricDesc {
    name: "ssl_cert_not_before",
    help: "NotBefore expressed as a Unix Epoch Time",
    labels: CERT_LABELS,
};

pub const CERT_NOT_AFTER: MetricDesc = MetricDesc {
    name: "ssl_cert_not_after",
    help: "NotAfter expressed as a Unix Epoch Time",
    labels: CERT_LABELS,
};

pub const VERIFIED_CERT_NOT_BEFORE: MetricDesc = MetricDesc {
    name: "ssl_verified_cert_not_before",
    help: "NotBefore expressed as a Unix Epoch Time for a certificate in the list of verified chains",
    labels: VERIFIED_CERT_LABELS,
};

pub const VERIFIED_CERT_NOT_AFTER: MetricDesc = MetricDesc {
    name: "ssl_verified_cert_not_after",
    help: "NotAfter expressed as a Unix Epoch Time for a certificate in the list of verified chains",
    labels: VERIFIED_CERT_LABELS,
};

/// Every metric a probe can produce
pub const DESCRIPTORS: [&MetricDesc; 7] = [
    &TLS_CONNECT_SUCCESS,
    &TLS_VERSION_INFO,
    &PROBER,
    &CERT_NOT_BEFORE,
    &CERT_NOT_AFTER,
    &VERIFIED_CERT_NOT_BEFORE,
    &VERIFIED_CERT_NOT_AFTER,
];

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    let registry = Registry::new();

    #[cfg(target_os = "linux")]
    {
        let collector = prometheus::process_collector::ProcessCollector::for_self();
        if let Err(err) = registry.register(Box::new(collector)) {
            tracing::warn!("failed to register process collector: {err}");
        }
    }

    registry
});

trait ResultExt<T> {
    fn or_exit(self, context: &str) -> T;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn or_exit(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                eprintln!("failed to initialize metric ({context}): {err}");
                std::process::exit(1);
            }
        }
    }
}

pub static BUILD_INFO: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec_with_registry!(
        Opts::new(
            "certpulse_build_info",
            "A metric with a constant '1' value labeled by the version of certpulse"
        ),
        &["version"],
        &REGISTRY
    )
    .or_exit("metric can be created")
});

/// Encode the process-wide metrics for HTTP export
///
/// # Errors
///
/// Returns an error if metrics encoding fails
pub fn encode_metrics() -> Result<Vec<u8>> {
    BUILD_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1);

    let mut buffer = Vec::new();
    prometheus::TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .context("could not encode process metrics")?;

    Ok(buffer)
}

/// Encode the samples of one probe through a registry that lives only for
/// this call. Metrics without samples are left out.
///
/// # Errors
///
/// Returns an error if a sample does not match its label schema or the
/// encoding fails
pub fn encode_samples(samples: &[Sample]) -> Result<Vec<u8>> {
    let registry = Registry::new();

    for desc in DESCRIPTORS {
        let mut matching = samples.iter().filter(|s| s.desc == desc).peekable();
        if matching.peek().is_none() {
            continue;
        }

        let gauge = GaugeVec::new(Opts::new(desc.name, desc.help), desc.labels)
            .with_context(|| format!("invalid metric {}", desc.name))?;
        registry
            .register(Box::new(gauge.clone()))
            .with_context(|| format!("could not register {}", desc.name))?;

        for sample in matching {
            let values: Vec<&str> = sample.labels.iter().map(String::as_str).collect();
            gauge
                .get_metric_with_label_values(values.as_slice())
                .with_context(|| format!("invalid labels for {}", desc.name))?
                .set(sample.value);
        }
    }

    let mut buffer = Vec::new();
    prometheus::TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("could not encode probe metrics")?;

    Ok(buffer)
}
