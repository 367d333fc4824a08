//! Turns the result of one probe into metric samples
//!
//! `derive` is synchronous and request-local: it reads the connection state,
//! deduplicates certificates, ranks the verified chains and returns the
//! samples in emission order. Nothing is kept between calls.

use crate::{
    metrics::{
        CERT_NOT_AFTER, CERT_NOT_BEFORE, MetricDesc, PROBER, TLS_CONNECT_SUCCESS,
        TLS_VERSION_INFO, VERIFIED_CERT_NOT_AFTER, VERIFIED_CERT_NOT_BEFORE,
    },
    tls::{CertLabels, Certificate, ConnectionState, deduplicate, rank_chains},
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;

/// One value of a metric, with label values in the order of `desc.labels`
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub desc: &'static MetricDesc,
    pub labels: Vec<String>,
    pub value: f64,
}

impl Sample {
    fn new(desc: &'static MetricDesc, labels: Vec<String>, value: f64) -> Self {
        Self {
            desc,
            labels,
            value,
        }
    }
}

/// Derive the samples for a probe of `module` run with `prober`
#[must_use]
pub fn derive(module: &str, prober: &str, result: &Result<ConnectionState>) -> Vec<Sample> {
    let mut samples = vec![Sample::new(&PROBER, vec![prober.to_string()], 1.0)];

    let state = match result {
        Ok(state) => state,
        Err(err) => {
            warn!(module, prober, "probe failed: {err:#}");
            samples.push(Sample::new(&TLS_CONNECT_SUCCESS, Vec::new(), 0.0));
            return samples;
        }
    };

    samples.push(Sample::new(
        &TLS_VERSION_INFO,
        vec![state.version.to_string()],
        1.0,
    ));

    if state.peer_certificates.is_empty() {
        warn!(module, prober, "no certificates returned by the server");
        samples.push(Sample::new(&TLS_CONNECT_SUCCESS, Vec::new(), 0.0));
        return samples;
    }
    samples.push(Sample::new(&TLS_CONNECT_SUCCESS, Vec::new(), 1.0));

    for cert in deduplicate(&state.peer_certificates) {
        push_cert_samples(&mut samples, cert, None);
    }

    for (chain_no, chain) in rank_chains(&state.verified_chains).into_iter().enumerate() {
        let chain_no = chain_no.to_string();
        for cert in deduplicate(chain) {
            push_cert_samples(&mut samples, cert, Some(&chain_no));
        }
    }

    samples
}

fn push_cert_samples(samples: &mut Vec<Sample>, cert: &Certificate, chain_no: Option<&str>) {
    let (not_after, not_before) = if chain_no.is_some() {
        (&VERIFIED_CERT_NOT_AFTER, &VERIFIED_CERT_NOT_BEFORE)
    } else {
        (&CERT_NOT_AFTER, &CERT_NOT_BEFORE)
    };

    let mut labels = Vec::with_capacity(not_after.labels.len());
    labels.extend(chain_no.map(ToString::to_string));
    labels.extend(CertLabels::from(cert).into_values());

    if let Some(time) = cert.not_after {
        samples.push(Sample::new(not_after, labels.clone(), epoch_seconds(time)));
    }
    if let Some(time) = cert.not_before {
        samples.push(Sample::new(not_before, labels, epoch_seconds(time)));
    }
}

/// Whole seconds since the Unix epoch
#[allow(clippy::cast_precision_loss)]
fn epoch_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp() as f64
}
