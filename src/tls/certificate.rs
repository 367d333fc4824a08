use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use x509_parser::{
    extensions::GeneralName,
    prelude::{FromDer, X509Certificate},
    time::ASN1Time,
    x509::X509Name,
};

/// The certificate fields the exporter turns into labels and samples
///
/// Timestamps are `None` when the certificate carries no usable value,
/// the equivalent of a zero time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Certificate {
    /// Serial number rendered in decimal
    pub serial_number: String,
    pub issuer_common_name: String,
    pub subject_common_name: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub email_addresses: Vec<String>,
    pub organizational_units: Vec<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl Certificate {
    /// Parse a DER-encoded X.509 certificate
    ///
    /// # Errors
    ///
    /// Returns an error if the DER data is not a valid certificate or if its
    /// subject alternative name extension is malformed
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| anyhow!("failed to parse certificate: {e}"))?;

        let mut parsed = Self {
            serial_number: cert.tbs_certificate.serial.to_string(),
            issuer_common_name: last_common_name(cert.issuer()),
            subject_common_name: last_common_name(cert.subject()),
            organizational_units: cert
                .subject()
                .iter_organizational_unit()
                .filter_map(|ou| ou.as_str().ok())
                .map(str::to_string)
                .collect(),
            not_before: to_datetime(&cert.validity().not_before),
            not_after: to_datetime(&cert.validity().not_after),
            ..Default::default()
        };

        let san = cert
            .subject_alternative_name()
            .map_err(|e| anyhow!("invalid subject alternative name extension: {e}"))?;
        if let Some(san) = san {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => parsed.dns_names.push((*dns).to_string()),
                    GeneralName::RFC822Name(email) => {
                        parsed.email_addresses.push((*email).to_string());
                    }
                    GeneralName::IPAddress(raw) => {
                        if let Some(ip) = ip_from_bytes(raw) {
                            parsed.ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(parsed)
    }
}

// When a name carries several CN attributes the last one wins.
fn last_common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .last()
        .unwrap_or_default()
        .to_string()
}

fn to_datetime(time: &ASN1Time) -> Option<DateTime<Utc>> {
    let raw = time.to_datetime();
    DateTime::<Utc>::from_timestamp(raw.unix_timestamp(), raw.nanosecond())
}

fn ip_from_bytes(raw: &[u8]) -> Option<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(raw) {
        return Some(IpAddr::V4(Ipv4Addr::from(octets)));
    }
    <[u8; 16]>::try_from(raw)
        .ok()
        .map(|octets| Ipv6Addr::from(octets).to_canonical())
}
