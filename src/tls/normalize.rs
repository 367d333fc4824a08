//! Certificate deduplication and label derivation
//!
//! Two certificates are treated as the same certificate when their serial
//! number and issuer common name match. The full DER content is not compared,
//! so two different CAs sharing an issuer CN and reusing a serial collapse
//! into one entry.

use super::Certificate;
use std::{collections::HashSet, fmt::Display};

const LABEL_DELIMITER: char = ',';

/// Dedup key of a certificate: (decimal serial number, issuer CN)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityKey<'a> {
    pub serial_number: &'a str,
    pub issuer_common_name: &'a str,
}

impl Certificate {
    #[must_use]
    pub fn identity_key(&self) -> IdentityKey<'_> {
        IdentityKey {
            serial_number: &self.serial_number,
            issuer_common_name: &self.issuer_common_name,
        }
    }
}

/// Keep the first certificate seen for every identity key, in input order
pub fn deduplicate<'a, I>(certs: I) -> Vec<&'a Certificate>
where
    I: IntoIterator<Item = &'a Certificate>,
{
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for cert in certs {
        if seen.insert(cert.identity_key()) {
            unique.push(cert);
        }
    }
    unique
}

/// Join values as `,a,b,` so a label regex can match `,a,` without hitting substrings
fn join_label<T: Display>(values: &[T]) -> String {
    if values.is_empty() {
        return String::new();
    }

    let mut label = String::from(LABEL_DELIMITER);
    for value in values {
        label.push_str(&value.to_string());
        label.push(LABEL_DELIMITER);
    }
    label
}

#[must_use]
pub fn label_dns_names(cert: &Certificate) -> String {
    join_label(&cert.dns_names)
}

#[must_use]
pub fn label_ip_addresses(cert: &Certificate) -> String {
    join_label(&cert.ip_addresses)
}

#[must_use]
pub fn label_email_addresses(cert: &Certificate) -> String {
    join_label(&cert.email_addresses)
}

#[must_use]
pub fn label_organizational_units(cert: &Certificate) -> String {
    join_label(&cert.organizational_units)
}

/// Label values shared by every per-certificate sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertLabels {
    pub serial_no: String,
    pub issuer_cn: String,
    pub cn: String,
    pub dnsnames: String,
    pub ips: String,
    pub emails: String,
    pub ou: String,
}

impl From<&Certificate> for CertLabels {
    fn from(cert: &Certificate) -> Self {
        Self {
            serial_no: cert.serial_number.clone(),
            issuer_cn: cert.issuer_common_name.clone(),
            cn: cert.subject_common_name.clone(),
            dnsnames: label_dns_names(cert),
            ips: label_ip_addresses(cert),
            emails: label_email_addresses(cert),
            ou: label_organizational_units(cert),
        }
    }
}

impl CertLabels {
    /// Values in `serial_no, issuer_cn, cn, dnsnames, ips, emails, ou` order
    #[must_use]
    pub fn into_values(self) -> Vec<String> {
        vec![
            self.serial_no,
            self.issuer_cn,
            self.cn,
            self.dnsnames,
            self.ips,
            self.emails,
            self.ou,
        ]
    }
}
