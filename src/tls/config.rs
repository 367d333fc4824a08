use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-module TLS client settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    /// PEM bundle of trusted roots, webpki roots when unset
    pub ca_file: Option<PathBuf>,
    /// Client certificate for mutual TLS, requires `key_file`
    pub cert_file: Option<PathBuf>,
    /// Client private key for mutual TLS, requires `cert_file`
    pub key_file: Option<PathBuf>,
    /// SNI and verification name, defaults to the target host
    pub server_name: Option<String>,
    /// Accept any certificate; no verified chains are reported
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    /// Check that the settings can be combined
    ///
    /// # Errors
    ///
    /// Returns an error if only one of `cert_file` / `key_file` is set
    pub fn validate(&self) -> Result<()> {
        match (&self.cert_file, &self.key_file) {
            (Some(_), None) => bail!("cert_file requires key_file"),
            (None, Some(_)) => bail!("key_file requires cert_file"),
            _ => Ok(()),
        }
    }

    /// Name used for SNI and hostname verification
    #[must_use]
    pub fn server_name_for<'a>(&'a self, host: &'a str) -> &'a str {
        self.server_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(host)
    }
}
