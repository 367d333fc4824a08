//! Module configuration
//!
//! A module binds a name, used in the `module` query parameter of a probe
//! request, to a prober and its options. Without a configuration file the
//! exporter serves the default modules `tcp`, `http` and `https`.
//!
//! # Example Configuration File
//!
//! ```yaml
//! modules:
//!   tcp:
//!     prober: tcp
//!   smtp_starttls:
//!     prober: tcp
//!     tcp:
//!       starttls: smtp
//!   https_internal:
//!     prober: https
//!     timeout: 5
//!     tls_config:
//!       ca_file: /etc/certpulse/internal-ca.pem
//!     https:
//!       path: /healthz
//! ```
//!
//! A loaded file replaces the defaults entirely.

use crate::tls::TlsConfig;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, path::Path, time::Duration};

/// Module used when a probe request does not name one
pub const DEFAULT_MODULE: &str = "tcp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub modules: BTreeMap<String, Module>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Module {
    /// Key into the prober registry
    pub prober: String,
    /// Upper bound in seconds for a probe with this module
    pub timeout: Option<f64>,
    pub tls_config: TlsConfig,
    pub tcp: TcpProbe,
    pub https: HttpsProbe,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TcpProbe {
    /// Plain-text negotiation to run before the TLS handshake
    pub starttls: Option<StartTls>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpsProbe {
    /// Path requested once the handshake completes
    pub path: String,
}

impl Default for HttpsProbe {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
        }
    }
}

/// Protocols upgraded to TLS in-band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartTls {
    Smtp,
    Ftp,
    Imap,
    Pop3,
    Postgres,
    Mysql,
}

impl fmt::Display for StartTls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Smtp => "smtp",
            Self::Ftp => "ftp",
            Self::Imap => "imap",
            Self::Pop3 => "pop3",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        };
        f.write_str(name)
    }
}

impl Module {
    fn with_prober(prober: &str) -> Self {
        Self {
            prober: prober.to_string(),
            ..Default::default()
        }
    }

    /// Scrape timeout capped by the module's own timeout
    #[must_use]
    pub fn effective_timeout(&self, scrape_timeout: Duration) -> Duration {
        self.timeout
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .map_or(scrape_timeout, |limit| limit.min(scrape_timeout))
    }
}

impl Default for Config {
    fn default() -> Self {
        let modules = [
            ("tcp", Module::with_prober("tcp")),
            ("http", Module::with_prober("https")),
            ("https", Module::with_prober("https")),
        ]
        .into_iter()
        .map(|(name, module)| (name.to_string(), module))
        .collect();

        Self { modules }
    }
}

impl Config {
    /// Load modules from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML, or a
    /// module fails validation
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error naming the first module with an invalid setting
    pub fn validate(&self) -> Result<()> {
        for (name, module) in &self.modules {
            if module.prober.is_empty() {
                bail!("module {name:?}: prober is required");
            }
            if let Some(secs) = module.timeout
                && (!secs.is_finite() || secs < 0.0)
            {
                bail!("module {name:?}: timeout must be a non-negative number of seconds");
            }
            if !module.https.path.starts_with('/') {
                bail!(
                    "module {name:?}: https path must start with '/': {}",
                    module.https.path
                );
            }
            module
                .tls_config
                .validate()
                .with_context(|| format!("module {name:?}: invalid tls_config"))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_modules() {
        let config = Config::default();
        assert_eq!(config.modules.len(), 3);
        assert_eq!(config.module(DEFAULT_MODULE).unwrap().prober, "tcp");
        assert_eq!(config.module("http").unwrap().prober, "https");
        assert_eq!(config.module("https").unwrap().prober, "https");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml() {
        let file = write_config(
            r"
modules:
  smtp:
    prober: tcp
    tcp:
      starttls: smtp
  internal:
    prober: https
    timeout: 2.5
    tls_config:
      ca_file: /etc/certpulse/ca.pem
      server_name: internal.example.com
    https:
      path: /healthz
",
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.modules.len(), 2);
        // the file replaces the defaults
        assert!(config.module("tcp").is_none());

        let smtp = config.module("smtp").unwrap();
        assert_eq!(smtp.prober, "tcp");
        assert_eq!(smtp.tcp.starttls, Some(StartTls::Smtp));
        assert_eq!(smtp.https.path, "/");

        let internal = config.module("internal").unwrap();
        assert_eq!(internal.timeout, Some(2.5));
        assert_eq!(
            internal.tls_config.server_name.as_deref(),
            Some("internal.example.com")
        );
        assert_eq!(internal.https.path, "/healthz");
        assert!(!internal.tls_config.insecure_skip_verify);
    }

    #[test]
    fn test_config_all_starttls_protocols() {
        for (name, expected) in [
            ("smtp", StartTls::Smtp),
            ("ftp", StartTls::Ftp),
            ("imap", StartTls::Imap),
            ("pop3", StartTls::Pop3),
            ("postgres", StartTls::Postgres),
            ("mysql", StartTls::Mysql),
        ] {
            let yaml = format!(
                "modules:\n  m:\n    prober: tcp\n    tcp:\n      starttls: {name}\n"
            );
            let config: Config = serde_yaml::from_str(&yaml).unwrap();
            let starttls = config.module("m").unwrap().tcp.starttls.unwrap();
            assert_eq!(starttls, expected);
            assert_eq!(starttls.to_string(), name);
        }
    }

    #[test]
    fn test_config_unknown_starttls() {
        let file = write_config(
            "modules:\n  m:\n    prober: tcp\n    tcp:\n      starttls: xmpp\n",
        );
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_config_unknown_field() {
        let file = write_config("modules:\n  m:\n    prober: tcp\n    proxy: foo\n");
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));
    }

    #[test]
    fn test_config_missing_prober() {
        let file = write_config("modules:\n  m:\n    timeout: 3\n");
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("prober is required"));
    }

    #[test]
    fn test_config_half_client_auth() {
        let file = write_config(
            "modules:\n  m:\n    prober: tcp\n    tls_config:\n      cert_file: /tmp/client.crt\n",
        );
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("key_file"));
    }

    #[test]
    fn test_config_timeout_bounds() {
        let file = write_config("modules:\n  m:\n    prober: tcp\n    timeout: -1\n");
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("non-negative"));

        // zero disables the cap
        let file = write_config("modules:\n  m:\n    prober: tcp\n    timeout: 0\n");
        assert!(Config::from_file(file.path()).is_ok());
    }

    #[test]
    fn test_config_relative_https_path() {
        let file =
            write_config("modules:\n  m:\n    prober: https\n    https:\n      path: healthz\n");
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("https path must start with '/'"));
    }

    #[test]
    fn test_config_missing_file() {
        let err = Config::from_file("/nonexistent/certpulse.yml").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn test_effective_timeout() {
        let scrape = Duration::from_secs(10);

        let module = Module::with_prober("tcp");
        assert_eq!(module.effective_timeout(scrape), scrape);

        let module = Module {
            timeout: Some(2.5),
            ..Module::with_prober("tcp")
        };
        assert_eq!(
            module.effective_timeout(scrape),
            Duration::from_millis(2500)
        );

        let module = Module {
            timeout: Some(30.0),
            ..Module::with_prober("tcp")
        };
        assert_eq!(module.effective_timeout(scrape), scrape);

        let module = Module {
            timeout: Some(0.0),
            ..Module::with_prober("tcp")
        };
        assert_eq!(module.effective_timeout(scrape), scrape);
    }
}
