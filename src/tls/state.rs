use super::Certificate;
use rustls::ProtocolVersion;
use std::fmt;

/// Negotiated TLS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
    #[default]
    Unknown,
}

impl TlsVersion {
    /// Label value used by `ssl_tls_version_info`
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tls10 => "TLS 1.0",
            Self::Tls11 => "TLS 1.1",
            Self::Tls12 => "TLS 1.2",
            Self::Tls13 => "TLS 1.3",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ProtocolVersion> for TlsVersion {
    fn from(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::TLSv1_0 => Self::Tls10,
            ProtocolVersion::TLSv1_1 => Self::Tls11,
            ProtocolVersion::TLSv1_2 => Self::Tls12,
            ProtocolVersion::TLSv1_3 => Self::Tls13,
            _ => Self::Unknown,
        }
    }
}

/// Snapshot of a completed handshake, as returned by a prober
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub version: TlsVersion,
    /// Certificates in the order the peer sent them
    pub peer_certificates: Vec<Certificate>,
    /// Paths the verifier accepted, empty when verification was skipped
    pub verified_chains: Vec<Vec<Certificate>>,
}
