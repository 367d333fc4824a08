//! TLS handshake state and certificate handling
//!
//! # Module Organization
//!
//! - `certificate` - Certificate model parsed from DER
//! - `state` - Negotiated version and connection state snapshot
//! - `normalize` - Certificate deduplication and label strings
//! - `rank` - Ordering of verified chains by effective expiry
//! - `config` - Per-module TLS client settings
//! - `client` - Handshake and connection state extraction
//! - `verifier` - Certificate verifiers
//!
//! # Example
//!
//! ```rust,ignore
//! use certpulse::tls::{TlsConfig, handshake};
//!
//! let stream = tokio::net::TcpStream::connect("example.com:443").await?;
//! let (_, state) = handshake(stream, "example.com", &TlsConfig::default(), &[]).await?;
//! println!("{} with {} certificates", state.version, state.peer_certificates.len());
//! ```

pub mod certificate;
pub mod client;
pub mod config;
pub mod normalize;
pub mod rank;
pub mod state;
pub mod verifier;

// Re-export commonly used types
pub use certificate::Certificate;
pub use client::{ensure_crypto_provider, handshake};
pub use config::TlsConfig;
pub use normalize::{CertLabels, IdentityKey, deduplicate};
pub use rank::{effective_expiry, rank_chains};
pub use state::{ConnectionState, TlsVersion};
pub use verifier::{ChainCapturingVerifier, NoVerifier};
