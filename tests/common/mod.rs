#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use axum::body::{Body, to_bytes};
use certpulse::{
    config::{Module, StartTls},
    tls::{TlsConfig, ensure_crypto_provider},
};
use hyper::{Request, StatusCode, client::conn::http1, header::HOST};
use hyper_util::rt::TokioIo;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, SanType,
};
use rustls::{
    ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
};
use std::{
    io::Write,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tempfile::NamedTempFile;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_rustls::TlsAcceptor;

pub const CA_CN: &str = "certpulse test CA";
pub const LEAF_CN: &str = "localhost";

/// A CA and a server certificate for `localhost` / `127.0.0.1` signed by it
pub struct TestPki {
    pub ca_pem: String,
    pub ca_der: CertificateDer<'static>,
    pub leaf_der: CertificateDer<'static>,
    leaf_key: Vec<u8>,
}

impl TestPki {
    pub fn new() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, CA_CN);
        ca_params.distinguished_name = dn;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::new(vec![LEAF_CN.to_string()]).unwrap();
        leaf_params
            .subject_alt_names
            .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, LEAF_CN);
        leaf_params.distinguished_name = dn;
        leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key).unwrap();

        Self {
            ca_pem: ca.pem(),
            ca_der: ca.der().clone(),
            leaf_der: leaf.der().clone(),
            leaf_key: leaf_key.serialize_der(),
        }
    }

    pub fn server_config(&self) -> Arc<ServerConfig> {
        ensure_crypto_provider();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.leaf_key.clone()));
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![self.leaf_der.clone()], key)
            .unwrap();
        Arc::new(config)
    }

    /// PEM file holding the CA, to be used as `ca_file`
    pub fn ca_file(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(self.ca_pem.as_bytes()).unwrap();
        file
    }
}

pub fn module(prober: &str, tls_config: TlsConfig) -> Module {
    Module {
        prober: prober.to_string(),
        tls_config,
        ..Default::default()
    }
}

pub fn starttls_module(protocol: StartTls, tls_config: TlsConfig) -> Module {
    let mut module = module("tcp", tls_config);
    module.tcp.starttls = Some(protocol);
    module
}

pub fn verified_with(ca_file: &NamedTempFile) -> TlsConfig {
    TlsConfig {
        ca_file: Some(ca_file.path().to_path_buf()),
        ..Default::default()
    }
}

pub fn insecure() -> TlsConfig {
    TlsConfig {
        insecure_skip_verify: true,
        ..Default::default()
    }
}

/// Complete the TLS handshake, then answer a request (if any) with a 200
async fn serve_tls(acceptor: TlsAcceptor, socket: TcpStream) {
    let Ok(mut stream) = acceptor.accept(socket).await else {
        return;
    };

    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let _ = stream
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await;
    let _ = stream.shutdown().await;
}

/// TLS server on an ephemeral local port
pub async fn spawn_tls_server(pki: &TestPki) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = TlsAcceptor::from(pki.server_config());

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_tls(acceptor.clone(), socket));
        }
    });

    addr
}

async fn read_line(socket: &mut TcpStream) -> String {
    let mut line = Vec::new();
    loop {
        let byte = socket.read_u8().await.unwrap();
        if byte == b'\n' {
            break;
        }
        line.push(byte);
    }
    String::from_utf8(line).unwrap().trim_end().to_string()
}

/// SMTP server that upgrades to TLS after `STARTTLS`
pub async fn spawn_smtp_server(pki: &TestPki) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = TlsAcceptor::from(pki.server_config());

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                socket
                    .write_all(b"220-localhost ESMTP\r\n220 ready\r\n")
                    .await
                    .unwrap();
                assert!(read_line(&mut socket).await.starts_with("EHLO "));
                socket
                    .write_all(b"250-localhost\r\n250-SIZE 10240000\r\n250 STARTTLS\r\n")
                    .await
                    .unwrap();
                assert_eq!(read_line(&mut socket).await, "STARTTLS");
                socket
                    .write_all(b"220 2.0.0 Ready to start TLS\r\n")
                    .await
                    .unwrap();
                serve_tls(acceptor, socket).await;
            });
        }
    });

    addr
}

/// Send a GET to a local HTTP server and return (status, body)
pub async fn http_get(addr: SocketAddr, path_and_query: &str) -> (StatusCode, String) {
    http_get_with_headers(addr, path_and_query, &[]).await
}

pub async fn http_get_with_headers(
    addr: SocketAddr,
    path_and_query: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, String) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, connection) = http1::handshake::<_, Body>(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(connection);

    let mut request = Request::get(path_and_query).header(HOST, addr.to_string());
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = sender
        .send_request(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = to_bytes(Body::new(response.into_body()), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}
