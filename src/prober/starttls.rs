use crate::config::StartTls;
use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tracing::trace;

// PostgreSQL SSL handshake constants
const POSTGRES_SSL_REQUEST_CODE: i32 = 80_877_103;
const POSTGRES_SSL_REQUEST_LEN: i32 = 8;

// MySQL capability flags
const MYSQL_CLIENT_SSL: u32 = 0x0000_0800;
const MYSQL_CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
const MYSQL_CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
const MYSQL_CLIENT_LONG_FLAG: u32 = 0x0000_0004;
const MYSQL_CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;

const MAX_LINE_LEN: usize = 4096;
const IMAP_TAG: &str = "a1";

/// Run the plain-text part of a STARTTLS upgrade; on success the stream is
/// ready for the TLS handshake.
///
/// # Errors
///
/// Returns an error if the server rejects the upgrade or answers with
/// something unexpected
pub async fn negotiate(stream: &mut TcpStream, protocol: StartTls) -> Result<()> {
    match protocol {
        StartTls::Smtp => smtp(stream).await,
        StartTls::Ftp => ftp(stream).await,
        StartTls::Imap => imap(stream).await,
        StartTls::Pop3 => pop3(stream).await,
        StartTls::Postgres => send_postgres_ssl_request(stream).await,
        StartTls::Mysql => perform_mysql_starttls(stream).await,
    }
    .with_context(|| format!("STARTTLS negotiation failed ({protocol})"))
}

/// Read one CRLF (or LF) terminated line byte by byte, so nothing after the
/// line is consumed from the stream
async fn read_line<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let byte = stream
            .read_u8()
            .await
            .context("connection closed while reading response")?;
        if byte == b'\n' {
            break;
        }
        if line.len() >= MAX_LINE_LEN {
            bail!("response line longer than {MAX_LINE_LEN} bytes");
        }
        line.push(byte);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }

    let line = String::from_utf8_lossy(&line).into_owned();
    trace!(line = %line, "<-");
    Ok(line)
}

async fn send_line<S>(stream: &mut S, line: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    trace!(line = %line, "->");
    stream
        .write_all(format!("{line}\r\n").as_bytes())
        .await
        .with_context(|| format!("failed to send {line:?}"))
}

/// Read a possibly multi-line (`250-...`, `250 ...`) reply and check its code
async fn expect_reply<S>(stream: &mut S, code: &str) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    loop {
        let line = read_line(stream).await?;
        if !line.starts_with(code) {
            bail!("expected {code}, got {line:?}");
        }
        // "250-" continues, "250 " or a bare "250" ends the reply
        if line.as_bytes().get(code.len()) != Some(&b'-') {
            return Ok(());
        }
    }
}

async fn expect_prefix<S>(stream: &mut S, prefix: &str) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let line = read_line(stream).await?;
    if !line.starts_with(prefix) {
        bail!("expected {prefix:?}, got {line:?}");
    }
    Ok(())
}

async fn smtp<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    expect_reply(stream, "220").await?;
    send_line(stream, concat!("EHLO ", env!("CARGO_PKG_NAME"))).await?;
    expect_reply(stream, "250").await?;
    send_line(stream, "STARTTLS").await?;
    expect_reply(stream, "220").await
}

async fn ftp<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    expect_reply(stream, "220").await?;
    send_line(stream, "AUTH TLS").await?;
    expect_reply(stream, "234").await
}

async fn imap<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    expect_prefix(stream, "* OK").await?;
    send_line(stream, &format!("{IMAP_TAG} STARTTLS")).await?;
    // untagged responses may precede the tagged completion
    loop {
        let line = read_line(stream).await?;
        if line.starts_with("* ") {
            continue;
        }
        if line.starts_with(&format!("{IMAP_TAG} OK")) {
            return Ok(());
        }
        bail!("expected \"{IMAP_TAG} OK\", got {line:?}");
    }
}

async fn pop3<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    expect_prefix(stream, "+OK").await?;
    send_line(stream, "STLS").await?;
    expect_prefix(stream, "+OK").await
}

async fn send_postgres_ssl_request<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut packet = Vec::with_capacity(8);
    packet.extend_from_slice(&POSTGRES_SSL_REQUEST_LEN.to_be_bytes());
    packet.extend_from_slice(&POSTGRES_SSL_REQUEST_CODE.to_be_bytes());

    stream
        .write_all(&packet)
        .await
        .context("failed to send PostgreSQL SSLRequest packet")?;

    let response = stream
        .read_u8()
        .await
        .context("failed to read PostgreSQL SSLRequest response")?;

    if response != b'S' {
        bail!("PostgreSQL server does not accept TLS connections");
    }

    Ok(())
}

async fn perform_mysql_starttls<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .context("failed to read MySQL handshake header")?;
    let [len0, len1, len2, _sequence] = header;
    let payload_len = u32::from_le_bytes([len0, len1, len2, 0]);
    let mut payload = vec![0u8; payload_len as usize];
    stream
        .read_exact(&mut payload)
        .await
        .context("failed to read MySQL handshake payload")?;

    let (capabilities, charset) = parse_mysql_handshake(&payload)?;
    if capabilities & MYSQL_CLIENT_SSL == 0 {
        bail!("MySQL server does not support TLS connections");
    }

    let mut client_flags = MYSQL_CLIENT_PROTOCOL_41
        | MYSQL_CLIENT_SSL
        | MYSQL_CLIENT_SECURE_CONNECTION
        | MYSQL_CLIENT_LONG_FLAG
        | MYSQL_CLIENT_PLUGIN_AUTH;
    client_flags &= capabilities | MYSQL_CLIENT_SSL;

    let max_packet = 16_777_216_u32;
    let collation = if charset == 0 { 0x21 } else { charset };

    let payload_len: u32 = 4 + 4 + 1 + 23;
    let mut packet = Vec::with_capacity(payload_len as usize + 4);
    packet.extend_from_slice(payload_len.to_le_bytes().get(..3).unwrap_or_default());
    packet.push(1);
    packet.extend_from_slice(&client_flags.to_le_bytes());
    packet.extend_from_slice(&max_packet.to_le_bytes());
    packet.push(collation);
    packet.extend_from_slice(&[0u8; 23]);

    stream
        .write_all(&packet)
        .await
        .context("failed to send MySQL SSLRequest")?;

    Ok(())
}

fn parse_mysql_handshake(payload: &[u8]) -> Result<(u32, u8)> {
    if payload.is_empty() {
        bail!("empty MySQL handshake payload");
    }

    let mut cursor = 0;
    cursor += 1; // protocol version

    let rest = payload
        .get(cursor..)
        .context("invalid MySQL handshake: missing protocol version")?;
    let version_end = rest
        .iter()
        .position(|&b| b == 0)
        .context("invalid MySQL handshake: missing version terminator")?;
    cursor += version_end + 1; // server version string + null

    if payload.len() < cursor + 4 + 8 + 1 + 2 {
        bail!("unexpectedly short MySQL handshake");
    }
    cursor += 4; // connection id
    cursor += 8; // auth plugin data part 1
    cursor += 1; // filler

    let lower_capabilities = payload
        .get(cursor..cursor + 2)
        .context("invalid MySQL handshake: missing lower capabilities")?;
    let mut capabilities = u32::from(u16::from_le_bytes(
        lower_capabilities
            .try_into()
            .context("invalid MySQL handshake capability encoding")?,
    ));
    cursor += 2;

    let mut charset = 0u8;
    if let Some(&value) = payload.get(cursor) {
        charset = value;
        cursor += 1;
    }

    if payload.len() >= cursor + 2 {
        cursor += 2; // status flags
    }
    if payload.len() >= cursor + 2 {
        let upper_capabilities = payload
            .get(cursor..cursor + 2)
            .context("invalid MySQL handshake: missing upper capabilities")?;
        let upper = u32::from(u16::from_le_bytes(
            upper_capabilities
                .try_into()
                .context("invalid MySQL handshake upper capability encoding")?,
        ));
        capabilities |= upper << 16;
    }

    Ok((capabilities, charset))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader, duplex};

    /// Play the server side of a dialog: for every (expected client line,
    /// server reply) pair, read the line and write the reply.
    async fn serve(
        server: tokio::io::DuplexStream,
        greeting: &'static str,
        dialog: Vec<(&'static str, &'static str)>,
    ) -> Vec<String> {
        let (read, mut write) = tokio::io::split(server);
        let mut reader = BufReader::new(read);
        write.write_all(greeting.as_bytes()).await.unwrap();

        let mut received = Vec::new();
        for (_, reply) in dialog {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            received.push(line.trim_end().to_string());
            write.write_all(reply.as_bytes()).await.unwrap();
        }
        received
    }

    #[tokio::test]
    async fn test_smtp_multiline_ehlo() {
        let (mut client, server) = duplex(1024);
        let server = tokio::spawn(serve(
            server,
            "220-mail.example.com ESMTP\r\n220 ready\r\n",
            vec![
                (
                    "EHLO",
                    "250-mail.example.com\r\n250-PIPELINING\r\n250 STARTTLS\r\n",
                ),
                ("STARTTLS", "220 2.0.0 Ready to start TLS\r\n"),
            ],
        ));

        smtp(&mut client).await.unwrap();
        let received = server.await.unwrap();
        assert_eq!(received, vec!["EHLO certpulse", "STARTTLS"]);
    }

    #[tokio::test]
    async fn test_smtp_starttls_refused() {
        let (mut client, server) = duplex(1024);
        tokio::spawn(serve(
            server,
            "220 ready\r\n",
            vec![
                ("EHLO", "250 mail.example.com\r\n"),
                ("STARTTLS", "454 TLS not available\r\n"),
            ],
        ));

        let err = smtp(&mut client).await.unwrap_err();
        assert!(err.to_string().contains("expected 220"));
    }

    #[tokio::test]
    async fn test_ftp_auth_tls() {
        let (mut client, server) = duplex(1024);
        let server = tokio::spawn(serve(
            server,
            "220 FTP server ready\r\n",
            vec![("AUTH TLS", "234 AUTH TLS successful\r\n")],
        ));

        ftp(&mut client).await.unwrap();
        assert_eq!(server.await.unwrap(), vec!["AUTH TLS"]);
    }

    #[tokio::test]
    async fn test_imap_starttls_with_untagged() {
        let (mut client, server) = duplex(1024);
        let server = tokio::spawn(serve(
            server,
            "* OK IMAP4rev1 ready\r\n",
            vec![(
                "a1 STARTTLS",
                "* CAPABILITY IMAP4rev1\r\na1 OK Begin TLS negotiation now\r\n",
            )],
        ));

        imap(&mut client).await.unwrap();
        assert_eq!(server.await.unwrap(), vec!["a1 STARTTLS"]);
    }

    #[tokio::test]
    async fn test_imap_starttls_rejected() {
        let (mut client, server) = duplex(1024);
        tokio::spawn(serve(
            server,
            "* OK ready\r\n",
            vec![("a1 STARTTLS", "a1 BAD unsupported\r\n")],
        ));

        assert!(imap(&mut client).await.is_err());
    }

    #[tokio::test]
    async fn test_pop3_stls() {
        let (mut client, server) = duplex(1024);
        let server = tokio::spawn(serve(
            server,
            "+OK POP3 ready\r\n",
            vec![("STLS", "+OK Begin TLS\r\n")],
        ));

        pop3(&mut client).await.unwrap();
        assert_eq!(server.await.unwrap(), vec!["STLS"]);
    }

    #[tokio::test]
    async fn test_pop3_bad_greeting() {
        let (mut client, server) = duplex(1024);
        tokio::spawn(serve(server, "-ERR go away\r\n", Vec::new()));

        let err = pop3(&mut client).await.unwrap_err();
        assert!(err.to_string().contains("+OK"));
    }

    #[tokio::test]
    async fn test_read_line_closed_connection() {
        let (mut client, server) = duplex(64);
        drop(server);
        assert!(read_line(&mut client).await.is_err());
    }

    #[tokio::test]
    async fn test_read_line_too_long() {
        let (mut client, mut server) = duplex(MAX_LINE_LEN * 2);
        server
            .write_all(&vec![b'a'; MAX_LINE_LEN + 1])
            .await
            .unwrap();

        let err = read_line(&mut client).await.unwrap_err();
        assert!(err.to_string().contains("longer than"));
    }

    #[tokio::test]
    async fn test_postgres_ssl_request() {
        let (mut client, mut server) = duplex(64);
        let server = tokio::spawn(async move {
            let mut packet = [0u8; 8];
            server.read_exact(&mut packet).await.unwrap();
            server.write_all(b"S").await.unwrap();
            packet
        });

        send_postgres_ssl_request(&mut client).await.unwrap();
        let packet = server.await.unwrap();
        assert_eq!(&packet[..4], &8i32.to_be_bytes());
        assert_eq!(&packet[4..], &80_877_103i32.to_be_bytes());
    }

    #[tokio::test]
    async fn test_postgres_ssl_refused() {
        let (mut client, mut server) = duplex(64);
        tokio::spawn(async move {
            let mut packet = [0u8; 8];
            server.read_exact(&mut packet).await.unwrap();
            server.write_all(b"N").await.unwrap();
        });

        let err = send_postgres_ssl_request(&mut client).await.unwrap_err();
        assert!(err.to_string().contains("does not accept TLS"));
    }

    #[test]
    fn test_parse_mysql_handshake_empty() {
        let result = parse_mysql_handshake(&[]);
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_parse_mysql_handshake_too_short() {
        assert!(parse_mysql_handshake(&[10u8]).is_err());
    }

    #[test]
    fn test_parse_mysql_handshake_valid() {
        let mut payload = vec![10u8]; // protocol version
        payload.extend_from_slice(b"8.0.36\0");
        payload.extend_from_slice(&[0u8; 4]); // connection id
        payload.extend_from_slice(&[0u8; 8]); // auth plugin data part 1
        payload.push(0); // filler
        payload.extend_from_slice(&0x0800u16.to_le_bytes()); // CLIENT_SSL
        payload.push(0x2d); // charset
        payload.extend_from_slice(&[0u8; 2]); // status flags
        payload.extend_from_slice(&0x0008u16.to_le_bytes()); // upper: PLUGIN_AUTH

        let (capabilities, charset) = parse_mysql_handshake(&payload).unwrap();
        assert!(capabilities & MYSQL_CLIENT_SSL != 0);
        assert!(capabilities & MYSQL_CLIENT_PLUGIN_AUTH != 0);
        assert_eq!(charset, 0x2d);
    }
}
