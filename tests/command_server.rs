//! Command channel integration: plaintext loopback sessions and the
//! TLS + encrypted-payload round trip.

mod common;

use common::{addr, context_in};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use vigild::commands::CommandRegistry;
use vigild::context::FirewallContext;
use vigild::server::{tls, CommandServer};

async fn spawn_server(
    ctx: &Arc<FirewallContext>,
    allow_plaintext: bool,
) -> (std::net::SocketAddr, CancellationToken) {
    let acceptor = tls::load_or_generate_acceptor(
        &ctx.config.certificate_path(),
        &ctx.config.certificate_key_path(),
    )
    .unwrap();

    let registry = Arc::new(CommandRegistry::with_defaults());
    let command_ctx = ctx.command_context();
    command_ctx.attach_registry(&registry);

    let token = ctx.root.clone();
    let server = CommandServer::bind(
        0,
        registry,
        command_ctx,
        Some(acceptor),
        allow_plaintext,
        token.clone(),
    )
    .await
    .unwrap();
    let bound = server.local_addr().unwrap();

    tokio::spawn(server.run());
    (bound, token)
}

async fn send_plaintext(peer: std::net::SocketAddr, line: &str) -> String {
    let mut stream = TcpStream::connect(peer).await.unwrap();
    stream.write_all(line.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();

    let (read_half, _write_half) = stream.split();
    let mut lines = BufReader::new(read_half).lines();
    lines.next_line().await.unwrap().unwrap_or_default()
}

#[tokio::test]
async fn plaintext_loopback_session_dispatches_commands() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context_in(dir.path()).await;
    let (peer, _token) = spawn_server(&ctx, false).await;

    let response = send_plaintext(peer, "block 203.0.113.9 90").await;
    assert_eq!(response, "Blocked 203.0.113.9 for 90s.");
    assert!(ctx.lists.is_blocked(addr("203.0.113.9")));

    let response = send_plaintext(peer, "bogus").await;
    assert!(response.contains("Unknown command 'bogus'"));
}

#[tokio::test]
async fn exit_command_stops_the_server() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context_in(dir.path()).await;
    let (peer, token) = spawn_server(&ctx, false).await;

    let response = send_plaintext(peer, "exit").await;
    assert_eq!(response, "Shutting down.");
    assert!(token.is_cancelled());
}

/// Certificate verification is the client's concern; these tests pin
/// nothing and accept the server's self-signed certificate.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// A local non-loopback address, when the host has one. Connecting to it
/// makes the server see a non-loopback peer, which selects the TLS path.
fn non_loopback_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("192.0.2.1:9").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_loopback() {
        None
    } else {
        Some(ip)
    }
}

#[tokio::test]
async fn tls_session_round_trips_encrypted_payloads() {
    let Some(ip) = non_loopback_ip() else {
        eprintln!("no non-loopback interface; skipping TLS round trip");
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let ctx = context_in(dir.path()).await;
    ctx.blocker
        .block(addr("203.0.113.7"), None, "manual block")
        .await;

    let (bound, _token) = spawn_server(&ctx, false).await;
    let peer = std::net::SocketAddr::new(ip, bound.port());

    let client_config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));

    let tcp = TcpStream::connect(peer).await.unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut stream = connector.connect(server_name, tcp).await.unwrap();

    // One base64(AES(…)) payload per line, both directions.
    let payload = ctx.cipher.encrypt_line("list");
    stream.write_all(payload.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();

    let (read_half, _write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();
    let encrypted = lines.next_line().await.unwrap().unwrap();

    let response = ctx.cipher.decrypt_line(&encrypted).unwrap();
    assert!(response.contains("203.0.113.7"));
}
