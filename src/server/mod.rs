//! Command server: TCP listener, per-connection tasks, security modes.
//!
//! Loopback peers (or everyone, when `allow_plaintext_commands` is set)
//! speak the plaintext line protocol. Every other peer gets a TLS 1.3
//! handshake and then exchanges AES-CBC/base64 payloads, one per line.
//! The accept loop and every session honor the root cancellation token;
//! a handshake that cannot be cancelled is aborted by dropping the stream.

pub mod crypto;
pub mod tls;

use crate::commands::{CommandContext, CommandRegistry};
use crypto::PayloadCipher;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The command channel listener.
pub struct CommandServer {
    listener: tokio::net::TcpListener,
    registry: Arc<CommandRegistry>,
    ctx: Arc<CommandContext>,
    acceptor: Option<TlsAcceptor>,
    allow_plaintext: bool,
    token: CancellationToken,
}

impl CommandServer {
    /// Bind with address reuse on the configured port.
    pub async fn bind(
        port: u16,
        registry: Arc<CommandRegistry>,
        ctx: Arc<CommandContext>,
        acceptor: Option<TlsAcceptor>,
        allow_plaintext: bool,
        token: CancellationToken,
    ) -> std::io::Result<Self> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(128)?;

        info!(addr = %listener.local_addr()?, "command server listening");

        Ok(Self {
            listener,
            registry,
            ctx,
            acceptor,
            allow_plaintext,
            token,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until cancelled. One task per connection.
    pub async fn run(self) {
        loop {
            let accepted = tokio::select! {
                _ = self.token.cancelled() => {
                    info!("command server stopped");
                    return;
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "command connection accepted");
                    let registry = Arc::clone(&self.registry);
                    let ctx = Arc::clone(&self.ctx);
                    let acceptor = self.acceptor.clone();
                    let allow_plaintext = self.allow_plaintext;
                    let conn_token = self.token.child_token();

                    tokio::spawn(async move {
                        handle_connection(
                            stream,
                            peer,
                            registry,
                            ctx,
                            acceptor,
                            allow_plaintext,
                            conn_token,
                        )
                        .await;
                        debug!(%peer, "command connection closed");
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<CommandRegistry>,
    ctx: Arc<CommandContext>,
    acceptor: Option<TlsAcceptor>,
    allow_plaintext: bool,
    token: CancellationToken,
) {
    let plaintext = allow_plaintext || peer.ip().is_loopback();

    if plaintext {
        run_session(stream, peer, registry, ctx, None, token).await;
        return;
    }

    let acceptor = match acceptor {
        Some(acceptor) => acceptor,
        None => {
            warn!(%peer, "no TLS acceptor configured; refusing non-loopback peer");
            return;
        }
    };

    // Dropping the stream is the only way to abort a stuck handshake.
    let tls_stream = tokio::select! {
        _ = token.cancelled() => return,
        accepted = acceptor.accept(stream) => match accepted {
            Ok(tls_stream) => tls_stream,
            Err(e) => {
                warn!(%peer, error = %e, "TLS handshake failed");
                return;
            }
        },
    };

    let cipher = ctx.cipher.clone();
    run_session(tls_stream, peer, registry, ctx, Some(cipher), token).await;
}

/// Line loop shared by both security modes. With a cipher, inbound lines
/// are base64 ciphertext and responses are encrypted before writing; the
/// whole (possibly multi-line) response travels as one payload line.
async fn run_session<S>(
    stream: S,
    peer: SocketAddr,
    registry: Arc<CommandRegistry>,
    ctx: Arc<CommandContext>,
    cipher: Option<PayloadCipher>,
    token: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => return,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                debug!(%peer, error = %e, "read failed");
                return;
            }
        };

        let command_line = match &cipher {
            Some(cipher) => match cipher.decrypt_line(&line) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    warn!(%peer, error = %e, "undecryptable payload");
                    let notice = cipher.encrypt_line("Could not decrypt payload.");
                    if write_line(&mut write_half, &notice).await.is_err() {
                        return;
                    }
                    continue;
                }
            },
            None => line,
        };

        let response = registry.dispatch(command_line.trim(), &ctx).await;
        if response.is_empty() {
            continue;
        }

        let payload = match &cipher {
            Some(cipher) => cipher.encrypt_line(&response),
            None => response,
        };
        if write_line(&mut write_half, &payload).await.is_err() {
            return;
        }
    }
}

async fn write_line<W>(write_half: &mut W, payload: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_half.write_all(payload.as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    write_half.flush().await
}
