//! Console tunnel listener
//!
//! Each connection opens with one `Hello` frame carrying a console token.
//! The token is consumed before the node is dialled, so two connections
//! racing with the same token can never both get through. After `Accepted`
//! the socket is a plain byte relay to the node's console port.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{copy_bidirectional, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use vg_core::VgError;
use vg_protocol::{RejectReason, TunnelCodec, TunnelMessage};

use super::ConsoleBroker;

/// Accepts tunnel connections and relays them to node consoles
pub struct TunnelServer {
    broker: Arc<ConsoleBroker>,
    /// Deadline for the handshake and for dialling the node
    handshake_timeout: Duration,
    cancel: CancellationToken,
}

fn reject_reason(err: &VgError) -> RejectReason {
    match err {
        VgError::TokenExpired { .. } => RejectReason::Expired,
        VgError::TokenConsumed { .. } => RejectReason::Consumed,
        _ => RejectReason::Unknown,
    }
}

impl TunnelServer {
    /// Create a tunnel server
    pub fn new(broker: Arc<ConsoleBroker>, handshake_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            broker,
            handshake_timeout,
            cancel,
        }
    }

    /// Bind and serve until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind tunnel listener to {}", bind_addr))?;
        self.serve(listener).await
    }

    /// Serve an already bound listener until cancelled
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Console tunnel listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Console tunnel shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => tracing::error!("Failed to accept tunnel connection: {}", e),
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::debug!("Tunnel connection from {}", peer_addr);

        let broker = Arc::clone(&self.broker);
        let handshake_timeout = self.handshake_timeout;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Tunnel from {} cancelled", peer_addr);
                    return;
                }
                result = relay(broker, socket, handshake_timeout) => result
            };

            match result {
                Ok(Some(session_id)) => {
                    tracing::info!(session_id = %session_id, "Tunnel from {} closed", peer_addr);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Tunnel from {} closed with error: {}", peer_addr, e);
                }
            }
        });
    }
}

async fn reject(framed: &mut Framed<TcpStream, TunnelCodec>, reason: RejectReason) -> Result<()> {
    framed.send(TunnelMessage::Rejected { reason }).await?;
    framed.flush().await?;
    Ok(())
}

/// Run one handshake and, if accepted, the relay
///
/// Returns the session id of an accepted tunnel, `None` when rejected.
async fn relay(
    broker: Arc<ConsoleBroker>,
    socket: TcpStream,
    handshake_timeout: Duration,
) -> Result<Option<String>> {
    let mut framed = Framed::new(socket, TunnelCodec::new());

    let token = match tokio::time::timeout(handshake_timeout, framed.next()).await {
        Ok(Some(Ok(TunnelMessage::Hello { token }))) => token,
        Ok(None) => return Ok(None),
        _ => {
            reject(&mut framed, RejectReason::Malformed).await?;
            return Ok(None);
        }
    };

    let session = match broker.consume(&token) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "Tunnel token refused");
            reject(&mut framed, reject_reason(&e)).await?;
            return Ok(None);
        }
    };

    // The token stays spent even if the node cannot be reached
    let upstream_addr = (session.upstream.host.as_str(), session.upstream.port);
    let mut upstream = match tokio::time::timeout(handshake_timeout, TcpStream::connect(upstream_addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::error!(session_id = %session.id, error = %e, "Console upstream unreachable");
            reject(&mut framed, RejectReason::UpstreamUnavailable).await?;
            return Ok(None);
        }
        Err(_) => {
            tracing::error!(session_id = %session.id, "Console upstream connect timed out");
            reject(&mut framed, RejectReason::UpstreamUnavailable).await?;
            return Ok(None);
        }
    };

    framed
        .send(TunnelMessage::Accepted {
            session_id: session.id.clone(),
        })
        .await?;

    let parts = framed.into_parts();
    let mut client = parts.io;
    if !parts.read_buf.is_empty() {
        upstream.write_all(&parts.read_buf).await?;
    }

    let (up, down) = copy_bidirectional(&mut client, &mut upstream).await?;
    tracing::debug!(session_id = %session.id, bytes_up = up, bytes_down = down, "Relay finished");
    Ok(Some(session.id.clone()))
}
