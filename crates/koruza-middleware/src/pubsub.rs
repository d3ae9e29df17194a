//! WebSocket publish endpoint.
//!
//! [`PubSocket`] serves one [`Lane`] of the [`MessageBus`]: every connected
//! client receives every message published on that lane as a text frame
//! `"<topic>@<json-payload>"`.  Incoming frames other than close are
//! ignored; this is a publish-only endpoint.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use koruza_types::KoruzaError;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info};

use crate::bus::{Lane, MessageBus};

/// Publish endpoint for one lane of the bus.
#[derive(Clone)]
pub struct PubSocket {
    bus: MessageBus,
    lane: Lane,
}

impl PubSocket {
    pub fn new(bus: MessageBus, lane: Lane) -> Self {
        Self { bus, lane }
    }

    /// Bind `addr` and serve until the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`KoruzaError::Transport`] if the listener cannot be bound.
    pub async fn run(self, addr: SocketAddr) -> Result<(), KoruzaError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| KoruzaError::Transport(format!("publish bind error on {addr}: {e}")))?;
        self.serve(listener).await;
        Ok(())
    }

    /// Accept clients on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(lane = ?self.lane, %addr, "publish socket listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let socket = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = socket.handle_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "publish client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "publish accept error");
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), KoruzaError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| KoruzaError::Transport(format!("ws handshake from {peer}: {e}")))?;
        debug!(peer = %peer, lane = ?self.lane, "publish client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut rx = self.bus.subscribe(self.lane);

        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    if ws_tx.send(WsMessage::Text(message.to_frame().into())).await.is_err() {
                        break;
                    }
                }
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                        _ => {}
                    }
                }
            }
        }

        debug!(peer = %peer, "publish client disconnected");
        Ok(())
    }
}
