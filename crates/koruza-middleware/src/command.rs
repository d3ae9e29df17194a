//! Request/reply command channel.
//!
//! Network tasks never execute commands themselves.  [`CommandSocket`]
//! accepts WebSocket clients and turns every text frame into a
//! [`PendingCommand`] that is forwarded to the single context holding the
//! [`CommandChannel`] (the fast loop).  That context answers through
//! [`PendingCommand::respond`]; the socket task writes the reply back on the
//! same connection.
//!
//! Exactly one reply is produced per frame: a `PendingCommand` dropped
//! without an answer replies `500` on its own.

use std::net::SocketAddr;
use std::sync::mpsc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use koruza_types::KoruzaError;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::protocol::{CommandError, error_reply};

/// Upper bound of a single [`CommandChannel::poll`] wait.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// One received request frame awaiting its reply.
pub struct PendingCommand {
    frame: String,
    reply: Option<oneshot::Sender<Value>>,
}

impl PendingCommand {
    pub fn frame(&self) -> &str {
        &self.frame
    }

    /// Send the reply.  The requester may already be gone, in which case
    /// the reply is discarded.
    pub fn respond(mut self, reply: Value) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(reply);
        }
    }
}

impl Drop for PendingCommand {
    fn drop(&mut self) {
        if let Some(tx) = self.reply.take() {
            warn!("command dropped without a reply");
            let error = CommandError::Internal("command was not answered".into());
            let _ = tx.send(error_reply(&error));
        }
    }
}

/// Submitting half of the channel, cloned into every socket task.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<PendingCommand>,
}

impl CommandSender {
    /// Queue `frame` for dispatch and return the future reply.
    ///
    /// # Errors
    ///
    /// [`KoruzaError::Transport`] when the receiving side is gone.
    pub fn submit(&self, frame: impl Into<String>) -> Result<oneshot::Receiver<Value>, KoruzaError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let pending = PendingCommand {
            frame: frame.into(),
            reply: Some(reply_tx),
        };
        self.tx.send(pending).map_err(|mpsc::SendError(mut pending)| {
            // Disarm so the dead request does not answer itself.
            pending.reply = None;
            KoruzaError::Transport("command channel closed".into())
        })?;
        Ok(reply_rx)
    }
}

/// Receiving half, owned by the dispatching context.
pub struct CommandChannel {
    rx: mpsc::Receiver<PendingCommand>,
}

impl CommandChannel {
    /// Wait at most [`POLL_TIMEOUT`] for the next request.
    pub fn poll(&self) -> Option<PendingCommand> {
        self.rx.recv_timeout(POLL_TIMEOUT).ok()
    }
}

/// Create a connected sender/channel pair.
pub fn command_channel() -> (CommandSender, CommandChannel) {
    let (tx, rx) = mpsc::channel();
    (CommandSender { tx }, CommandChannel { rx })
}

// ────────────────────────────────────────────────────────────────────────────
// WebSocket endpoint
// ────────────────────────────────────────────────────────────────────────────

/// WebSocket endpoint of the command channel.
#[derive(Clone)]
pub struct CommandSocket {
    sender: CommandSender,
}

impl CommandSocket {
    pub fn new(sender: CommandSender) -> Self {
        Self { sender }
    }

    /// Bind `addr` and serve until the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`KoruzaError::Transport`] if the listener cannot be bound.
    pub async fn run(self, addr: SocketAddr) -> Result<(), KoruzaError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| KoruzaError::Transport(format!("command bind error on {addr}: {e}")))?;
        self.serve(listener).await;
        Ok(())
    }

    /// Accept clients on an already-bound listener.
    pub async fn serve(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "command socket listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let socket = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = socket.handle_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "command client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "command accept error");
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), KoruzaError> {
        let mut ws = accept_async(stream)
            .await
            .map_err(|e| KoruzaError::Transport(format!("ws handshake from {peer}: {e}")))?;
        debug!(peer = %peer, "command client connected");

        while let Some(incoming) = ws.next().await {
            let frame = match incoming {
                Ok(WsMessage::Text(text)) => text.to_string(),
                Ok(WsMessage::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            let reply = self
                .sender
                .submit(frame)?
                .await
                .map_err(|_| KoruzaError::Transport("reply channel closed".into()))?;
            ws.send(WsMessage::Text(reply.to_string().into()))
                .await
                .map_err(|e| KoruzaError::Transport(format!("reply to {peer}: {e}")))?;
        }

        debug!(peer = %peer, "command client disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::protocol::{CommandRequest, reply};
    use serde_json::json;
    use tokio_tungstenite::connect_async;

    #[tokio::test]
    async fn poll_hands_out_frame_and_routes_reply() -> Result<(), Box<dyn std::error::Error>> {
        let (sender, channel) = command_channel();
        let reply_rx = sender.submit(r#"{"type":"command","command":"get_status"}"#)?;

        let pending = channel.poll().ok_or("nothing queued")?;
        assert!(pending.frame().contains("get_status"));
        pending.respond(json!({"type": "cmd_reply"}));

        assert_eq!(reply_rx.await?["type"], "cmd_reply");
        Ok(())
    }

    #[test]
    fn poll_returns_none_when_idle() {
        let (_sender, channel) = command_channel();
        let started = std::time::Instant::now();
        assert!(channel.poll().is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn dropped_command_replies_500() -> Result<(), Box<dyn std::error::Error>> {
        let (sender, channel) = command_channel();
        let reply_rx = sender.submit("{}")?;
        drop(channel.poll());

        let reply = reply_rx.await?;
        assert_eq!(reply["type"], "cmd_error");
        assert_eq!(reply["code"], 500);
        Ok(())
    }

    #[test]
    fn submit_after_channel_drop_fails() {
        let (sender, channel) = command_channel();
        drop(channel);
        assert!(matches!(sender.submit("{}"), Err(KoruzaError::Transport(_))));
    }

    #[tokio::test]
    async fn websocket_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let (sender, channel) = command_channel();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(CommandSocket::new(sender).serve(listener));

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let dispatcher = tokio::task::spawn_blocking(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                if let Some(pending) = channel.poll() {
                    let answer = match CommandRequest::parse(pending.frame()) {
                        Ok(req) => reply(json!({"echo": req.command})),
                        Err(e) => error_reply(&e),
                    };
                    pending.respond(answer);
                }
            }
        });

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await?;

        ws.send(WsMessage::Text(r#"{"type":"command","command":"ping"}"#.to_string().into()))
            .await?;
        let Some(Ok(WsMessage::Text(text))) = ws.next().await else {
            return Err("no reply".into());
        };
        let reply: Value = serde_json::from_str(text.as_str())?;
        assert_eq!(reply["type"], "cmd_reply");
        assert_eq!(reply["echo"], "ping");

        ws.send(WsMessage::Text(r#"{"type":"command"}"#.to_string().into())).await?;
        let Some(Ok(WsMessage::Text(text))) = ws.next().await else {
            return Err("no reply".into());
        };
        let reply: Value = serde_json::from_str(text.as_str())?;
        assert_eq!(reply["code"], 400);

        stop.store(true, Ordering::Relaxed);
        dispatcher.await?;
        Ok(())
    }
}
