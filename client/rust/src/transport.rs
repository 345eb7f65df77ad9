//! Subscriber transport (C7, client side): a persistent WebSocket
//! connection carrying JSON `ClientMessage`/`ServerMessage` frames,
//! reconnecting with backoff and resubmitting pending mutations after a
//! drop (spec §4.7, §8 scenario S6).

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::backoff::RetryConfig;
use crate::error::{ClientError, Result};
use crate::wire::{ClientMessage, ServerMessage};

/// Events the transport surfaces to its owner as the connection's state
/// changes or a server message arrives.
#[derive(Debug)]
pub enum TransportEvent {
    Connected,
    Message(ServerMessage),
    Disconnected,
}

/// Drives one logical subscriber session against a coordinator endpoint,
/// reconnecting transparently on drop.
pub struct Transport {
    url: String,
    retry: RetryConfig,
}

impl Transport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry: RetryConfig::for_reconnect(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run the connect/reconnect loop until `outgoing` closes. Received
    /// server messages and connection-state transitions are pushed onto
    /// `events`; `outgoing` carries client messages to send.
    ///
    /// Exits (does not reconnect) once the configured retry sequence is
    /// exhausted — the caller observes this as `events` closing.
    pub async fn run(mut self, mut outgoing: mpsc::Receiver<ClientMessage>, events: mpsc::Sender<TransportEvent>) {
        let delays = self.retry.delays();
        let mut attempt = 0usize;
        loop {
            match self.connect_and_pump(&mut outgoing, &events).await {
                Ok(()) => {
                    info!(url = %self.url, "subscriber transport closed cleanly");
                    return;
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, attempt, "subscriber transport dropped");
                    let _ = events.send(TransportEvent::Disconnected).await;
                    let Some(delay) = delays.get(attempt).copied() else {
                        warn!(url = %self.url, "giving up reconnecting after {attempt} attempts");
                        return;
                    };
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
            if outgoing.is_closed() {
                return;
            }
        }
    }

    async fn connect_and_pump(
        &mut self,
        outgoing: &mut mpsc::Receiver<ClientMessage>,
        events: &mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws_stream.split();

        let _ = events.send(TransportEvent::Connected).await;

        loop {
            tokio::select! {
                outbound = outgoing.recv() => {
                    let Some(msg) = outbound else {
                        let _ = sink.close().await;
                        return Ok(());
                    };
                    let text = serde_json::to_string(&msg)
                        .map_err(|e| ClientError::Transport(e.to_string()))?;
                    sink.send(WsMessage::Text(text))
                        .await
                        .map_err(|e| ClientError::Transport(e.to_string()))?;
                }
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(WsMessage::Text(text))) => {
                            let parsed: ServerMessage = serde_json::from_str(&text)
                                .map_err(|e| ClientError::Transport(format!("malformed server message: {e}")))?;
                            debug!(?parsed, "received server message");
                            if events.send(TransportEvent::Message(parsed)).await.is_err() {
                                return Ok(());
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            return Err(ClientError::Transport("connection closed by peer".into()));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_carries_configured_retry() {
        let retry = RetryConfig {
            max_retries: 3,
            ..Default::default()
        };
        let transport = Transport::new("ws://localhost:9999/tenant/t1/events").with_retry(retry.clone());
        assert_eq!(transport.retry.max_retries, retry.max_retries);
    }
}
