//! The seam between the control connection and domain components.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use tether_api::Teamserver;
use tether_protocol::Envelope;

use crate::registry::CallbackRegistry;

/// Identity and collaborator handles injected into a component after a
/// successful authentication.
#[derive(Clone)]
pub struct Binding {
    /// Numeric id assigned by the teamserver.
    pub id: i64,
    /// Session uuid for this run.
    pub session: String,
    /// REST collaborator, already carrying the bearer token.
    pub api: Arc<dyn Teamserver>,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// A domain component the control connection can drive.
///
/// Implemented by handlers and listeners. The connection authenticates
/// with the component's endpoint name and descriptor, then feeds every
/// inbound envelope through the component's registry.
pub trait ChannelComponent: Send + Sync + 'static {
    /// Logical channel name this component authenticates as
    /// (`handler`, `listener`).
    fn endpoint(&self) -> &str;

    /// Registration descriptor presented during authentication.
    fn descriptor(&self) -> serde_json::Value;

    /// Receives identity and the API handle after authentication.
    fn bind(&self, binding: Binding);

    /// Receives the live channel sender once the channel opens
    /// (and again after every reconnect).
    fn attach_channel(&self, channel: ChannelSender);

    /// The component's dispatch registry.
    fn registry(&self) -> &CallbackRegistry;
}

/// Errors from sending on the live channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelSendError {
    #[error("channel closed")]
    Closed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Envelope-serialising handle to the channel's write pump.
///
/// Cheap to clone; sending is fire-and-forget from the component's point
/// of view — delivery fails only when the connection is gone.
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<tungstenite::Message>,
}

impl ChannelSender {
    pub fn new(tx: mpsc::Sender<tungstenite::Message>) -> Self {
        Self { tx }
    }

    /// Serialises and queues an envelope for the write pump.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ChannelSendError> {
        let json = envelope.to_json()?;
        self.tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| ChannelSendError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn send_serialises_envelope_as_text_frame() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = ChannelSender::new(tx);

        let envelope = Envelope::new("listener", "response", json!({"magick": "bTE="}));
        sender.send(&envelope).await.unwrap();

        match rx.recv().await.unwrap() {
            tungstenite::Message::Text(text) => {
                let parsed = Envelope::parse(text.as_str()).unwrap();
                assert_eq!(parsed.channel, "listener");
                assert_eq!(parsed.data["magick"], "bTE=");
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let sender = ChannelSender::new(tx);

        let envelope = Envelope::new("agent", "response", json!(""));
        assert!(matches!(
            sender.send(&envelope).await,
            Err(ChannelSendError::Closed)
        ));
    }
}
