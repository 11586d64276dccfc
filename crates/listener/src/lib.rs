//! Listener transport adapter.
//!
//! A [`Listener`] relays raw agent traffic to the teamserver. Payloads
//! prefer the live control channel (fire-and-forget) and fall back to the
//! synchronous REST path when the channel is absent or its send fails.

use std::sync::RwLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use tether_api::ApiError;
use tether_connection::{Binding, CallbackRegistry, ChannelComponent, ChannelSender};
use tether_protocol::constants::{ACTION_RESPONSE, CHANNEL_LISTENER};
use tether_protocol::{CodecError, Envelope, codec};

/// Endpoint name listeners authenticate as.
pub const LISTENER_ENDPOINT: &str = "listener";

/// Errors from listener transmission.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Neither a live channel nor an API handle is available.
    #[error("no API handle set")]
    ApiNotSet,

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// One configurable field of the listener's setup form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerInput {
    /// Identifier the handler build step reads.
    pub id: String,
    /// Label shown to operators.
    pub name: String,
    /// Accepts multiple values. Mutually exclusive with `is_combo`.
    #[serde(default)]
    pub is_array: bool,
    /// Restricted to `combo_values`. Mutually exclusive with `is_array`.
    #[serde(default)]
    pub is_combo: bool,
    #[serde(default)]
    pub combo_values: Vec<String>,
}

impl ListenerInput {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    pub fn combo(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.is_combo = true;
        self.combo_values = values.into_iter().map(Into::into).collect();
        self
    }
}

/// A transport adapter relaying agent traffic to the teamserver.
pub struct Listener {
    pub name: String,
    pub protocols: Vec<String>,
    pub description: String,
    pub port: u16,
    pub support_socks: bool,
    pub support_changes: bool,
    inputs: Vec<ListenerInput>,
    registry: CallbackRegistry,
    binding: RwLock<Option<Binding>>,
    channel: RwLock<Option<ChannelSender>>,
}

impl Listener {
    pub fn new(
        name: impl Into<String>,
        protocols: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            protocols: protocols.into_iter().map(Into::into).collect(),
            description: String::new(),
            port: 1,
            support_socks: false,
            support_changes: false,
            inputs: Vec::new(),
            registry: CallbackRegistry::new(),
            binding: RwLock::new(None),
            channel: RwLock::new(None),
        }
    }

    pub fn add_input(&mut self, input: ListenerInput) {
        self.inputs.push(input);
    }

    fn api(&self) -> Option<std::sync::Arc<dyn tether_api::Teamserver>> {
        self.binding
            .read()
            .unwrap()
            .as_ref()
            .map(|b| std::sync::Arc::clone(&b.api))
    }

    fn channel_sender(&self) -> Option<ChannelSender> {
        self.channel.read().unwrap().clone()
    }

    /// Relays a payload for an agent type identified by `magick`.
    ///
    /// With a live channel the envelope is fire-and-forget and the return
    /// value is `None` — the channel is asynchronous by design. When the
    /// channel is absent or its send fails, the payload goes through the
    /// synchronous REST path exactly once and the decoded response comes
    /// back as `Some(bytes)`.
    pub async fn transmit(
        &self,
        magick: impl AsRef<[u8]>,
        payload: impl AsRef<[u8]>,
    ) -> Result<Option<Vec<u8>>, ListenerError> {
        let magick = BASE64.encode(magick.as_ref());
        let encoded = codec::wrap(payload.as_ref())?;

        if let Some(channel) = self.channel_sender() {
            let envelope = Envelope::new(
                CHANNEL_LISTENER,
                ACTION_RESPONSE,
                json!({"magick": magick, "payload": encoded}),
            );
            match channel.send(&envelope).await {
                Ok(()) => {
                    debug!("payload relayed over the channel");
                    return Ok(None);
                }
                Err(e) => {
                    warn!(error = %e, "channel transmit failed, falling back to HTTP");
                }
            }
        }

        let Some(api) = self.api() else {
            return Err(ListenerError::ApiNotSet);
        };
        let response = api.transmit(&magick, &encoded).await?;
        Ok(Some(codec::unwrap(&response)?))
    }
}

impl ChannelComponent for Listener {
    fn endpoint(&self) -> &str {
        LISTENER_ENDPOINT
    }

    fn descriptor(&self) -> Value {
        json!({
            "name": self.name,
            "protocol": self.protocols,
            "description": self.description,
            "options": {
                "inputs": self.inputs,
                "support": {
                    "changes": self.support_changes,
                    "socks": self.support_socks,
                },
            },
        })
    }

    fn bind(&self, binding: Binding) {
        *self.binding.write().unwrap() = Some(binding);
    }

    fn attach_channel(&self, channel: ChannelSender) {
        *self.channel.write().unwrap() = Some(channel);
    }

    fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite;

    use tether_api::{
        AgentIdentity, AuthRequest, AuthResponse, CommandStatusUpdate, Teamserver,
    };

    struct MockApi {
        transmits: Mutex<Vec<(String, String)>>,
    }

    impl MockApi {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                transmits: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Teamserver for MockApi {
        async fn authenticate(&self, _request: &AuthRequest) -> Result<AuthResponse, ApiError> {
            Ok(AuthResponse {
                token: "t".into(),
                uuid: "u".into(),
                id: 1,
            })
        }

        fn set_token(&self, _token: &str) {}

        async fn register_agent(&self, _identity: &AgentIdentity) -> Result<Value, ApiError> {
            Ok(json!({}))
        }

        async fn transmit(&self, magick: &str, payload: &str) -> Result<String, ApiError> {
            self.transmits
                .lock()
                .unwrap()
                .push((magick.to_string(), payload.to_string()));
            Ok(codec::wrap(b"pong").unwrap())
        }

        async fn update_command_status(
            &self,
            _update: &CommandStatusUpdate,
        ) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn bound_listener(api: Arc<MockApi>) -> Listener {
        let listener = Listener::new("shaco", ["test"]);
        listener.bind(Binding {
            id: 1,
            session: "u".into(),
            api,
        });
        listener
    }

    #[tokio::test]
    async fn transmit_prefers_live_channel() {
        let api = MockApi::new();
        let listener = bound_listener(api.clone());

        let (tx, mut rx) = mpsc::channel(4);
        listener.attach_channel(ChannelSender::new(tx));

        let result = listener.transmit("sh4c0", b"data").await.unwrap();
        assert!(result.is_none(), "channel path awaits no reply");
        assert!(api.transmits.lock().unwrap().is_empty());

        let envelope = match rx.recv().await.unwrap() {
            tungstenite::Message::Text(text) => Envelope::parse(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        };
        assert_eq!(envelope.channel, "listener");
        assert_eq!(envelope.action, "response");
        assert_eq!(envelope.data["magick"], BASE64.encode(b"sh4c0"));
        let payload = envelope.data["payload"].as_str().unwrap();
        assert_eq!(codec::unwrap(payload).unwrap(), b"data");
    }

    #[tokio::test]
    async fn failed_channel_send_falls_back_exactly_once() {
        let api = MockApi::new();
        let listener = bound_listener(api.clone());

        // A channel whose receiver is gone: every send fails.
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        listener.attach_channel(ChannelSender::new(tx));

        let result = listener.transmit("sh4c0", b"data").await.unwrap();
        assert_eq!(result.unwrap(), b"pong");

        let transmits = api.transmits.lock().unwrap();
        assert_eq!(transmits.len(), 1, "fallback must run exactly once");
        assert_eq!(transmits[0].0, BASE64.encode(b"sh4c0"));
        assert_eq!(codec::unwrap(&transmits[0].1).unwrap(), b"data");
    }

    #[tokio::test]
    async fn no_channel_uses_rest_path() {
        let api = MockApi::new();
        let listener = bound_listener(api.clone());

        let result = listener.transmit("sh4c0", "teste").await.unwrap();
        assert_eq!(result.unwrap(), b"pong");
        assert_eq!(api.transmits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_channel_and_no_api_is_a_configuration_error() {
        let listener = Listener::new("shaco", ["test"]);
        let result = listener.transmit("sh4c0", b"data").await;
        assert!(matches!(result, Err(ListenerError::ApiNotSet)));
    }

    #[test]
    fn descriptor_shape() {
        let mut listener = Listener::new("shaco", ["test"]);
        listener.description = "demo relay".into();
        listener.support_socks = true;
        listener.add_input(ListenerInput::new("port", "Port"));
        listener.add_input(ListenerInput::new("headers", "Headers").array());
        listener.add_input(
            ListenerInput::new("mode", "Mode").combo(["beacon", "interactive"]),
        );

        assert_eq!(listener.endpoint(), "listener");
        let descriptor = listener.descriptor();
        assert_eq!(descriptor["name"], "shaco");
        assert_eq!(descriptor["protocol"], json!(["test"]));
        assert_eq!(descriptor["options"]["support"]["socks"], true);
        assert_eq!(descriptor["options"]["support"]["changes"], false);

        let inputs = &descriptor["options"]["inputs"];
        assert_eq!(inputs[0]["id"], "port");
        assert_eq!(inputs[1]["isArray"], true);
        assert_eq!(inputs[2]["comboValues"], json!(["beacon", "interactive"]));
    }

    #[test]
    fn registry_starts_empty() {
        let listener = Listener::new("shaco", ["test"]);
        assert!(listener.registry().is_empty());
    }
}
