//! The JSON envelope exchanged over the control channel.

use serde::{Deserialize, Serialize};

/// Errors from envelope parsing.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid envelope: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Envelope for all control-channel communication.
///
/// `channel` selects the domain (`agent`, `command`, `image`, `listener`),
/// `action` the verb within it. `data` is opaque to the channel layer;
/// each (channel, action) pair defines its own shape. `callback_id`
/// correlates a request with its asynchronous reply and must be carried
/// back verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub channel: String,
    pub action: String,
    pub data: serde_json::Value,
    #[serde(rename = "callbackID", skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<serde_json::Value>,
}

impl Envelope {
    /// Creates a new envelope without a correlation token.
    pub fn new(
        channel: impl Into<String>,
        action: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            channel: channel.into(),
            action: action.into(),
            data,
            callback_id: None,
        }
    }

    /// Parses an inbound text frame.
    ///
    /// A frame missing `type`, `action`, or `data` fails here and never
    /// reaches a handler.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialises the envelope for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Creates a reply on another (channel, action) pair, carrying this
    /// envelope's correlation token inside the reply `data`.
    pub fn reply(
        &self,
        channel: impl Into<String>,
        action: impl Into<String>,
        mut data: serde_json::Value,
    ) -> Self {
        if let (Some(obj), Some(id)) = (data.as_object_mut(), &self.callback_id) {
            obj.insert("callbackID".into(), id.clone());
        }
        Self {
            channel: channel.into(),
            action: action.into(),
            data,
            callback_id: None,
        }
    }

    /// Returns a string field of `data`, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_conforming_frame() {
        let env = Envelope::parse(
            r#"{"type":"agent","action":"response","data":"abc","callbackID":42}"#,
        )
        .unwrap();
        assert_eq!(env.channel, "agent");
        assert_eq!(env.action, "response");
        assert_eq!(env.data, json!("abc"));
        assert_eq!(env.callback_id, Some(json!(42)));
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(Envelope::parse(r#"{"action":"response","data":{}}"#).is_err());
    }

    #[test]
    fn missing_action_is_rejected() {
        assert!(Envelope::parse(r#"{"type":"agent","data":{}}"#).is_err());
    }

    #[test]
    fn missing_data_is_rejected() {
        assert!(Envelope::parse(r#"{"type":"agent","action":"response"}"#).is_err());
    }

    #[test]
    fn not_json_is_rejected() {
        assert!(Envelope::parse("not valid json {{{").is_err());
    }

    #[test]
    fn callback_id_is_optional() {
        let env = Envelope::parse(r#"{"type":"agent","action":"command","data":{}}"#).unwrap();
        assert!(env.callback_id.is_none());
    }

    #[test]
    fn serialise_omits_absent_callback_id() {
        let env = Envelope::new("listener", "response", json!({"magick": "c2g="}));
        let json = env.to_json().unwrap();
        assert!(!json.contains("callbackID"));
        assert!(json.contains(r#""type":"listener""#));
    }

    #[test]
    fn reply_carries_callback_id_in_data() {
        let mut req = Envelope::new("command", "execute", json!({"command": "ls"}));
        req.callback_id = Some(json!("cb-7"));

        let reply = req.reply("command", "response", json!({"command": "ls", "response": "ok"}));
        assert_eq!(reply.data["callbackID"], json!("cb-7"));
        assert!(reply.callback_id.is_none());
    }

    #[test]
    fn wire_roundtrip() {
        let mut env = Envelope::new("agent", "response", json!("payload"));
        env.callback_id = Some(json!("id-1"));

        let parsed = Envelope::parse(&env.to_json().unwrap()).unwrap();
        assert_eq!(parsed.channel, env.channel);
        assert_eq!(parsed.action, env.action);
        assert_eq!(parsed.data, env.data);
        assert_eq!(parsed.callback_id, env.callback_id);
    }
}
