//! Callback dispatch for inbound envelopes.
//!
//! A two-level mapping from (channel, action) to an async callback. Every
//! component that receives typed messages owns its own registry instance;
//! nothing here is process-global.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use tether_protocol::Envelope;

/// Error raised by a callback; converted into an error reply or a failed
/// status report at the dispatch boundary, never into a dead channel.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("{0}")]
    Handler(String),
}

/// Result of one callback invocation. The string is handler output,
/// consumed by the status-reporting side effect where one applies.
pub type CallbackResult = Result<String, CallbackError>;

/// A boxed future returned by a callback.
pub type CallbackFuture = Pin<Box<dyn Future<Output = CallbackResult> + Send>>;

/// A registered callback.
pub type Callback = Box<dyn Fn(Envelope) -> CallbackFuture + Send + Sync>;

/// Registry of (channel, action) callbacks.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<(String, String), Callback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback, replacing any prior one under the same key.
    pub fn register(
        &mut self,
        channel: impl Into<String>,
        action: impl Into<String>,
        callback: Callback,
    ) {
        let key = (channel.into(), action.into());
        debug!(channel = %key.0, action = %key.1, "registering callback");
        self.callbacks.insert(key, callback);
    }

    /// Returns the callback for a key, if registered.
    pub fn lookup(&self, channel: &str, action: &str) -> Option<&Callback> {
        self.callbacks
            .get(&(channel.to_string(), action.to_string()))
    }

    /// Dispatches an envelope to its registered callback.
    ///
    /// Returns `None` when no callback is registered — the message is
    /// logged and dropped; an unknown kind must never crash the channel.
    pub async fn dispatch(&self, envelope: Envelope) -> Option<CallbackResult> {
        debug!(
            channel = %envelope.channel,
            action = %envelope.action,
            "dispatching message"
        );
        match self.lookup(&envelope.channel, &envelope.action) {
            Some(callback) => Some(callback(envelope).await),
            None => {
                debug!("no callback registered, dropping message");
                None
            }
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}
