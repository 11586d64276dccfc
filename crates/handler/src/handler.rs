//! The handler component.
//!
//! Wires the behavior, the command set, and the task queue into the
//! callback registry the control connection dispatches into.

use std::future::Future;
use std::sync::{Arc, RwLock};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use tether_api::Teamserver;
use tether_connection::{
    Binding, Callback, CallbackError, CallbackFuture, CallbackRegistry, CallbackResult,
    ChannelComponent, ChannelSender,
};
use tether_protocol::constants::{
    ACTION_BUILD, ACTION_COMMAND, ACTION_ERROR, ACTION_EXECUTE, ACTION_RESPONSE, ACTION_STREAM,
    CHANNEL_AGENT, CHANNEL_COMMAND, CHANNEL_IMAGE,
};
use tether_protocol::{Envelope, codec};

use crate::behavior::{AgentBehavior, BehaviorError, CheckinContext, DefaultBehavior};
use crate::options::RegisterOptions;
use crate::tasks::{AgentTask, TaskQueue};

/// Endpoint name handlers authenticate as.
pub const HANDLER_ENDPOINT: &str = "handler";

/// Errors from the handler's envelope flows.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("payload is not text")]
    PayloadNotText,

    #[error("codec error: {0}")]
    Codec(#[from] tether_protocol::CodecError),

    #[error("behavior error: {0}")]
    Behavior(#[from] BehaviorError),
}

/// A controllable agent type, driven by the control connection.
///
/// Registers itself for (agent, response), (agent, build),
/// (agent, command), (command, execute), and (image, stream) at
/// construction.
pub struct Handler {
    core: Arc<HandlerCore>,
    registry: CallbackRegistry,
}

struct HandlerCore {
    name: String,
    /// Text-encoded identifier of this agent type.
    magick: String,
    author: String,
    description: String,
    options: RegisterOptions,
    behavior: Arc<dyn AgentBehavior>,
    binding: RwLock<Option<Binding>>,
    channel: RwLock<Option<ChannelSender>>,
    tasks: TaskQueue,
}

impl Handler {
    /// Creates a handler with the default behavior.
    pub fn new(
        name: impl Into<String>,
        magick: impl AsRef<[u8]>,
        options: RegisterOptions,
    ) -> Self {
        Self::with_behavior(name, magick, options, Arc::new(DefaultBehavior))
    }

    /// Creates a handler with a custom behavior.
    pub fn with_behavior(
        name: impl Into<String>,
        magick: impl AsRef<[u8]>,
        options: RegisterOptions,
        behavior: Arc<dyn AgentBehavior>,
    ) -> Self {
        Self::with_details(name, magick, options, behavior, "", "")
    }

    /// Creates a handler with author and description metadata.
    pub fn with_details(
        name: impl Into<String>,
        magick: impl AsRef<[u8]>,
        options: RegisterOptions,
        behavior: Arc<dyn AgentBehavior>,
        author: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let core = Arc::new(HandlerCore {
            name: name.into(),
            magick: BASE64.encode(magick.as_ref()),
            author: author.into(),
            description: description.into(),
            options,
            behavior,
            binding: RwLock::new(None),
            channel: RwLock::new(None),
            tasks: TaskQueue::default(),
        });

        let mut registry = CallbackRegistry::new();
        registry.register(
            CHANNEL_AGENT,
            ACTION_RESPONSE,
            method_callback(&core, HandlerCore::on_checkin),
        );
        registry.register(
            CHANNEL_AGENT,
            ACTION_BUILD,
            method_callback(&core, HandlerCore::on_build),
        );
        registry.register(
            CHANNEL_AGENT,
            ACTION_COMMAND,
            method_callback(&core, HandlerCore::on_new_task),
        );
        registry.register(
            CHANNEL_COMMAND,
            ACTION_EXECUTE,
            method_callback(&core, HandlerCore::on_execute),
        );
        registry.register(
            CHANNEL_IMAGE,
            ACTION_STREAM,
            method_callback(&core, HandlerCore::on_image_stream),
        );

        Self { core, registry }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// The text-encoded agent type identifier.
    pub fn magick(&self) -> &str {
        &self.core.magick
    }

    /// Pops the oldest queued agent task, if any.
    pub fn get_task(&self) -> Option<AgentTask> {
        self.core.tasks.pop()
    }

    /// Number of queued agent tasks.
    pub fn pending_tasks(&self) -> usize {
        self.core.tasks.len()
    }

    /// Numeric id assigned by the teamserver, once authenticated.
    pub fn id(&self) -> Option<i64> {
        self.core.binding.read().unwrap().as_ref().map(|b| b.id)
    }

    /// Session uuid for this run, once authenticated.
    pub fn session(&self) -> Option<String> {
        self.core
            .binding
            .read()
            .unwrap()
            .as_ref()
            .map(|b| b.session.clone())
    }
}

impl ChannelComponent for Handler {
    fn endpoint(&self) -> &str {
        HANDLER_ENDPOINT
    }

    fn descriptor(&self) -> Value {
        json!({
            "name": self.core.name,
            "magick": self.core.magick,
            "author": self.core.author,
            "description": self.core.description,
            "options": self.core.options.descriptor(),
        })
    }

    fn bind(&self, binding: Binding) {
        *self.core.binding.write().unwrap() = Some(binding);
    }

    fn attach_channel(&self, channel: ChannelSender) {
        *self.core.channel.write().unwrap() = Some(channel);
    }

    fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }
}

/// Adapts an async `HandlerCore` method into a registry callback.
fn method_callback<F, Fut>(core: &Arc<HandlerCore>, method: F) -> Callback
where
    F: Fn(Arc<HandlerCore>, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallbackResult> + Send + 'static,
{
    let core = Arc::clone(core);
    Box::new(move |envelope| -> CallbackFuture {
        Box::pin(method(Arc::clone(&core), envelope))
    })
}

impl HandlerCore {
    fn api(&self) -> Option<Arc<dyn Teamserver>> {
        self.binding
            .read()
            .unwrap()
            .as_ref()
            .map(|b| Arc::clone(&b.api))
    }

    fn channel_sender(&self) -> Option<ChannelSender> {
        self.channel.read().unwrap().clone()
    }

    async fn send_reply(&self, envelope: Envelope, what: &str) {
        match self.channel_sender() {
            Some(channel) => {
                if let Err(e) = channel.send(&envelope).await {
                    error!(error = %e, what, "could not send reply");
                }
            }
            None => error!(what, "no channel attached, dropping reply"),
        }
    }

    /// (agent, response) — the correlated check-in flow.
    ///
    /// Whatever goes wrong inside, a reply is still attempted with an
    /// empty payload so the requester is never left waiting.
    async fn on_checkin(core: Arc<Self>, envelope: Envelope) -> CallbackResult {
        debug!("check-in request from server");
        if envelope.callback_id.is_none() {
            warn!("check-in without callbackID, dropping");
            return Ok(String::new());
        }

        let encoded = match core.checkin_payload(&envelope).await {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(error = %e, "check-in handling failed");
                String::new()
            }
        };

        let mut reply = envelope;
        reply.data = Value::String(encoded);
        core.send_reply(reply, "check-in").await;
        Ok(String::new())
    }

    async fn checkin_payload(&self, envelope: &Envelope) -> Result<String, HandlerError> {
        let text = envelope.data.as_str().ok_or(HandlerError::PayloadNotText)?;
        let payload = codec::unwrap(text)?;

        let ctx = CheckinContext {
            api: self.api(),
            magick: self.magick.clone(),
        };
        let response = self.behavior.checkin(ctx, payload).await?;

        Ok(codec::wrap(&response)?)
    }

    /// (agent, build) — payload build request.
    async fn on_build(core: Arc<Self>, envelope: Envelope) -> CallbackResult {
        if let Err(e) = core.behavior.build_payload(envelope.data).await {
            warn!(error = %e, "build request failed");
        }
        Ok(String::new())
    }

    /// (agent, command) — queue a task for an agent.
    ///
    /// Invalid shapes are logged and ignored; nothing is surfaced to the
    /// sender.
    async fn on_new_task(core: Arc<Self>, envelope: Envelope) -> CallbackResult {
        let data = &envelope.data;
        let (Some(agent_id), Some(command)) = (
            data.get("agentID").and_then(Value::as_str),
            data.get("command"),
        ) else {
            error!("invalid task");
            return Ok(String::new());
        };
        let (Some(name), Some(args)) = (
            command.get("name").and_then(Value::as_str),
            command.get("args"),
        ) else {
            error!("invalid task");
            return Ok(String::new());
        };

        let Some(registered) = core.options.find_command(name) else {
            debug!(name, "no such command registered");
            return Ok(String::new());
        };

        match registered.build(args) {
            Ok(bytes) => {
                let task = AgentTask {
                    agent_id: agent_id.to_string(),
                    data: bytes,
                };
                if let Err(e) = core.tasks.push(task) {
                    warn!(error = %e, agent = agent_id, "dropping task");
                }
            }
            Err(e) => warn!(name, error = %e, "command build failed"),
        }
        Ok(String::new())
    }

    /// (command, execute) — run a command through the behavior and reply
    /// with a response or error envelope. The returned outcome also feeds
    /// the connection's status report.
    async fn on_execute(core: Arc<Self>, envelope: Envelope) -> CallbackResult {
        let Some(command) = envelope.data_str("command").map(str::to_owned) else {
            error!("invalid command data");
            return Err(CallbackError::Handler("invalid command data".into()));
        };
        let args = envelope
            .data
            .get("args")
            .cloned()
            .unwrap_or_else(|| json!([]));

        match core.behavior.execute_command(command.clone(), args).await {
            Ok(response) => {
                let reply = envelope.reply(
                    CHANNEL_COMMAND,
                    ACTION_RESPONSE,
                    json!({"command": command, "response": response}),
                );
                core.send_reply(reply, "command response").await;
                Ok(response)
            }
            Err(e) => {
                error!(command, error = %e, "command execution failed");
                let reply = envelope.reply(
                    CHANNEL_COMMAND,
                    ACTION_ERROR,
                    json!({"command": command, "error": e.to_string()}),
                );
                core.send_reply(reply, "command error").await;
                Err(CallbackError::Handler(e.to_string()))
            }
        }
    }

    /// (image, stream) — process a streamed image and reply symmetrically
    /// to command execution.
    async fn on_image_stream(core: Arc<Self>, envelope: Envelope) -> CallbackResult {
        let Some(image_data) = envelope.data_str("image_data").map(str::to_owned) else {
            error!("invalid image data");
            return Err(CallbackError::Handler("invalid image data".into()));
        };
        let metadata = envelope
            .data
            .get("metadata")
            .cloned()
            .unwrap_or_else(|| json!({}));

        match core
            .behavior
            .process_image(image_data, metadata.clone())
            .await
        {
            Ok(processed) => {
                let reply = envelope.reply(
                    CHANNEL_IMAGE,
                    ACTION_RESPONSE,
                    json!({"image_data": processed, "metadata": metadata}),
                );
                core.send_reply(reply, "image response").await;
                Ok(processed)
            }
            Err(e) => {
                error!(error = %e, "image processing failed");
                let reply =
                    envelope.reply(CHANNEL_IMAGE, ACTION_ERROR, json!({"error": e.to_string()}));
                core.send_reply(reply, "image error").await;
                Err(CallbackError::Handler(e.to_string()))
            }
        }
    }
}
