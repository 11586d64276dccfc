//! Channel and action names used on the control channel.

/// Channel for agent lifecycle traffic (check-in, builds, tasking).
pub const CHANNEL_AGENT: &str = "agent";

/// Channel for teamserver-issued command execution.
pub const CHANNEL_COMMAND: &str = "command";

/// Channel for image streaming.
pub const CHANNEL_IMAGE: &str = "image";

/// Channel for listener relay traffic.
pub const CHANNEL_LISTENER: &str = "listener";

/// Reply to a correlated request.
pub const ACTION_RESPONSE: &str = "response";

/// Request to build an agent payload.
pub const ACTION_BUILD: &str = "build";

/// Request to queue a task for an agent.
pub const ACTION_COMMAND: &str = "command";

/// Request to execute a command locally.
pub const ACTION_EXECUTE: &str = "execute";

/// Request to process a streamed image.
pub const ACTION_STREAM: &str = "stream";

/// Error reply for a failed request.
pub const ACTION_ERROR: &str = "error";
