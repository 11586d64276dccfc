//! Agent handler component.
//!
//! A [`Handler`] represents one controllable agent type on the
//! teamserver. It registers itself for the agent, command, and image
//! channels, answers correlated check-in requests, queues build output as
//! agent tasks, and executes teamserver-issued commands through an
//! overridable [`AgentBehavior`].

pub mod behavior;
pub mod command;
pub mod handler;
pub mod options;
pub mod tasks;

pub use behavior::{AgentBehavior, BehaviorError, BehaviorFuture, CheckinContext, DefaultBehavior};
pub use command::{Command, CommandArg, CommandError, CommandSpec};
pub use handler::{HANDLER_ENDPOINT, Handler, HandlerError};
pub use options::{BuildConfig, RegisterOptions};
pub use tasks::{AgentTask, TaskQueue, TaskQueueFull};
