//! The authenticated control channel to the teamserver.
//!
//! [`ControlConnection`] owns the authentication handshake and the
//! long-lived WebSocket lifecycle. Domain components (handlers, listeners)
//! implement [`ChannelComponent`]; the connection authenticates on their
//! behalf, binds the resulting identity and API handle into them, and then
//! drives their [`CallbackRegistry`] with every inbound frame — one frame
//! at a time, in receipt order.
//!
//! Transport loss is not fatal: the connection re-authenticates and
//! reconnects with exponential backoff until the configured attempt budget
//! is exhausted.

pub mod component;
pub mod config;
pub mod control;
pub mod pumps;
pub mod registry;
pub mod session;
pub mod tls;

pub use component::{Binding, ChannelComponent, ChannelSendError, ChannelSender};
pub use config::{RetryConfig, ServiceConfig, TlsConfig, WsConfig};
pub use control::{ConnectionError, ConnectionState, ControlConnection};
pub use registry::{Callback, CallbackError, CallbackFuture, CallbackRegistry, CallbackResult};
pub use session::{Session, SessionStore};
