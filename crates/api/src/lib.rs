//! Teamserver REST API.
//!
//! The control channel covers the live path; everything else — the
//! authentication handshake, agent registration, the synchronous listener
//! fallback, and command status reports — goes through this client.
//!
//! [`Teamserver`] is the seam the rest of the workspace programs against;
//! [`ApiClient`] is the HTTP implementation.

pub mod client;
pub mod types;

pub use client::{ApiClient, ApiError, Teamserver};
pub use types::{
    AgentIdentity, AuthRequest, AuthResponse, CommandStatus, CommandStatusUpdate,
};
