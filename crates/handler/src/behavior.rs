//! Overridable domain behavior of a handler.
//!
//! Implementors provide the agent-facing logic (check-in handling,
//! payload builds, command execution) while the handler framework deals
//! with envelopes, encoding, and reply plumbing. Default implementations
//! cover the common cases so a behavior only overrides what it cares
//! about.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use tether_api::{AgentIdentity, Teamserver};

/// Smallest correlation id handed to a fresh agent registration.
pub const UID_MIN: u64 = 1_000;

/// Largest correlation id handed to a fresh agent registration.
pub const UID_MAX: u64 = 99_999_999;

/// Errors from behavior methods.
#[derive(Debug, thiserror::Error)]
pub enum BehaviorError {
    #[error("{0}")]
    Failed(String),
}

/// A boxed future returned by behavior methods.
pub type BehaviorFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, BehaviorError>> + Send + 'a>>;

/// Collaborator handles available to a check-in.
pub struct CheckinContext {
    /// REST collaborator; absent until authentication has bound one.
    pub api: Option<Arc<dyn Teamserver>>,
    /// The handler's text-encoded identifier.
    pub magick: String,
}

/// Domain logic of a handler.
pub trait AgentBehavior: Send + Sync + 'static {
    /// Answers a correlated check-in request. The returned bytes become
    /// the reply payload.
    ///
    /// The default registers a fresh agent instance with the teamserver —
    /// a random correlation id plus host/process/network metadata — and
    /// replies with the id; a failed registration replies empty rather
    /// than erroring.
    fn checkin(&self, ctx: CheckinContext, payload: Vec<u8>) -> BehaviorFuture<'_, Vec<u8>> {
        Box::pin(async move {
            let _ = payload;
            let Some(api) = ctx.api else {
                warn!("no API handle bound, cannot register agent");
                return Ok(Vec::new());
            };

            let identity = local_identity(&ctx.magick);
            match api.register_agent(&identity).await {
                Ok(info) => {
                    debug!(uid = %identity.uid, ?info, "agent registered");
                    Ok(identity.uid.into_bytes())
                }
                Err(e) => {
                    warn!(error = %e, "cannot register agent");
                    Ok(Vec::new())
                }
            }
        })
    }

    /// Handles an agent build request. The default has nothing to build.
    fn build_payload(&self, request: Value) -> BehaviorFuture<'_, ()> {
        Box::pin(async move {
            debug!(?request, "build requested, nothing to do");
            Ok(())
        })
    }

    /// Executes a teamserver-issued command and returns its output.
    fn execute_command(&self, command: String, args: Value) -> BehaviorFuture<'_, String> {
        Box::pin(async move { Ok(format!("Command {command} executed with args {args}")) })
    }

    /// Processes a streamed image; the default echoes it back.
    fn process_image(&self, image_data: String, metadata: Value) -> BehaviorFuture<'_, String> {
        Box::pin(async move {
            let _ = metadata;
            Ok(image_data)
        })
    }
}

/// Behavior with every method left at its default.
#[derive(Debug, Default)]
pub struct DefaultBehavior;

impl AgentBehavior for DefaultBehavior {}

/// Fresh correlation id for an agent registration.
pub fn random_uid() -> u64 {
    rand::thread_rng().gen_range(UID_MIN..=UID_MAX)
}

/// Registration descriptor for an agent running inside this process.
pub fn local_identity(magick: &str) -> AgentIdentity {
    AgentIdentity {
        magick: magick.to_string(),
        uid: random_uid().to_string(),
        system: std::env::consts::OS.to_string(),
        internal_ip: local_ip().unwrap_or_else(|| "127.0.0.1".into()),
        external_ip: String::new(),
        arch: std::env::consts::ARCH.to_string(),
        domain: String::new(),
        p_name: process_name().unwrap_or_default(),
        tid: 0,
        pid: std::process::id(),
        hostname: hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_default(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

fn local_ip() -> Option<String> {
    if_addrs::get_if_addrs()
        .ok()?
        .into_iter()
        .find(|iface| !iface.is_loopback())
        .map(|iface| iface.ip().to_string())
}

fn process_name() -> Option<String> {
    std::env::current_exe()
        .ok()?
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_stays_in_range() {
        for _ in 0..1000 {
            let uid = random_uid();
            assert!((UID_MIN..=UID_MAX).contains(&uid));
        }
    }

    #[test]
    fn local_identity_describes_this_process() {
        let identity = local_identity("c2g0YzA=");
        assert_eq!(identity.magick, "c2g0YzA=");
        assert_eq!(identity.pid, std::process::id());
        assert_eq!(identity.system, std::env::consts::OS);
        assert!(!identity.uid.is_empty());
        identity.uid.parse::<u64>().unwrap();
    }

    #[tokio::test]
    async fn default_checkin_without_api_is_empty() {
        let behavior = DefaultBehavior;
        let ctx = CheckinContext {
            api: None,
            magick: "bQ==".into(),
        };
        let reply = behavior.checkin(ctx, b"hello".to_vec()).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn default_execute_command_echoes() {
        let behavior = DefaultBehavior;
        let out = behavior
            .execute_command("whoami".into(), serde_json::json!([]))
            .await
            .unwrap();
        assert!(out.contains("whoami"));
    }
}
