//! Request/response types for the teamserver REST API.

use serde::{Deserialize, Serialize};

/// Authentication request.
///
/// `username` is a reserved credential slot and is always empty today.
/// `password` carries the SHA-256 hex digest of the configured secret,
/// never the plaintext. `uuid` is the prior session id presented as a
/// continuation hint, or empty on first run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub uuid: String,
}

/// Authentication response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub uuid: String,
    pub id: i64,
}

/// Registration descriptor for a running agent instance.
///
/// `uid` is a fresh correlation id; the teamserver echoes it back as the
/// canonical reply to the request that triggered registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub magick: String,
    pub uid: String,
    pub system: String,
    pub internal_ip: String,
    pub external_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub p_name: String,
    #[serde(default)]
    pub tid: u32,
    #[serde(default)]
    pub pid: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Outcome of a dispatched command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Completed,
    Failed,
}

/// Status report for a command the teamserver asked us to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStatusUpdate {
    pub callback_id: String,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub exit_code: i32,
}

impl CommandStatusUpdate {
    /// Builds a `completed` report with exit code 0.
    pub fn completed(callback_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            callback_id: callback_id.into(),
            status: CommandStatus::Completed,
            output: Some(output.into()),
            error: None,
            exit_code: 0,
        }
    }

    /// Builds a `failed` report with exit code 1.
    pub fn failed(callback_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            callback_id: callback_id.into(),
            status: CommandStatus::Failed,
            output: None,
            error: Some(error.into()),
            exit_code: 1,
        }
    }
}
