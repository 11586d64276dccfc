//! Commands a handler exposes to teamserver operators.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors from building a command payload.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("missing required argument: {0}")]
    MissingArg(String),

    #[error("build failed: {0}")]
    Build(String),
}

/// One argument a command accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandArg {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    /// Argument is a file upload rather than a string.
    #[serde(default)]
    pub file: bool,
}

impl CommandArg {
    pub fn new(name: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            required,
            file: false,
        }
    }
}

/// Static description of a command, registered with the teamserver so
/// operators can discover and invoke it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub params: Vec<CommandArg>,
    /// MITRE technique tags.
    #[serde(default)]
    pub mitr: Vec<String>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// JSON form sent inside the registration descriptor.
    pub fn descriptor(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// A command implementation.
///
/// `build` turns operator-supplied arguments into the opaque task bytes
/// shipped to the agent; what those bytes mean is the agent's business.
pub trait Command: Send + Sync + 'static {
    fn spec(&self) -> &CommandSpec;

    fn build(&self, args: &Value) -> Result<Vec<u8>, CommandError>;
}
