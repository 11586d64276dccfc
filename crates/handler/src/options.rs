//! Handler registration options.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::command::Command;

/// One configurable field of the agent build form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub name: String,
    /// Rendered as a free-form input rather than a toggle.
    #[serde(default)]
    pub input: bool,
    #[serde(default)]
    pub alt_name: String,
    #[serde(default)]
    pub default: Value,
}

impl BuildConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_default(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            ..Self::default()
        }
    }
}

/// Everything a handler advertises when it registers: supported
/// architectures and output formats, build form fields, commands, and
/// agent transport protocols.
pub struct RegisterOptions {
    pub arch: Vec<String>,
    pub formats: Vec<String>,
    pub configs: Vec<BuildConfig>,
    pub commands: Vec<Arc<dyn Command>>,
    pub protocols: Vec<String>,
}

impl RegisterOptions {
    pub fn new(
        arch: impl IntoIterator<Item = impl Into<String>>,
        formats: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            arch: arch.into_iter().map(Into::into).collect(),
            formats: formats.into_iter().map(Into::into).collect(),
            configs: Vec::new(),
            commands: Vec::new(),
            protocols: vec!["http".into(), "https".into()],
        }
    }

    pub fn add_command(&mut self, command: Arc<dyn Command>) {
        self.commands.push(command);
    }

    pub fn add_config(&mut self, config: BuildConfig) {
        self.configs.push(config);
    }

    /// Finds a registered command by name.
    pub fn find_command(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.commands.iter().find(|c| c.spec().name == name)
    }

    /// JSON form sent inside the handler descriptor.
    pub fn descriptor(&self) -> Value {
        json!({
            "arch": self.arch,
            "formats": self.formats,
            "config": self.configs,
            "protocols": self.protocols,
            "commands": self.commands.iter().map(|c| c.spec().descriptor()).collect::<Vec<_>>(),
        })
    }
}
