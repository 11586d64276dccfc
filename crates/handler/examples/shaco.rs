//! Demo handler exposing a single `shell` command.
//!
//! Run against a local teamserver:
//!
//! ```text
//! TETHER_SERVER_URL=http://localhost:3000 TETHER_PASSWORD=secret \
//!     cargo run --example shaco
//! ```

use std::sync::Arc;

use serde_json::Value;
use tracing_subscriber::EnvFilter;

use tether_connection::{ControlConnection, ServiceConfig};
use tether_handler::{
    BuildConfig, Command, CommandArg, CommandError, CommandSpec, Handler, RegisterOptions,
};

struct ShellExec {
    spec: CommandSpec,
}

impl ShellExec {
    fn new() -> Self {
        let mut spec = CommandSpec::new("shell", "xyz");
        spec.help = "shell <command>".into();
        spec.params.push(CommandArg::new("command", true));
        Self { spec }
    }
}

impl Command for ShellExec {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn build(&self, args: &Value) -> Result<Vec<u8>, CommandError> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| CommandError::MissingArg("command".into()))?;
        Ok(command.as_bytes().to_vec())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut options = RegisterOptions::new(["x86", "x64"], ["exe", "dll"]);
    options.add_config(BuildConfig::new("connec"));
    options.add_config(BuildConfig::with_default("sleep", 5));
    options.add_config(BuildConfig::with_default("antiDebug", false));
    options.add_command(Arc::new(ShellExec::new()));

    let handler = Arc::new(Handler::new("shaco", "sh4c0", options));

    let config = ServiceConfig::from_env();
    let connection = match ControlConnection::new(config) {
        Ok(connection) => connection,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = connection.run(handler).await {
        tracing::error!(error = %e, "handler terminated");
        std::process::exit(1);
    }
}
