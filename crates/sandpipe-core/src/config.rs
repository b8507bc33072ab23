use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind, CoreResult};

const DEFAULT_MAX_LOG_BYTES: usize = 128 * 1024;
const DEFAULT_TERMINATION_GRACE_MS: u64 = 2_000;

/// Immutable engine settings, owned by the root scope.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub shell: PathBuf,
    pub shell_flag: String,
    pub container_runtime: PathBuf,
    pub container_prefix: String,
    pub self_sandbox_name: String,
    pub terminal_sandbox_name: String,
    pub max_log_bytes: usize,
    pub termination_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            shell_flag: "-c".to_string(),
            container_runtime: PathBuf::from("docker"),
            container_prefix: "docker:".to_string(),
            self_sandbox_name: "self".to_string(),
            terminal_sandbox_name: "terminal".to_string(),
            max_log_bytes: DEFAULT_MAX_LOG_BYTES,
            termination_grace_ms: DEFAULT_TERMINATION_GRACE_MS,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> CoreResult<Self> {
        let config: EngineConfig = serde_json::from_str(raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Configuration,
                format!("invalid engine configuration: {error}"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.shell.as_os_str().is_empty() {
            return Err(configuration_error("shell must not be empty"));
        }
        if self.container_prefix.is_empty() {
            return Err(configuration_error("container_prefix must not be empty"));
        }
        if self.self_sandbox_name.is_empty() {
            return Err(configuration_error("self_sandbox_name must not be empty"));
        }
        if self.terminal_sandbox_name.is_empty() {
            return Err(configuration_error("terminal_sandbox_name must not be empty"));
        }
        if self.max_log_bytes == 0 {
            return Err(configuration_error("max_log_bytes must be greater than zero"));
        }
        Ok(())
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }
}

fn configuration_error(message: &str) -> CoreError {
    CoreError::new(CoreErrorKind::Configuration, message)
}
