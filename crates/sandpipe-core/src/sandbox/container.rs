use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::execution::{CommandSpec, ProcessExecutor, ProcessSpawnRequest, spawn_validated};
use crate::models::error::cancelled_error;
use crate::models::{CoreError, CoreErrorKind, CoreResult};
use crate::sandbox::{Sandbox, SandboxBuilder, SandboxCommand, SandboxRunFuture};
use crate::scope::Scope;

/// Claims `<prefix><image>` tokens, e.g. `docker:alpine:3.20`.
pub struct ContainerSandboxBuilder {
    executor: Arc<dyn ProcessExecutor>,
    prefix: String,
    sequence: Arc<AtomicU64>,
}

impl ContainerSandboxBuilder {
    pub fn new(executor: Arc<dyn ProcessExecutor>, prefix: impl Into<String>) -> Self {
        Self {
            executor,
            prefix: prefix.into(),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl SandboxBuilder for ContainerSandboxBuilder {
    fn kind(&self) -> &'static str {
        "container"
    }

    fn is(&self, name: &str) -> bool {
        name.starts_with(&self.prefix)
    }

    fn build(&self, name: &str) -> CoreResult<Arc<dyn Sandbox>> {
        let image = name[self.prefix.len()..].trim();
        if image.is_empty() {
            return Err(CoreError::new(
                CoreErrorKind::Resolution,
                format!("sandbox '{name}' does not name an image"),
            ));
        }

        Ok(Arc::new(ContainerSandbox {
            name: name.to_string(),
            image: image.to_string(),
            executor: self.executor.clone(),
            sequence: self.sequence.clone(),
        }))
    }
}

pub struct ContainerSandbox {
    name: String,
    image: String,
    executor: Arc<dyn ProcessExecutor>,
    sequence: Arc<AtomicU64>,
}

impl Sandbox for ContainerSandbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, scope: &Scope, command: SandboxCommand) -> SandboxRunFuture {
        let scope = scope.clone();
        let executor = self.executor.clone();
        let image = self.image.clone();
        let container = container_name(&command.task, self.sequence.fetch_add(1, Ordering::SeqCst));

        Box::pin(async move {
            if scope.is_killed() {
                return Err(cancelled_error(Some(&command.task), "scope killed before run"));
            }

            let config = scope.config();
            let mut spec = CommandSpec::new(&config.container_runtime).args([
                "run",
                "--rm",
                "-i",
                "--name",
                container.as_str(),
            ]);
            for (key, value) in &command.env {
                spec = spec.arg("-e").arg(format!("{key}={value}"));
            }
            spec = spec
                .arg(image.clone())
                .arg(config.shell.to_string_lossy().into_owned())
                .arg(config.shell_flag.clone())
                .arg(command.command.clone());

            tracing::info!(task = %command.task, image = %image, container = %container, "starting container sandbox");
            let request = ProcessSpawnRequest::configured(command.task.clone(), spec, config);
            let process = spawn_validated(executor.as_ref(), request)?;

            let result = process.wait(Some(scope.clone())).await;
            if matches!(&result, Err(error) if error.is_cancelled()) {
                remove_container(executor.as_ref(), &config.container_runtime, &command.task, &container);
            }
            result
        })
    }
}

/// Best-effort `rm -f` for a container whose client was cancelled.
fn remove_container(
    executor: &dyn ProcessExecutor,
    runtime: &std::path::Path,
    task: &str,
    container: &str,
) {
    let spec = CommandSpec::new(runtime).args(["rm", "-f", container]);
    match spawn_validated(executor, ProcessSpawnRequest::new(task, spec)) {
        Ok(process) => {
            let wait = process.wait(None);
            let container = container.to_string();
            tokio::spawn(async move {
                if let Err(error) = wait.await {
                    tracing::warn!(container = %container, message = %error.message, "container cleanup failed");
                }
            });
        }
        Err(error) => {
            tracing::warn!(container, message = %error.message, "container cleanup could not start");
        }
    }
}

fn container_name(task: &str, sequence: u64) -> String {
    let sanitized = task
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-') {
                ch
            } else {
                '-'
            }
        })
        .collect::<String>();
    format!("sandpipe-{sanitized}-{}-{sequence}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::container_name;

    #[test]
    fn container_names_are_sanitized() {
        let name = container_name("build app/1", 3);
        assert!(name.starts_with("sandpipe-build-app-1-"));
        assert!(name.ends_with("-3"));
    }
}
