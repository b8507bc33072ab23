//! Sandbox selection and execution.
//!
//! A [`SandboxManager`] keeps builders in registration order; the first
//! builder whose predicate accepts a task's sandbox token constructs the
//! [`Sandbox`]. A non-zero exit status is a normal result of
//! [`Sandbox::run`]; only failures to run at all are errors.

pub mod container;
pub mod nested;
pub mod terminal;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

pub use container::{ContainerSandbox, ContainerSandboxBuilder};
pub use nested::{SelfSandbox, SelfSandboxBuilder};
pub use terminal::{TerminalSandbox, TerminalSandboxBuilder};

use crate::execution::ProcessOutput;
use crate::models::{CoreError, CoreErrorKind, CoreResult};
use crate::scope::Scope;

pub type SandboxRunFuture = Pin<Box<dyn Future<Output = CoreResult<ProcessOutput>> + Send>>;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SandboxCommand {
    pub task: String,
    pub command: String,
    pub env: BTreeMap<String, String>,
    /// Resources the submitting task holds while the command runs.
    pub held: Vec<String>,
}

impl SandboxCommand {
    pub fn new(task: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            command: command.into(),
            env: BTreeMap::new(),
            held: Vec::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

pub trait Sandbox: Send + Sync {
    /// The token this sandbox was built from.
    fn name(&self) -> &str;

    /// Runs `command` until it exits or `scope` is cancelled.
    fn run(&self, scope: &Scope, command: SandboxCommand) -> SandboxRunFuture;
}

pub trait SandboxBuilder: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Whether `name` follows this builder's naming convention.
    fn is(&self, name: &str) -> bool;

    fn build(&self, name: &str) -> CoreResult<Arc<dyn Sandbox>>;
}

#[derive(Default)]
pub struct SandboxManager {
    builders: RwLock<Vec<Arc<dyn SandboxBuilder>>>,
}

impl SandboxManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a builder; earlier builders take precedence.
    pub fn add(&self, builder: Arc<dyn SandboxBuilder>) {
        self.builders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(builder);
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|builder| builder.kind())
            .collect()
    }

    pub fn build(&self, name: &str) -> CoreResult<Arc<dyn Sandbox>> {
        let builder = self
            .builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|builder| builder.is(name))
            .cloned();

        match builder {
            Some(builder) => {
                tracing::debug!(sandbox = name, kind = builder.kind(), "sandbox builder selected");
                builder.build(name)
            }
            None => Err(CoreError::new(
                CoreErrorKind::Resolution,
                format!("no sandbox builder for name '{name}'"),
            )),
        }
    }
}
