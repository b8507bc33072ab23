use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    Configuration,
    UnknownService,
    MissingValue,
    InvalidInput,
    Resolution,
    ProcessFailure,
    Cancelled,
    ParseFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoreError {
    pub task: Option<String>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_task(task: impl Into<String>, kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: Some(task.into()),
            kind,
            message: message.into(),
        }
    }

    /// Keeps an existing task attribution and fills it in otherwise.
    pub fn attributed_to(self, task: &str) -> Self {
        Self {
            task: self.task.or_else(|| Some(task.to_string())),
            ..self
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == CoreErrorKind::Cancelled
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.task {
            Some(task) => write!(f, "{:?} [{task}]: {}", self.kind, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl Error for CoreError {}

pub type CoreResult<T> = Result<T, CoreError>;

/// Every error collected by a scope subtree.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{} error(s) reported: {}", .errors.len(), join_messages(.errors))]
pub struct ScopeErrors {
    pub errors: Vec<CoreError>,
}

impl ScopeErrors {
    pub fn new(errors: Vec<CoreError>) -> Self {
        Self { errors }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors ordered by task name; unattributed errors come first.
    pub fn sorted(&self) -> Vec<CoreError> {
        let mut errors = self.errors.clone();
        errors.sort_by(|left, right| left.task.cmp(&right.task));
        errors
    }
}

pub(crate) fn cancelled_error(task: Option<&str>, message: impl Into<String>) -> CoreError {
    CoreError {
        task: task.map(str::to_string),
        kind: CoreErrorKind::Cancelled,
        message: message.into(),
    }
}

fn join_messages(errors: &[CoreError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
