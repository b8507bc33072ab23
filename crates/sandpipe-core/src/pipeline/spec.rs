use crate::models::{CoreError, CoreErrorKind, CoreResult};
use crate::scope::{Injectable, Scope, ScopeValue, Slot, string_value};

/// Follow-up bodies of the conditional ("try") form.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConditionalHooks {
    pub on_success: Option<String>,
    pub on_failure: Option<String>,
    pub finally: Option<String>,
}

/// Everything needed to run one named task.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TaskSpec {
    pub name: String,
    pub body: String,
    /// Empty selects the fallback sandbox.
    pub sandbox: String,
    pub wait: Vec<String>,
    pub lock: Vec<String>,
    /// `Some` for the conditional form, where body failures are captured.
    pub hooks: Option<ConditionalHooks>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn sandbox(mut self, sandbox: impl Into<String>) -> Self {
        self.sandbox = sandbox.into();
        self
    }

    pub fn wait_for(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.wait.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn lock(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.lock.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn conditional(mut self, hooks: ConditionalHooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.hooks.is_some()
    }

    /// Builds a spec from the values visible to `scope`'s injectors.
    pub fn from_scope(scope: &Scope, conditional: bool) -> CoreResult<Self> {
        let mut args = TaskArgs {
            conditional,
            ..TaskArgs::default()
        };
        scope.inject_to(&mut args)?;

        let hooks = conditional.then(|| ConditionalHooks {
            on_success: args.on_success,
            on_failure: args.on_failure,
            finally: args.finally,
        });
        Ok(Self {
            name: args.name,
            body: args.body,
            sandbox: args.sandbox,
            wait: args.wait,
            lock: args.lock,
            hooks,
        })
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("task name must not be empty"));
        }
        if self.name.contains(',') || self.name.chars().any(char::is_whitespace) {
            return Err(CoreError::for_task(
                &self.name,
                CoreErrorKind::InvalidInput,
                "task name must not contain commas or whitespace",
            ));
        }
        if self.body.trim().is_empty() {
            return Err(CoreError::for_task(
                &self.name,
                CoreErrorKind::InvalidInput,
                "task body must not be empty",
            ));
        }
        if self.wait.iter().any(|name| name == &self.name) {
            return Err(CoreError::for_task(
                &self.name,
                CoreErrorKind::InvalidInput,
                "task cannot wait for itself",
            ));
        }
        Ok(())
    }
}

/// Splits a comma-separated name list, dropping blank entries.
pub fn split_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

const RUN_SLOTS: &[Slot] = &[
    Slot::required("name"),
    Slot::required("body"),
    Slot::optional("sandbox"),
    Slot::optional("wait"),
    Slot::optional("lock"),
];

const TRY_SLOTS: &[Slot] = &[
    Slot::required("name"),
    Slot::required("body"),
    Slot::optional("sandbox"),
    Slot::optional("wait"),
    Slot::optional("lock"),
    Slot::optional("success"),
    Slot::optional("fail"),
    Slot::optional("finally"),
];

#[derive(Default)]
struct TaskArgs {
    conditional: bool,
    name: String,
    body: String,
    sandbox: String,
    wait: Vec<String>,
    lock: Vec<String>,
    on_success: Option<String>,
    on_failure: Option<String>,
    finally: Option<String>,
}

impl Injectable for TaskArgs {
    fn slots(&self) -> &'static [Slot] {
        if self.conditional { TRY_SLOTS } else { RUN_SLOTS }
    }

    fn fill(&mut self, key: &str, value: &ScopeValue) -> CoreResult<()> {
        let text = string_value(key, value)?;
        match key {
            "name" => self.name = text,
            "body" => self.body = text,
            "sandbox" => self.sandbox = text,
            "wait" => self.wait = split_names(&text),
            "lock" => self.lock = split_names(&text),
            "success" => self.on_success = Some(text),
            "fail" => self.on_failure = Some(text),
            "finally" => self.finally = Some(text),
            _ => return Err(invalid(&format!("unexpected task argument '{key}'"))),
        }
        Ok(())
    }
}

fn invalid(message: &str) -> CoreError {
    CoreError::new(CoreErrorKind::InvalidInput, message)
}
