use crate::models::{CoreError, CoreErrorKind, CoreResult};
use crate::scope::{DataStore, ScopeValue};

/// A named value an [`Injectable`] accepts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Slot {
    pub key: &'static str,
    pub required: bool,
}

impl Slot {
    pub const fn required(key: &'static str) -> Self {
        Self {
            key,
            required: true,
        }
    }

    pub const fn optional(key: &'static str) -> Self {
        Self {
            key,
            required: false,
        }
    }
}

/// A structure populated from scope data through explicit slots.
pub trait Injectable {
    fn slots(&self) -> &'static [Slot];

    fn fill(&mut self, key: &str, value: &ScopeValue) -> CoreResult<()>;
}

/// A keyed value source attached to a scope.
pub trait Injector: Send + Sync {
    fn lookup(&self, key: &str) -> Option<ScopeValue>;
}

pub struct DataInjector {
    data: DataStore,
}

impl DataInjector {
    pub fn new(data: DataStore) -> Self {
        Self { data }
    }
}

impl Injector for DataInjector {
    fn lookup(&self, key: &str) -> Option<ScopeValue> {
        self.data.get_value(key)
    }
}

/// Reads a string slot value, accepting both `String` and `&'static str`.
pub fn string_value(key: &str, value: &ScopeValue) -> CoreResult<String> {
    if let Some(text) = value.downcast_ref::<String>() {
        return Ok(text.clone());
    }
    if let Some(text) = value.downcast_ref::<&'static str>() {
        return Ok((*text).to_string());
    }
    Err(CoreError::new(
        CoreErrorKind::InvalidInput,
        format!("value for '{key}' is not a string"),
    ))
}
