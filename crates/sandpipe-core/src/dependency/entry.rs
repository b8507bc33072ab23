use std::sync::{Mutex, PoisonError};

use crate::dependency::{DependencyProvider, ServiceFactory, ServiceInstance};
use crate::models::{CoreError, CoreErrorKind, CoreResult};

/// Registration state of one service name inside a single provider.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    Unset,
    Default,
    Fixed,
}

/// Validates a registration against the current state of a name.
///
/// A default may only be set on an unset name; an explicit registration
/// may replace nothing or a default, never another explicit one.
pub fn validate_registration(
    name: &str,
    current: EntryKind,
    requested: EntryKind,
) -> CoreResult<EntryKind> {
    match (current, requested) {
        (EntryKind::Unset, EntryKind::Default) => Ok(EntryKind::Default),
        (EntryKind::Unset | EntryKind::Default, EntryKind::Fixed) => Ok(EntryKind::Fixed),
        (_, EntryKind::Default) => Err(CoreError::new(
            CoreErrorKind::Configuration,
            format!("default for service '{name}' can be set once"),
        )),
        (EntryKind::Fixed, EntryKind::Fixed) => Err(CoreError::new(
            CoreErrorKind::Configuration,
            format!("service '{name}' is already registered"),
        )),
        (_, EntryKind::Unset) => Err(CoreError::new(
            CoreErrorKind::Internal,
            format!("service '{name}' cannot be unregistered"),
        )),
    }
}

pub(crate) struct ServiceEntry {
    pub(crate) kind: EntryKind,
    pub(crate) is_static: bool,
    factory: ServiceFactory,
    instance: Mutex<Option<ServiceInstance>>,
}

impl ServiceEntry {
    pub(crate) fn new(kind: EntryKind, is_static: bool, factory: ServiceFactory) -> Self {
        Self {
            kind,
            is_static,
            factory,
            instance: Mutex::new(None),
        }
    }

    pub(crate) fn is_built(&self) -> bool {
        self.instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Static entries build once and hand out the cached instance; the slot
    /// lock is held while building so concurrent first requests share it.
    pub(crate) fn resolve(&self, provider: &DependencyProvider) -> CoreResult<ServiceInstance> {
        if !self.is_static {
            return (self.factory)(provider);
        }

        let mut slot = self
            .instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(instance) = slot.as_ref() {
            return Ok(instance.clone());
        }
        let instance = (self.factory)(provider)?;
        *slot = Some(instance.clone());
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::{EntryKind, validate_registration};
    use crate::models::CoreErrorKind;

    #[test]
    fn default_then_fixed_is_allowed_once() {
        let after_default = validate_registration("x", EntryKind::Unset, EntryKind::Default)
            .expect("first default is allowed");
        let after_fixed = validate_registration("x", after_default, EntryKind::Fixed)
            .expect("explicit registration may override a default");
        let error = validate_registration("x", after_fixed, EntryKind::Fixed)
            .expect_err("second explicit registration is rejected");
        assert_eq!(error.kind, CoreErrorKind::Configuration);
    }

    #[test]
    fn second_default_is_rejected() {
        let error = validate_registration("x", EntryKind::Default, EntryKind::Default)
            .expect_err("defaults are set once");
        assert_eq!(error.kind, CoreErrorKind::Configuration);
        assert!(validate_registration("x", EntryKind::Fixed, EntryKind::Default).is_err());
    }
}
