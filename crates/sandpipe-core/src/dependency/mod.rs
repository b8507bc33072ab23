//! Named service registry with lazy construction.
//!
//! Services are registered under a name with a factory. Static services are
//! built on first request and cached; non-static ones are built on every
//! request. A provider may chain to a parent: names missing locally resolve
//! through the parent, so scoped overrides never leak upward.
//!
//! Factories must not depend on each other in a cycle: a cycle between two
//! static services deadlocks on their instance slots.

mod entry;

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

pub use entry::{EntryKind, validate_registration};

use crate::models::{CoreError, CoreErrorKind, CoreResult};
use entry::ServiceEntry;

pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

pub type ServiceFactory =
    Arc<dyn Fn(&DependencyProvider) -> CoreResult<ServiceInstance> + Send + Sync>;

/// Introspection view of one registered name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub is_static: bool,
    pub is_default: bool,
    pub is_built: bool,
}

#[derive(Default)]
pub struct DependencyProvider {
    parent: Option<Arc<DependencyProvider>>,
    pool: RwLock<HashMap<String, Arc<ServiceEntry>>>,
}

impl DependencyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Arc<DependencyProvider>) -> Self {
        Self {
            parent: Some(parent),
            pool: RwLock::new(HashMap::new()),
        }
    }

    pub fn parent(&self) -> Option<&Arc<DependencyProvider>> {
        self.parent.as_ref()
    }

    pub fn get(&self, name: &str) -> CoreResult<ServiceInstance> {
        let local = self
            .pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();

        match (local, &self.parent) {
            (Some(entry), _) => entry.resolve(self),
            (None, Some(parent)) => parent.get(name),
            (None, None) => Err(CoreError::new(
                CoreErrorKind::UnknownService,
                format!("unknown service '{name}'"),
            )),
        }
    }

    /// Resolves `name` and checks that the instance has type `T`.
    pub fn get_as<T: Any + Send + Sync>(&self, name: &str) -> CoreResult<Arc<T>> {
        self.get(name)?.downcast::<T>().map_err(|_| {
            CoreError::new(
                CoreErrorKind::Configuration,
                format!(
                    "service '{name}' is not a {}",
                    std::any::type_name::<T>()
                ),
            )
        })
    }

    /// Registers a static service; fails if an explicit one already exists.
    pub fn add_service<T, F>(&self, name: &str, factory: F) -> CoreResult<()>
    where
        T: Any + Send + Sync,
        F: Fn(&DependencyProvider) -> CoreResult<Arc<T>> + Send + Sync + 'static,
    {
        self.register(name, EntryKind::Fixed, true, erase(factory))
    }

    /// Registers a static default that one explicit registration may replace.
    pub fn add_default_service<T, F>(&self, name: &str, factory: F) -> CoreResult<()>
    where
        T: Any + Send + Sync,
        F: Fn(&DependencyProvider) -> CoreResult<Arc<T>> + Send + Sync + 'static,
    {
        self.register(name, EntryKind::Default, true, erase(factory))
    }

    /// Registers a factory whose instances are built on every request.
    pub fn add_factory<T, F>(&self, name: &str, factory: F) -> CoreResult<()>
    where
        T: Any + Send + Sync,
        F: Fn(&DependencyProvider) -> CoreResult<Arc<T>> + Send + Sync + 'static,
    {
        self.register(name, EntryKind::Fixed, false, erase(factory))
    }

    pub fn add_default_factory<T, F>(&self, name: &str, factory: F) -> CoreResult<()>
    where
        T: Any + Send + Sync,
        F: Fn(&DependencyProvider) -> CoreResult<Arc<T>> + Send + Sync + 'static,
    {
        self.register(name, EntryKind::Default, false, erase(factory))
    }

    /// Effective registrations: parent entries shadowed by local ones.
    pub fn get_all(&self) -> BTreeMap<String, ServiceDescriptor> {
        let mut all = self
            .parent
            .as_ref()
            .map(|parent| parent.get_all())
            .unwrap_or_default();

        let pool = self.pool.read().unwrap_or_else(PoisonError::into_inner);
        for (name, entry) in pool.iter() {
            all.insert(
                name.clone(),
                ServiceDescriptor {
                    name: name.clone(),
                    is_static: entry.is_static,
                    is_default: entry.kind == EntryKind::Default,
                    is_built: entry.is_built(),
                },
            );
        }
        all
    }

    fn register(
        &self,
        name: &str,
        requested: EntryKind,
        is_static: bool,
        factory: ServiceFactory,
    ) -> CoreResult<()> {
        let mut pool = self.pool.write().unwrap_or_else(PoisonError::into_inner);
        let current = pool
            .get(name)
            .map(|entry| entry.kind)
            .unwrap_or(EntryKind::Unset);
        let kind = validate_registration(name, current, requested)?;

        tracing::debug!(service = name, ?kind, is_static, "service registered");
        pool.insert(
            name.to_string(),
            Arc::new(ServiceEntry::new(kind, is_static, factory)),
        );
        Ok(())
    }
}

fn erase<T, F>(factory: F) -> ServiceFactory
where
    T: Any + Send + Sync,
    F: Fn(&DependencyProvider) -> CoreResult<Arc<T>> + Send + Sync + 'static,
{
    Arc::new(move |provider: &DependencyProvider| {
        factory(provider).map(|instance| instance as ServiceInstance)
    })
}
