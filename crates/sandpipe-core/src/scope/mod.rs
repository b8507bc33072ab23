//! Hierarchical execution contexts.
//!
//! A [`Scope`] carries key/value data, synchronous events, a cancellation
//! signal shared with the whole tree, an outstanding-work counter and the
//! errors reported by its subtree. Child scopes hold their parent by
//! reference; creating one counts as a unit of outstanding work on the
//! parent until the child is closed.

mod counter;
mod data;
mod events;
mod injector;
mod signal;

use std::collections::HashSet;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub use data::{DataStore, ScopeValue};
pub use events::EventHandler;
pub use injector::{DataInjector, Injectable, Injector, Slot, string_value};

use crate::config::EngineConfig;
use crate::dependency::DependencyProvider;
use crate::models::{CoreError, CoreErrorKind, CoreResult, ScopeErrors};
use counter::TaskCounter;
use events::EventRegistry;
use signal::CancelSignal;

/// Triggered on the root scope the first time any scope of the tree is killed.
pub const KILL_EVENT: &str = "scope.kill";

#[derive(Default)]
pub struct ScopeOptions {
    data: Option<DataStore>,
    injectors: Vec<Arc<dyn Injector>>,
    provider: Option<Arc<DependencyProvider>>,
}

impl ScopeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(mut self, data: DataStore) -> Self {
        self.data = Some(data);
        self
    }

    pub fn injector(mut self, injector: Arc<dyn Injector>) -> Self {
        self.injectors.push(injector);
        self
    }

    /// Replaces the inherited provider, typically with a sub-provider.
    pub fn provider(mut self, provider: Arc<DependencyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }
}

#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    parent: Option<Scope>,
    config: Arc<EngineConfig>,
    provider: Arc<DependencyProvider>,
    data: DataStore,
    events: EventRegistry,
    signal: Arc<CancelSignal>,
    tasks: TaskCounter,
    errors: Mutex<Vec<CoreError>>,
    injectors: Vec<Arc<dyn Injector>>,
    closed: AtomicBool,
}

impl Scope {
    pub fn root(config: EngineConfig, provider: Arc<DependencyProvider>) -> Self {
        Self::root_with(config, provider, ScopeOptions::new())
    }

    pub fn root_with(
        config: EngineConfig,
        provider: Arc<DependencyProvider>,
        options: ScopeOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                parent: None,
                config: Arc::new(config),
                provider: options.provider.unwrap_or(provider),
                data: options.data.unwrap_or_default(),
                events: EventRegistry::default(),
                signal: Arc::new(CancelSignal::new()),
                tasks: TaskCounter::new(),
                errors: Mutex::new(Vec::new()),
                injectors: options.injectors,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn child(&self) -> Self {
        self.child_with(ScopeOptions::new())
    }

    /// Creates a child scope and counts it as outstanding work on `self`
    /// until [`Scope::close`] is called on the child.
    pub fn child_with(&self, options: ScopeOptions) -> Self {
        self.add_tasks(1);
        Self {
            inner: Arc::new(ScopeInner {
                parent: Some(self.clone()),
                config: self.inner.config.clone(),
                provider: options
                    .provider
                    .unwrap_or_else(|| self.inner.provider.clone()),
                data: options.data.unwrap_or_default(),
                events: EventRegistry::default(),
                signal: self.inner.signal.clone(),
                tasks: TaskCounter::new(),
                errors: Mutex::new(Vec::new()),
                injectors: options.injectors,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    pub fn root_scope(&self) -> Scope {
        let mut current = self.clone();
        while let Some(parent) = current.inner.parent.clone() {
            current = parent;
        }
        current
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn provider(&self) -> &Arc<DependencyProvider> {
        &self.inner.provider
    }

    pub fn data(&self) -> &DataStore {
        &self.inner.data
    }

    pub fn set<T: std::any::Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.inner.data.set(key, value);
    }

    /// Looks the key up in this scope, then in each ancestor.
    pub fn get_value(&self, key: &str) -> Option<ScopeValue> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(value) = scope.inner.data.get_value(key) {
                return Some(value);
            }
            current = scope.inner.parent.as_ref();
        }
        None
    }

    pub fn get<T: std::any::Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get_value(key)?.downcast::<T>().ok()
    }

    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Scope) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.inner.events.on(event, Arc::new(handler));
    }

    /// Runs this scope's handlers for `event` in registration order and
    /// stops at the first failing handler.
    pub fn trigger(&self, event: &str) -> CoreResult<()> {
        for handler in self.inner.events.handlers_for(event) {
            handler(self)?;
        }
        Ok(())
    }

    pub fn add_tasks(&self, delta: usize) {
        self.inner.tasks.add(delta);
    }

    pub fn done_task(&self) -> CoreResult<()> {
        self.inner.tasks.done()
    }

    pub fn outstanding_tasks(&self) -> usize {
        self.inner.tasks.outstanding()
    }

    /// Blocks until the outstanding-work counter reaches zero, then reports
    /// the errors collected by this subtree.
    pub async fn wait(&self) -> Result<(), ScopeErrors> {
        self.inner.tasks.idle().await;
        self.to_result()
    }

    pub fn kill(&self) {
        if self.inner.signal.kill() {
            tracing::debug!("scope tree killed");
            let root = self.root_scope();
            if let Err(error) = root.trigger(KILL_EVENT) {
                tracing::warn!(kind = ?error.kind, message = %error.message, "kill handler failed");
            }
        }
    }

    pub fn is_killed(&self) -> bool {
        self.inner.signal.is_killed()
    }

    /// Resolves once the shared signal is killed.
    pub async fn cancelled(&self) {
        self.inner.signal.cancelled().await
    }

    /// Records the error here and in every ancestor, and kills the tree.
    pub fn append_error(&self, error: CoreError) {
        self.append_errors(vec![error]);
    }

    pub fn append_errors(&self, errors: Vec<CoreError>) {
        if errors.is_empty() {
            return;
        }
        self.kill();
        if let Some(parent) = &self.inner.parent {
            parent.append_errors(errors.clone());
        }
        self.lock_errors().extend(errors);
    }

    pub fn errors(&self) -> Vec<CoreError> {
        self.lock_errors().clone()
    }

    pub fn to_result(&self) -> Result<(), ScopeErrors> {
        let errors = self.errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ScopeErrors::new(errors))
        }
    }

    /// Fills `target` from this scope's injectors first and then from each
    /// ancestor's, so inner values shadow outer ones.
    pub fn inject_to(&self, target: &mut dyn Injectable) -> CoreResult<()> {
        let slots = target.slots();
        let mut filled = HashSet::new();
        let mut current = Some(self);
        while let Some(scope) = current {
            for injector in &scope.inner.injectors {
                for slot in slots {
                    if filled.contains(slot.key) {
                        continue;
                    }
                    if let Some(value) = injector.lookup(slot.key) {
                        target.fill(slot.key, &value)?;
                        filled.insert(slot.key);
                    }
                }
            }
            current = scope.inner.parent.as_ref();
        }

        if let Some(missing) = slots
            .iter()
            .find(|slot| slot.required && !filled.contains(slot.key))
        {
            return Err(CoreError::new(
                CoreErrorKind::MissingValue,
                format!("value for '{}' is unknown", missing.key),
            ));
        }
        Ok(())
    }

    /// Waits for children, then releases this scope's unit of work on the
    /// parent. Must be called exactly once per scope.
    pub async fn close(&self) -> Result<(), ScopeErrors> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::error!("scope closed more than once");
            return Err(ScopeErrors::new(vec![CoreError::new(
                CoreErrorKind::Internal,
                "scope closed more than once",
            )]));
        }

        let result = self.wait().await;
        if let Some(parent) = &self.inner.parent
            && let Err(error) = parent.done_task()
        {
            parent.append_error(error);
        }
        result
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn lock_errors(&self) -> std::sync::MutexGuard<'_, Vec<CoreError>> {
        self.inner
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debug for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("root", &self.is_root())
            .field("killed", &self.is_killed())
            .field("outstanding_tasks", &self.outstanding_tasks())
            .field("errors", &self.lock_errors().len())
            .finish()
    }
}
