use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{CoreResult, error::cancelled_error};
use crate::scope::Scope;

/// Named locks. Disjoint names never contend; names are created on demand.
#[derive(Default)]
pub struct SharedMutex {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    enclosing: Option<EnclosingLocks>,
}

/// The lock table of the pipeline a nested one runs inside, and the names
/// the enclosing task already holds there.
struct EnclosingLocks {
    mutex: Arc<SharedMutex>,
    held: BTreeSet<String>,
}

/// Holds a set of resource locks; dropping it releases all of them.
pub struct ResourceGuard {
    names: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ResourceGuard {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn unlock(self) {}
}

impl SharedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock table for a pipeline nested inside a task holding `held`.
    ///
    /// Held names get locks private to this table, so nested tasks still
    /// exclude each other on them without waiting for their own enclosing
    /// task. Every other name resolves through `enclosing`.
    pub fn nested(enclosing: Arc<SharedMutex>, held: impl IntoIterator<Item = String>) -> Self {
        Self {
            locks: StdMutex::default(),
            enclosing: Some(EnclosingLocks {
                mutex: enclosing,
                held: held.into_iter().collect(),
            }),
        }
    }

    pub async fn lock(&self, scope: &Scope, name: &str) -> CoreResult<ResourceGuard> {
        self.lock_all(scope, &[name.to_string()]).await
    }

    /// Acquires every named lock in lexicographic order, collapsing
    /// duplicates. Locks taken before a cancellation are released.
    pub async fn lock_all(&self, scope: &Scope, names: &[String]) -> CoreResult<ResourceGuard> {
        let ordered = names.iter().cloned().collect::<BTreeSet<_>>();
        let mut guards = Vec::with_capacity(ordered.len());

        for name in &ordered {
            if scope.is_killed() {
                return Err(cancelled_error(None, format!("lock on '{name}' cancelled")));
            }

            let lock = self.owner(name).lock_for(name);
            let guard = match lock.clone().try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::debug!(resource = %name, "waiting for contended resource");
                    tokio::select! {
                        guard = lock.lock_owned() => guard,
                        _ = scope.cancelled() => {
                            return Err(cancelled_error(None, format!("lock on '{name}' cancelled")));
                        }
                    }
                }
            };
            guards.push(guard);
        }

        Ok(ResourceGuard {
            names: ordered.into_iter().collect(),
            _guards: guards,
        })
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.owner(name)
            .table()
            .get(name)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of names this table currently tracks.
    pub fn tracked(&self) -> usize {
        self.table().len()
    }

    /// Forgets names that nobody holds or waits for.
    pub fn prune(&self) {
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        tracing::debug!(pruned = before - table.len(), "resource locks pruned");
    }

    /// The table a name is locked in: held names stay local to a nested
    /// table, everything else goes to the enclosing one.
    fn owner(&self, name: &str) -> &SharedMutex {
        match &self.enclosing {
            Some(enclosing) if !enclosing.held.contains(name) => enclosing.mutex.owner(name),
            _ => self,
        }
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.table()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
