use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

use crate::models::{CoreError, CoreErrorKind, CoreResult, error::cancelled_error};
use crate::scope::Scope;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BarrierState {
    Pending,
    Signaled,
    /// Referenced by a waiter but never registered by any task.
    Unresolved,
}

struct Barrier {
    registered: bool,
    state: watch::Sender<BarrierState>,
}

impl Barrier {
    fn new(registered: bool) -> Self {
        let (state, _) = watch::channel(BarrierState::Pending);
        Self { registered, state }
    }
}

/// One-shot barriers keyed by task name.
#[derive(Default)]
pub struct WaitManager {
    barriers: Mutex<HashMap<String, Barrier>>,
}

impl WaitManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pending barrier for `name` if none is registered yet.
    /// Returns `false` when a task already registered the name.
    pub fn register(&self, name: &str) -> bool {
        let mut barriers = self.lock_barriers();
        match barriers.get_mut(name) {
            Some(barrier) if barrier.registered => false,
            Some(barrier) => {
                barrier.registered = true;
                if *barrier.state.borrow() == BarrierState::Unresolved {
                    *barrier = Barrier::new(true);
                }
                true
            }
            None => {
                barriers.insert(name.to_string(), Barrier::new(true));
                true
            }
        }
    }

    /// Records that a waiter depends on `name` without registering it.
    pub fn reference(&self, name: &str) {
        self.lock_barriers()
            .entry(name.to_string())
            .or_insert_with(|| Barrier::new(false));
    }

    /// Marks the barrier done. Only the first call has an effect; later
    /// calls return `false`.
    pub fn signal(&self, name: &str) -> bool {
        let mut barriers = self.lock_barriers();
        let barrier = barriers
            .entry(name.to_string())
            .or_insert_with(|| Barrier::new(true));
        barrier.registered = true;
        let signaled = barrier.state.send_if_modified(|state| {
            if *state == BarrierState::Signaled {
                false
            } else {
                *state = BarrierState::Signaled;
                true
            }
        });
        if signaled {
            tracing::debug!(barrier = name, "barrier signaled");
        }
        signaled
    }

    pub fn state(&self, name: &str) -> Option<BarrierState> {
        self.lock_barriers()
            .get(name)
            .map(|barrier| *barrier.state.borrow())
    }

    /// Resolves every referenced-but-unregistered barrier as unknown so its
    /// waiters fail instead of blocking forever. Returns the names, sorted.
    pub fn reject_unregistered(&self) -> Vec<String> {
        let barriers = self.lock_barriers();
        let mut rejected = Vec::new();
        for (name, barrier) in barriers.iter() {
            if barrier.registered {
                continue;
            }
            let changed = barrier.state.send_if_modified(|state| {
                if *state == BarrierState::Pending {
                    *state = BarrierState::Unresolved;
                    true
                } else {
                    false
                }
            });
            if changed {
                rejected.push(name.clone());
            }
        }
        rejected.sort();
        if !rejected.is_empty() {
            tracing::warn!(barriers = ?rejected, "waits reference barriers no task registered");
        }
        rejected
    }

    /// Suspends until every named barrier is signaled. Fails with a
    /// cancellation error as soon as `scope` is killed, and with a
    /// resolution error for barriers resolved as unknown.
    pub async fn wait_for(&self, scope: &Scope, names: &[String]) -> CoreResult<()> {
        for name in names {
            if scope.is_killed() {
                return Err(cancelled_error(None, format!("wait for '{name}' cancelled")));
            }

            let mut receiver = {
                let mut barriers = self.lock_barriers();
                barriers
                    .entry(name.clone())
                    .or_insert_with(|| Barrier::new(false))
                    .state
                    .subscribe()
            };

            let state = tokio::select! {
                state = receiver.wait_for(|state| *state != BarrierState::Pending) => {
                    state.map(|state| *state).map_err(|_| {
                        CoreError::new(
                            CoreErrorKind::Internal,
                            format!("barrier '{name}' was dropped while waiting"),
                        )
                    })?
                }
                _ = scope.cancelled() => {
                    return Err(cancelled_error(None, format!("wait for '{name}' cancelled")));
                }
            };

            if state == BarrierState::Unresolved {
                return Err(CoreError::new(
                    CoreErrorKind::Resolution,
                    format!("unknown barrier '{name}': no task with that name was started"),
                ));
            }
        }
        Ok(())
    }

    /// Forgets every barrier. Waiters still blocked see an internal error.
    pub fn clear(&self) {
        self.lock_barriers().clear();
    }

    fn lock_barriers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Barrier>> {
        self.barriers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
