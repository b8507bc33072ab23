use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sandpipe_core::config::EngineConfig;
use sandpipe_core::coordination::{BarrierState, SharedMutex, WaitManager};
use sandpipe_core::dependency::DependencyProvider;
use sandpipe_core::models::CoreErrorKind;
use sandpipe_core::scope::Scope;

fn root_scope() -> Scope {
    Scope::root(EngineConfig::default(), Arc::new(DependencyProvider::new()))
}

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[tokio::test]
async fn waiter_resumes_after_signal() {
    let scope = root_scope();
    let waits = Arc::new(WaitManager::new());
    assert!(waits.register("a"));

    let waiter = tokio::spawn({
        let waits = waits.clone();
        let scope = scope.clone();
        async move { waits.wait_for(&scope, &names(&["a"])).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    assert!(waits.signal("a"));
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should resume")
        .expect("join should succeed")
        .expect("wait should succeed");
}

#[test]
fn signal_takes_effect_once() {
    let waits = WaitManager::new();
    waits.register("a");
    assert!(waits.signal("a"));
    assert!(!waits.signal("a"));
    assert_eq!(waits.state("a"), Some(BarrierState::Signaled));
}

#[test]
fn registering_a_name_twice_is_refused() {
    let waits = WaitManager::new();
    assert!(waits.register("a"));
    assert!(!waits.register("a"));
}

#[tokio::test]
async fn wait_on_signaled_barrier_returns_immediately() {
    let scope = root_scope();
    let waits = WaitManager::new();
    waits.register("a");
    waits.signal("a");

    tokio::time::timeout(Duration::from_millis(100), waits.wait_for(&scope, &names(&["a"])))
        .await
        .expect("must not block")
        .expect("barrier is signaled");
}

#[tokio::test]
async fn unknown_barrier_waits_for_late_registration() {
    let scope = root_scope();
    let waits = Arc::new(WaitManager::new());

    let waiter = tokio::spawn({
        let waits = waits.clone();
        let scope = scope.clone();
        async move { waits.wait_for(&scope, &names(&["late"])).await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(waits.register("late"));
    waits.signal("late");
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should resume")
        .expect("join should succeed")
        .expect("late barrier resolves the wait");
}

#[tokio::test]
async fn kill_unblocks_waiters_with_cancellation() {
    let scope = root_scope();
    let waits = Arc::new(WaitManager::new());

    let waiter = tokio::spawn({
        let waits = waits.clone();
        let scope = scope.child();
        async move {
            let result = waits.wait_for(&scope, &names(&["never"])).await;
            scope.close().await.expect("child closes");
            result
        }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    scope.kill();

    let error = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("kill must not hang")
        .expect("join should succeed")
        .expect_err("wait is cancelled");
    assert_eq!(error.kind, CoreErrorKind::Cancelled);
}

#[tokio::test]
async fn killed_scope_fails_new_waits_fast() {
    let scope = root_scope();
    scope.kill();
    let waits = WaitManager::new();

    let error = waits
        .wait_for(&scope, &names(&["x"]))
        .await
        .expect_err("killed scope rejects waits");
    assert_eq!(error.kind, CoreErrorKind::Cancelled);
}

#[tokio::test]
async fn rejected_barrier_fails_waiters_with_resolution_error() {
    let scope = root_scope();
    let waits = Arc::new(WaitManager::new());
    waits.register("known");
    waits.reference("typo");

    let waiter = tokio::spawn({
        let waits = waits.clone();
        let scope = scope.clone();
        async move { waits.wait_for(&scope, &names(&["typo"])).await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(waits.reject_unregistered(), vec!["typo".to_string()]);
    let error = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("rejection must not hang")
        .expect("join should succeed")
        .expect_err("unknown barrier");
    assert_eq!(error.kind, CoreErrorKind::Resolution);
    assert!(error.message.contains("typo"));
    assert_eq!(waits.state("known"), Some(BarrierState::Pending));

    assert!(waits.register("typo"), "a later registration starts fresh");
    assert_eq!(waits.state("typo"), Some(BarrierState::Pending));
}

#[tokio::test]
async fn same_resource_serializes_holders() {
    let scope = root_scope();
    let mutex = Arc::new(SharedMutex::new());
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let mutex = mutex.clone();
        let scope = scope.clone();
        let active = active.clone();
        let peak = peak.clone();
        handles.push(tokio::spawn(async move {
            let guard = mutex
                .lock_all(&scope, &names(&["res1"]))
                .await
                .expect("lock should succeed");
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            guard.unlock();
        }));
    }
    for handle in handles {
        handle.await.expect("join should succeed");
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(!mutex.is_locked("res1"));
}

#[tokio::test]
async fn disjoint_resources_do_not_contend() {
    let scope = root_scope();
    let mutex = SharedMutex::new();

    let first = mutex.lock(&scope, "res1").await.expect("res1");
    let second = tokio::time::timeout(Duration::from_millis(100), mutex.lock(&scope, "res2"))
        .await
        .expect("res2 must not wait for res1")
        .expect("res2");

    assert!(mutex.is_locked("res1"));
    assert!(mutex.is_locked("res2"));
    drop((first, second));
}

#[tokio::test]
async fn lock_sets_are_ordered_and_deduplicated() {
    let scope = root_scope();
    let mutex = SharedMutex::new();

    let guard = mutex
        .lock_all(&scope, &names(&["b", "a", "b"]))
        .await
        .expect("duplicates collapse instead of self-deadlocking");
    assert_eq!(guard.names(), &["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn opposite_declaration_orders_do_not_deadlock() {
    let scope = root_scope();
    let mutex = Arc::new(SharedMutex::new());

    let mut handles = Vec::new();
    for order in [["x", "y"], ["y", "x"]] {
        for _ in 0..10 {
            let mutex = mutex.clone();
            let scope = scope.clone();
            handles.push(tokio::spawn(async move {
                let guard = mutex.lock_all(&scope, &names(&order)).await.expect("locks");
                tokio::task::yield_now().await;
                drop(guard);
            }));
        }
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        for handle in handles {
            handle.await.expect("join should succeed");
        }
    })
    .await
    .expect("fixed lock order must not deadlock");
}

#[tokio::test]
async fn kill_releases_lock_waiters() {
    let scope = root_scope();
    let mutex = Arc::new(SharedMutex::new());
    let held = mutex.lock(&scope, "res").await.expect("first holder");

    let waiter = tokio::spawn({
        let mutex = mutex.clone();
        let scope = scope.clone();
        async move { mutex.lock(&scope, "res").await.map(|guard| guard.names().to_vec()) }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    scope.kill();

    let error = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("kill must not hang")
        .expect("join should succeed")
        .expect_err("lock wait is cancelled");
    assert_eq!(error.kind, CoreErrorKind::Cancelled);
    drop(held);
}

#[tokio::test]
async fn nested_table_relocks_held_names_privately() {
    let scope = root_scope();
    let outer = Arc::new(SharedMutex::new());
    let _held = outer.lock(&scope, "db").await.expect("outer task holds db");

    let nested = SharedMutex::nested(outer.clone(), names(&["db"]));
    let first = tokio::time::timeout(Duration::from_secs(1), nested.lock(&scope, "db"))
        .await
        .expect("held name must not wait on the enclosing holder")
        .expect("lock should succeed");
    assert!(nested.is_locked("db"));

    let blocked = tokio::time::timeout(Duration::from_millis(50), nested.lock(&scope, "db")).await;
    assert!(blocked.is_err(), "nested siblings still exclude each other");
    first.unlock();
}

#[tokio::test]
async fn nested_table_shares_names_the_caller_does_not_hold() {
    let scope = root_scope();
    let outer = Arc::new(SharedMutex::new());
    let nested = SharedMutex::nested(outer.clone(), names(&["db"]));

    let guard = nested.lock(&scope, "cache").await.expect("lock should succeed");
    assert!(outer.is_locked("cache"), "unheld names resolve through the enclosing table");
    assert_eq!(nested.tracked(), 0);

    let blocked = tokio::time::timeout(Duration::from_millis(50), outer.lock(&scope, "cache")).await;
    assert!(blocked.is_err());
    guard.unlock();
    assert!(!outer.is_locked("cache"));
}

#[tokio::test]
async fn prune_keeps_only_locks_in_use() {
    let scope = root_scope();
    let mutex = SharedMutex::new();
    let idle = mutex.lock(&scope, "idle").await.expect("lock should succeed");
    let _busy = mutex.lock(&scope, "busy").await.expect("lock should succeed");
    idle.unlock();
    assert_eq!(mutex.tracked(), 2);

    mutex.prune();

    assert_eq!(mutex.tracked(), 1);
    assert!(mutex.is_locked("busy"));
}
