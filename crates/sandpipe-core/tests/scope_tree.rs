use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sandpipe_core::config::EngineConfig;
use sandpipe_core::dependency::DependencyProvider;
use sandpipe_core::models::{CoreError, CoreErrorKind, CoreResult};
use sandpipe_core::scope::{
    DataInjector, DataStore, Injectable, KILL_EVENT, Scope, ScopeOptions, ScopeValue, Slot,
    string_value,
};

fn root_scope() -> Scope {
    Scope::root(EngineConfig::default(), Arc::new(DependencyProvider::new()))
}

#[tokio::test]
async fn balanced_counter_lets_wait_return() {
    let scope = root_scope();
    scope.add_tasks(3);
    for _ in 0..3 {
        scope.done_task().expect("done should succeed");
    }

    tokio::time::timeout(Duration::from_millis(200), scope.wait())
        .await
        .expect("wait should not block")
        .expect("no errors expected");
}

#[tokio::test]
async fn unbalanced_counter_keeps_wait_blocked() {
    let scope = root_scope();
    scope.add_tasks(2);
    scope.done_task().expect("done should succeed");

    let blocked = tokio::time::timeout(Duration::from_millis(100), scope.wait()).await;
    assert!(blocked.is_err(), "wait must block while work is outstanding");
    assert_eq!(scope.outstanding_tasks(), 1);
}

#[test]
fn done_without_outstanding_work_is_an_error() {
    let scope = root_scope();
    let error = scope.done_task().expect_err("underflow should be reported");
    assert_eq!(error.kind, CoreErrorKind::Internal);
}

#[tokio::test]
async fn child_counts_as_work_until_closed() {
    let root = root_scope();
    let child = root.child();
    assert_eq!(root.outstanding_tasks(), 1);

    let blocked = tokio::time::timeout(Duration::from_millis(50), root.wait()).await;
    assert!(blocked.is_err());

    child.close().await.expect("child closes cleanly");
    assert_eq!(root.outstanding_tasks(), 0);
    root.wait().await.expect("root has no errors");
}

#[tokio::test]
async fn close_waits_for_grandchildren() {
    let root = root_scope();
    let child = root.child();
    let grandchild = child.child();

    let closer = tokio::spawn({
        let child = child.clone();
        async move { child.close().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!closer.is_finished(), "close must wait for open children");

    grandchild.close().await.expect("grandchild closes");
    closer
        .await
        .expect("join should succeed")
        .expect("child closes cleanly");
    assert_eq!(root.outstanding_tasks(), 0);
}

#[tokio::test]
async fn closing_twice_is_reported() {
    let root = root_scope();
    let child = root.child();
    assert!(!child.is_closed());
    child.close().await.expect("first close succeeds");
    assert!(child.is_closed());

    let errors = child.close().await.expect_err("second close should fail");
    assert_eq!(errors.errors[0].kind, CoreErrorKind::Internal);
    assert_eq!(root.outstanding_tasks(), 0);
}

#[test]
fn killing_a_descendant_kills_the_whole_tree() {
    let root = root_scope();
    let left = root.child();
    let right = root.child();
    let leaf = left.child();

    leaf.kill();

    for scope in [&root, &left, &right, &leaf] {
        assert!(scope.is_killed());
    }
}

#[test]
fn appended_error_reaches_every_ancestor() {
    let root = root_scope();
    let child = root.child();
    let leaf = child.child();

    let error = CoreError::for_task("build", CoreErrorKind::ProcessFailure, "exit 2");
    leaf.append_error(error.clone());

    assert_eq!(leaf.errors(), vec![error.clone()]);
    assert_eq!(child.errors(), vec![error.clone()]);
    assert_eq!(root.errors(), vec![error]);
    assert!(root.is_killed());
}

#[test]
fn sibling_errors_stay_out_of_siblings() {
    let root = root_scope();
    let left = root.child();
    let right = root.child();

    left.append_error(CoreError::new(CoreErrorKind::Internal, "left failed"));

    assert!(right.errors().is_empty());
    assert_eq!(root.errors().len(), 1);
}

#[test]
fn kill_event_fires_once_on_root() {
    let root = root_scope();
    let fired = Arc::new(AtomicUsize::new(0));
    root.on(KILL_EVENT, {
        let fired = fired.clone();
        move |scope: &Scope| {
            assert!(scope.is_root());
            fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let child = root.child();
    child.kill();
    child.kill();
    root.kill();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn trigger_runs_handlers_in_order_and_stops_on_error() {
    let scope = root_scope();
    let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
    for (index, fail) in [(1, false), (2, true), (3, false)] {
        let calls = calls.clone();
        scope.on("step", move |_: &Scope| {
            calls.lock().expect("calls lock").push(index);
            if fail {
                Err(CoreError::new(CoreErrorKind::Internal, "handler failed"))
            } else {
                Ok(())
            }
        });
    }

    let error = scope.trigger("step").expect_err("second handler fails");
    assert_eq!(error.message, "handler failed");
    assert_eq!(*calls.lock().expect("calls lock"), vec![1, 2]);
}

#[test]
fn data_lookup_walks_parents_and_children_shadow() {
    let root = root_scope();
    root.set("region", "eu".to_string());
    root.set("tier", "gold".to_string());

    let child = root.child_with(ScopeOptions::new().data(DataStore::from_strings([("tier", "silver")])));

    assert_eq!(child.get::<String>("region").as_deref().map(String::as_str), Some("eu"));
    assert_eq!(child.get::<String>("tier").as_deref().map(String::as_str), Some("silver"));
    assert_eq!(root.get::<String>("tier").as_deref().map(String::as_str), Some("gold"));
    assert!(child.get::<String>("missing").is_none());
}

#[derive(Default)]
struct Target {
    name: String,
    region: Option<String>,
}

impl Injectable for Target {
    fn slots(&self) -> &'static [Slot] {
        const SLOTS: &[Slot] = &[Slot::required("name"), Slot::optional("region")];
        SLOTS
    }

    fn fill(&mut self, key: &str, value: &ScopeValue) -> CoreResult<()> {
        let text = string_value(key, value)?;
        match key {
            "name" => self.name = text,
            _ => self.region = Some(text),
        }
        Ok(())
    }
}

#[test]
fn injection_prefers_inner_scopes() {
    let outer = DataStore::from_strings([("name", "outer"), ("region", "eu")]);
    let root = Scope::root_with(
        EngineConfig::default(),
        Arc::new(DependencyProvider::new()),
        ScopeOptions::new().injector(Arc::new(DataInjector::new(outer))),
    );
    let inner = DataStore::from_strings([("name", "inner")]);
    let child = root.child_with(ScopeOptions::new().injector(Arc::new(DataInjector::new(inner))));

    let mut target = Target::default();
    child.inject_to(&mut target).expect("injection should succeed");

    assert_eq!(target.name, "inner");
    assert_eq!(target.region.as_deref(), Some("eu"));
}

#[test]
fn missing_required_slot_names_the_key() {
    let root = root_scope();
    let mut target = Target::default();

    let error = root.inject_to(&mut target).expect_err("name is required");
    assert_eq!(error.kind, CoreErrorKind::MissingValue);
    assert!(error.message.contains("'name'"));
}

#[test]
fn wrongly_typed_value_is_rejected() {
    let data = DataStore::new();
    data.set("name", 42_u32);
    let root = Scope::root_with(
        EngineConfig::default(),
        Arc::new(DependencyProvider::new()),
        ScopeOptions::new().injector(Arc::new(DataInjector::new(data))),
    );

    let mut target = Target::default();
    let error = root.inject_to(&mut target).expect_err("value is not a string");
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
}
