//! Status tracking and scheduling across stacks sharing one repository.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_yaml::Value;

use common::{LockEvent, TestHarness};
use stackcd::manifest::ValuesMap;
use stackcd::stack::{ReconcileOptions, ReconcileStep};
use stackcd::{Controller, ResolverChain, Scheduler, StackCdError};

const COMPOSE: &str = "services:\n  api:\n    image: example/api:1.0\n";

fn controller(harness: &TestHarness, stacks: &[(&str, &str)]) -> Arc<Controller> {
    let stacks = stacks
        .iter()
        .map(|(name, compose)| harness.stack(name, compose))
        .collect();
    Arc::new(Controller::new(harness.default_reconciler(), stacks))
}

#[test]
fn test_status_follows_reconciliations() {
    let harness = TestHarness::new();
    let controller = controller(&harness, &[("web", "compose.yaml")]);

    let status = controller.status("web").unwrap();
    assert_eq!(status.repo_url, "https://git.example.com/infra.git");
    assert!(status.revision.is_empty());

    harness.remote.commit("1111111", &[("compose.yaml", COMPOSE)]);
    controller.reconcile_stack("web").unwrap();
    let status = controller.status("web").unwrap();
    assert_eq!(status.revision, "1111111");
    assert!(status.error.is_empty());
    assert!(!status.templated);

    // Pull failures keep the last known revision.
    harness.remote.break_with("connection timed out");
    assert!(controller.reconcile_stack("web").is_err());
    let status = controller.status("web").unwrap();
    assert_eq!(status.revision, "1111111");
    assert!(status.error.starts_with("web stack failed while pulling"));

    // Later failures report the revision they happened at.
    harness.remote.heal();
    harness
        .remote
        .commit("2222222", &[("compose.yaml", "services: [unclosed\n")]);
    assert!(controller.reconcile_stack("web").is_err());
    let status = controller.status("web").unwrap();
    assert_eq!(status.revision, "2222222");
    assert!(status.error.starts_with("web stack failed while rendering"));

    harness.remote.commit("3333333", &[("compose.yaml", COMPOSE)]);
    controller.reconcile_stack("web").unwrap();
    let status = controller.status("web").unwrap();
    assert_eq!(status.revision, "3333333");
    assert!(status.error.is_empty());
}

#[test]
fn test_status_snapshot_serializes_camel_case() {
    let harness = TestHarness::new();
    let controller = controller(&harness, &[("api", "api.yaml"), ("web", "web.yaml")]);

    let statuses = controller.statuses();
    assert_eq!(statuses.keys().collect::<Vec<_>>(), vec!["api", "web"]);

    let json = serde_json::to_value(&statuses["web"]).unwrap();
    assert_eq!(json["repoUrl"], "https://git.example.com/infra.git");
    assert_eq!(json["templated"], false);
}

#[test]
fn test_unknown_stack() {
    let harness = TestHarness::new();
    let controller = controller(&harness, &[("web", "compose.yaml")]);

    assert!(matches!(
        controller.reconcile_stack("db"),
        Err(StackCdError::UnknownStack(name)) if name == "db"
    ));

    let scheduler = Scheduler::new(controller, 1, Duration::from_secs(60)).unwrap();
    assert!(matches!(
        scheduler.trigger_stack("db"),
        Err(StackCdError::UnknownStack(_))
    ));
    scheduler.stop();
}

#[test]
fn test_shared_repository_is_never_used_concurrently() {
    let harness = TestHarness::new();
    let names = ["api", "web", "worker", "cron"];
    let manifests = |tag: &str| -> Vec<(String, String)> {
        names
            .iter()
            .map(|name| {
                (
                    format!("{}.yaml", name),
                    format!("services:\n  {}:\n    image: example/{}:{}\n", name, name, tag),
                )
            })
            .collect()
    };
    let commit = |revision: &str, files: &[(String, String)]| {
        let files: Vec<(&str, &str)> = files
            .iter()
            .map(|(path, content)| (path.as_str(), content.as_str()))
            .collect();
        harness.remote.commit(revision, &files);
    };
    let files = manifests("1.0");
    commit("1111111", &files);

    let stacks: Vec<(&str, &str)> = names
        .iter()
        .zip(files.iter())
        .map(|(name, (path, _))| (*name, path.as_str()))
        .collect();
    let controller = controller(&harness, &stacks);
    let scheduler = Scheduler::new(Arc::clone(&controller), 4, Duration::from_secs(60)).unwrap();

    let assert_serialized = |cycles: usize| {
        let events = harness.remote.lock_events();
        assert_eq!(harness.remote.overlapping_pulls(), 0, "{events:?}");
        assert_eq!(
            events.iter().filter(|e| **e == LockEvent::Pulled).count(),
            cycles * names.len()
        );
        assert_eq!(events.last(), Some(&LockEvent::Released));
    };

    let results = scheduler.run_cycle();
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.success && r.deployed));
    assert_eq!(harness.deployer.deploys().len(), 4);
    assert_serialized(1);

    // Nothing changed, so the next cycle deploys nothing.
    let results = scheduler.run_cycle();
    assert!(results.iter().all(|r| r.success && !r.deployed));
    assert_eq!(harness.deployer.deploys().len(), 4);
    assert_serialized(2);

    harness.remote.break_with("connection timed out");
    let results = scheduler.run_cycle();
    assert!(results.iter().all(|r| !r.success));
    assert_serialized(3);

    harness.remote.heal();
    commit("2222222", &manifests("2.0"));
    harness.deployer.failing(true);
    let results = scheduler.run_cycle();
    assert!(results.iter().all(|r| !r.success));
    assert_eq!(harness.deployer.deploys().len(), 4);
    assert_serialized(4);

    scheduler.stop();
}

#[test]
fn test_render_stack_uses_working_tree_only() {
    let harness = TestHarness::new();
    let mut global = ValuesMap::new();
    global.insert("tag".to_string(), Value::from("1.0"));
    let reconciler = harness.reconciler(
        ResolverChain::new(),
        ReconcileOptions {
            global_values: global,
            ..ReconcileOptions::default()
        },
    );
    let controller = Controller::new(reconciler, vec![harness.stack("web", "compose.yaml")]);

    std::fs::write(
        harness.workdir().join("compose.yaml"),
        "services:\n  api:\n    image: example/api:{{ Values.tag }}\n",
    )
    .unwrap();
    // Commits that were never pulled do not affect the render.
    harness.remote.commit(
        "2222222",
        &[("compose.yaml", "services:\n  api:\n    image: example/api:2.0\n")],
    );
    let status_before = controller.status("web").unwrap();

    let rendered = controller.render_stack("web").unwrap();
    assert_eq!(
        String::from_utf8(rendered.bytes).unwrap(),
        "services:\n  api:\n    image: example/api:1.0\n"
    );
    assert!(rendered.templated);

    assert!(harness.deployer.deploys().is_empty());
    assert_eq!(controller.status("web").unwrap(), status_before);
    assert_eq!(harness.remote.lock_events(), vec![LockEvent::Released]);

    assert!(matches!(
        controller.render_stack("db"),
        Err(StackCdError::UnknownStack(name)) if name == "db"
    ));
}

#[test]
fn test_render_stack_reports_rendering_errors() {
    let harness = TestHarness::new();
    let controller = controller(&harness, &[("web", "compose.yaml")]);
    harness
        .remote
        .commit("1111111", &[("compose.yaml", "services: [unclosed\n")]);
    assert!(controller.reconcile_stack("web").is_err());

    match controller.render_stack("web") {
        Err(StackCdError::Reconcile(e)) => {
            assert_eq!(e.step, ReconcileStep::Rendering);
            assert!(e.revision.is_none());
        }
        other => panic!("expected a rendering error, got {other:?}"),
    }
}

#[test]
fn test_manual_trigger_runs_on_the_pool() {
    let harness = TestHarness::new();
    harness.remote.commit("1111111", &[("compose.yaml", COMPOSE)]);
    let controller = controller(&harness, &[("web", "compose.yaml")]);
    let scheduler = Scheduler::new(Arc::clone(&controller), 2, Duration::from_secs(60)).unwrap();

    scheduler.trigger_stack("web").unwrap();

    let mut waited = Duration::ZERO;
    while controller.status("web").unwrap().revision.is_empty() && waited < Duration::from_secs(5) {
        std::thread::sleep(Duration::from_millis(10));
        waited += Duration::from_millis(10);
    }
    assert_eq!(controller.status("web").unwrap().revision, "1111111");
    assert_eq!(harness.deployer.deploys().len(), 1);

    scheduler.stop();
}
