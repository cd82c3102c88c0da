//! Stories about waiting for dependencies to come up

use std::time::Duration;

use vigil_core::condition::{status_condition_true, CONDITION_AVAILABLE};
use vigil_core::observe::{ResourceKind, ResourceRef};
use vigil_core::Error;

use super::helpers::{create_test_namespace, delete_test_namespace, ensure_test_harness};

/// Story: a test suite deploys its database and blocks until it is available
///
/// The manifest directory carries no namespace; the harness points every
/// document at the test namespace before applying.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_deploy_and_wait_for_dependency() {
    let harness = ensure_test_harness(Duration::from_secs(300)).await;
    let client = harness.client().expect("connected harness").clone();
    let namespace = create_test_namespace(&client, "vigil-ready").await;

    let state = harness
        .deploy_and_wait("nginx", &namespace)
        .await
        .expect("nginx becomes available");

    assert_eq!(state.name, "nginx");
    assert_eq!(state.namespace.as_deref(), Some(namespace.as_str()));
    assert!(state.has_condition(CONDITION_AVAILABLE));

    delete_test_namespace(&client, &namespace).await;
}

/// Story: a dependency that never shows up fails with a readable timeout
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_absent_deployment_times_out() {
    let harness = ensure_test_harness(Duration::from_secs(6)).await;
    let client = harness.client().expect("connected harness").clone();
    let namespace = create_test_namespace(&client, "vigil-timeout").await;

    let err = harness
        .wait_for_deployment(&namespace, "never-deployed")
        .await
        .expect_err("nothing deployed");

    match &err {
        Error::Timeout { description, .. } => {
            assert!(description.contains("never-deployed"), "{description}");
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    delete_test_namespace(&client, &namespace).await;
}

/// Story: waiting on a single resource treats "not created yet" as pending
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_missing_resource_is_pending_not_error() {
    let harness = ensure_test_harness(Duration::from_secs(4)).await;
    let client = harness.client().expect("connected harness").clone();
    let namespace = create_test_namespace(&client, "vigil-pending").await;

    let target = ResourceRef::namespaced(ResourceKind::deployment(), &namespace, "ghost");
    let err = harness
        .poller()
        .wait_for(
            harness.poll_spec(),
            &target,
            &status_condition_true(CONDITION_AVAILABLE),
        )
        .await
        .expect_err("never created");

    assert!(err.is_timeout(), "absence must not be an observation error: {err}");
    assert!(err.to_string().contains("last observed: absent"));

    delete_test_namespace(&client, &namespace).await;
}
