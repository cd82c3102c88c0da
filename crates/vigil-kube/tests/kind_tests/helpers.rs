//! Test helpers for integration tests
//!
//! Provides utilities for managing the kind cluster and per-test namespaces.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use vigil_core::telemetry::init_test_tracing;
use vigil_kube::{Harness, HarnessConfig};

/// Name of the kind cluster used for integration tests
pub const TEST_CLUSTER_NAME: &str = "vigil-integration-test";

/// Global lock to ensure cluster is created only once
static CLUSTER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

static NAMESPACE_SEQ: AtomicU32 = AtomicU32::new(0);

/// Check if a kind cluster with the given name exists
pub fn kind_cluster_exists(name: &str) -> bool {
    let Ok(output) = Command::new("kind").args(["get", "clusters"]).output() else {
        return false;
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .any(|line| line.trim() == name)
}

/// Create a kind cluster for testing
pub fn create_kind_cluster(name: &str) -> Result<(), String> {
    if kind_cluster_exists(name) {
        println!("Kind cluster '{name}' already exists, reusing it");
        return Ok(());
    }

    println!("Creating kind cluster '{name}'...");
    let output = Command::new("kind")
        .args(["create", "cluster", "--name", name, "--wait", "60s"])
        .output()
        .map_err(|e| format!("failed to run kind: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "failed to create kind cluster: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    println!("Kind cluster '{name}' created successfully");
    Ok(())
}

/// Manifest directories shipped with the tests
pub fn testdata_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/testdata")
}

/// Harness config for the test cluster
///
/// `VIGIL_*` variables win; otherwise the kind context is used.
pub fn test_config(poll_timeout: Duration) -> HarnessConfig {
    let config = HarnessConfig::from_env().expect("valid VIGIL_* environment");
    let config = if config.kubeconfig.is_none() && config.context.is_none() {
        config.with_context(format!("kind-{TEST_CLUSTER_NAME}"))
    } else {
        config
    };
    config
        .with_polling(Duration::from_secs(2), poll_timeout)
        .with_manifest_root(testdata_root())
}

/// Ensure the test cluster exists and connect a harness to it
pub async fn ensure_test_harness(poll_timeout: Duration) -> Harness {
    init_test_tracing();

    let external = std::env::var("VIGIL_KUBECONFIG").is_ok();
    if !external {
        let created = CLUSTER_INIT.get_or_init(|| create_kind_cluster(TEST_CLUSTER_NAME));
        if let Err(e) = created {
            panic!("kind cluster unavailable: {e}");
        }
    }

    Harness::connect(test_config(poll_timeout))
        .await
        .expect("connect to test cluster")
}

/// Create a fresh namespace for one test
pub async fn create_test_namespace(client: &Client, prefix: &str) -> String {
    let name = format!(
        "{prefix}-{}-{}",
        std::process::id(),
        NAMESPACE_SEQ.fetch_add(1, Ordering::SeqCst)
    );
    let namespace: Namespace = serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {"name": name, "labels": {"vigil.dev/test": "true"}}
    }))
    .expect("valid namespace");

    Api::<Namespace>::all(client.clone())
        .create(&PostParams::default(), &namespace)
        .await
        .expect("create namespace");
    name
}

/// Delete a test namespace without waiting for finalizers
pub async fn delete_test_namespace(client: &Client, name: &str) {
    let _ = Api::<Namespace>::all(client.clone())
        .delete(name, &DeleteParams::background())
        .await;
}
