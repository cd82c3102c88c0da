//! Stories about reaching a workload through a tunnel

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use vigil_core::{EndpointQuery, Error, MemoryLogSink, TunnelState};
use vigil_kube::component_query;

use super::helpers::{create_test_namespace, delete_test_namespace, ensure_test_harness};

/// Story: the test talks HTTP to a pod selected by its labels
///
/// The tunnel address is only handed out once the forward accepts
/// connections, so the first request goes straight through.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_forward_to_selected_pod() {
    let harness = ensure_test_harness(Duration::from_secs(300)).await;
    let client = harness.client().expect("connected harness").clone();
    let namespace = create_test_namespace(&client, "vigil-forward").await;

    harness
        .deploy_and_wait("nginx", &namespace)
        .await
        .expect("nginx available");

    let sink = MemoryLogSink::new();
    let mut tunnel = harness
        .forward_to_frontend(
            &namespace,
            &component_query("nginx", "frontend", "1.27"),
            80,
            Arc::new(sink.clone()),
        )
        .await
        .expect("tunnel ready");
    assert_eq!(tunnel.state(), TunnelState::Ready);

    let mut stream = TcpStream::connect(tunnel.address()).await.expect("connect");
    stream
        .write_all(b"GET / HTTP/1.0\r\nHost: localhost\r\n\r\n")
        .await
        .expect("send request");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read response");
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");

    tunnel.close().await.expect("clean close");
    assert!(TcpStream::connect(tunnel.address()).await.is_err());
    assert!(sink.contains("Handling connection for 80"));

    delete_test_namespace(&client, &namespace).await;
}

/// Story: asking for a component that doesn't exist fails fast with the selector
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_no_matching_pod() {
    let harness = ensure_test_harness(Duration::from_secs(30)).await;
    let client = harness.client().expect("connected harness").clone();
    let namespace = create_test_namespace(&client, "vigil-nomatch").await;

    let query = EndpointQuery::new().require("app.kubernetes.io/component", ["frontend", "web"]);
    let err = harness
        .forward_to_frontend(&namespace, &query, 7233, Arc::new(MemoryLogSink::new()))
        .await
        .expect_err("empty namespace");

    match err {
        Error::NotFound { selector, .. } => {
            assert_eq!(selector, "app.kubernetes.io/component in (frontend,web)");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }

    delete_test_namespace(&client, &namespace).await;
}
