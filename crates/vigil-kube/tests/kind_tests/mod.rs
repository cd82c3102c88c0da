//! Integration tests for vigil against a kind cluster
//!
//! These tests tell the story of an e2e suite bringing up a dependency,
//! waiting for it, and talking to it through a tunnel.
//!
//! - `readiness`: deploy a manifest directory, wait for it, time out on
//!   resources that never appear
//! - `forwarding`: select a pod by labels and exchange bytes through a tunnel
//!
//! # Running These Tests
//!
//! These tests are ignored by default because they require a kind cluster:
//!
//! ```bash
//! # Creates the cluster on first run, reuses it afterwards
//! cargo test -p vigil-kube --test kind -- --ignored --nocapture
//!
//! # Point at an existing cluster instead
//! VIGIL_KUBECONFIG=/path/to/kubeconfig VIGIL_CONTEXT=my-context \
//!   cargo test -p vigil-kube --test kind -- --ignored
//! ```

mod forwarding;
mod helpers;
mod readiness;
