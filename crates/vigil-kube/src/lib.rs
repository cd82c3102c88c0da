//! Kubernetes backing for vigil
//!
//! Implements the observation and forwarding traits from `vigil-core` with
//! kube-rs, and adds what an e2e suite needs around them: client setup,
//! configuration, manifest directories and the [`Harness`] operations.

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod harness;
pub mod manifest;
pub mod observer;
pub mod transport;
pub mod yaml;

pub use config::HarnessConfig;
pub use harness::{component_query, Harness};
pub use observer::KubeObserver;
pub use transport::PodPortForward;
