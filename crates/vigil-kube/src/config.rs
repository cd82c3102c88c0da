//! Harness configuration
//!
//! Values resolve in this order, first hit wins:
//!
//! 1. Explicit `with_*` calls on [`HarnessConfig`]
//! 2. `VIGIL_*` environment variables
//! 3. A YAML/JSON config file, when one is loaded
//! 4. Built-in defaults
//!
//! ```bash
//! VIGIL_KUBECONFIG=/tmp/kind-e2e.kubeconfig
//! VIGIL_CONTEXT=kind-e2e
//! VIGIL_POLL_INTERVAL_SECS=2
//! VIGIL_POLL_TIMEOUT_SECS=600
//! VIGIL_TUNNEL_READY_TIMEOUT_SECS=30
//! VIGIL_MANIFEST_ROOT=testdata
//! VIGIL_LOG_FORMAT=json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use vigil_core::poller::{DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT};
use vigil_core::telemetry::LogFormat;
use vigil_core::tunnel::{TunnelOptions, DEFAULT_READY_TIMEOUT};
use vigil_core::{Error, PollSpec};

use crate::yaml::parse_documents;

/// Path to the kubeconfig used for every client
pub const ENV_KUBECONFIG: &str = "VIGIL_KUBECONFIG";
/// Kubeconfig context to select
pub const ENV_CONTEXT: &str = "VIGIL_CONTEXT";
/// Seconds between observations
pub const ENV_POLL_INTERVAL: &str = "VIGIL_POLL_INTERVAL_SECS";
/// Seconds before a wait gives up
pub const ENV_POLL_TIMEOUT: &str = "VIGIL_POLL_TIMEOUT_SECS";
/// Seconds a tunnel may take to become ready
pub const ENV_TUNNEL_READY_TIMEOUT: &str = "VIGIL_TUNNEL_READY_TIMEOUT_SECS";
/// Directory holding one manifest directory per test dependency
pub const ENV_MANIFEST_ROOT: &str = "VIGIL_MANIFEST_ROOT";
/// `json` or `compact`
pub const ENV_LOG_FORMAT: &str = "VIGIL_LOG_FORMAT";

const DEFAULT_MANIFEST_ROOT: &str = "testdata";

/// Settings shared by every harness operation
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct HarnessConfig {
    /// Kubeconfig path; `None` infers (in-cluster, `KUBECONFIG`, `~/.kube/config`)
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context; `None` uses the current context
    pub context: Option<String>,
    /// Seconds between observations
    pub poll_interval_secs: u64,
    /// Seconds before a wait gives up
    pub poll_timeout_secs: u64,
    /// Seconds a tunnel may take to become ready
    pub tunnel_ready_timeout_secs: u64,
    /// Root directory of per-dependency manifest directories
    pub manifest_root: PathBuf,
    /// Log output format name
    pub log_format: String,
    /// Exact interval and timeout from [`HarnessConfig::with_polling`]
    #[serde(skip)]
    polling: Option<(Duration, Duration)>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            context: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT.as_secs(),
            tunnel_ready_timeout_secs: DEFAULT_READY_TIMEOUT.as_secs(),
            manifest_root: PathBuf::from(DEFAULT_MANIFEST_ROOT),
            log_format: "compact".to_string(),
            polling: None,
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, Error> {
        Self::load(None)
    }

    /// Config file (or defaults) overridden by the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.overlay(|key| std::env::var(key).ok())
    }

    /// Config file over defaults, ignoring the environment
    ///
    /// # Errors
    /// [`Error::Config`] if the file cannot be read or holds unknown shapes.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let context = path.display().to_string();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(&context, format!("failed to read: {}", e)))?;
        let document = parse_documents(&raw)
            .map_err(|e| Error::config(&context, e.to_string()))?
            .into_iter()
            .next()
            .unwrap_or(serde_json::Value::Null);

        if document.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(document)
            .map_err(|e| Error::config(&context, format!("invalid config: {}", e)))
    }

    /// Apply `VIGIL_*` values returned by `lookup` on top of `self`
    ///
    /// Unset and empty values leave the current setting alone.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(ENV_KUBECONFIG) {
            self.kubeconfig = Some(PathBuf::from(path));
        }
        if let Some(context) = get(ENV_CONTEXT) {
            self.context = Some(context);
        }
        if let Some(secs) = get(ENV_POLL_INTERVAL) {
            self.poll_interval_secs = parse_secs(ENV_POLL_INTERVAL, &secs)?;
        }
        if let Some(secs) = get(ENV_POLL_TIMEOUT) {
            self.poll_timeout_secs = parse_secs(ENV_POLL_TIMEOUT, &secs)?;
        }
        if let Some(secs) = get(ENV_TUNNEL_READY_TIMEOUT) {
            self.tunnel_ready_timeout_secs = parse_secs(ENV_TUNNEL_READY_TIMEOUT, &secs)?;
        }
        if let Some(root) = get(ENV_MANIFEST_ROOT) {
            self.manifest_root = PathBuf::from(root);
        }
        if let Some(format) = get(ENV_LOG_FORMAT) {
            self.log_format = format;
        }
        Ok(self)
    }

    /// Use this kubeconfig
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Use this kubeconfig context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Poll with this interval and timeout
    ///
    /// Kept at full precision; takes precedence over the whole-second fields.
    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.polling = Some((interval, timeout));
        self
    }

    /// Read manifests from this root
    pub fn with_manifest_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.manifest_root = root.into();
        self
    }

    /// Poll spec built from the configured interval and timeout
    ///
    /// # Errors
    /// [`Error::Validation`] for a zero interval or an interval above the timeout.
    pub fn poll_spec(&self) -> Result<PollSpec, Error> {
        let (interval, timeout) = self.polling.unwrap_or((
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.poll_timeout_secs),
        ));
        PollSpec::new(interval, timeout)
    }

    /// Tunnel options with the configured ready timeout and an OS-chosen port
    pub fn tunnel_options(&self) -> TunnelOptions {
        TunnelOptions {
            ready_timeout: Duration::from_secs(self.tunnel_ready_timeout_secs),
            ..TunnelOptions::default()
        }
    }

    /// Parsed log format
    pub fn log_format(&self) -> LogFormat {
        LogFormat::parse(&self.log_format)
    }

    /// Manifest directory for one dependency (e.g. `testdata/postgres`)
    pub fn manifest_dir(&self, name: &str) -> PathBuf {
        self.manifest_root.join(name)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(key, format!("expected whole seconds, got {:?}", value)))
}
