//! Named readiness operations for e2e tests
//!
//! [`Harness`] ties the poller, selector and tunnel manager to one cluster and
//! one [`HarnessConfig`]. Each operation blocks until its condition holds or
//! the configured timeout passes.

use std::path::Path;
use std::sync::Arc;

use kube::Client;
use tracing::info;
use vigil_core::condition::{
    field_non_empty, resources_found, status_condition_true, CONDITION_AVAILABLE, CONDITION_READY,
};
use vigil_core::observe::{ObservationSource, ObservedState, ResourceKind, ResourceRef};
use vigil_core::selector::{select, EndpointQuery, SelectedEndpoint};
use vigil_core::tunnel::{ForwardTransport, Tunnel, TunnelManager};
use vigil_core::{Error, LogSink, PollSpec, Poller};

use crate::client;
use crate::config::HarnessConfig;
use crate::manifest::{apply_manifest_dir, KubeApplier, ManifestApplier};
use crate::observer::KubeObserver;
use crate::transport::PodPortForward;

/// Standard label for the application instance name
pub const LABEL_NAME: &str = "app.kubernetes.io/name";
/// Standard label for the component within the application
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
/// Standard label for the application version
pub const LABEL_VERSION: &str = "app.kubernetes.io/version";

/// Status path set once a client credential has been issued
pub const SECRET_REF_NAME: &str = "secretRef.name";

/// Query for one component of an application at a given version
pub fn component_query(app: &str, component: &str, version: &str) -> EndpointQuery {
    EndpointQuery::new()
        .require_eq(LABEL_NAME, app)
        .require_eq(LABEL_COMPONENT, component)
        .require_eq(LABEL_VERSION, version)
}

/// Readiness operations against one cluster
pub struct Harness {
    config: HarnessConfig,
    spec: PollSpec,
    poller: Poller,
    tunnels: TunnelManager,
    applier: Option<Arc<dyn ManifestApplier>>,
    client: Option<Client>,
}

impl Harness {
    /// Connect to the configured cluster
    pub async fn connect(config: HarnessConfig) -> Result<Self, Error> {
        let client = client::connect(&config).await?;
        Self::new(client, config)
    }

    /// Use an existing client
    pub fn new(client: Client, config: HarnessConfig) -> Result<Self, Error> {
        let mut harness = Self::with_sources(
            config,
            Arc::new(KubeObserver::new(client.clone())),
            Arc::new(PodPortForward::new(client.clone())),
        )?
        .with_applier(Arc::new(KubeApplier::new(client.clone())));
        harness.client = Some(client);
        Ok(harness)
    }

    /// Observe and forward through arbitrary implementations
    ///
    /// Manifest operations fail on a harness built this way until an applier
    /// is supplied with [`Harness::with_applier`].
    pub fn with_sources(
        config: HarnessConfig,
        source: Arc<dyn ObservationSource>,
        transport: Arc<dyn ForwardTransport>,
    ) -> Result<Self, Error> {
        let spec = config.poll_spec()?;
        let tunnels = TunnelManager::new(transport).with_options(config.tunnel_options());
        Ok(Self {
            config,
            spec,
            poller: Poller::new(source),
            tunnels,
            applier: None,
            client: None,
        })
    }

    /// Apply manifest directories through `applier`
    pub fn with_applier(mut self, applier: Arc<dyn ManifestApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    fn applier(&self) -> Result<&dyn ManifestApplier, Error> {
        self.applier
            .as_deref()
            .ok_or_else(|| Error::config("harness", "manifest operations need a kube client or applier"))
    }

    /// Effective configuration
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Poll spec every wait uses
    pub fn poll_spec(&self) -> &PollSpec {
        &self.spec
    }

    /// The poller, for custom conditions
    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    /// The kube client, when connected to a cluster
    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    /// Wait until a Deployment exists and then reports `Available=True`
    pub async fn wait_for_deployment(&self, namespace: &str, name: &str) -> Result<ObservedState, Error> {
        let kind = ResourceKind::deployment();
        self.poller
            .wait_for_listing(&self.spec, &kind, namespace, None, &resources_found([name]))
            .await?;

        let target = ResourceRef::namespaced(kind, namespace, name);
        let state = self
            .poller
            .wait_for(&self.spec, &target, &status_condition_true(CONDITION_AVAILABLE))
            .await?;
        info!(resource = %target, "Deployment available");
        Ok(state)
    }

    /// Wait until a Pod reports `Ready=True`
    pub async fn wait_for_pod_ready(&self, namespace: &str, name: &str) -> Result<ObservedState, Error> {
        let target = ResourceRef::namespaced(ResourceKind::pod(), namespace, name);
        let state = self
            .poller
            .wait_for(&self.spec, &target, &status_condition_true(CONDITION_READY))
            .await?;
        info!(resource = %target, "Pod ready");
        Ok(state)
    }

    /// Wait until any resource reports `Ready=True`
    pub async fn wait_for_ready(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<ObservedState, Error> {
        let target = ResourceRef::namespaced(kind.clone(), namespace, name);
        let state = self
            .poller
            .wait_for(&self.spec, &target, &status_condition_true(CONDITION_READY))
            .await?;
        info!(resource = %target, "Resource ready");
        Ok(state)
    }

    /// Wait until a resource has been issued a credential secret
    ///
    /// Returns the secret name from `status.secretRef.name`.
    pub async fn wait_for_secret_ref(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<String, Error> {
        let target = ResourceRef::namespaced(kind.clone(), namespace, name);
        let state = self
            .poller
            .wait_for(&self.spec, &target, &field_non_empty(SECRET_REF_NAME))
            .await?;

        let secret = state
            .field(SECRET_REF_NAME)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        info!(resource = %target, secret = %secret, "Credential issued");
        Ok(secret)
    }

    async fn apply_dependency(&self, name: &str, namespace: &str) -> Result<usize, Error> {
        apply_manifest_dir(self.applier()?, &self.config.manifest_dir(name), namespace).await
    }

    /// Apply `<manifest_root>/<name>` and wait for Deployment `name`
    pub async fn deploy_and_wait(&self, name: &str, namespace: &str) -> Result<ObservedState, Error> {
        self.apply_dependency(name, namespace).await?;
        self.wait_for_deployment(namespace, name).await
    }

    /// Apply `<manifest_root>/<name>` and wait for Pod `<name>-0`
    ///
    /// For StatefulSet-backed stores where the first replica gates readiness.
    pub async fn deploy_stateful_and_wait(&self, name: &str, namespace: &str) -> Result<ObservedState, Error> {
        self.apply_dependency(name, namespace).await?;
        self.wait_for_pod_ready(namespace, &format!("{}-0", name)).await
    }

    /// Apply an arbitrary manifest directory without waiting
    pub async fn apply_dir(&self, dir: &Path, namespace: &str) -> Result<usize, Error> {
        apply_manifest_dir(self.applier()?, dir, namespace).await
    }

    /// Pick a pod matching `query`
    pub async fn select_pod(&self, namespace: &str, query: &EndpointQuery) -> Result<SelectedEndpoint, Error> {
        select(self.poller.source().as_ref(), &ResourceKind::pod(), namespace, query).await
    }

    /// Forward a local port to `remote_port` on a pod matching `query`
    ///
    /// The returned tunnel is ready; its address accepts connections.
    pub async fn forward_to_frontend(
        &self,
        namespace: &str,
        query: &EndpointQuery,
        remote_port: u16,
        sink: Arc<dyn LogSink>,
    ) -> Result<Tunnel, Error> {
        let endpoint = self.select_pod(namespace, query).await?;
        let tunnel = self.tunnels.open(endpoint, remote_port, Arc::clone(&sink)).await?;
        sink.write_line("Port forwarding is ready to get traffic.");
        Ok(tunnel)
    }
}
