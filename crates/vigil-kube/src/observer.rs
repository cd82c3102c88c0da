//! Observation source backed by the Kubernetes API
//!
//! Every resource kind goes through `DynamicObject`, so built-in kinds and
//! custom resources are observed the same way.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;
use tracing::trace;
use vigil_core::observe::{ObservationSource, ObservedState, ResourceKind, ResourceRef};
use vigil_core::Error;

/// Build an `ApiResource` for a kind
pub fn api_resource(kind: &ResourceKind) -> ApiResource {
    ApiResource {
        group: kind.group().to_string(),
        version: kind.version().to_string(),
        api_version: kind.api_version.clone(),
        kind: kind.kind.clone(),
        plural: kind.plural.clone(),
    }
}

/// Convert a fetched object into the snapshot conditions are evaluated on
pub fn observed_state(kind: &ResourceKind, object: DynamicObject) -> ObservedState {
    let status = object.data.get("status").cloned().unwrap_or(Value::Null);
    ObservedState {
        kind: kind.clone(),
        namespace: object.metadata.namespace,
        name: object.metadata.name.unwrap_or_default(),
        labels: object.metadata.labels.unwrap_or_default(),
        status,
    }
}

/// Reads resources through a kube client
#[derive(Clone)]
pub struct KubeObserver {
    client: Client,
}

impl KubeObserver {
    /// Observe through `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api(&self, kind: &ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(kind);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ObservationSource for KubeObserver {
    async fn get(&self, target: &ResourceRef) -> Result<Option<ObservedState>, Error> {
        let api = self.api(&target.kind, target.namespace.as_deref());
        let object = api
            .get_opt(&target.name)
            .await
            .map_err(|e| Error::observation(target.to_string(), e.to_string()))?;

        trace!(resource = %target, found = object.is_some(), "Fetched resource");
        Ok(object.map(|o| observed_state(&target.kind, o)))
    }

    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        selector: Option<String>,
    ) -> Result<Vec<ObservedState>, Error> {
        let params = match selector.as_deref() {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };
        let listing = self
            .api(kind, Some(namespace))
            .list(&params)
            .await
            .map_err(|e| Error::observation(format!("{} {}", kind, namespace), e.to_string()))?;

        trace!(kind = %kind, namespace, count = listing.items.len(), "Listed resources");
        Ok(listing
            .items
            .into_iter()
            .map(|o| observed_state(kind, o))
            .collect())
    }
}
