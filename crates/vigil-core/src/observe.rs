//! Observed resource state and the source it is fetched from
//!
//! The condition layer only depends on the common shape of versioned
//! resource objects: identity, labels, and a `status` sub-tree that may carry
//! a list of typed conditions (`{type, status, reason}`). Anything that can
//! answer `get` and `list` in those terms can back the poller.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde_json::Value;

use crate::Error;

/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Identifies a resource type by API version, kind and plural name
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    /// Full API version (e.g. "apps/v1", "v1", "temporal.io/v1beta1")
    pub api_version: String,
    /// Resource kind (e.g. "Deployment")
    pub kind: String,
    /// Lowercase plural used in API paths (e.g. "deployments")
    pub plural: String,
}

impl ResourceKind {
    /// Build a kind from an apiVersion and kind, deriving the plural
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        let plural = pluralize_kind(&kind);
        Self {
            api_version: api_version.into(),
            kind,
            plural,
        }
    }

    /// Build a kind with an explicit plural (irregular CRD plurals)
    pub fn with_plural(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        plural: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            plural: plural.into(),
        }
    }

    /// apps/v1 Deployment
    pub fn deployment() -> Self {
        Self::new("apps/v1", "Deployment")
    }

    /// v1 Pod
    pub fn pod() -> Self {
        Self::new("v1", "Pod")
    }

    /// v1 Secret
    pub fn secret() -> Self {
        Self::new("v1", "Secret")
    }

    /// API group, empty for the core group
    pub fn group(&self) -> &str {
        self.api_version
            .split_once('/')
            .map(|(group, _)| group)
            .unwrap_or("")
    }

    /// API version without the group
    pub fn version(&self) -> &str {
        self.api_version
            .split_once('/')
            .map(|(_, version)| version)
            .unwrap_or(&self.api_version)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind)
    }
}

/// Built-in kinds whose resource name does not follow the English rules
const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("podmetrics", "pods"),
    ("nodemetrics", "nodes"),
];

/// Lowercase plural of a kind using English-ish rules
///
/// Built-in irregular kinds come from a fixed table. Conventional CRD names
/// follow the rules; use [`ResourceKind::with_plural`] for irregular ones.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if let Some((_, plural)) = IRREGULAR_PLURALS.iter().find(|(k, _)| *k == lower) {
        (*plural).to_string()
    } else if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") || lower.ends_with('x')
    {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// A single named resource to observe
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    /// Resource type
    pub kind: ResourceKind,
    /// Namespace, `None` for cluster-scoped resources
    pub namespace: Option<String>,
    /// Resource name
    pub name: String,
}

impl ResourceRef {
    /// Reference a namespaced resource
    pub fn namespaced(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Reference a cluster-scoped resource
    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// One entry of `status.conditions`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct StatusCondition {
    /// Condition type (e.g. "Available", "Ready")
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Machine-readable reason, if the controller set one
    #[serde(default)]
    pub reason: Option<String>,
}

impl StatusCondition {
    /// Whether this condition has the given type and status "True"
    pub fn is_true(&self, condition_type: &str) -> bool {
        self.type_ == condition_type && self.status == STATUS_TRUE
    }
}

/// Snapshot of one resource, fetched fresh on every poll tick
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedState {
    /// Resource type
    pub kind: ResourceKind,
    /// Namespace, `None` for cluster-scoped resources
    pub namespace: Option<String>,
    /// Resource name
    pub name: String,
    /// Metadata labels
    pub labels: BTreeMap<String, String>,
    /// The `status` sub-tree, `Value::Null` when the controller hasn't written one
    pub status: Value,
}

impl ObservedState {
    /// Create a state with no labels and an empty status
    pub fn new(kind: ResourceKind, namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace,
            name: name.into(),
            labels: BTreeMap::new(),
            status: Value::Null,
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Replace the status sub-tree
    pub fn with_status(mut self, status: Value) -> Self {
        self.status = status;
        self
    }

    /// Typed conditions parsed from `status.conditions`
    ///
    /// Entries that don't have the `{type, status}` shape are skipped.
    pub fn conditions(&self) -> Vec<StatusCondition> {
        self.status
            .get("conditions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|c| StatusCondition::deserialize(c).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a condition of the given type has status "True"
    pub fn has_condition(&self, condition_type: &str) -> bool {
        self.conditions().iter().any(|c| c.is_true(condition_type))
    }

    /// Look up a dotted path under `status` (e.g. "secretRef.name")
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.status, |value, segment| value.get(segment))
    }

    /// The identity of this resource as a [`ResourceRef`]
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// One-line summary used in timeout diagnostics
    pub fn summary(&self) -> String {
        let conditions = self.conditions();
        if conditions.is_empty() {
            return format!("{} (no conditions)", self.resource_ref());
        }
        let rendered = conditions
            .iter()
            .map(|c| match &c.reason {
                Some(reason) => format!("{}={} ({})", c.type_, c.status, reason),
                None => format!("{}={}", c.type_, c.status),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} conditions=[{}]", self.resource_ref(), rendered)
    }
}

/// Something that can be summarised in a timeout message
pub trait Summarize {
    /// One-line description of the observed value
    fn summarize(&self) -> String;
}

impl Summarize for ObservedState {
    fn summarize(&self) -> String {
        self.summary()
    }
}

impl Summarize for Option<ObservedState> {
    fn summarize(&self) -> String {
        match self {
            Some(state) => state.summary(),
            None => "absent".to_string(),
        }
    }
}

impl Summarize for Vec<ObservedState> {
    fn summarize(&self) -> String {
        let names = self.iter().map(|s| s.name.as_str()).collect::<Vec<_>>();
        format!("{} resources [{}]", self.len(), names.join(", "))
    }
}

/// Remote system queried for current resource status and listings
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Fetch a single resource, `Ok(None)` if it does not exist
    async fn get(&self, target: &ResourceRef) -> Result<Option<ObservedState>, Error>;

    /// List resources of a kind in a namespace, filtered by a label selector
    ///
    /// `selector` uses Kubernetes label-selector syntax; `None` lists everything.
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        selector: Option<String>,
    ) -> Result<Vec<ObservedState>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn deployment(status: Value) -> ObservedState {
        ObservedState::new(ResourceKind::deployment(), Some("e2e".into()), "postgres")
            .with_status(status)
    }

    #[rstest]
    #[case("Deployment", "deployments")]
    #[case("Pod", "pods")]
    #[case("Ingress", "ingresses")]
    #[case("NetworkPolicy", "networkpolicies")]
    #[case("Gateway", "gateways")]
    #[case("Endpoints", "endpoints")]
    #[case("EndpointSlice", "endpointslices")]
    #[case("PodMetrics", "pods")]
    #[case("StorageClass", "storageclasses")]
    #[case("TemporalCluster", "temporalclusters")]
    #[case("TemporalClusterClient", "temporalclusterclients")]
    fn test_pluralize_kind(#[case] kind: &str, #[case] plural: &str) {
        assert_eq!(pluralize_kind(kind), plural);
    }

    #[test]
    fn test_kind_group_and_version() {
        let kind = ResourceKind::new("temporal.io/v1beta1", "TemporalCluster");
        assert_eq!(kind.group(), "temporal.io");
        assert_eq!(kind.version(), "v1beta1");

        let pod = ResourceKind::pod();
        assert_eq!(pod.group(), "");
        assert_eq!(pod.version(), "v1");
    }

    #[test]
    fn test_conditions_parsed_from_status() {
        let state = deployment(json!({
            "conditions": [
                {"type": "Available", "status": "True", "reason": "MinimumReplicasAvailable"},
                {"type": "Progressing", "status": "False"},
                {"bogus": true}
            ]
        }));

        let conditions = state.conditions();
        assert_eq!(conditions.len(), 2);
        assert_eq!(
            conditions[0].reason.as_deref(),
            Some("MinimumReplicasAvailable")
        );
        assert!(state.has_condition("Available"));
        assert!(!state.has_condition("Progressing"));
        assert!(!state.has_condition("Ready"));
    }

    #[test]
    fn test_missing_status_has_no_conditions() {
        let state = deployment(Value::Null);
        assert!(state.conditions().is_empty());
        assert_eq!(state.summary(), "Deployment e2e/postgres (no conditions)");
    }

    #[test]
    fn test_field_lookup() {
        let state = deployment(json!({"secretRef": {"name": "client-tls", "key": ""}}));
        assert_eq!(state.field("secretRef.name"), Some(&json!("client-tls")));
        assert_eq!(state.field("secretRef.key"), Some(&json!("")));
        assert_eq!(state.field("secretRef.missing"), None);
        assert_eq!(state.field("nope.name"), None);
    }

    #[test]
    fn test_summary_lists_conditions() {
        let state = deployment(json!({
            "conditions": [
                {"type": "Available", "status": "False", "reason": "MinimumReplicasUnavailable"},
                {"type": "Progressing", "status": "True"}
            ]
        }));
        assert_eq!(
            state.summary(),
            "Deployment e2e/postgres conditions=[Available=False (MinimumReplicasUnavailable), Progressing=True]"
        );
    }

    #[test]
    fn test_listing_and_absent_summaries() {
        let list = vec![deployment(Value::Null)];
        assert_eq!(list.summarize(), "1 resources [postgres]");
        assert_eq!(None::<ObservedState>.summarize(), "absent");
    }

    #[test]
    fn test_resource_ref_display() {
        let ns = ResourceRef::namespaced(ResourceKind::pod(), "e2e", "frontend-0");
        assert_eq!(ns.to_string(), "Pod e2e/frontend-0");
        let cluster = ResourceRef::cluster(ResourceKind::new("v1", "Namespace"), "e2e");
        assert_eq!(cluster.to_string(), "Namespace e2e");
    }
}
