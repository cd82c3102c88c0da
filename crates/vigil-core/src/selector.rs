//! Label-based selection of a single workload endpoint
//!
//! An [`EndpointQuery`] is an AND over label keys of an OR over each key's
//! accepted values. It renders to a Kubernetes set-based selector for
//! server-side filtering and is re-applied client-side before choosing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::observe::{ObservationSource, ObservedState, ResourceKind};
use crate::Error;

/// Required labels: every key must match one of its values
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointQuery {
    required: BTreeMap<String, BTreeSet<String>>,
}

impl EndpointQuery {
    /// An empty query (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to equal one of `values`
    ///
    /// Calling this twice for the same key widens the accepted set.
    pub fn require<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.required
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Require `key` to equal `value`
    pub fn require_eq(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.require(key, [value.into()])
    }

    /// Whether any constraint has been added
    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    /// Whether some key accepts no value at all, so nothing can ever match
    pub fn is_unsatisfiable(&self) -> bool {
        self.required.values().any(BTreeSet::is_empty)
    }

    /// Evaluate the query against a label set
    ///
    /// A key with an empty value set can never match.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.required.iter().all(|(key, accepted)| {
            labels
                .get(key)
                .is_some_and(|value| accepted.contains(value))
        })
    }

    /// Render as a Kubernetes set-based label selector, `None` when empty
    pub fn to_selector(&self) -> Option<String> {
        if self.required.is_empty() {
            return None;
        }
        Some(self.to_string())
    }
}

impl fmt::Display for EndpointQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses = self
            .required
            .iter()
            .map(|(key, values)| {
                let values = values.iter().map(String::as_str).collect::<Vec<_>>();
                format!("{} in ({})", key, values.join(","))
            })
            .collect::<Vec<_>>();
        f.write_str(&clauses.join(","))
    }
}

/// The workload chosen by a selection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedEndpoint {
    /// Resource type of the endpoint (usually Pod)
    pub kind: ResourceKind,
    /// Namespace of the endpoint
    pub namespace: String,
    /// Name of the endpoint
    pub name: String,
    /// Labels the endpoint carried when selected
    pub labels: BTreeMap<String, String>,
}

impl SelectedEndpoint {
    /// Build an endpoint for a named pod
    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::pod(),
            namespace: namespace.into(),
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    fn from_state(state: ObservedState, fallback_namespace: &str) -> Self {
        Self {
            kind: state.kind,
            namespace: state
                .namespace
                .unwrap_or_else(|| fallback_namespace.to_string()),
            name: state.name,
            labels: state.labels,
        }
    }
}

impl fmt::Display for SelectedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Choose one endpoint from a listing
///
/// Candidates not matching the query are discarded; among the rest the
/// lexicographically smallest name wins so repeated calls agree regardless of
/// listing order.
pub fn choose(
    candidates: Vec<ObservedState>,
    query: &EndpointQuery,
) -> Option<ObservedState> {
    candidates
        .into_iter()
        .filter(|state| query.matches(&state.labels))
        .min_by(|a, b| a.name.cmp(&b.name))
}

/// Pick exactly one resource of `kind` in `namespace` matching `query`
///
/// # Errors
/// * [`Error::NotFound`] when nothing matches, or the query is unsatisfiable
///   (the source is not consulted then; an empty `in ()` set is not a valid
///   selector)
/// * Observation errors from the source, unchanged
pub async fn select(
    source: &dyn ObservationSource,
    kind: &ResourceKind,
    namespace: &str,
    query: &EndpointQuery,
) -> Result<SelectedEndpoint, Error> {
    if query.is_unsatisfiable() {
        return Err(Error::not_found(kind.kind.clone(), namespace, query.to_string()));
    }

    let selector = query.to_selector();
    let candidates = source.list(kind, namespace, selector.clone()).await?;
    let total = candidates.len();

    let chosen = choose(candidates, query).ok_or_else(|| {
        Error::not_found(
            kind.kind.clone(),
            namespace,
            selector.unwrap_or_else(|| "<everything>".to_string()),
        )
    })?;

    debug!(
        kind = %kind,
        namespace = %namespace,
        selected = %chosen.name,
        candidates = total,
        "Selected endpoint"
    );

    Ok(SelectedEndpoint::from_state(chosen, namespace))
}
