//! Named predicates over observed state
//!
//! A [`Condition`] is a description plus a pure function of the latest
//! observation. The poller re-evaluates it on every tick, so it must not
//! depend on anything but its argument.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::observe::ObservedState;

/// Condition type reported by Deployments once minimum replicas are up
pub const CONDITION_AVAILABLE: &str = "Available";
/// Condition type reported by Pods and most custom resources
pub const CONDITION_READY: &str = "Ready";

type Predicate<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// A described boolean predicate over `S`
pub struct Condition<S> {
    description: String,
    predicate: Predicate<S>,
}

impl<S> Clone for Condition<S> {
    fn clone(&self) -> Self {
        Self {
            description: self.description.clone(),
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<S> fmt::Debug for Condition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl<S: 'static> Condition<S> {
    /// Wrap an arbitrary predicate
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Human-readable description used in logs and timeout errors
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Evaluate against one observation
    pub fn evaluate(&self, state: &S) -> bool {
        (self.predicate)(state)
    }

    /// Both conditions must hold
    pub fn and(self, other: Condition<S>) -> Self {
        let description = format!("{} and {}", self.description, other.description);
        Self::new(description, move |s| self.evaluate(s) && other.evaluate(s))
    }

    /// Either condition may hold
    pub fn or(self, other: Condition<S>) -> Self {
        let description = format!("{} or {}", self.description, other.description);
        Self::new(description, move |s| self.evaluate(s) || other.evaluate(s))
    }

    /// Negate a condition
    pub fn negate(self) -> Self {
        let description = format!("not ({})", self.description);
        Self::new(description, move |s| !self.evaluate(s))
    }

    /// Lift a condition on a present resource to one on a possibly absent one
    ///
    /// An absent resource never satisfies the result.
    pub fn when_present(self) -> Condition<Option<S>> {
        let description = self.description.clone();
        Condition::new(description, move |s: &Option<S>| {
            s.as_ref().is_some_and(|s| self.evaluate(s))
        })
    }
}

/// Every named resource appears in the listing
///
/// Existence only; no status is inspected.
pub fn resources_found<I, N>(names: I) -> Condition<Vec<ObservedState>>
where
    I: IntoIterator<Item = N>,
    N: Into<String>,
{
    let names: Vec<String> = names.into_iter().map(Into::into).collect();
    let description = format!("resources [{}] to exist", names.join(", "));
    Condition::new(description, move |listing: &Vec<ObservedState>| {
        names
            .iter()
            .all(|name| listing.iter().any(|state| &state.name == name))
    })
}

/// The resource reports a status condition of this type with status "True"
pub fn status_condition_true(condition_type: impl Into<String>) -> Condition<ObservedState> {
    let condition_type = condition_type.into();
    let description = format!("condition {}=True", condition_type);
    Condition::new(description, move |state: &ObservedState| {
        state.has_condition(&condition_type)
    })
}

/// A dotted path under `status` resolves to a non-empty string
///
/// Used to detect asynchronously issued credentials (e.g. `secretRef.name`).
pub fn field_non_empty(path: impl Into<String>) -> Condition<ObservedState> {
    let path = path.into();
    let description = format!("status.{} to be set", path);
    Condition::new(description, move |state: &ObservedState| {
        matches!(state.field(&path), Some(Value::String(s)) if !s.is_empty())
    })
}
