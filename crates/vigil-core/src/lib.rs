//! Readiness verification and tunneling primitives
//!
//! - [`poller`]: wait for a [`Condition`] over repeated observations
//! - [`selector`]: pick one workload by labels
//! - [`tunnel`]: local TCP forwards with explicit ready/stop signalling
//!
//! Nothing here talks to a cluster directly; observation and forwarding go
//! through the [`ObservationSource`] and [`ForwardTransport`] traits.

#![deny(missing_docs)]

pub mod condition;
pub mod error;
pub mod log_sink;
pub mod observe;
pub mod poller;
pub mod port;
pub mod selector;
pub mod telemetry;
pub mod tunnel;

pub use condition::Condition;
pub use error::Error;
pub use log_sink::{LogSink, MemoryLogSink, TracingLogSink};
pub use observe::{ObservationSource, ObservedState, ResourceKind, ResourceRef};
pub use poller::{poll_until, PollSpec, Poller};
pub use selector::{select, EndpointQuery, SelectedEndpoint};
pub use tunnel::{Dialed, ForwardTransport, Tunnel, TunnelManager, TunnelOptions, TunnelState};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
