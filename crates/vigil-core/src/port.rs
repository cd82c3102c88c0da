//! Local port allocation for tunnels
//!
//! The OS guarantees a bound listener's port is unique, but a fixed port
//! requested by one tunnel could still be handed to another in the window
//! between a close and a rebind. Every port a tunnel listens on is recorded
//! here until its [`PortLease`] is dropped.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, OnceLock};

use dashmap::DashSet;
use tokio::net::TcpListener;
use tracing::{debug, trace};

use crate::Error;

/// Ports currently held by tunnels in this process
#[derive(Debug, Default)]
pub struct PortRegistry {
    claimed: DashSet<u16>,
}

static GLOBAL: OnceLock<Arc<PortRegistry>> = OnceLock::new();

impl PortRegistry {
    /// An empty registry, independent from the process-wide one
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The registry shared by every [`TunnelManager`](crate::tunnel::TunnelManager)
    /// built with defaults
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(PortRegistry::new))
    }

    /// Whether a tunnel currently holds `port`
    pub fn is_claimed(&self, port: u16) -> bool {
        self.claimed.contains(&port)
    }

    /// Number of ports currently held
    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    /// Whether no ports are held
    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }

    /// Bind a loopback listener and claim its port
    ///
    /// `None` or `Some(0)` lets the OS pick.
    ///
    /// # Errors
    /// [`Error::Tunnel`] if the requested port is held by another tunnel in
    /// this process or cannot be bound.
    pub async fn bind(
        self: &Arc<Self>,
        requested: Option<u16>,
    ) -> Result<(TcpListener, PortLease), Error> {
        match requested.filter(|port| *port != 0) {
            Some(port) => self.bind_fixed(port).await,
            None => self.bind_ephemeral().await,
        }
    }

    async fn bind_fixed(self: &Arc<Self>, port: u16) -> Result<(TcpListener, PortLease), Error> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        if !self.claimed.insert(port) {
            return Err(Error::tunnel_for(
                addr.to_string(),
                "local port already held by another tunnel",
            ));
        }
        let lease = PortLease {
            port,
            registry: Arc::clone(self),
        };

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::tunnel_for(addr.to_string(), format!("bind failed: {}", e)))?;
        debug!(port, "Claimed fixed local port");
        Ok((listener, lease))
    }

    async fn bind_ephemeral(self: &Arc<Self>) -> Result<(TcpListener, PortLease), Error> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| Error::tunnel(format!("bind failed: {}", e)))?;
        let port = listener.local_addr()?.port();

        if !self.claimed.insert(port) {
            // A fixed-port tunnel claimed this number and has not bound it yet.
            return Err(Error::tunnel_for(
                format!("127.0.0.1:{}", port),
                "OS-assigned port is already claimed in-process",
            ));
        }
        trace!(port, "Claimed ephemeral local port");
        Ok((
            listener,
            PortLease {
                port,
                registry: Arc::clone(self),
            },
        ))
    }
}

/// A claimed port, released on drop
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    registry: Arc<PortRegistry>,
}

impl PortLease {
    /// The claimed port number
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.registry.claimed.remove(&self.port);
        trace!(port = self.port, "Released local port");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ephemeral_ports_are_distinct_and_released() {
        let registry = PortRegistry::new();
        let (l1, lease1) = registry.bind(None).await.expect("bind");
        let (l2, lease2) = registry.bind(Some(0)).await.expect("bind");

        assert_ne!(lease1.port(), lease2.port());
        assert_eq!(l1.local_addr().expect("addr").port(), lease1.port());
        assert_eq!(registry.len(), 2);

        drop(lease1);
        assert_eq!(registry.len(), 1);
        drop(lease2);
        assert!(registry.is_empty());
        drop((l1, l2));
    }

    #[tokio::test]
    async fn test_fixed_port_collision_is_rejected() {
        let registry = PortRegistry::new();
        let (_listener, lease) = registry.bind(None).await.expect("bind");
        let port = lease.port();

        let err = registry.bind(Some(port)).await.expect_err("port is held");
        assert!(matches!(err, Error::Tunnel { .. }));
        assert!(err.to_string().contains("already held"));
        assert!(registry.is_claimed(port));
    }

    #[tokio::test]
    async fn test_failed_fixed_bind_releases_claim() {
        let registry = PortRegistry::new();
        // Held by a listener outside the registry
        let outside = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.expect("bind");
        let port = outside.local_addr().expect("addr").port();

        let err = registry.bind(Some(port)).await.expect_err("OS refuses");
        assert!(err.to_string().contains("bind failed"));
        assert!(!registry.is_claimed(port));
    }

    #[test]
    fn test_global_registry_is_shared() {
        assert!(Arc::ptr_eq(&PortRegistry::global(), &PortRegistry::global()));
    }
}
