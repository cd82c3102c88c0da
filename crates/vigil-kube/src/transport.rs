//! Pod port-forward transport
//!
//! Each dial opens its own `portforward` websocket session to the pod and
//! hands back the stream for the requested port. The API server accepts the
//! session before the kubelet has connected to the container port, so a
//! closed port only shows up on the session's error channel; that channel is
//! returned with the stream as its failure report.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Portforwarder};
use kube::Client;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use vigil_core::selector::SelectedEndpoint;
use vigil_core::tunnel::{Dialed, ForwardTransport};
use vigil_core::Error;

/// Forwards to pods through the Kubernetes API server
#[derive(Clone)]
pub struct PodPortForward {
    client: Client,
}

impl PodPortForward {
    /// Forward through `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ForwardTransport for PodPortForward {
    async fn dial(&self, endpoint: &SelectedEndpoint, port: u16) -> Result<Dialed, Error> {
        let target = format!("{}:{}", endpoint, port);
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &endpoint.namespace);

        let mut forwarder = pods
            .portforward(&endpoint.name, &[port])
            .await
            .map_err(|e| Error::tunnel_for(&target, format!("portforward failed: {}", e)))?;

        let stream = forwarder
            .take_stream(port)
            .ok_or_else(|| Error::tunnel_for(&target, format!("no stream for port {}", port)))?;

        let errors = forwarder
            .take_error(port)
            .ok_or_else(|| Error::tunnel_for(&target, format!("no error channel for port {}", port)))?;
        let (failure_tx, failure_rx) = oneshot::channel();
        let reported = target.clone();
        tokio::spawn(async move {
            // Resolves with `None` when the session ends cleanly; the sender drops then.
            if let Some(message) = errors.await {
                warn!(tunnel = %reported, error = %message, "Pod reported port-forward error");
                let _ = failure_tx.send(message);
            }
        });

        debug!(tunnel = %target, "Portforward stream established");
        let stream = PortForwardStream {
            stream,
            _forwarder: Box::new(forwarder),
        };
        Ok(Dialed::new(Box::new(stream)).with_failure(failure_rx))
    }
}

/// A port-forward stream that keeps its session alive
struct PortForwardStream<S> {
    stream: S,
    _forwarder: Box<Portforwarder>,
}

impl<S: AsyncRead + Unpin> AsyncRead for PortForwardStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PortForwardStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
