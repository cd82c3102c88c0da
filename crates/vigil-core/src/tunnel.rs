//! Local TCP tunnels to remote workloads
//!
//! [`TunnelManager::open`] binds a loopback listener, hands it to a detached
//! worker task and returns only after the worker has proven the remote side
//! is reachable. The worker and the caller talk through two one-shots:
//!
//! - ready: worker -> caller, carries `Ok(())` or the establishment error
//! - stop: caller -> worker, sent by [`Tunnel::close`] or on drop
//!
//! Connections accepted after ready are each forwarded on their own task by
//! dialing the [`ForwardTransport`] and copying bytes both ways.
//!
//! Some transports hand back a stream before the far side has connected and
//! report failure afterwards (see [`Dialed::with_failure`]). For those the
//! readiness probe holds the stream for [`TunnelOptions::probe_settle`] and
//! fails on a reported error or an early EOF.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::log_sink::LogSink;
use crate::port::{PortLease, PortRegistry};
use crate::selector::SelectedEndpoint;
use crate::Error;

/// How long the worker may take to reach the remote side before giving up
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a probe stream with a failure report must stay quiet
pub const DEFAULT_PROBE_SETTLE: Duration = Duration::from_secs(1);

/// A bidirectional byte stream to the remote port
pub trait ForwardStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ForwardStream for T {}

/// Boxed stream returned by a transport
pub type BoxedStream = Box<dyn ForwardStream>;

/// A stream from [`ForwardTransport::dial`] and its optional failure report
pub struct Dialed {
    stream: BoxedStream,
    failure: Option<oneshot::Receiver<String>>,
}

impl Dialed {
    /// A stream that is connected end to end once returned
    pub fn new(stream: BoxedStream) -> Self {
        Self {
            stream,
            failure: None,
        }
    }

    /// Attach a channel on which the transport reports that the far side
    /// could not be reached
    ///
    /// The sender is dropped without a message when nothing went wrong.
    pub fn with_failure(mut self, failure: oneshot::Receiver<String>) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Split into the stream and the failure report
    pub fn into_parts(self) -> (BoxedStream, Option<oneshot::Receiver<String>>) {
        (self.stream, self.failure)
    }
}

impl fmt::Debug for Dialed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialed")
            .field("reports_failure", &self.failure.is_some())
            .finish_non_exhaustive()
    }
}

/// Raw stream-forwarding primitive
///
/// Implementations open one fresh stream to `port` on the endpoint per call.
#[async_trait]
pub trait ForwardTransport: Send + Sync {
    /// Open a stream to `port` on `endpoint`
    async fn dial(&self, endpoint: &SelectedEndpoint, port: u16) -> Result<Dialed, Error>;
}

/// Tunnel lifecycle as seen from outside the worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TunnelState {
    /// Listener bound, remote not yet verified
    Starting,
    /// Accepting and forwarding connections
    Ready,
    /// Stopped by the caller
    Closed,
    /// Stopped by an error
    Failed(String),
}

impl TunnelState {
    /// Whether the worker has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, TunnelState::Closed | TunnelState::Failed(_))
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Starting => f.write_str("starting"),
            TunnelState::Ready => f.write_str("ready"),
            TunnelState::Closed => f.write_str("closed"),
            TunnelState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Per-manager tunnel settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelOptions {
    /// Fixed local port; `None` lets the OS choose
    pub local_port: Option<u16>,
    /// Upper bound on verifying the remote side during `open`
    pub ready_timeout: Duration,
    /// Quiet period required of a probe stream that carries a failure report
    pub probe_settle: Duration,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            local_port: None,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            probe_settle: DEFAULT_PROBE_SETTLE,
        }
    }
}

/// Opens tunnels over one transport
#[derive(Clone)]
pub struct TunnelManager {
    transport: Arc<dyn ForwardTransport>,
    ports: Arc<PortRegistry>,
    options: TunnelOptions,
}

impl TunnelManager {
    /// Manager with default options sharing the process-wide port registry
    pub fn new(transport: Arc<dyn ForwardTransport>) -> Self {
        Self {
            transport,
            ports: PortRegistry::global(),
            options: TunnelOptions::default(),
        }
    }

    /// Replace the tunnel options
    pub fn with_options(mut self, options: TunnelOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a separate port registry
    pub fn with_registry(mut self, ports: Arc<PortRegistry>) -> Self {
        self.ports = ports;
        self
    }

    /// Current options
    pub fn options(&self) -> &TunnelOptions {
        &self.options
    }

    /// Open a tunnel to `remote_port` on `endpoint`
    ///
    /// Returns once the local address accepts connections that will be
    /// forwarded. Progress and errors are also written to `sink`.
    ///
    /// # Errors
    /// [`Error::Tunnel`] when the port cannot be claimed, the remote side
    /// is not reachable within `ready_timeout`, or the worker dies early.
    pub async fn open(
        &self,
        endpoint: SelectedEndpoint,
        remote_port: u16,
        sink: Arc<dyn LogSink>,
    ) -> Result<Tunnel, Error> {
        let target = format!("{}:{}", endpoint, remote_port);
        let (listener, lease) = self.ports.bind(self.options.local_port).await?;
        let local_addr = listener.local_addr()?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(TunnelState::Starting);

        let worker = Worker {
            transport: Arc::clone(&self.transport),
            endpoint: Arc::new(endpoint),
            remote_port,
            target: target.clone(),
            local_addr,
            ready_timeout: self.options.ready_timeout,
            probe_settle: self.options.probe_settle,
            sink,
            state: state_tx,
        };
        let handle = tokio::spawn(worker.run(listener, lease, ready_tx, stop_rx));

        match ready_rx.await {
            Ok(Ok(())) => {
                info!(tunnel = %target, local = %local_addr, "Tunnel ready");
                Ok(Tunnel {
                    local_addr,
                    target,
                    state: state_rx,
                    stop_tx: Some(stop_tx),
                    worker: Some(handle),
                })
            }
            Ok(Err(e)) => {
                // Wait so the listener and port claim are gone before returning.
                let _ = handle.await;
                warn!(tunnel = %target, error = %e, "Tunnel failed to become ready");
                Err(e)
            }
            Err(_) => {
                let reason = match handle.await {
                    Err(join) if join.is_panic() => "tunnel worker panicked".to_string(),
                    _ => "tunnel worker exited before reporting readiness".to_string(),
                };
                Err(Error::tunnel_for(target, reason))
            }
        }
    }
}

impl fmt::Debug for TunnelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelManager")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// An open tunnel
///
/// Dropping it stops the worker without waiting; call [`Tunnel::close`] to
/// wait and to observe worker errors.
#[derive(Debug)]
pub struct Tunnel {
    local_addr: SocketAddr,
    target: String,
    state: watch::Receiver<TunnelState>,
    stop_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<Result<(), Error>>>,
}

impl Tunnel {
    /// Local address as `host:port`, ready to hand to a client
    pub fn address(&self) -> String {
        self.local_addr.to_string()
    }

    /// Local socket address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Remote side as `namespace/name:port`
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Latest worker state
    pub fn state(&self) -> TunnelState {
        self.state.borrow().clone()
    }

    /// Stop forwarding and wait for the worker
    ///
    /// Returns the error that ended the worker, if any. Further calls
    /// return `Ok(())` without doing anything.
    pub async fn close(&mut self) -> Result<(), Error> {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        debug!(tunnel = %self.target, "Closing tunnel");
        match worker.await {
            Ok(result) => result,
            Err(join) => Err(Error::tunnel_for(
                self.target.clone(),
                format!("tunnel worker panicked: {}", join),
            )),
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
    }
}

struct Worker {
    transport: Arc<dyn ForwardTransport>,
    endpoint: Arc<SelectedEndpoint>,
    remote_port: u16,
    target: String,
    local_addr: SocketAddr,
    ready_timeout: Duration,
    probe_settle: Duration,
    sink: Arc<dyn LogSink>,
    state: watch::Sender<TunnelState>,
}

impl Worker {
    async fn run(
        self,
        listener: TcpListener,
        lease: PortLease,
        ready_tx: oneshot::Sender<Result<(), Error>>,
        mut stop_rx: oneshot::Receiver<()>,
    ) -> Result<(), Error> {
        self.sink.write_line(&format!(
            "Forwarding from {} -> {}",
            self.local_addr, self.target
        ));

        let probe = tokio::select! {
            biased;
            _ = &mut stop_rx => {
                self.finish(TunnelState::Closed);
                return Ok(());
            }
            probe = tokio::time::timeout(self.ready_timeout, self.probe()) => probe,
        };

        let established = match probe {
            Ok(result) => result,
            Err(_) => Err(format!(
                "remote not reachable within {:?}",
                self.ready_timeout
            )),
        };

        if let Err(reason) = established {
            self.sink.write_line(&format!("error: {}", reason));
            self.finish(TunnelState::Failed(reason.clone()));
            drop(listener);
            drop(lease);
            let _ = ready_tx.send(Err(Error::tunnel_for(self.target.clone(), reason)));
            return Ok(());
        }

        self.state.send_replace(TunnelState::Ready);
        if ready_tx.send(Ok(())).is_err() {
            // Caller stopped waiting for `open`.
            self.finish(TunnelState::Closed);
            return Ok(());
        }

        let connections = CancellationToken::new();
        let result = loop {
            tokio::select! {
                _ = &mut stop_rx => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        trace!(tunnel = %self.target, peer = %peer, "Accepted connection");
                        tokio::spawn(forward_connection(
                            Arc::clone(&self.transport),
                            Arc::clone(&self.endpoint),
                            self.remote_port,
                            socket,
                            Arc::clone(&self.sink),
                            connections.child_token(),
                        ));
                    }
                    Err(e) => {
                        break Err(Error::tunnel_for(
                            self.target.clone(),
                            format!("accept failed: {}", e),
                        ))
                    }
                },
            }
        };

        connections.cancel();
        drop(listener);
        drop(lease);
        self.conclude(result)
    }

    /// Dial once and make sure the remote side answered
    async fn probe(&self) -> Result<(), String> {
        let dialed = match self.transport.dial(&self.endpoint, self.remote_port).await {
            Ok(dialed) => dialed,
            Err(Error::Tunnel { message, .. }) => return Err(message),
            Err(e) => return Err(e.to_string()),
        };
        let (mut stream, failure) = dialed.into_parts();
        let Some(mut failure) = failure else {
            return Ok(());
        };

        let settled = tokio::time::sleep(self.probe_settle);
        tokio::pin!(settled);
        let mut reporting = true;
        let mut byte = [0u8; 1];
        loop {
            tokio::select! {
                biased;
                reported = &mut failure, if reporting => match reported {
                    Ok(message) => return Err(message),
                    Err(_) => reporting = false,
                },
                read = stream.read(&mut byte) => {
                    return match read {
                        Ok(0) => {
                            // The report usually trails the EOF by a moment.
                            let reason = if reporting {
                                tokio::time::timeout(self.probe_settle, failure).await.ok().and_then(Result::ok)
                            } else {
                                None
                            };
                            Err(reason.unwrap_or_else(|| "remote closed the connection".to_string()))
                        }
                        Ok(_) => Ok(()),
                        Err(e) => Err(e.to_string()),
                    };
                }
                _ = &mut settled => return Ok(()),
            }
        }
    }

    fn conclude(&self, result: Result<(), Error>) -> Result<(), Error> {
        match &result {
            Ok(()) => {
                self.sink.write_line("Stopped forwarding");
                self.finish(TunnelState::Closed);
            }
            Err(e) => {
                self.sink.write_line(&format!("error: {}", e));
                self.finish(TunnelState::Failed(e.to_string()));
            }
        }
        result
    }

    fn finish(&self, state: TunnelState) {
        debug!(tunnel = %self.target, state = %state, "Tunnel worker finished");
        self.state.send_replace(state);
    }
}

async fn forward_connection(
    transport: Arc<dyn ForwardTransport>,
    endpoint: Arc<SelectedEndpoint>,
    remote_port: u16,
    mut socket: TcpStream,
    sink: Arc<dyn LogSink>,
    cancel: CancellationToken,
) {
    sink.write_line(&format!("Handling connection for {}", remote_port));

    let (mut upstream, failure) = tokio::select! {
        _ = cancel.cancelled() => return,
        dialed = transport.dial(&endpoint, remote_port) => match dialed {
            Ok(dialed) => dialed.into_parts(),
            Err(e) => {
                sink.write_line(&format!("error forwarding port {}: {}", remote_port, e));
                return;
            }
        },
    };

    tokio::select! {
        _ = cancel.cancelled() => {}
        copied = tokio::io::copy_bidirectional(&mut socket, &mut upstream) => match copied {
            Ok((sent, received)) => trace!(sent, received, "Connection finished"),
            Err(e) => sink.write_line(&format!("error copying port {}: {}", remote_port, e)),
        },
    }

    if let Some(Ok(message)) = failure.map(|mut rx| rx.try_recv()) {
        sink.write_line(&format!("error forwarding port {}: {}", remote_port, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::MemoryLogSink;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::Instant;

    /// Dials the loopback port directly after an optional delay
    struct LoopbackTransport {
        delay: Duration,
    }

    #[async_trait]
    impl ForwardTransport for LoopbackTransport {
        async fn dial(&self, _endpoint: &SelectedEndpoint, port: u16) -> Result<Dialed, Error> {
            tokio::time::sleep(self.delay).await;
            let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))
                .await
                .map_err(|e| Error::tunnel_for(format!("127.0.0.1:{}", port), e.to_string()))?;
            Ok(Dialed::new(Box::new(stream)))
        }
    }

    /// Never completes a dial
    struct HangingTransport;

    #[async_trait]
    impl ForwardTransport for HangingTransport {
        async fn dial(&self, _endpoint: &SelectedEndpoint, _port: u16) -> Result<Dialed, Error> {
            std::future::pending().await
        }
    }

    /// Hands back a stream at once and reports the far side's fate later,
    /// the way an API-server port-forward does
    struct ReportingTransport {
        refused: bool,
    }

    #[async_trait]
    impl ForwardTransport for ReportingTransport {
        async fn dial(&self, _endpoint: &SelectedEndpoint, port: u16) -> Result<Dialed, Error> {
            let (near, far) = tokio::io::duplex(64);
            let (failure_tx, failure_rx) = oneshot::channel();
            if self.refused {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    drop(far);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let _ = failure_tx.send(format!(
                        "error forwarding port {}: dial tcp4 127.0.0.1:{}: connect: connection refused",
                        port, port
                    ));
                });
            } else {
                tokio::spawn(async move {
                    let _keep_open = far;
                    let _quiet = failure_tx;
                    std::future::pending::<()>().await;
                });
            }
            Ok(Dialed::new(Box::new(near)).with_failure(failure_rx))
        }
    }

    fn reporting_manager(refused: bool) -> TunnelManager {
        TunnelManager::new(Arc::new(ReportingTransport { refused }))
            .with_registry(PortRegistry::new())
            .with_options(TunnelOptions {
                probe_settle: Duration::from_millis(200),
                ..TunnelOptions::default()
            })
    }

    async fn echo_server() -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.expect("bind echo");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut r, mut w) = socket.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });
        port
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.expect("bind");
        listener.local_addr().expect("addr").port()
    }

    fn manager(delay: Duration) -> TunnelManager {
        TunnelManager::new(Arc::new(LoopbackTransport { delay })).with_registry(PortRegistry::new())
    }

    fn frontend() -> SelectedEndpoint {
        SelectedEndpoint::pod("e2e", "test-frontend-0")
    }

    async fn round_trip(address: &str, payload: &[u8]) -> Vec<u8> {
        let mut client = TcpStream::connect(address).await.expect("connect through tunnel");
        client.write_all(payload).await.expect("write");
        let mut buf = vec![0u8; payload.len()];
        client.read_exact(&mut buf).await.expect("read echo");
        buf
    }

    #[tokio::test]
    async fn test_open_forwards_bytes_then_close_refuses() {
        let remote = echo_server().await;
        let sink = MemoryLogSink::new();
        let mut tunnel = manager(Duration::ZERO)
            .open(frontend(), remote, Arc::new(sink.clone()))
            .await
            .expect("tunnel opens");

        assert_eq!(tunnel.state(), TunnelState::Ready);
        assert!(tunnel.address().starts_with("127.0.0.1:"));
        assert_eq!(tunnel.target(), format!("e2e/test-frontend-0:{}", remote));
        assert_eq!(round_trip(&tunnel.address(), b"ping").await, b"ping");

        tunnel.close().await.expect("clean close");
        assert_eq!(tunnel.state(), TunnelState::Closed);
        assert!(TcpStream::connect(tunnel.address()).await.is_err());
        assert!(sink.contains("Forwarding from"));
        assert!(sink.contains("Stopped forwarding"));
    }

    #[tokio::test]
    async fn test_close_twice_is_noop() {
        let remote = echo_server().await;
        let mut tunnel = manager(Duration::ZERO)
            .open(frontend(), remote, Arc::new(MemoryLogSink::new()))
            .await
            .expect("tunnel opens");

        tunnel.close().await.expect("first close");
        tunnel.close().await.expect("second close");
        assert_eq!(tunnel.state(), TunnelState::Closed);
    }

    #[tokio::test]
    async fn test_slow_transport_delays_open() {
        let remote = echo_server().await;
        let delay = Duration::from_millis(200);
        let started = Instant::now();

        let mut tunnel = manager(delay)
            .open(frontend(), remote, Arc::new(MemoryLogSink::new()))
            .await
            .expect("tunnel opens");

        assert!(started.elapsed() >= delay);
        assert_eq!(round_trip(&tunnel.address(), b"late").await, b"late");
        tunnel.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_a_tunnel_error() {
        let registry = PortRegistry::new();
        let sink = MemoryLogSink::new();
        let err = manager(Duration::ZERO)
            .with_registry(Arc::clone(&registry))
            .open(frontend(), closed_port().await, Arc::new(sink.clone()))
            .await
            .expect_err("nothing listens remotely");

        assert!(matches!(err, Error::Tunnel { .. }));
        assert!(err.to_string().contains("e2e/test-frontend-0"));
        assert!(sink.contains("error:"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_hanging_transport_fails_within_ready_timeout() {
        let ready_timeout = Duration::from_millis(100);
        let started = Instant::now();
        let err = TunnelManager::new(Arc::new(HangingTransport))
            .with_registry(PortRegistry::new())
            .with_options(TunnelOptions {
                local_port: None,
                ready_timeout,
                probe_settle: DEFAULT_PROBE_SETTLE,
            })
            .open(frontend(), 7233, Arc::new(MemoryLogSink::new()))
            .await
            .expect_err("never ready");

        assert!(err.to_string().contains("not reachable within"));
        assert!(started.elapsed() >= ready_timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_fixed_local_port_is_not_shared() {
        let remote = echo_server().await;
        let free = closed_port().await;
        let manager = manager(Duration::ZERO).with_options(TunnelOptions {
            local_port: Some(free),
            ..TunnelOptions::default()
        });

        let mut first = manager
            .open(frontend(), remote, Arc::new(MemoryLogSink::new()))
            .await
            .expect("first tunnel");
        assert_eq!(first.local_addr().port(), free);

        let err = manager
            .open(frontend(), remote, Arc::new(MemoryLogSink::new()))
            .await
            .expect_err("port held");
        assert!(matches!(err, Error::Tunnel { .. }));

        first.close().await.expect("close");
        let mut second = manager
            .open(frontend(), remote, Arc::new(MemoryLogSink::new()))
            .await
            .expect("port free again");
        second.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_concurrent_tunnels_get_distinct_ports() {
        let remote = echo_server().await;
        let manager = manager(Duration::ZERO);
        let sink: Arc<dyn LogSink> = Arc::new(MemoryLogSink::new());

        let (a, b) = tokio::join!(
            manager.open(frontend(), remote, Arc::clone(&sink)),
            manager.open(frontend(), remote, Arc::clone(&sink)),
        );
        let (mut a, mut b) = (a.expect("a"), b.expect("b"));
        assert_ne!(a.address(), b.address());

        a.close().await.expect("close a");
        b.close().await.expect("close b");
    }

    #[tokio::test]
    async fn test_drop_stops_worker() {
        let remote = echo_server().await;
        let tunnel = manager(Duration::ZERO)
            .open(frontend(), remote, Arc::new(MemoryLogSink::new()))
            .await
            .expect("tunnel opens");
        let address = tunnel.address();
        let mut state = tunnel.state.clone();
        drop(tunnel);

        tokio::time::timeout(Duration::from_secs(5), state.wait_for(TunnelState::is_terminal))
            .await
            .expect("worker stops")
            .expect("state channel open until terminal");
        assert!(TcpStream::connect(address).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_remote_port_reported_after_stream_fails_open() {
        let registry = PortRegistry::new();
        let sink = MemoryLogSink::new();
        let err = reporting_manager(true)
            .with_registry(Arc::clone(&registry))
            .open(frontend(), 5432, Arc::new(sink.clone()))
            .await
            .expect_err("container port is closed");

        assert!(matches!(err, Error::Tunnel { .. }));
        assert!(err.to_string().contains("connection refused"), "{err}");
        assert!(sink.contains("connection refused"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_quiet_reporting_stream_becomes_ready_after_settle() {
        let started = Instant::now();
        let mut tunnel = reporting_manager(false)
            .open(frontend(), 5432, Arc::new(MemoryLogSink::new()))
            .await
            .expect("nothing reported");

        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(tunnel.state(), TunnelState::Ready);
        tunnel.close().await.expect("close");
    }

    /// A worker that dies after ready surfaces its error through state and close
    #[tokio::test]
    async fn test_failure_after_ready_is_returned_by_close() {
        let sink = MemoryLogSink::new();
        let (state_tx, state_rx) = watch::channel(TunnelState::Ready);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let local_addr: SocketAddr = "127.0.0.1:7233".parse().expect("addr");
        let worker = Worker {
            transport: Arc::new(LoopbackTransport { delay: Duration::ZERO }),
            endpoint: Arc::new(frontend()),
            remote_port: 7233,
            target: "e2e/test-frontend-0:7233".to_string(),
            local_addr,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            probe_settle: DEFAULT_PROBE_SETTLE,
            sink: Arc::new(sink.clone()),
            state: state_tx,
        };
        let handle = tokio::spawn(async move {
            let _ = stop_rx.await;
            worker.conclude(Err(Error::tunnel_for(
                "e2e/test-frontend-0:7233",
                "accept failed: too many open files",
            )))
        });
        let mut tunnel = Tunnel {
            local_addr,
            target: "e2e/test-frontend-0:7233".to_string(),
            state: state_rx,
            stop_tx: Some(stop_tx),
            worker: Some(handle),
        };

        let err = tunnel.close().await.expect_err("worker failed");
        assert!(err.to_string().contains("too many open files"));
        match tunnel.state() {
            TunnelState::Failed(reason) => assert!(reason.contains("accept failed"), "{reason}"),
            other => panic!("expected Failed, got {other}"),
        }
        assert!(sink.contains("error: tunnel error for e2e/test-frontend-0:7233"));
        tunnel.close().await.expect("second close is a no-op");
    }
}
