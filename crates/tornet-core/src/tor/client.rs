//! Top-level Tor network client.
//!
//! [`TorNetworkClient`] owns the control session and the SOCKS5 connector,
//! drives the connection lifecycle and runs the background health monitor.
//! It is a cheap `Clone` handle; construct one at startup and pass it to
//! whatever needs Tor.
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Authenticated -> Connected
//!       ^                                                             |
//!       +---------------- Closing <---- (disconnect / Failed) <-------+
//! ```

use super::controller::{ControlSession, TorAuth};
use super::socks::Socks5Connector;
use super::status::{CircuitInfo, CircuitState, StreamInfo};
use crate::config::TorConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::logging::RedactedHost;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{watch, MappedMutexGuard, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub use reqwest::Method;

/// Delay between polls while waiting for a new circuit.
const CIRCUIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No control session.
    Disconnected,
    /// Opening the control connection.
    Connecting,
    /// Sending credentials.
    Authenticating,
    /// Control session ready, SOCKS path not yet verified.
    Authenticated,
    /// Ready for tunnels and requests.
    Connected,
    /// Tearing down.
    Closing,
    /// The last connect attempt failed.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of [`TorNetworkClient::ensure_circuit_available`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitAvailability {
    /// A circuit was already built; nothing was requested.
    Existing(u32),
    /// A new circuit was requested and reached `BUILT`.
    Built(u32),
    /// A new circuit was requested but did not build in time.
    Pending(u32),
    /// No built circuit and the live-circuit budget is used up.
    AtCapacity,
    /// No built circuit and none could be created.
    Unavailable,
}

/// Replace-on-poll cache of records keyed by ID.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot<T> {
    /// Records from the last refresh.
    pub entries: BTreeMap<u32, T>,
    /// When the last refresh happened; `None` if never.
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            refreshed_at: None,
        }
    }
}

impl<T> Snapshot<T> {
    fn replace(&mut self, entries: BTreeMap<u32, T>) {
        self.entries = entries;
        self.refreshed_at = Some(Utc::now());
    }
}

/// Result of the background health checks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthStatus {
    /// Whether the last probe succeeded.
    pub healthy: bool,
    /// When the last probe ran.
    pub last_check: Option<DateTime<Utc>>,
    /// Failed probes since the last success.
    pub consecutive_failures: u32,
    /// Error from the last failed probe.
    pub last_error: Option<String>,
}

/// Why the last `connect()` returned `false`.
#[derive(Debug, Clone)]
pub struct ConnectFailure {
    /// Error category.
    pub kind: ErrorKind,
    /// Error message.
    pub message: String,
    /// When the attempt failed.
    pub at: DateTime<Utc>,
}

struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    config: TorConfig,
    socks: Socks5Connector,
    state_tx: watch::Sender<ConnectionState>,
    health_tx: watch::Sender<HealthStatus>,
    /// Bumped by every disconnect; a connect attempt only applies its
    /// transitions while the epoch it started with is current.
    epoch: AtomicU64,
    connect_lock: Mutex<()>,
    control: Mutex<Option<ControlSession>>,
    circuits: RwLock<Snapshot<CircuitInfo>>,
    streams: RwLock<Snapshot<StreamInfo>>,
    monitor: Mutex<Option<MonitorHandle>>,
    last_failure: std::sync::Mutex<Option<ConnectFailure>>,
}

/// Client for a local Tor daemon.
#[derive(Clone)]
pub struct TorNetworkClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for TorNetworkClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TorNetworkClient")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl TorNetworkClient {
    /// Create a disconnected client.
    pub fn new(config: TorConfig) -> Self {
        let socks = Socks5Connector::new(config.socks_host.clone(), config.socks_port);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (health_tx, _) = watch::channel(HealthStatus::default());

        Self {
            inner: Arc::new(Inner {
                config,
                socks,
                state_tx,
                health_tx,
                epoch: AtomicU64::new(0),
                connect_lock: Mutex::new(()),
                control: Mutex::new(None),
                circuits: RwLock::new(Snapshot::default()),
                streams: RwLock::new(Snapshot::default()),
                monitor: Mutex::new(None),
                last_failure: std::sync::Mutex::new(None),
            }),
        }
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &TorConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Whether the client is ready for tunnels.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Latest health-check result.
    pub fn health(&self) -> HealthStatus {
        self.inner.health_tx.borrow().clone()
    }

    /// Watch health-check results.
    pub fn subscribe_health(&self) -> watch::Receiver<HealthStatus> {
        self.inner.health_tx.subscribe()
    }

    /// Why the most recent `connect()` failed, if it did.
    pub fn last_failure(&self) -> Option<ConnectFailure> {
        self.inner
            .last_failure
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    /// Connect to Tor: control session, authentication, SOCKS probe.
    ///
    /// Returns `true` once the client is `Connected` (immediately if it
    /// already was). On failure the client ends `Disconnected`, the cause is
    /// logged and available from [`last_failure`](Self::last_failure).
    pub async fn connect(&self) -> bool {
        let _guard = self.inner.connect_lock.lock().await;

        // A disconnect that is still tearing down must finish first, or its
        // final Disconnected would land on top of this attempt.
        let mut state_rx = self.inner.state_tx.subscribe();
        let epoch = match state_rx.wait_for(|state| *state != ConnectionState::Closing).await {
            Ok(state) if *state == ConnectionState::Connected => return true,
            Ok(_) => self.inner.epoch.load(Ordering::SeqCst),
            Err(_) => return false,
        };

        match self.try_connect(epoch).await {
            Ok(()) => {
                info!("Connected to Tor network successfully");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to Tor");
                self.record_failure(&e);
                let _ = self.advance(epoch, ConnectionState::Failed);
                self.disconnect().await;
                false
            }
        }
    }

    async fn try_connect(&self, epoch: u64) -> Result<()> {
        let config = &self.inner.config;
        self.advance(epoch, ConnectionState::Connecting)?;

        let mut session = self
            .with_retry("control connect", || {
                ControlSession::connect(&config.control_host, config.control_port, config.timeout)
            })
            .await?;

        if let Err(e) = self.prepare_session(&mut session, epoch).await {
            session.close().await;
            return Err(e);
        }

        {
            let mut control = self.inner.control.lock().await;
            if self.inner.epoch.load(Ordering::SeqCst) != epoch {
                session.close().await;
                return Err(aborted());
            }
            *control = Some(session);
        }

        self.probe_socks()
            .await
            .map_err(|e| Error::Connection(format!("SOCKS proxy test failed: {}", e)))?;

        let mut monitor = self.inner.monitor.lock().await;
        self.advance(epoch, ConnectionState::Connected)?;
        *monitor = Some(self.spawn_monitor());
        Ok(())
    }

    /// Authenticate and apply exit-node policy on a fresh session.
    async fn prepare_session(&self, session: &mut ControlSession, epoch: u64) -> Result<()> {
        let config = &self.inner.config;

        self.advance(epoch, ConnectionState::Authenticating)?;
        session
            .authenticate(TorAuth::from_config(config).as_ref())
            .await?;
        self.advance(epoch, ConnectionState::Authenticated)?;

        if let Some(nodes) = &config.custom_exit_nodes {
            let strict = if config.strict_exit_nodes { "1" } else { "0" };
            session
                .set_conf(&[
                    ("ExitNodes", nodes.join(",")),
                    ("StrictNodes", strict.to_string()),
                ])
                .await?;
            info!(count = nodes.len(), strict = config.strict_exit_nodes, "Applied exit node policy");
        }
        Ok(())
    }

    /// Tear everything down and end `Disconnected`.
    ///
    /// Safe from any state, including while `connect()` is in flight; that
    /// attempt then returns `false`. Calling it when already disconnected
    /// does nothing.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let closing = inner.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                return false;
            }
            inner.epoch.fetch_add(1, Ordering::SeqCst);
            *state = ConnectionState::Closing;
            true
        });
        if !closing {
            return;
        }

        self.stop_monitor().await;

        if let Some(mut session) = inner.control.lock().await.take() {
            session.close().await;
        }
        *inner.circuits.write().await = Snapshot::default();
        *inner.streams.write().await = Snapshot::default();
        inner.health_tx.send_replace(HealthStatus::default());

        inner.state_tx.send_modify(|state| {
            inner.epoch.fetch_add(1, Ordering::SeqCst);
            *state = ConnectionState::Disconnected;
        });
        info!("Disconnected from Tor network");
    }

    /// Open a tunnel to `target_host:target_port` through Tor.
    ///
    /// Makes sure a built circuit exists first. The returned stream belongs
    /// to the caller; the client keeps no reference to it. `timeout`
    /// defaults to the configured stream timeout.
    pub async fn create_connection(
        &self,
        target_host: &str,
        target_port: u16,
        timeout: Option<Duration>,
    ) -> Result<TcpStream> {
        self.ensure_connected()?;
        let timeout = timeout.unwrap_or(self.inner.config.stream_timeout);

        let availability = self.ensure_circuit_available().await;
        debug!(?availability, "Circuit check before tunnel");

        let socks = &self.inner.socks;
        let stream = self
            .with_retry("SOCKS tunnel", || socks.connect(target_host, target_port, timeout))
            .await
            .map_err(|e| {
                error!(
                    target = %RedactedHost(target_host),
                    port = target_port,
                    error = %e,
                    "Failed to create connection"
                );
                e
            })?;

        debug!(
            target = %RedactedHost(target_host),
            port = target_port,
            "Created connection through Tor"
        );
        Ok(stream)
    }

    /// Make sure at least one circuit is `BUILT`.
    ///
    /// If none is, asks Tor for a new one and polls once a second for up to
    /// `circuit_build_timeout`. Not reaching `BUILT` in time is logged and
    /// reported as [`CircuitAvailability::Pending`], not treated as an error:
    /// Tor may still attach the stream to a circuit it builds meanwhile.
    pub async fn ensure_circuit_available(&self) -> CircuitAvailability {
        let circuits = self.get_circuit_info().await;
        if let Some(built) = circuits.iter().find(|c| c.state == CircuitState::Built) {
            return CircuitAvailability::Existing(built.circuit_id);
        }

        let live = circuits.iter().filter(|c| c.state.is_live()).count();
        if live >= self.inner.config.max_circuits {
            warn!(live, max = self.inner.config.max_circuits, "Circuit limit reached, not requesting another");
            return CircuitAvailability::AtCapacity;
        }

        let created = match self.control().await {
            Ok(mut session) => session.new_circuit().await,
            Err(e) => Err(e),
        };
        let circuit_id = match created {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "Failed to create circuit");
                return CircuitAvailability::Unavailable;
            }
        };
        info!(circuit_id, "Created new circuit");

        let polls = self.inner.config.circuit_build_timeout.as_secs().max(1);
        for _ in 0..polls {
            tokio::time::sleep(CIRCUIT_POLL_INTERVAL).await;
            let circuits = self.get_circuit_info().await;
            match circuits.iter().find(|c| c.circuit_id == circuit_id).map(|c| c.state) {
                Some(CircuitState::Built) => return CircuitAvailability::Built(circuit_id),
                Some(CircuitState::Failed) | Some(CircuitState::Closed) => {
                    warn!(circuit_id, "New circuit failed before it was built");
                    return CircuitAvailability::Unavailable;
                }
                _ => {}
            }
        }

        warn!(circuit_id, "Circuit did not build within timeout");
        CircuitAvailability::Pending(circuit_id)
    }

    /// Refresh and return the circuit list. Empty without a control
    /// session or on error.
    pub async fn get_circuit_info(&self) -> Vec<CircuitInfo> {
        let result = match self.control().await {
            Ok(mut session) => session.get_circuits().await,
            Err(_) => return Vec::new(),
        };
        match result {
            Ok(circuits) => {
                let entries = circuits.iter().map(|c| (c.circuit_id, c.clone())).collect();
                self.inner.circuits.write().await.replace(entries);
                circuits
            }
            Err(e) => {
                error!(error = %e, "Failed to get circuit info");
                Vec::new()
            }
        }
    }

    /// Refresh and return the stream list. Empty without a control session
    /// or on error.
    pub async fn get_stream_info(&self) -> Vec<StreamInfo> {
        let result = match self.control().await {
            Ok(mut session) => session.get_streams().await,
            Err(_) => return Vec::new(),
        };
        match result {
            Ok(streams) => {
                let entries = streams.iter().map(|s| (s.stream_id, s.clone())).collect();
                self.inner.streams.write().await.replace(entries);
                streams
            }
            Err(e) => {
                error!(error = %e, "Failed to get stream info");
                Vec::new()
            }
        }
    }

    /// Circuits as of the last refresh.
    pub async fn circuits(&self) -> Snapshot<CircuitInfo> {
        self.inner.circuits.read().await.clone()
    }

    /// Streams as of the last refresh.
    pub async fn streams(&self) -> Snapshot<StreamInfo> {
        self.inner.streams.read().await.clone()
    }

    /// Close a circuit. Best-effort.
    pub async fn close_circuit(&self, circuit_id: u32) -> bool {
        match self.control().await {
            Ok(mut session) => session.close_circuit(circuit_id).await,
            Err(_) => false,
        }
    }

    /// Ask Tor for fresh circuits for new streams (`SIGNAL NEWNYM`).
    pub async fn new_identity(&self) -> Result<()> {
        self.ensure_connected()?;
        self.control().await?.signal("NEWNYM").await?;
        info!("Requested new identity");
        Ok(())
    }

    /// Version of the Tor daemon.
    pub async fn tor_version(&self) -> Result<String> {
        self.control().await?.get_version().await
    }

    /// HTTP client routed through the SOCKS proxy.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let config = &self.inner.config;
        let proxy = reqwest::Proxy::all(config.proxy_url())?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(config.stream_timeout)
            .danger_accept_invalid_certs(!config.verify_certificates)
            .build()?;
        Ok(client)
    }

    /// Request builder routed through Tor, for requests that need headers
    /// or a body. The configured stream timeout is already applied.
    pub fn request(&self, method: Method, url: &str) -> Result<reqwest::RequestBuilder> {
        self.ensure_connected()?;
        Ok(self.http_client()?.request(method, url))
    }

    /// Send a bodiless HTTP request through Tor.
    pub async fn make_request(&self, method: Method, url: &str) -> Result<reqwest::Response> {
        let builder = self.request(method.clone(), url)?;
        match builder.send().await {
            Ok(response) => {
                debug!(%method, status = %response.status(), "Made request through Tor");
                Ok(response)
            }
            Err(e) => {
                error!(%method, error = %e, "Request through Tor failed");
                Err(e.into())
            }
        }
    }

    /// GET the configured probe URL; `true` on HTTP 200.
    pub async fn test_connection(&self) -> bool {
        let url = self.inner.config.probe_url.clone();
        match self.make_request(Method::GET, &url).await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                warn!(error = %e, "Connection test failed");
                false
            }
        }
    }

    /// Lend a tunneled stream to `f`, shutting it down afterwards whatever
    /// `f` returns.
    ///
    /// ```no_run
    /// # use tornet_core::{TorConfig, TorNetworkClient};
    /// # use tokio::io::AsyncWriteExt;
    /// # async fn example(client: TorNetworkClient) -> tornet_core::Result<()> {
    /// client
    ///     .with_connection("example.com", 80, |stream| {
    ///         Box::pin(async move {
    ///             stream.write_all(b"HEAD / HTTP/1.0\r\n\r\n").await?;
    ///             Ok(())
    ///         })
    ///     })
    ///     .await
    /// # }
    /// ```
    pub async fn with_connection<T, F>(&self, target_host: &str, target_port: u16, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut TcpStream) -> BoxFuture<'a, Result<T>>,
    {
        let mut stream = self.create_connection(target_host, target_port, None).await?;
        let result = f(&mut stream).await;
        let _ = stream.shutdown().await;
        result
    }

    /// Hand a proxy-bound HTTP client to `f` for the duration of the call.
    pub async fn with_http_client<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(reqwest::Client) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_connected()?;
        let client = self.http_client()?;
        f(client).await
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::Connection("Not connected to Tor network".into()))
        }
    }

    async fn control(&self) -> Result<MappedMutexGuard<'_, ControlSession>> {
        let guard = self.inner.control.lock().await;
        MutexGuard::try_map(guard, |session| session.as_mut())
            .map_err(|_| Error::Connection("control session not available".into()))
    }

    /// SOCKS liveness probe against the configured probe host.
    async fn probe_socks(&self) -> Result<()> {
        let config = &self.inner.config;
        let mut stream = self
            .inner
            .socks
            .connect(&config.probe_host, config.probe_port, config.timeout)
            .await?;
        let _ = stream.shutdown().await;
        Ok(())
    }

    /// Move to `next` unless a disconnect happened since `epoch` was read.
    fn advance(&self, epoch: u64, next: ConnectionState) -> Result<()> {
        let inner = &self.inner;
        let moved = inner.state_tx.send_if_modified(|state| {
            if inner.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            *state = next;
            true
        });
        if moved {
            debug!(state = %next, "Connection state changed");
            Ok(())
        } else {
            Err(aborted())
        }
    }

    fn record_failure(&self, e: &Error) {
        if let Ok(mut last) = self.inner.last_failure.lock() {
            *last = Some(ConnectFailure {
                kind: e.kind(),
                message: e.to_string(),
                at: Utc::now(),
            });
        }
    }

    /// Retry transient failures of `op` per the configured policy.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.inner.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(what, attempt, error = %e, "Attempt failed, retrying");
                    tokio::time::sleep(self.inner.config.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn spawn_monitor(&self) -> MonitorHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::downgrade(&self.inner);
        let interval = self.inner.config.health_check_interval;
        let task = tokio::spawn(monitor_loop(inner, interval, shutdown_rx));
        MonitorHandle { shutdown, task }
    }

    async fn stop_monitor(&self) {
        let handle = self.inner.monitor.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);
            if let Err(e) = handle.task.await {
                if e.is_panic() {
                    error!("Health monitor panicked");
                }
            }
        }
    }

    async fn run_health_check(&self) {
        self.get_circuit_info().await;
        self.get_stream_info().await;

        let result = self.probe_socks().await;
        self.inner.health_tx.send_modify(|health| {
            health.last_check = Some(Utc::now());
            match &result {
                Ok(()) => {
                    health.healthy = true;
                    health.consecutive_failures = 0;
                    health.last_error = None;
                }
                Err(e) => {
                    health.healthy = false;
                    health.consecutive_failures += 1;
                    health.last_error = Some(e.to_string());
                }
            }
        });

        if let Err(e) = result {
            warn!(error = %e, "Tor connection health check failed");
        }
    }
}

/// Periodic health checks; never changes the connection state.
async fn monitor_loop(
    inner: Weak<Inner>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(?interval, "Health monitor started");
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else { break };
        let client = TorNetworkClient { inner };
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = client.run_health_check() => {}
        }
    }
    debug!("Health monitor stopped");
}

fn aborted() -> Error {
    Error::Connection("connect aborted by disconnect".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_client_is_disconnected() {
        let client = TorNetworkClient::new(TorConfig::default());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(client.last_failure().is_none());
        assert!(!client.health().healthy);
        assert!(client.circuits().await.refreshed_at.is_none());
    }

    #[tokio::test]
    async fn test_operations_fail_fast_when_disconnected() {
        let client = TorNetworkClient::new(TorConfig::default());

        let err = client.create_connection("example.com", 80, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);

        let err = client.make_request(Method::GET, "http://example.com/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);

        assert!(client.request(Method::GET, "http://example.com/").is_err());
        assert!(client.new_identity().await.is_err());
        assert!(!client.close_circuit(1).await);
        assert!(client.get_circuit_info().await.is_empty());
        assert!(client.get_stream_info().await.is_empty());
        assert_eq!(client.ensure_circuit_available().await, CircuitAvailability::Unavailable);
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let client = TorNetworkClient::new(TorConfig::default());
        let mut states = client.subscribe_state();
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!states.has_changed().unwrap());
    }

    #[test]
    fn test_http_client_builds_with_proxy() {
        let client = TorNetworkClient::new(TorConfig {
            verify_certificates: false,
            ..Default::default()
        });
        assert!(client.http_client().is_ok());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Authenticating.to_string(), "authenticating");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
