//! Tunnel runtime - one SSH session with a reverse listener
//!
//! The runtime drives repeated connect attempts until it is stopped or the
//! host rejects its credentials. Each successful connect requests a remote
//! listener via `tcpip-forward`; the host then pushes a `forwarded-tcpip`
//! channel for every connection it accepts, and the runtime bridges that
//! channel to a freshly dialed connection to the service address.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Msg};
use russh::keys::ssh_key;
use russh::{Channel, Disconnect};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::endpoints::Endpoints;
use crate::error::TunnelError;
use crate::persist::TunnelStatusStore;
use crate::supervisor;

/// SSH dial timeout for every connect attempt.
pub(crate) const SSH_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the retry loop checks whether a live session has died.
const SESSION_POLL: Duration = Duration::from_secs(1);

/// Composite identity of one tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelKey {
    pub host_id: i32,
    pub sp_id: i32,
}

impl TunnelKey {
    pub fn new(host_id: i32, sp_id: i32) -> Self {
        Self { host_id, sp_id }
    }
}

impl std::fmt::Display for TunnelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.host_id, self.sp_id)
    }
}

/// Password credentials for one host.
#[derive(Clone)]
pub struct SshAuth {
    pub user: String,
    pub password: String,
}

/// One tunnel: an SSH client, its remote listener and the forward tasks.
///
/// `start` and `stop` may race with each other and with the supervisor; the
/// stop mutex serializes them and gates every tunnel-record write, so no
/// write can land after `stop` has deleted the record.
pub struct TunnelRuntime {
    key: TunnelKey,
    endpoints: Endpoints,
    auth: SshAuth,
    persist: Arc<dyn TunnelStatusStore>,
    client: RwLock<Option<Arc<client::Handle<ForwardHandler>>>>,
    stopped: Mutex<bool>,
    stop_tx: watch::Sender<bool>,
    connect_gate: Mutex<()>,
    supervisor_running: AtomicBool,
}

impl TunnelRuntime {
    pub fn new(
        key: TunnelKey,
        endpoints: Endpoints,
        auth: SshAuth,
        persist: Arc<dyn TunnelStatusStore>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            key,
            endpoints,
            auth,
            persist,
            client: RwLock::new(None),
            stopped: Mutex::new(false),
            stop_tx,
            connect_gate: Mutex::new(()),
            supervisor_running: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> TunnelKey {
        self.key
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub(crate) fn server_addr(&self) -> SocketAddr {
        self.endpoints.server
    }

    pub(crate) fn stop_rx(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub(crate) async fn is_stopped(&self) -> bool {
        *self.stopped.lock().await
    }

    /// Write the initial `starting` record with the resolved endpoint
    /// strings. Called once by the manager after registration.
    pub(crate) async fn upsert_starting(&self) -> Result<(), sea_orm::DbErr> {
        let stopped = self.stopped.lock().await;
        if *stopped {
            return Ok(());
        }
        self.persist
            .upsert_starting(
                self.key,
                &self.endpoints.server.to_string(),
                &self.endpoints.local.to_string(),
                &self.endpoints.remote.to_string(),
            )
            .await
    }

    /// Drive the tunnel through repeated connect attempts until stopped or
    /// until the host rejects authentication. Blocks the calling task.
    pub async fn start(self: Arc<Self>, monitoring_interval: Duration) {
        let mut stop_rx = self.stop_rx();

        info!(
            tunnel = %self.key,
            server = %self.endpoints.server,
            local = %self.endpoints.local,
            remote = %self.endpoints.remote,
            "starting tunnel"
        );

        loop {
            if self.is_stopped().await {
                return;
            }

            match self.connect_once().await {
                Ok(()) => {
                    self.spawn_supervisor(monitoring_interval);

                    // Hold here while the session is healthy. The supervisor
                    // reconnects in place on probe failures; this loop only
                    // resumes driving attempts once the client slot is dead.
                    loop {
                        tokio::select! {
                            _ = stop_rx.changed() => return,
                            _ = tokio::time::sleep(SESSION_POLL) => {
                                if !self.client_alive().await {
                                    break;
                                }
                            }
                        }
                    }

                    if self.is_stopped().await {
                        return;
                    }
                    debug!(tunnel = %self.key, "session lost, re-entering retry loop");
                }
                Err(err) if !err.is_retriable() => {
                    error!(tunnel = %self.key, server = %self.endpoints.server, error = %err,
                        "tunnel failed permanently");
                    return;
                }
                Err(err) => {
                    error!(tunnel = %self.key, server = %self.endpoints.server, error = %err,
                        retry_in_secs = monitoring_interval.as_secs(), "connection failed, retrying");
                }
            }

            tokio::select! {
                _ = stop_rx.changed() => return,
                _ = tokio::time::sleep(monitoring_interval) => {}
            }
            self.record_reconnecting().await;
        }
    }

    /// One connect attempt: dial, authenticate, request the remote listener,
    /// publish the client and mark the record connected.
    ///
    /// Serialized against concurrent attempts (the supervisor may race the
    /// retry loop); an attempt that finds a live client is a no-op.
    pub(crate) async fn connect_once(&self) -> Result<(), TunnelError> {
        let _gate = self.connect_gate.lock().await;

        if self.is_stopped().await {
            return Err(TunnelError::Stopped);
        }
        if self.client_alive().await {
            return Ok(());
        }

        let server = self.endpoints.server;
        let config = Arc::new(client::Config::default());
        let handler = ForwardHandler {
            key: self.key,
            remote: self.endpoints.remote,
        };

        let mut session =
            match tokio::time::timeout(SSH_DIAL_TIMEOUT, client::connect(config, server, handler))
                .await
            {
                Ok(Ok(session)) => session,
                Ok(Err(source)) => {
                    let err = TunnelError::Dial { server, source };
                    self.record_error(&err).await;
                    return Err(err);
                }
                Err(_) => {
                    let err = TunnelError::DialTimeout {
                        server,
                        timeout_secs: SSH_DIAL_TIMEOUT.as_secs(),
                    };
                    self.record_error(&err).await;
                    return Err(err);
                }
            };

        let authenticated = match tokio::time::timeout(
            SSH_DIAL_TIMEOUT,
            session.authenticate_password(self.auth.user.clone(), self.auth.password.clone()),
        )
        .await
        {
            Ok(Ok(result)) => result.success(),
            Ok(Err(source)) => {
                let err = TunnelError::Dial { server, source };
                self.record_error(&err).await;
                return Err(err);
            }
            Err(_) => {
                let err = TunnelError::DialTimeout {
                    server,
                    timeout_secs: SSH_DIAL_TIMEOUT.as_secs(),
                };
                self.record_error(&err).await;
                return Err(err);
            }
        };
        if !authenticated {
            let err = TunnelError::Auth {
                server,
                user: self.auth.user.clone(),
            };
            self.record_error(&err).await;
            let _ = session
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(err);
        }

        let local = self.endpoints.local;
        match tokio::time::timeout(
            SSH_DIAL_TIMEOUT,
            session.tcpip_forward(local.ip().to_string(), u32::from(local.port())),
        )
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(source)) => {
                let err = TunnelError::Listen {
                    server,
                    local,
                    source,
                };
                self.record_error(&err).await;
                let _ = session
                    .disconnect(Disconnect::ByApplication, "listen failed", "en")
                    .await;
                return Err(err);
            }
            Err(_) => {
                let err = TunnelError::DialTimeout {
                    server,
                    timeout_secs: SSH_DIAL_TIMEOUT.as_secs(),
                };
                self.record_error(&err).await;
                let _ = session
                    .disconnect(Disconnect::ByApplication, "listen timed out", "en")
                    .await;
                return Err(err);
            }
        }

        {
            let stopped = self.stopped.lock().await;
            if *stopped {
                drop(stopped);
                let _ = session
                    .disconnect(Disconnect::ByApplication, "tunnel stopped", "en")
                    .await;
                return Err(TunnelError::Stopped);
            }

            // The client lock is only held for the swap; the stale handle is
            // torn down outside it.
            let stale = self.client.write().await.replace(Arc::new(session));
            if let Some(stale) = stale {
                let _ = stale
                    .disconnect(Disconnect::ByApplication, "superseded", "en")
                    .await;
            }

            if let Err(err) = self.persist.mark_connected(self.key).await {
                warn!(tunnel = %self.key, error = %err, "failed to update tunnel record");
            }
        }

        info!(
            tunnel = %self.key,
            server = %server,
            local = %local,
            remote = %self.endpoints.remote,
            "tunnel connected"
        );
        Ok(())
    }

    /// Supervisor-triggered reconnection: mark the record, drop the dead
    /// client and run one connect attempt. On failure the retry loop in
    /// [`TunnelRuntime::start`] takes over.
    pub(crate) async fn reconnect(&self) {
        {
            let stopped = self.stopped.lock().await;
            if *stopped {
                return;
            }
            if let Err(err) = self.persist.mark_reconnecting(self.key).await {
                warn!(tunnel = %self.key, error = %err, "failed to update tunnel record");
            }
        }

        self.close_client("reconnecting").await;

        match self.connect_once().await {
            Ok(()) => info!(tunnel = %self.key, server = %self.endpoints.server, "reconnection successful"),
            Err(err) => {
                warn!(tunnel = %self.key, server = %self.endpoints.server, error = %err, "reconnection failed")
            }
        }
    }

    /// Stop the tunnel and delete its record. Idempotent and terminal: a
    /// stopped runtime never reconnects and never writes its record again.
    pub async fn stop(&self) {
        {
            let mut stopped = self.stopped.lock().await;
            if *stopped {
                return;
            }
            *stopped = true;
            let _ = self.stop_tx.send(true);

            if let Err(err) = self.persist.delete(self.key).await {
                warn!(tunnel = %self.key, error = %err, "failed to delete tunnel record");
            }
        }

        self.close_client("tunnel stopped").await;
        info!(tunnel = %self.key, "tunnel stopped");
    }

    pub(crate) async fn client_alive(&self) -> bool {
        self.client
            .read()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_closed())
    }

    /// Issue the keepalive global request (reply required) on the live
    /// client. The handle is snapshotted under a short-lived read lock and
    /// the round-trip runs outside it. A missing client is not an error;
    /// the supervisor skips it.
    pub(crate) async fn send_keepalive(&self, timeout: Duration) -> Result<(), TunnelError> {
        let server = self.endpoints.server;
        let snapshot = self.client.read().await.clone();
        let Some(handle) = snapshot else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, handle.send_keepalive(true)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(TunnelError::Keepalive {
                server,
                reason: source.to_string(),
            }),
            Err(_) => Err(TunnelError::Keepalive {
                server,
                reason: format!("no reply within {}s", timeout.as_secs()),
            }),
        }
    }

    async fn close_client(&self, reason: &str) {
        let taken = self.client.write().await.take();
        if let Some(handle) = taken {
            let _ = handle
                .disconnect(Disconnect::ByApplication, reason, "en")
                .await;
        }
    }

    fn spawn_supervisor(self: &Arc<Self>, monitoring_interval: Duration) {
        if self.supervisor_running.swap(true, Ordering::SeqCst) {
            return;
        }
        supervisor::spawn(Arc::clone(self), monitoring_interval);
    }

    pub(crate) fn supervisor_exited(&self) {
        self.supervisor_running.store(false, Ordering::SeqCst);
    }

    async fn record_error(&self, err: &TunnelError) {
        let stopped = self.stopped.lock().await;
        if *stopped {
            return;
        }
        if let Err(db_err) = self.persist.mark_error(self.key, &err.to_string()).await {
            warn!(tunnel = %self.key, error = %db_err, "failed to update tunnel record");
        }
    }

    async fn record_reconnecting(&self) {
        let stopped = self.stopped.lock().await;
        if *stopped {
            return;
        }
        if let Err(err) = self.persist.mark_reconnecting(self.key).await {
            warn!(tunnel = %self.key, error = %err, "failed to update tunnel record");
        }
    }
}

/// russh handler for one SSH session.
///
/// Hosts are accepted unconditionally; the forwarded-tcpip callback is the
/// accept path of the remote listener.
struct ForwardHandler {
    key: TunnelKey,
    remote: SocketAddr,
}

impl client::Handler for ForwardHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _connected_address: &str,
        _connected_port: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let key = self.key;
        let remote = self.remote;
        // The session task must keep processing packets; the copy loop runs
        // on its own task.
        tokio::spawn(async move {
            forward(key, channel, remote).await;
        });
        Ok(())
    }
}

/// Bridge one forwarded connection to a freshly dialed service connection.
/// Both sides are closed when either copy direction finishes.
async fn forward(key: TunnelKey, channel: Channel<Msg>, remote: SocketAddr) {
    match TcpStream::connect(remote).await {
        Ok(mut service) => {
            let mut carried = channel.into_stream();
            match tokio::io::copy_bidirectional(&mut carried, &mut service).await {
                Ok((to_service, to_host)) => {
                    debug!(tunnel = %key, to_service, to_host, "forward finished");
                }
                Err(err) => {
                    debug!(tunnel = %key, error = %err, "forward ended with error");
                }
            }
            let _ = carried.shutdown().await;
        }
        Err(err) => {
            error!(tunnel = %key, remote = %remote, error = %err, "failed to dial service");
            let _ = channel.close().await;
        }
    }
}
