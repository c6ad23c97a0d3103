//! Channel lifecycle: socket pair, preferences process, handshake, teardown.
//!
//! The main process drives a [`BridgeHost`] through
//! `Idle → SocketCreated → ProcessSpawned → ChannelEstablished →
//! ServerExported → Ready`, ending in `Closed` or `Failed`. The preferences
//! process finds its end of the channel at an inherited descriptor and calls
//! [`connect_inherited`].
//!
//! Calls the preferences process sends before the server is exported stay
//! queued in the peer and are served once it is.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;

use par_term_settings::{SchemaSource, SettingsStore};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cancel::CancellationToken;
use crate::client::{BridgeEvent, BridgedStore};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::jsonrpc::JsonRpcPeer;
use crate::protocol::{HelloParams, HelloResult, OBJECT_PATH, PROTOCOL_VERSION, method};
use crate::server::BridgeServer;

/// Environment variables that would point the preferences process at a
/// shared message bus.
pub const BUS_ENV_VARS: &[&str] = &[
    "DBUS_SESSION_BUS_ADDRESS",
    "DBUS_STARTER_ADDRESS",
    "DBUS_STARTER_BUS_TYPE",
];

/// Command-line flag carrying the inherited descriptor number.
pub const BUS_FD_FLAG: &str = "--bus-fd";

/// Where a [`BridgeHost`] is in bringing up its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    SocketCreated,
    ProcessSpawned,
    ChannelEstablished,
    ServerExported,
    Ready,
    /// Bring-up failed; the bridge is unavailable.
    Failed(String),
    /// Torn down after running.
    Closed,
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// A bridge server serving one channel.
pub struct ServerHandle {
    server: Arc<BridgeServer>,
    peer: Arc<JsonRpcPeer>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn server(&self) -> &Arc<BridgeServer> {
        &self.server
    }

    pub fn is_closed(&self) -> bool {
        self.peer.is_closed()
    }

    /// Resolve once the channel is gone.
    pub async fn closed(&self) {
        self.peer.cancel_token().cancelled().await;
    }

    /// Close the channel and wait for the server to release everything it
    /// registered on the store.
    pub async fn shutdown(self) {
        self.peer.close().await;
        if let Err(e) = self.task.await {
            log::warn!("Settings bridge server task ended abnormally: {e}");
        }
    }
}

/// Only a peer running as our own user may use the bridge.
fn authenticate(stream: &UnixStream) -> Result<(), BridgeError> {
    let cred = stream
        .peer_cred()
        .map_err(|e| BridgeError::Connection(format!("cannot read peer credentials: {e}")))?;
    // SAFETY: geteuid has no preconditions and cannot fail.
    let own_uid = unsafe { libc::geteuid() };
    if cred.uid() != own_uid {
        return Err(BridgeError::Connection(format!(
            "peer uid {} does not match uid {own_uid}",
            cred.uid()
        )));
    }
    Ok(())
}

/// Wrap `stream` as the authenticated server end of a channel. Incoming
/// calls queue until [`export_on`] starts serving them.
fn establish(stream: UnixStream) -> Result<JsonRpcPeer, BridgeError> {
    authenticate(&stream)?;
    let (reader, writer) = stream.into_split();
    Ok(JsonRpcPeer::new(reader, writer, CancellationToken::new(), None))
}

fn export_on(mut peer: JsonRpcPeer, server: Arc<BridgeServer>) -> Result<ServerHandle, BridgeError> {
    let incoming = peer
        .take_incoming()
        .ok_or_else(|| BridgeError::Connection("channel already has a consumer".to_string()))?;
    let peer = Arc::new(peer);
    let task = tokio::spawn(Arc::clone(&server).serve(Arc::clone(&peer), incoming));
    Ok(ServerHandle { server, peer, task })
}

/// Export `server` on `stream`.
pub fn export(stream: UnixStream, server: Arc<BridgeServer>) -> Result<ServerHandle, BridgeError> {
    export_on(establish(stream)?, server)
}

/// Make `from` available as `to` across exec.
///
/// Runs between fork and exec, so it may only make async-signal-safe calls.
fn inherit_fd(from: RawFd, to: RawFd) -> io::Result<()> {
    if from == to {
        // dup2 onto itself is a no-op and would leave close-on-exec set.
        // SAFETY: fcntl on a descriptor we own.
        let flags = unsafe { libc::fcntl(from, libc::F_GETFD) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: as above.
        if unsafe { libc::fcntl(from, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
            return Err(io::Error::last_os_error());
        }
        return Ok(());
    }
    // SAFETY: dup2 clears close-on-exec on the new descriptor.
    if unsafe { libc::dup2(from, to) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Runs the preferences process and the bridge it talks through.
pub struct BridgeHost {
    store: Arc<dyn SettingsStore>,
    schemas: Arc<SchemaSource>,
    config: BridgeConfig,
    state: ChannelState,
    child: Option<Child>,
    handle: Option<ServerHandle>,
    status_tx: Option<mpsc::UnboundedSender<ChannelState>>,
}

impl BridgeHost {
    pub fn new(store: Arc<dyn SettingsStore>, schemas: Arc<SchemaSource>, config: BridgeConfig) -> Self {
        Self {
            store,
            schemas,
            config,
            state: ChannelState::Idle,
            child: None,
            handle: None,
            status_tx: None,
        }
    }

    /// Report every state change on `tx`.
    pub fn with_status_channel(mut self, tx: mpsc::UnboundedSender<ChannelState>) -> Self {
        self.status_tx = Some(tx);
        self
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    pub fn server(&self) -> Option<&Arc<BridgeServer>> {
        self.handle.as_ref().map(ServerHandle::server)
    }

    pub fn child_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    fn set_state(&mut self, state: ChannelState) {
        log::info!("Settings bridge: {:?} -> {:?}", self.state, state);
        self.state = state.clone();
        if let Some(tx) = &self.status_tx {
            let _ = tx.send(state);
        }
    }

    fn fail(&mut self, err: BridgeError) -> BridgeError {
        log::error!("Settings bridge unavailable: {err}");
        self.set_state(ChannelState::Failed(err.to_string()));
        err
    }

    /// Spawn `program` with its end of a fresh channel and wait until it has
    /// completed the hello exchange.
    ///
    /// `args` follow the descriptor flag on the command line. A failure
    /// leaves the host in [`ChannelState::Failed`]; the rest of the program
    /// can carry on without the bridge.
    pub async fn launch(&mut self, program: &Path, args: &[String]) -> Result<(), BridgeError> {
        if self.state != ChannelState::Idle {
            return Err(BridgeError::Protocol(format!(
                "bridge cannot launch from state {:?}",
                self.state
            )));
        }

        let (parent_end, child_end) =
            std::os::unix::net::UnixStream::pair().map_err(|e| self.fail(BridgeError::SocketPair(e)))?;
        self.set_state(ChannelState::SocketCreated);

        let bus_fd = self.config.bus_fd;
        let child_fd = child_end.as_raw_fd();
        let mut cmd = Command::new(program);
        cmd.arg(format!("{BUS_FD_FLAG}={bus_fd}"))
            .args(args)
            .kill_on_drop(true);
        for var in BUS_ENV_VARS {
            cmd.env_remove(var);
        }
        // SAFETY: the closure only calls fcntl and dup2.
        unsafe {
            cmd.pre_exec(move || inherit_fd(child_fd, bus_fd));
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                return Err(self.fail(BridgeError::Spawn {
                    program: program.display().to_string(),
                    source,
                }));
            }
        };
        drop(child_end);
        log::info!(
            "Spawned preferences process {:?} (pid {:?}) on fd {bus_fd}",
            program,
            child.id()
        );
        self.set_state(ChannelState::ProcessSpawned);

        let peer = match Self::wrap_parent_end(parent_end) {
            Ok(peer) => peer,
            Err(e) => {
                let _ = child.kill().await;
                return Err(self.fail(e));
            }
        };
        self.set_state(ChannelState::ChannelEstablished);

        let server = Arc::new(BridgeServer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.schemas),
        ));
        let handle = match export_on(peer, server) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill().await;
                return Err(self.fail(e));
            }
        };
        self.set_state(ChannelState::ServerExported);

        let startup = self.config.startup_timeout();
        let hello = tokio::time::timeout(startup, async {
            tokio::select! {
                biased;
                _ = handle.server().wait_for_hello() => Ok(()),
                _ = handle.closed() => Err(BridgeError::Connection(
                    "channel closed before hello".to_string(),
                )),
                status = child.wait() => Err(BridgeError::Connection(match status {
                    Ok(status) => format!("preferences process exited early ({status})"),
                    Err(e) => format!("preferences process lost: {e}"),
                })),
            }
        })
        .await
        .unwrap_or_else(|_| {
            Err(BridgeError::Connection(format!(
                "no hello within {}ms",
                startup.as_millis()
            )))
        });

        if let Err(e) = hello {
            let _ = child.kill().await;
            handle.shutdown().await;
            return Err(self.fail(e));
        }

        self.child = Some(child);
        self.handle = Some(handle);
        self.set_state(ChannelState::Ready);
        Ok(())
    }

    fn wrap_parent_end(parent_end: std::os::unix::net::UnixStream) -> Result<JsonRpcPeer, BridgeError> {
        parent_end.set_nonblocking(true)?;
        establish(UnixStream::from_std(parent_end)?)
    }

    /// Wait until the preferences process exits or the channel is lost, then
    /// tear the bridge down. Channel loss counts as the process exiting.
    pub async fn wait(&mut self) -> Result<Option<ExitStatus>, BridgeError> {
        let (Some(child), Some(handle)) = (self.child.as_mut(), self.handle.as_ref()) else {
            return Err(BridgeError::Protocol("bridge is not running".to_string()));
        };
        let status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = handle.closed() => {
                log::info!("Preferences channel closed");
                None
            }
        };
        self.teardown(status).await
    }

    /// Flush the store, close the channel and stop the preferences process.
    pub async fn shutdown(&mut self) -> Result<Option<ExitStatus>, BridgeError> {
        if self.state != ChannelState::Ready {
            return Ok(None);
        }
        if let Err(e) = self.store.sync() {
            log::error!("Failed to sync settings before closing the bridge: {e}");
        }
        self.teardown(None).await
    }

    async fn teardown(&mut self, status: Option<ExitStatus>) -> Result<Option<ExitStatus>, BridgeError> {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
        }
        if let Err(e) = self.store.sync() {
            log::error!("Failed to sync settings after the bridge closed: {e}");
        }
        let status = match status {
            Some(status) => {
                self.child = None;
                Some(status)
            }
            None => self.reap_child().await?,
        };
        if let Some(status) = status {
            log::info!("Preferences process exited: {status}");
        }
        self.set_state(ChannelState::Closed);
        Ok(status)
    }

    async fn reap_child(&mut self) -> Result<Option<ExitStatus>, BridgeError> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };
        match tokio::time::timeout(self.config.shutdown_timeout(), child.wait()).await {
            Ok(status) => Ok(Some(status?)),
            Err(_) => {
                log::warn!("Preferences process did not exit in time; killing it");
                child.kill().await?;
                Ok(Some(child.wait().await?))
            }
        }
    }
}

impl Drop for BridgeHost {
    fn drop(&mut self) {
        if let Some(ref mut child) = self.child {
            let _ = child.start_kill();
        }
    }
}

// ---------------------------------------------------------------------------
// Preferences side
// ---------------------------------------------------------------------------

/// Connect over an established stream: exchange hellos and build the client.
pub async fn connect_stream(
    stream: UnixStream,
    config: &BridgeConfig,
) -> Result<(BridgedStore, mpsc::UnboundedReceiver<BridgeEvent>), BridgeError> {
    let (reader, writer) = stream.into_split();
    let mut peer = JsonRpcPeer::new(reader, writer, CancellationToken::new(), config.request_timeout());
    let incoming = peer
        .take_incoming()
        .ok_or_else(|| BridgeError::Connection("channel already has a consumer".to_string()))?;
    let peer = Arc::new(peer);

    let params = serde_json::to_value(HelloParams {
        protocol_version: PROTOCOL_VERSION,
        object_path: OBJECT_PATH.to_string(),
    })?;
    let result = tokio::time::timeout(
        config.startup_timeout(),
        peer.request(method::HELLO, Some(params)),
    )
    .await
    .map_err(|_| BridgeError::Connection("timed out waiting for the settings bridge".to_string()))?
    .map_err(|e| BridgeError::Connection(format!("hello rejected: {e}")))?;
    let hello: HelloResult = serde_json::from_value(result)?;
    if hello.object_path != OBJECT_PATH || hello.protocol_version != PROTOCOL_VERSION {
        return Err(BridgeError::Connection(format!(
            "unexpected bridge at '{}' speaking version {}",
            hello.object_path, hello.protocol_version
        )));
    }
    log::info!("Connected to settings bridge in process {}", hello.server_pid);
    Ok(BridgedStore::new(peer, incoming))
}

/// Connect over the channel end inherited at descriptor `fd`.
pub async fn connect_inherited(
    fd: RawFd,
    config: &BridgeConfig,
) -> Result<(BridgedStore, mpsc::UnboundedReceiver<BridgeEvent>), BridgeError> {
    // SAFETY: fcntl on an arbitrary descriptor number only reports EBADF.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if fd < 0 || flags < 0 {
        return Err(BridgeError::Connection(format!("descriptor {fd} is not open")));
    }
    // Keep the channel out of anything we spawn ourselves.
    // SAFETY: fd is open, checked above.
    unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };

    // SAFETY: the descriptor was handed to us to own and nothing else uses it.
    let stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
    if let Err(e) = stream.peer_addr() {
        return Err(BridgeError::Connection(format!(
            "descriptor {fd} is not a connected socket: {e}"
        )));
    }
    stream.set_nonblocking(true)?;
    connect_stream(UnixStream::from_std(stream)?, config).await
}
