//! The single logical WhatsApp session.
//!
//! [`Session`] owns connectivity state and own identity behind one mutex,
//! drives connect/reconnect/pairing, and holds the group directory and
//! in-flight tracker the normalization pipeline depends on. Transitions are
//! driven by the event dispatcher in transport delivery order.

pub mod directory;
pub mod inflight;
pub mod pairing;
pub mod state;

pub use directory::{GroupDirectory, UNKNOWN_GROUP};
pub use inflight::{InFlightGuard, InFlightTracker};
pub use pairing::PairingGate;
pub use state::SessionState;

use crate::config::{Config, Mode};
use crate::health;
use crate::jid::Jid;
use crate::shutdown::{ExitReason, Shutdown};
use crate::transport::{EventSink, PairingRequest, Presence, Transport, TransportResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub mode: Mode,
    pub reconnect_backoff: Duration,
    pub pair_timeout: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.mode,
            reconnect_backoff: Duration::from_secs(config.reliability.reconnect_backoff_secs),
            pair_timeout: Duration::from_secs(config.reliability.pair_timeout_secs),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Who we are on the current connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnIdentity {
    /// Device-qualified address, e.g. `15551234567:12@s.whatsapp.net`.
    pub device_jid: Jid,
    /// Account-level address used for self-chat.
    pub default_jid: Jid,
}

#[derive(Default)]
struct SessionInner {
    state: SessionState,
    identity: Option<OwnIdentity>,
    sink_registered: bool,
}

pub struct Session {
    transport: Arc<dyn Transport>,
    options: SessionOptions,
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<SessionState>,
    /// Socket-level connectivity: set once `connect` returns, before any login.
    link_tx: watch::Sender<bool>,
    directory: GroupDirectory,
    inflight: Arc<InFlightTracker>,
    pairing: PairingGate,
    reconnecting: AtomicBool,
    /// Pairing requests currently inside `approve_pairing`.
    pairing_requests: AtomicUsize,
    shutdown: Shutdown,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, options: SessionOptions, shutdown: Shutdown) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (link_tx, _) = watch::channel(false);
        Arc::new(Self {
            pairing: PairingGate::new(options.pair_timeout),
            transport,
            options,
            inner: Mutex::new(SessionInner::default()),
            state_tx,
            link_tx,
            directory: GroupDirectory::new(),
            inflight: InFlightTracker::new(),
            reconnecting: AtomicBool::new(false),
            pairing_requests: AtomicUsize::new(0),
            shutdown,
        })
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn mode(&self) -> Mode {
        self.options.mode
    }

    pub fn directory(&self) -> &GroupDirectory {
        &self.directory
    }

    pub fn inflight(&self) -> &Arc<InFlightTracker> {
        &self.inflight
    }

    pub fn pairing(&self) -> &PairingGate {
        &self.pairing
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Connected and announced as available.
    pub fn is_available(&self) -> bool {
        self.state() == SessionState::ConnectedAvailable
    }

    /// The transport holds an open socket, whether or not a device is paired.
    pub fn is_link_open(&self) -> bool {
        *self.link_tx.borrow()
    }

    fn set_link_open(&self, open: bool) {
        self.link_tx.send_if_modified(|current| std::mem::replace(current, open) != open);
    }

    pub fn is_logged_in(&self) -> bool {
        self.transport.is_logged_in()
    }

    pub fn identity(&self) -> Option<OwnIdentity> {
        self.inner.lock().identity.clone()
    }

    pub fn default_jid(&self) -> Option<Jid> {
        self.inner.lock().identity.as_ref().map(|id| id.default_jid.clone())
    }

    fn set_state(&self, next: SessionState) {
        let prev = {
            let mut inner = self.inner.lock();
            std::mem::replace(&mut inner.state, next)
        };
        self.publish(prev, next);
    }

    /// Move to `next` only if the session is still in `expected`.
    fn transition_if(&self, expected: SessionState, next: SessionState) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state != expected {
                return false;
            }
            inner.state = next;
        }
        self.publish(expected, next);
        true
    }

    fn publish(&self, prev: SessionState, next: SessionState) {
        if prev != next {
            tracing::debug!("Session state: {prev} -> {next}");
        }
        health::set_session_state(next.as_str());
        self.state_tx.send_replace(next);
    }

    // ── Connect / disconnect ────────────────────────────────────

    /// Register the event sink (once per process) and connect.
    pub async fn start(&self, sink: Arc<dyn EventSink>) -> TransportResult<()> {
        let first = {
            let mut inner = self.inner.lock();
            !std::mem::replace(&mut inner.sink_registered, true)
        };
        if first {
            self.transport.register_sink(sink);
        }
        self.connect().await
    }

    pub async fn connect(&self) -> TransportResult<()> {
        self.set_state(SessionState::Connecting);
        if let Err(e) = self.transport.connect().await {
            self.transition_if(SessionState::Connecting, SessionState::Disconnected);
            health::mark_component_error(health::SESSION, &e);
            return Err(e);
        }
        self.set_link_open(true);
        Ok(())
    }

    /// Explicit disconnect. The resulting disconnect event does not trigger a reconnect.
    pub async fn disconnect(&self) {
        self.set_state(SessionState::Disconnected);
        self.set_link_open(false);
        self.inflight.reset();
        self.transport.disconnect().await;
    }

    /// Drop the connection and connect again, as the `reconnect` command does.
    pub async fn reconnect(&self) -> TransportResult<()> {
        self.disconnect().await;
        self.connect().await
    }

    pub async fn logout(&self) -> TransportResult<()> {
        self.transport.logout().await?;
        self.on_logged_out();
        Ok(())
    }

    /// Wait until the transport has an open socket.
    ///
    /// An unpaired device never reports `Connected`, so this does not wait
    /// for login. Callers check [`Session::is_logged_in`] afterwards.
    pub async fn wait_ready(&self) {
        let mut rx = self.link_tx.subscribe();
        if !*rx.borrow() {
            tracing::debug!("Waiting for the connection to open");
        }
        let _ = rx.wait_for(|open| *open).await;
    }

    // ── Transitions driven by events ───────────────────────────

    pub async fn on_connected(&self) {
        let identity = self.transport.own_jid().map(|device_jid| OwnIdentity {
            default_jid: device_jid.to_non_ad(),
            device_jid,
        });
        if identity.is_none() {
            tracing::debug!("Connected without a paired identity yet");
        }
        {
            let mut inner = self.inner.lock();
            inner.identity = identity;
        }
        self.set_link_open(true);
        self.set_state(SessionState::ConnectedSyncing);
        health::mark_component_ok(health::SESSION);
        tracing::info!("WhatsApp: connected");
        self.try_become_available().await;
    }

    /// Announce availability once a push name is known.
    ///
    /// Triggered by the critical app-state block finishing sync, by a
    /// push-name update, or on connect when a name was stored by an earlier
    /// sync.
    pub async fn try_become_available(&self) {
        if self.state() != SessionState::ConnectedSyncing {
            return;
        }
        if self.transport.push_name().is_empty() {
            tracing::debug!("Push name not known yet, waiting for app state sync");
            return;
        }
        if let Err(e) = self.transport.send_presence(Presence::Available).await {
            tracing::warn!("Failed to send available presence: {e}");
            return;
        }
        if !self.transition_if(SessionState::ConnectedSyncing, SessionState::ConnectedAvailable) {
            return;
        }
        tracing::info!("Marked self as available");

        if self.options.mode.delivers_messages() {
            self.refresh_directory().await;
        }
    }

    /// Rebuild the group directory; freshness is only signalled on success.
    pub async fn refresh_directory(&self) {
        match self.transport.joined_groups().await {
            Ok(groups) => {
                self.directory.rebuild(&groups);
                self.directory.mark_fresh();
                tracing::info!("Loaded {} groups", groups.len());
            }
            Err(e) => {
                tracing::error!("Failed to get joined groups: {e}");
            }
        }
    }

    /// Unexpected disconnect or keepalive timeout.
    pub fn on_connection_lost(self: &Arc<Self>, cause: &str) {
        {
            let mut inner = self.inner.lock();
            if !inner.state.should_reconnect() {
                tracing::debug!("Ignoring {cause} in state {}", inner.state);
                return;
            }
        }
        tracing::warn!("WhatsApp: {cause}, reconnecting");
        self.set_state(SessionState::Reconnecting);
        self.set_link_open(false);
        self.inflight.reset();
        health::mark_component_error(health::SESSION, cause);
        self.spawn_reconnect_loop();
    }

    fn spawn_reconnect_loop(self: &Arc<Self>) {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Reconnect loop already running");
            return;
        }
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.reconnect_loop().await;
            session.reconnecting.store(false, Ordering::SeqCst);
            // A loss reported while the loop was winding down found the flag still set.
            if session.state() == SessionState::Reconnecting && !session.shutdown.is_requested() {
                session.spawn_reconnect_loop();
            }
        });
    }

    async fn reconnect_loop(&self) {
        let cancel = self.shutdown.token();
        loop {
            if cancel.is_cancelled() {
                return;
            }
            // Manual disconnect or a completed connect ends the loop.
            if !self.transition_if(SessionState::Reconnecting, SessionState::Connecting) {
                return;
            }
            health::bump_component_restart(health::SESSION);
            self.transport.disconnect().await;
            match self.transport.connect().await {
                Ok(()) => {
                    tracing::info!("WhatsApp: reconnect succeeded");
                    self.set_link_open(true);
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        "WhatsApp: reconnect failed: {e}; retrying in {}s",
                        self.options.reconnect_backoff.as_secs()
                    );
                    health::mark_component_error(health::SESSION, &e);
                    if !self.transition_if(SessionState::Connecting, SessionState::Reconnecting) {
                        return;
                    }
                }
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.options.reconnect_backoff) => {}
            }
        }
    }

    pub fn on_stream_replaced(&self) {
        self.set_state(SessionState::Disconnected);
        self.set_link_open(false);
        tracing::info!("Stream replaced, exiting");
        self.shutdown.request(ExitReason::StreamReplaced);
    }

    pub fn on_logged_out(&self) {
        {
            let mut inner = self.inner.lock();
            inner.identity = None;
        }
        self.set_state(SessionState::Disconnected);
        self.set_link_open(false);
        self.inflight.reset();
    }

    /// Ask the operator about a device-link request, moving through
    /// `AwaitingPairApproval` while the decision is open.
    ///
    /// With requests queued behind each other the state stays
    /// `AwaitingPairApproval` until the last one is decided.
    pub async fn approve_pairing(&self, request: PairingRequest) -> bool {
        let prev = self.state();
        self.pairing_requests.fetch_add(1, Ordering::SeqCst);
        self.set_state(SessionState::AwaitingPairApproval);
        let accepted = self.pairing.decide(&request).await;
        if self.pairing_requests.fetch_sub(1, Ordering::SeqCst) == 1 {
            let back = if prev == SessionState::AwaitingPairApproval {
                SessionState::Connecting
            } else {
                prev
            };
            self.transition_if(SessionState::AwaitingPairApproval, back);
        }
        accepted
    }
}
