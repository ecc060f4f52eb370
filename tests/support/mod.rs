//! In-process fake of the messaging SDK for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use waclaw::jid::Jid;
use waclaw::transport::message::{
    GroupInfo, MediaAttachment, MediaHandle, MediaKind, MessageEvent, OutgoingMessage, SendReceipt,
};
use waclaw::transport::{Event, EventSink, Presence, Transport, TransportError, TransportResult};

#[derive(Default)]
pub struct FakeTransport {
    sink: Mutex<Option<Arc<dyn EventSink>>>,
    connects: AtomicUsize,
    /// Results handed out by successive `connect` calls; empty means success.
    connect_results: Mutex<VecDeque<bool>>,
    connect_delay: Mutex<Duration>,
    connected: AtomicBool,
    logged_in: AtomicBool,
    own_jid: Mutex<Option<Jid>>,
    push_name: Mutex<String>,
    groups: Mutex<Vec<GroupInfo>>,
    groups_fail: AtomicBool,
    poll_vote: Mutex<Vec<Vec<u8>>>,
    presences: Mutex<Vec<Presence>>,
    sent: Mutex<Vec<(Jid, OutgoingMessage)>>,
    pair_requests: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Logged in as `phone` with a device-qualified address.
    pub fn paired(phone: &str) -> Arc<Self> {
        let transport = Self::default();
        transport.logged_in.store(true, Ordering::SeqCst);
        *transport.own_jid.lock() = Some(Jid {
            device: 7,
            ..Jid::user(phone)
        });
        Arc::new(transport)
    }

    pub fn set_push_name(&self, name: &str) {
        *self.push_name.lock() = name.to_string();
    }

    pub fn set_groups(&self, groups: Vec<GroupInfo>) {
        *self.groups.lock() = groups;
    }

    /// Make `joined_groups` fail until further notice.
    pub fn fail_joined_groups(&self) {
        self.groups_fail.store(true, Ordering::SeqCst);
    }

    pub fn set_poll_vote(&self, hashes: Vec<Vec<u8>>) {
        *self.poll_vote.lock() = hashes;
    }

    /// Queue connect outcomes; `false` fails that attempt.
    pub fn script_connects(&self, outcomes: &[bool]) {
        self.connect_results.lock().extend(outcomes.iter().copied());
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn presences(&self) -> Vec<Presence> {
        self.presences.lock().clone()
    }

    pub fn sent(&self) -> Vec<(Jid, OutgoingMessage)> {
        self.sent.lock().clone()
    }

    /// Phone numbers passed to `pair_phone`.
    pub fn pair_requests(&self) -> Vec<String> {
        self.pair_requests.lock().clone()
    }

    /// Deliver an event to the registered sink, as the SDK would.
    pub async fn emit(&self, event: Event) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.handle_event(event).await;
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &str {
        "fake"
    }

    fn register_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.lock() = Some(sink);
    }

    async fn connect(&self) -> TransportResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let ok = self.connect_results.lock().pop_front().unwrap_or(true);
        if ok {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(TransportError::Other(anyhow::anyhow!("connection refused")))
        }
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    fn own_jid(&self) -> Option<Jid> {
        self.own_jid.lock().clone()
    }

    fn push_name(&self) -> String {
        self.push_name.lock().clone()
    }

    async fn send_presence(&self, presence: Presence) -> TransportResult<()> {
        self.presences.lock().push(presence);
        Ok(())
    }

    async fn send_message(&self, to: &Jid, message: OutgoingMessage) -> TransportResult<SendReceipt> {
        self.sent.lock().push((to.clone(), message));
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(SendReceipt {
            id: format!("SENT{n}"),
            timestamp: chrono::Utc::now(),
        })
    }

    async fn joined_groups(&self) -> TransportResult<Vec<GroupInfo>> {
        if self.groups_fail.load(Ordering::SeqCst) {
            return Err(TransportError::Other(anyhow::anyhow!("group listing timed out")));
        }
        Ok(self.groups.lock().clone())
    }

    async fn group_info(&self, group: &Jid) -> TransportResult<GroupInfo> {
        self.groups
            .lock()
            .iter()
            .find(|info| &info.jid == group)
            .cloned()
            .ok_or_else(|| TransportError::Other(anyhow::anyhow!("unknown group {group}")))
    }

    async fn upload(&self, data: Vec<u8>, _kind: MediaKind) -> TransportResult<MediaHandle> {
        Ok(MediaHandle {
            url: "https://mmg.example/fake".into(),
            file_length: data.len() as u64,
            ..MediaHandle::default()
        })
    }

    async fn download(&self, _media: &MediaAttachment) -> TransportResult<Vec<u8>> {
        Ok(b"media-bytes".to_vec())
    }

    async fn decrypt_poll_vote(&self, _message: &MessageEvent) -> TransportResult<Vec<Vec<u8>>> {
        Ok(self.poll_vote.lock().clone())
    }

    async fn pair_phone(&self, phone: &str) -> TransportResult<String> {
        self.pair_requests.lock().push(phone.to_string());
        Ok("ABCD-EFGH".into())
    }
}

/// Poll until `check` holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
