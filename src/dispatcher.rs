//! Entry point for everything the transport reports.
//!
//! Events are handled one at a time in delivery order. Session transitions
//! run inline so they are never reordered; message normalization is the
//! only work moved onto background tasks, and its in-flight guard is taken
//! before `handle_event` returns.

use crate::health;
use crate::normalizer::Normalizer;
use crate::session::Session;
use crate::transport::events::{BlocklistChange, PresenceUpdate, Receipt, ReceiptKind};
use crate::transport::{CRITICAL_BLOCK, Event, EventSink, PairingRequest};
use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

pub struct EventDispatcher {
    session: Arc<Session>,
    /// Present only in `both` mode.
    normalizer: Option<Arc<Normalizer>>,
    /// Set once the handlers started by an offline sync have all finished.
    offline_synced: Arc<watch::Sender<bool>>,
}

impl EventDispatcher {
    pub fn new(session: Arc<Session>, normalizer: Option<Arc<Normalizer>>) -> Arc<Self> {
        health::mark_component_ok(health::DISPATCHER);
        Arc::new(Self {
            session,
            normalizer,
            offline_synced: Arc::new(watch::channel(false).0),
        })
    }

    /// Whether the last offline sync has been fully handled.
    pub fn is_offline_synced(&self) -> bool {
        *self.offline_synced.borrow()
    }

    fn log_receipt(receipt: &Receipt) {
        match receipt.kind {
            ReceiptKind::Read | ReceiptKind::ReadSelf => tracing::info!(
                "{:?} were read by {} at {}",
                receipt.message_ids,
                receipt.source_string(),
                receipt.timestamp
            ),
            ReceiptKind::Delivered => tracing::info!(
                "{} was delivered to {} at {}",
                receipt.message_ids.first().map_or("", String::as_str),
                receipt.source_string(),
                receipt.timestamp
            ),
            ReceiptKind::Played | ReceiptKind::Other => {}
        }
    }

    fn log_presence(presence: &PresenceUpdate) {
        if presence.unavailable {
            match presence.last_seen {
                Some(last_seen) => {
                    tracing::info!("{} is now offline (last seen: {last_seen})", presence.from);
                }
                None => tracing::info!("{} is now offline", presence.from),
            }
        } else {
            tracing::info!("{} is now online", presence.from);
        }
    }

    fn log_blocklist(change: &BlocklistChange) {
        let changes: Vec<String> = change
            .changes
            .iter()
            .map(|(jid, action)| format!("{} {jid}", action.as_str()))
            .collect();
        tracing::info!(
            "Blocklist event: action={} changes=[{}]",
            change.action.as_deref().unwrap_or("modify"),
            changes.join(", ")
        );
    }

    fn spawn_offline_sync_waiter(&self, count: usize) {
        tracing::info!("Offline sync completed with {count} events, waiting for handlers");
        self.offline_synced.send_replace(false);
        let inflight = Arc::clone(self.session.inflight());
        let offline_synced = Arc::clone(&self.offline_synced);
        tokio::spawn(async move {
            inflight.wait_idle().await;
            offline_synced.send_replace(true);
            tracing::info!("Offline sync completed");
        });
    }
}

/// Render a pairing QR payload into terminal-friendly text.
pub fn render_pairing_qr(code: &str) -> anyhow::Result<String> {
    let payload = code.trim();
    if payload.is_empty() {
        anyhow::bail!("QR payload is empty");
    }

    let qr = qrcode::QrCode::new(payload.as_bytes())
        .map_err(|err| anyhow!("Failed to encode pairing QR payload: {err}"))?;

    Ok(qr
        .render::<qrcode::render::unicode::Dense1x2>()
        .quiet_zone(true)
        .build())
}

#[async_trait]
impl EventSink for EventDispatcher {
    async fn handle_event(&self, event: Event) {
        match event {
            Event::Message(message) => {
                let Some(normalizer) = &self.normalizer else {
                    return;
                };
                let guard = self.session.inflight().begin();
                let normalizer = Arc::clone(normalizer);
                tokio::spawn(async move {
                    let _guard = guard;
                    normalizer.process(*message).await;
                });
            }
            Event::Connected => self.session.on_connected().await,
            Event::AppStateSyncComplete { name } => {
                tracing::debug!("App state sync completed: {name}");
                if name == CRITICAL_BLOCK {
                    self.session.try_become_available().await;
                }
            }
            Event::PushNameSetting { name } => {
                tracing::info!("Push name updated to {name:?}");
                self.session.try_become_available().await;
            }
            Event::StreamReplaced => self.session.on_stream_replaced(),
            Event::Disconnected => self.session.on_connection_lost("disconnected"),
            Event::KeepAliveTimeout { error_count } => {
                tracing::warn!("Keepalive timeout (errors: {error_count})");
                self.session.on_connection_lost("keepalive timeout");
            }
            Event::KeepAliveRestored => tracing::debug!("Keepalive restored"),
            Event::LoggedOut { on_connect, reason } => {
                tracing::warn!(
                    "Logged out (on connect: {on_connect}, reason: {reason}); pair again to continue"
                );
                self.session.on_logged_out();
            }
            Event::OfflineSyncCompleted { count } => self.spawn_offline_sync_waiter(count),
            Event::Receipt(receipt) => Self::log_receipt(&receipt),
            Event::Presence(presence) => Self::log_presence(&presence),
            Event::Blocklist(change) => Self::log_blocklist(&change),
            Event::AppState { index } => tracing::debug!("App state event: {index:?}"),
            Event::QrCode { code } => match render_pairing_qr(&code) {
                Ok(rendered) => {
                    eprintln!();
                    eprintln!("Scan this QR code in WhatsApp > Linked Devices:");
                    eprintln!("{rendered}");
                    eprintln!();
                }
                Err(err) => {
                    tracing::warn!("Failed to render pairing QR in terminal: {err}");
                    tracing::info!("QR payload: {code}");
                }
            },
            Event::PairingCode { code } => {
                tracing::info!("Pair code: {code}");
                tracing::info!("Link your phone by entering this code in WhatsApp > Linked Devices");
            }
            Event::PairSuccess {
                id,
                platform,
                business_name,
            } => {
                tracing::info!("Paired as {id} ({platform}, business name {business_name:?})");
            }
            Event::Unknown(name) => tracing::trace!("Unhandled event: {name}"),
        }
    }

    async fn approve_pairing(&self, request: PairingRequest) -> bool {
        self.session.approve_pairing(request).await
    }
}
