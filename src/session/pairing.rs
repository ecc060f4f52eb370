//! Operator approval for linking a new device.
//!
//! The transport asks whether a pairing may proceed. The operator can
//! reject within a short window; silence accepts. Requests are serialized
//! on one decision slot so two requests never race their timers.

use crate::transport::PairingRequest;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

pub struct PairingGate {
    decisions_tx: mpsc::Sender<bool>,
    decisions_rx: Mutex<mpsc::Receiver<bool>>,
    pending: AtomicBool,
    timeout: Duration,
}

impl PairingGate {
    pub fn new(timeout: Duration) -> Self {
        let (decisions_tx, decisions_rx) = mpsc::channel(1);
        Self {
            decisions_tx,
            decisions_rx: Mutex::new(decisions_rx),
            pending: AtomicBool::new(false),
            timeout,
        }
    }

    /// Wait for the operator's decision on `request`. `true` accepts.
    pub async fn decide(&self, request: &PairingRequest) -> bool {
        let mut rx = self.decisions_rx.lock().await;
        while rx.try_recv().is_ok() {
            tracing::debug!("Discarding stale pairing decision");
        }

        self.pending.store(true, Ordering::SeqCst);
        tracing::info!(
            "Pairing request from {} ({}, {:?}). Type 'r' within {}s to reject.",
            request.jid,
            request.platform,
            request.business_name,
            self.timeout.as_secs()
        );

        let decision = match tokio::time::timeout(self.timeout, rx.recv()).await {
            Ok(Some(decision)) => decision,
            Ok(None) | Err(_) => true,
        };
        self.pending.store(false, Ordering::SeqCst);

        if decision {
            tracing::info!("Accepting pairing with {}", request.jid);
        } else {
            tracing::info!("Rejecting pairing with {}", request.jid);
        }
        decision
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Reject the outstanding request. Returns `false` if nothing is pending.
    pub fn reject(&self) -> bool {
        self.submit(false)
    }

    pub fn accept(&self) -> bool {
        self.submit(true)
    }

    fn submit(&self, decision: bool) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.decisions_tx.try_send(decision).is_ok()
    }
}
