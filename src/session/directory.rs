//! Group directory: group address → display name.
//!
//! Rebuilt wholesale and swapped in under a write lock, so readers see
//! either the previous mapping or the new one, never a mix. Freshness is a
//! watch signal: normalizers wait on it instead of polling.

use crate::jid::Jid;
use crate::transport::message::GroupInfo;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

pub const UNKNOWN_GROUP: &str = "Unknown, Group Not Found";

pub struct GroupDirectory {
    snapshot: RwLock<Arc<HashMap<String, String>>>,
    fresh_tx: watch::Sender<bool>,
}

impl Default for GroupDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupDirectory {
    pub fn new() -> Self {
        let (fresh_tx, _) = watch::channel(false);
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            fresh_tx,
        }
    }

    /// Replace the whole mapping from a joined-groups listing.
    pub fn rebuild(&self, groups: &[GroupInfo]) {
        let next: HashMap<String, String> = groups
            .iter()
            .map(|group| (group.jid.to_string(), group.name.clone()))
            .collect();
        *self.snapshot.write() = Arc::new(next);
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, String>> {
        Arc::clone(&*self.snapshot.read())
    }

    /// Group name, or [`UNKNOWN_GROUP`] when the directory is stale or has no entry.
    pub fn name_of(&self, group: &Jid) -> String {
        if !self.is_fresh() {
            return UNKNOWN_GROUP.to_string();
        }
        self.snapshot
            .read()
            .get(&group.to_string())
            .cloned()
            .unwrap_or_else(|| UNKNOWN_GROUP.to_string())
    }

    pub fn mark_fresh(&self) {
        self.fresh_tx.send_replace(true);
    }

    pub fn is_fresh(&self) -> bool {
        *self.fresh_tx.borrow()
    }

    /// Resolves once the directory has been populated at least once.
    pub async fn wait_fresh(&self) {
        let mut rx = self.fresh_tx.subscribe();
        // The sender lives as long as `self`, so this only errors during teardown.
        let _ = rx.wait_for(|fresh| *fresh).await;
    }
}
