//! Poll correlation store.
//!
//! Votes arrive as SHA-256 hashes of the selected option texts, keyed by the
//! id of the poll-creation message. Polls we send are recorded here so a
//! later vote can be turned back into readable text.
//!
//! Entries live in a bounded LRU with a TTL. Optionally each record is also
//! mirrored under `.tmp/` as `poll_question_<id>` and `poll_option_<hash>`
//! for external tooling; lookups never read the mirror.

use crate::config::PollsConfig;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRecord {
    pub question: String,
    /// Lowercase hex SHA-256 of the option text → option text.
    pub options: HashMap<String, String>,
}

/// A vote resolved back to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVote {
    pub question: String,
    pub selected: Vec<String>,
}

struct Entry {
    record: PollRecord,
    inserted_at: Instant,
}

pub struct PollStore {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
    mirror_dir: Option<PathBuf>,
}

/// Lowercase hex SHA-256 of an option text, as carried in vote payloads.
pub fn option_hash(option: &str) -> String {
    hex::encode(Sha256::digest(option.as_bytes()))
}

impl PollStore {
    pub fn new(capacity: usize, ttl: Duration, mirror_dir: Option<PathBuf>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            mirror_dir,
        }
    }

    /// Store configured from `[polls]`, mirroring under `<workspace>/.tmp`.
    pub fn from_config(config: &PollsConfig, workspace: &Path) -> Self {
        let mirror_dir = config.mirror_to_disk.then(|| workspace.join(".tmp"));
        Self::new(
            config.capacity,
            Duration::from_secs(config.ttl_secs),
            mirror_dir,
        )
    }

    /// Record a poll we created. Later writes for the same id replace the earlier one.
    pub fn record(&self, message_id: &str, question: &str, options: &[String]) {
        let record = PollRecord {
            question: question.to_string(),
            options: options
                .iter()
                .map(|option| (option_hash(option), option.clone()))
                .collect(),
        };
        self.mirror(message_id, &record);

        let evicted = self.entries.lock().push(
            message_id.to_string(),
            Entry {
                record,
                inserted_at: Instant::now(),
            },
        );
        if let Some((evicted_id, _)) = evicted {
            if evicted_id != message_id {
                tracing::debug!("Poll store full, evicted poll {evicted_id}");
                self.remove_mirror(&evicted_id);
            }
        }
    }

    pub fn get(&self, message_id: &str) -> Option<PollRecord> {
        let mut entries = self.entries.lock();
        let expired = entries
            .peek(message_id)
            .is_some_and(|entry| entry.inserted_at.elapsed() >= self.ttl);
        if expired {
            entries.pop(message_id);
            drop(entries);
            tracing::debug!("Poll {message_id} expired");
            self.remove_mirror(message_id);
            return None;
        }
        entries.get(message_id).map(|entry| entry.record.clone())
    }

    /// Resolve selected-option hashes for a poll. Any unknown id or hash yields `None`.
    pub fn resolve_vote(&self, message_id: &str, selected_hashes: &[Vec<u8>]) -> Option<ResolvedVote> {
        let record = self.get(message_id)?;
        let selected = selected_hashes
            .iter()
            .map(|hash| record.options.get(&hex::encode(hash)).cloned())
            .collect::<Option<Vec<_>>>()?;
        Some(ResolvedVote {
            question: record.question,
            selected,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mirror(&self, message_id: &str, record: &PollRecord) {
        let Some(dir) = &self.mirror_dir else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!("Failed to create poll mirror directory {}: {e}", dir.display());
            return;
        }
        let question_path = dir.join(format!("poll_question_{message_id}"));
        if let Err(e) = std::fs::write(&question_path, &record.question) {
            tracing::warn!("Failed to save poll question for {message_id}: {e}");
        }
        for (hash, option) in &record.options {
            if let Err(e) = std::fs::write(dir.join(format!("poll_option_{hash}")), option) {
                tracing::warn!("Failed to save poll option {option:?}: {e}");
            }
        }
    }

    fn remove_mirror(&self, message_id: &str) {
        if let Some(dir) = &self.mirror_dir {
            let _ = std::fs::remove_file(dir.join(format!("poll_question_{message_id}")));
        }
    }
}
