//! In-memory conversation threads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::agent::ThreadId;
use crate::llm::ChatMessage;

/// History of one thread. Lock it for the whole turn to serialize turns.
pub type ThreadHistory = Arc<tokio::sync::Mutex<Vec<ChatMessage>>>;

struct ThreadEntry {
    history: ThreadHistory,
    last_used: Instant,
}

/// Append-only per-thread histories, created on first use.
///
/// With an idle TTL, threads nobody has touched for that long are dropped the
/// next time any thread is looked up. A thread whose turn is still running is
/// never dropped.
#[derive(Default)]
pub struct ThreadStore {
    threads: Mutex<HashMap<ThreadId, ThreadEntry>>,
    idle_ttl: Option<Duration>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_ttl(ttl: Duration) -> Self {
        Self {
            threads: Mutex::default(),
            idle_ttl: Some(ttl),
        }
    }

    /// History handle for `id`, creating an empty thread if needed.
    pub fn thread(&self, id: &ThreadId) -> ThreadHistory {
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ttl) = self.idle_ttl {
            let before = threads.len();
            threads.retain(|key, entry| {
                key == id
                    || Arc::strong_count(&entry.history) > 1
                    || entry.last_used.elapsed() < ttl
            });
            let evicted = before - threads.len();
            if evicted > 0 {
                tracing::debug!(evicted, "Dropped idle conversation threads");
            }
        }
        let entry = threads.entry(id.clone()).or_insert_with(|| ThreadEntry {
            history: ThreadHistory::default(),
            last_used: Instant::now(),
        });
        entry.last_used = Instant::now();
        Arc::clone(&entry.history)
    }

    /// Copy of the committed history; empty for unknown threads.
    pub async fn snapshot(&self, id: &ThreadId) -> Vec<ChatMessage> {
        let history = {
            let threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
            threads.get(id).map(|entry| Arc::clone(&entry.history))
        };
        match history {
            Some(history) => history.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub fn remove(&self, id: &ThreadId) {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub fn contains(&self, id: &ThreadId) -> bool {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
