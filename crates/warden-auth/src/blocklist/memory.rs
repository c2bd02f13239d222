//! In-process blocklist.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{Blocklist, KeyFn, default_key};
use crate::error::AuthError;
use crate::token::{Key, SharedClock, StandardClaims, system_clock};

/// Sweep interval used when the signing key has no max-age.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Shortest sweep interval accepted by [`MemoryBlocklist::spawn_sweep`].
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

type Entries = RwLock<HashMap<String, OffsetDateTime>>;

/// A blocklist held in process memory.
///
/// Reads (`has`, `count`) share a read lock, writes take it exclusively.
/// Expired entries stay until [`sweep`](Self::sweep) runs, either on demand
/// or from the background task started by
/// [`spawn_sweep`](Self::spawn_sweep).
#[derive(Clone)]
pub struct MemoryBlocklist {
    entries: Arc<Entries>,
    key_fn: Option<KeyFn>,
    clock: SharedClock,
}

impl MemoryBlocklist {
    /// Creates an empty blocklist without a background sweep.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            key_fn: None,
            clock: system_clock(),
        }
    }

    /// Uses a custom entry key function instead of the `jti`.
    #[must_use]
    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = Some(key_fn);
        self
    }

    /// Uses a custom clock for expiry decisions.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Sweep interval matching a key's token lifetime.
    #[must_use]
    pub fn sweep_interval_for(key: &Key) -> Duration {
        key.max_age().unwrap_or(DEFAULT_SWEEP_INTERVAL)
    }

    /// Removes every entry whose expiry has passed.
    ///
    /// Expired IDs are collected under the read lock, then removed one by
    /// one, each under its own short write lock. Returns the number of
    /// removed entries.
    pub fn sweep(&self) -> usize {
        sweep_entries(&self.entries, self.clock.now())
    }

    /// Starts the background sweep.
    ///
    /// The task stops when `shutdown` (or a parent token) is cancelled, when
    /// the returned handle is shut down or dropped, or when every clone of
    /// this blocklist has been dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn_sweep(&self, interval: Duration, shutdown: &CancellationToken) -> SweepHandle {
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        let entries = Arc::downgrade(&self.entries);
        let clock = Arc::clone(&self.clock);
        let cancel = shutdown.child_token();
        let stop = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(entries) = entries.upgrade() else {
                            break;
                        };
                        let removed = sweep_entries(&entries, clock.now());
                        if removed > 0 {
                            tracing::debug!(removed, "blocklist sweep removed expired entries");
                        }
                    }
                }
            }

            tracing::debug!("blocklist sweep stopped");
        });

        tracing::debug!(interval_ms = interval.as_millis() as u64, "blocklist sweep started");
        SweepHandle {
            cancel,
            task: Some(task),
        }
    }

    fn insert(&self, id: &str, expires_at: OffsetDateTime) {
        self.entries.write().insert(id.to_string(), expires_at);
    }

    fn remove(&self, id: &str) {
        self.entries.write().remove(id);
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

impl Default for MemoryBlocklist {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryBlocklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBlocklist")
            .field("entries", &self.len())
            .field("custom_key", &self.key_fn.is_some())
            .finish()
    }
}

fn sweep_entries(entries: &Entries, now: OffsetDateTime) -> usize {
    let expired: Vec<String> = entries
        .read()
        .iter()
        .filter(|(_, expires_at)| **expires_at < now)
        .map(|(id, _)| id.clone())
        .collect();

    let mut removed = 0;
    for id in expired {
        let mut guard = entries.write();
        // the entry may have been set again since the snapshot
        if guard.get(&id).is_some_and(|expires_at| *expires_at < now) {
            guard.remove(&id);
            removed += 1;
        }
    }
    removed
}

#[async_trait]
impl Blocklist for MemoryBlocklist {
    fn key(&self, token: &str, claims: &StandardClaims) -> String {
        match &self.key_fn {
            Some(key_fn) => key_fn(token, claims),
            None => default_key(token, claims),
        }
    }

    async fn set(&self, id: &str, expires_at: OffsetDateTime) -> Result<(), AuthError> {
        self.insert(id, expires_at);
        Ok(())
    }

    async fn del(&self, id: &str) -> Result<(), AuthError> {
        self.remove(id);
        Ok(())
    }

    async fn has(&self, id: &str) -> Result<bool, AuthError> {
        Ok(self.contains(id))
    }

    async fn count(&self) -> Result<usize, AuthError> {
        Ok(self.len())
    }
}

// ============================================================================
// Sweep Handle
// ============================================================================

/// Owner of a running sweep task.
///
/// Dropping the handle cancels the task; [`shutdown`](Self::shutdown) also
/// waits for it to finish.
#[derive(Debug)]
pub struct SweepHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SweepHandle {
    /// Signals the task to stop without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stops the task and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "blocklist sweep task failed");
            }
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
