//! Request-deduplication cache keyed by `(namespace, idempotency_key)`.
//!
//! The resource layer calls [`IdempotencyCache::claim`] before executing any
//! mutating request carrying an idempotency key, and [`complete`] with the
//! final response afterwards. A replayed request with the same fingerprint
//! gets the cached response verbatim and side effects are not re-executed.
//!
//! `claim` is the one place in the simulator where a lost race produces an
//! externally visible bug (double side effects), so the whole
//! check-expiry/check-fingerprint/insert-pending transition happens under a
//! single entry lock.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::VirtualClock;
use crate::error::{SimResult, SimulatorError};

/// Entries older than this (virtual time) are treated as absent.
pub const IDEMPOTENCY_TTL_HOURS: i64 = 24;

/// The response replayed to duplicate requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The original request with this key is still in flight. Callers fail
    /// fast rather than block, so a hung original cannot deadlock retries.
    InFlight,
    /// Same key, different request body/method/path.
    FingerprintMismatch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// No live entry existed; the caller owns the key and must call
    /// `complete` (or `fail`) when done.
    Fresh,
    /// A completed entry with a matching fingerprint exists.
    Cached(CachedResponse),
    Conflict(ConflictReason),
}

#[derive(Debug, Clone)]
enum EntryStatus {
    Pending,
    Complete(CachedResponse),
}

#[derive(Debug, Clone)]
struct IdempotencyEntry {
    fingerprint: String,
    status: EntryStatus,
    expires_at: DateTime<Utc>,
}

/// SHA-256 fingerprint binding a key to one logical request.
pub fn fingerprint(method: &str, path: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct IdempotencyCache {
    entries: DashMap<(String, String), IdempotencyEntry>,
    clock: Arc<VirtualClock>,
}

impl IdempotencyCache {
    pub fn new(clock: Arc<VirtualClock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Atomically claim a key. An expired entry is removed at the moment it
    /// is observed and the claim proceeds as `Fresh`.
    pub fn claim(&self, namespace: &str, key: &str, fingerprint: &str) -> Claim {
        let now = self.clock.now();
        let pending = IdempotencyEntry {
            fingerprint: fingerprint.to_string(),
            status: EntryStatus::Pending,
            expires_at: now + Duration::hours(IDEMPOTENCY_TTL_HOURS),
        };
        match self
            .entries
            .entry((namespace.to_string(), key.to_string()))
        {
            Entry::Vacant(slot) => {
                slot.insert(pending);
                Claim::Fresh
            }
            Entry::Occupied(mut slot) => {
                if slot.get().expires_at <= now {
                    slot.insert(pending);
                    return Claim::Fresh;
                }
                if slot.get().fingerprint != fingerprint {
                    return Claim::Conflict(ConflictReason::FingerprintMismatch);
                }
                match &slot.get().status {
                    EntryStatus::Pending => Claim::Conflict(ConflictReason::InFlight),
                    EntryStatus::Complete(response) => Claim::Cached(response.clone()),
                }
            }
        }
    }

    /// Record the final response for a claimed key. The entry keeps the TTL
    /// set at claim time. `Conflict` if the entry was already completed.
    pub fn complete(
        &self,
        namespace: &str,
        key: &str,
        response: CachedResponse,
    ) -> SimResult<()> {
        let mut entry = self
            .entries
            .get_mut(&(namespace.to_string(), key.to_string()))
            .ok_or(SimulatorError::NotFound)?;
        match entry.status {
            EntryStatus::Pending => {
                entry.status = EntryStatus::Complete(response);
                Ok(())
            }
            EntryStatus::Complete(_) => Err(SimulatorError::Conflict(format!(
                "idempotency key {key} already completed"
            ))),
        }
    }

    /// Release a pending claim after the handler errored, so a client retry
    /// is not locked out for the full TTL. Completed entries are untouched.
    pub fn fail(&self, namespace: &str, key: &str) {
        self.entries
            .remove_if(&(namespace.to_string(), key.to_string()), |_, entry| {
                matches!(entry.status, EntryStatus::Pending)
            });
    }

    /// Drop expired entries. Correctness never needs this (expiry is checked
    /// on observation); it only reclaims memory in long-lived processes.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    pub fn clear_namespace(&self, namespace: &str) {
        self.entries.retain(|key, _| key.0 != namespace);
    }

    pub fn clear_all(&self) {
        self.entries.clear();
    }
}
