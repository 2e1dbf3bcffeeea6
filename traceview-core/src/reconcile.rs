//! Reconciliation of the confirmed event log with the live pending buffer
//!
//! Two independently-arriving, partially-overlapping sources feed a session
//! view: the durable log fetched from the session store, and the push stream
//! of not-yet-persisted events. The [`Reconciler`] merges them into one
//! consistent, duplicate-free sequence for the turn assembler.
//!
//! The same logical occurrence can arrive once as a live event and later
//! again inside a confirmed snapshot. The transport and the store do not
//! share an id space, so dedup is by content key: a digest of the event's
//! type, timestamp, and canonical payload. Ids are only used for ordering
//! within one source: confirmed ids are positive and server-assigned, live
//! events get synthetic strictly-decreasing negative ids so they sort after
//! any confirmed event while preserving arrival order.
//!
//! All state here is owned by one reconciler per session view and mutated
//! from a single task; there is nothing to lock.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::types::{Event, EventType, SessionSnapshot, SessionStatus, WireEvent};

/// Content-based identity of an event, independent of which id it carries.
///
/// A composite of `type`, `timestamp`, and the canonical serialization of
/// `data`. serde_json's default map representation is a BTreeMap, so
/// `to_string` is already key-ordered and canonical.
pub fn content_key(event: &Event) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.event_type.as_str().as_bytes());
    hasher.update(b"|");
    if let Some(ts) = event.timestamp {
        hasher.update(ts.to_rfc3339().as_bytes());
    }
    hasher.update(b"|");
    hasher.update(event.data.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Holds the confirmed snapshot and the live pending buffer for one session
/// view, and retires pending events once the confirmed log supersedes them.
#[derive(Debug, Default)]
pub struct Reconciler {
    /// Last fetched confirmed snapshot, in authoritative server order.
    confirmed: Vec<Event>,
    /// Events observed live but not yet known to be persisted, in arrival
    /// order.
    pending: Vec<Event>,
    /// Next synthetic id, strictly decreasing from -1. Reset per session
    /// view, never shared across sessions.
    next_live_id: i64,
    /// Guards in-flight fetches: a response is applied only if its epoch
    /// still matches.
    request_epoch: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            confirmed: Vec::new(),
            pending: Vec::new(),
            next_live_id: -1,
            request_epoch: 0,
        }
    }

    /// Buffer a live event, assigning it the next synthetic negative id.
    ///
    /// Keepalives are protocol noise and are discarded. Returns the assigned
    /// id for anything buffered.
    pub fn append_live(&mut self, wire: WireEvent) -> Option<i64> {
        if wire.event_type == EventType::Keepalive {
            return None;
        }
        let id = self.next_live_id;
        self.next_live_id -= 1;
        self.pending.push(wire.into_event(id));
        Some(id)
    }

    /// Register a new in-flight fetch and return its epoch tag.
    ///
    /// Every call supersedes all earlier in-flight fetches: their responses
    /// will fail the epoch check in [`apply_snapshot`](Self::apply_snapshot).
    pub fn begin_fetch(&mut self) -> u64 {
        self.request_epoch += 1;
        self.request_epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.request_epoch
    }

    /// Apply a fetched confirmed snapshot tagged with `epoch`.
    ///
    /// Stale responses (superseded by a newer fetch) are discarded entirely
    /// and `false` is returned; never let an older response overwrite newer
    /// state. Otherwise the confirmed log is replaced. When the session has
    /// left the running state the confirmed log is authoritative and
    /// complete, so the pending buffer is cleared; while still running, only
    /// pending events whose content key now appears in the confirmed set are
    /// retired.
    pub fn apply_snapshot(&mut self, epoch: u64, snapshot: &SessionSnapshot) -> bool {
        if epoch != self.request_epoch {
            tracing::debug!(
                epoch,
                current = self.request_epoch,
                "Discarding stale session snapshot"
            );
            return false;
        }

        self.confirmed = snapshot.events.clone();

        if snapshot.status != SessionStatus::Running {
            self.pending.clear();
        } else {
            let confirmed_keys: HashSet<String> =
                self.confirmed.iter().map(content_key).collect();
            self.pending
                .retain(|e| !confirmed_keys.contains(&content_key(e)));
        }

        tracing::debug!(
            confirmed = self.confirmed.len(),
            pending = self.pending.len(),
            status = %snapshot.status,
            "Applied session snapshot"
        );
        true
    }

    /// The merged sequence: confirmed events followed by pending events.
    ///
    /// Always a valid total order: confirmed ids are positive-increasing,
    /// pending ids negative-decreasing, and both segments are internally
    /// ordered by arrival.
    pub fn merged_events(&self) -> Vec<Event> {
        let mut merged = Vec::with_capacity(self.confirmed.len() + self.pending.len());
        merged.extend(self.confirmed.iter().cloned());
        merged.extend(self.pending.iter().cloned());
        merged
    }

    pub fn confirmed_len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
