//! The in-flight store tracker.
//!
//! Holds every store to persistent memory that has not yet been made
//! durable, keyed by address span. Unlike the region registry, the tracker
//! never merges adjacent entries: each store keeps its own call-site for
//! diagnostic attribution.

use pmck_interval::IntervalSet;
use pmck_types::{CallStack, MemSpan, SbTick, StoreState};
use serde::Serialize;

/// Payload carried by each tracker entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePayload {
    pub value: u64,
    pub block: SbTick,
    pub context: CallStack,
    pub state: StoreState,
}

/// A tracked store, or a verbatim copy of one saved as an overwrite or
/// multi-flush record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedStore {
    pub span: MemSpan,
    pub value: u64,
    pub block: SbTick,
    pub context: CallStack,
    pub state: StoreState,
}

impl TrackedStore {
    fn from_parts(span: MemSpan, payload: StorePayload) -> Self {
        Self {
            span,
            value: payload.value,
            block: payload.block,
            context: payload.context,
            state: payload.state,
        }
    }

    fn into_parts(self) -> (MemSpan, StorePayload) {
        (
            self.span,
            StorePayload {
                value: self.value,
                block: self.block,
                context: self.context,
                state: self.state,
            },
        )
    }

    /// Copy of this store covering `span` instead, in the given state.
    #[must_use]
    pub fn refit(&self, span: MemSpan, state: StoreState) -> Self {
        Self {
            span,
            state,
            context: self.context.clone(),
            ..*self
        }
    }
}

#[derive(Debug, Default)]
pub struct StoreTracker {
    stores: IntervalSet<StorePayload>,
}

impl StoreTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.stores.total_bytes()
    }

    /// Ordered snapshots of every tracked store.
    pub fn iter(&self) -> impl Iterator<Item = TrackedStore> + '_ {
        self.stores
            .iter()
            .map(|(span, payload)| TrackedStore::from_parts(span, payload.clone()))
    }

    /// Insert a store. The caller must have evicted any overlap.
    pub fn insert(&mut self, store: TrackedStore) {
        let (span, payload) = store.into_parts();
        self.stores.insert_nonmerging(span, payload);
    }

    /// Remove and return the first store overlapping `span`, if any.
    pub fn remove_first_overlap(&mut self, span: MemSpan) -> Option<TrackedStore> {
        let (found, _) = self.stores.first_overlap_at_or_after(span, 0)?;
        let (old, payload) = self
            .stores
            .remove_exact(found.addr())
            .expect("entry just observed");
        Some(TrackedStore::from_parts(old, payload))
    }

    /// Span and state of the first store overlapping `span` with start
    /// address `>= from`. Cursor primitive for the flush walk.
    #[must_use]
    pub fn peek_overlap_at_or_after(&self, span: MemSpan, from: u64) -> Option<(MemSpan, StoreState)> {
        self.stores
            .first_overlap_at_or_after(span, from)
            .map(|(found, payload)| (found, payload.state))
    }

    /// Span and state of the first store with start address `>= from`.
    /// Cursor primitive for the fence/commit walks.
    #[must_use]
    pub fn peek_at_or_after(&self, from: u64) -> Option<(MemSpan, StoreState)> {
        self.stores
            .first_entry_at_or_after(from)
            .map(|(found, payload)| (found, payload.state))
    }

    /// Full copy of the store starting exactly at `start`.
    #[must_use]
    pub fn snapshot(&self, start: u64) -> Option<TrackedStore> {
        self.stores
            .get(start)
            .map(|(span, payload)| TrackedStore::from_parts(span, payload.clone()))
    }

    /// Remove the store starting exactly at `start`.
    pub fn remove_exact(&mut self, start: u64) -> Option<TrackedStore> {
        self.stores
            .remove_exact(start)
            .map(|(span, payload)| TrackedStore::from_parts(span, payload))
    }

    /// Set the state of the store starting exactly at `start`.
    pub fn set_state(&mut self, start: u64, state: StoreState) {
        if let Some(payload) = self.stores.payload_mut(start) {
            payload.state = state;
        }
    }
}
