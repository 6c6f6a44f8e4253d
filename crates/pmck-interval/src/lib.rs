#![forbid(unsafe_code)]
//! Ordered collection of non-overlapping address-space intervals.
//!
//! `IntervalSet<T>` is the single backbone behind both the region registry
//! (payload `()`) and the in-flight store tracker (payload carrying store
//! state). It keeps entries ordered by start address and guarantees that no
//! two entries overlap.
//!
//! ## Operations (logical, single file)
//!
//! - **insert**: `insert_merging` (coalesces overlapping and adjacent
//!   entries) and `insert_nonmerging` (caller guarantees no overlap).
//! - **subtract**: `remove_range` — carves a span out of the set, splitting
//!   partially covered entries.
//! - **classify**: `classify` / `contains_any` — overlap classification
//!   against the set.
//! - **cursor**: `first_entry_at_or_after` / `first_overlap_at_or_after` —
//!   ordered scans that survive mutation: the caller keeps a resume
//!   address and mutates freely between calls.

use pmck_types::MemSpan;
use std::collections::BTreeMap;

/// How a span relates to the entries of an [`IntervalSet`].
///
/// The discriminants are the wire codes returned to traced programs that
/// ask whether a span is a registered mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Overlap {
    /// No entry overlaps the span.
    NotPresent = 0,
    /// Some entry fully contains the span.
    FullyInside = 1,
    /// The span hangs off the front of the first entry it overlaps.
    OverlapHead = 2,
    /// The span hangs off the back of the first entry it overlaps.
    OverlapTail = 3,
}

impl Overlap {
    #[must_use]
    pub fn as_code(self) -> u64 {
        self as u64
    }
}

#[derive(Debug, Clone)]
struct Entry<T> {
    size: u64,
    payload: T,
}

/// Ordered set of non-overlapping `[addr, addr+size)` intervals, each
/// tagged with a payload.
///
/// Backed by a `BTreeMap` keyed on start address: lookup, insert, and
/// split/merge are `O(log n + k)` in the number of touched entries.
#[derive(Debug, Clone)]
pub struct IntervalSet<T> {
    entries: BTreeMap<u64, Entry<T>>,
}

impl<T> Default for IntervalSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntervalSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Ordered iteration over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (MemSpan, &T)> {
        self.entries.iter().map(|(&addr, entry)| {
            let span = MemSpan::new(addr, entry.size).expect("set holds only valid spans");
            (span, &entry.payload)
        })
    }

    /// Sum of entry sizes in bytes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }

    /// The entry starting exactly at `start`, if any.
    #[must_use]
    pub fn get(&self, start: u64) -> Option<(MemSpan, &T)> {
        self.entries.get(&start).map(|entry| {
            let span = MemSpan::new(start, entry.size).expect("set holds only valid spans");
            (span, &entry.payload)
        })
    }

    /// Mutable payload access for the entry starting exactly at `start`.
    pub fn payload_mut(&mut self, start: u64) -> Option<&mut T> {
        self.entries.get_mut(&start).map(|entry| &mut entry.payload)
    }

    /// Remove the entry starting exactly at `start`.
    pub fn remove_exact(&mut self, start: u64) -> Option<(MemSpan, T)> {
        self.entries.remove(&start).map(|entry| {
            let span = MemSpan::new(start, entry.size).expect("set holds only valid spans");
            (span, entry.payload)
        })
    }

    /// First entry whose start address is `>= from`.
    ///
    /// Together with [`Self::first_overlap_at_or_after`] this is the cursor
    /// primitive that makes mutation during traversal safe: after removing
    /// or splitting an entry, resume with `from` set just past the mutated
    /// region and the scan continues as if never interrupted.
    #[must_use]
    pub fn first_entry_at_or_after(&self, from: u64) -> Option<(MemSpan, &T)> {
        self.entries.range(from..).next().map(|(&addr, entry)| {
            let span = MemSpan::new(addr, entry.size).expect("set holds only valid spans");
            (span, &entry.payload)
        })
    }

    /// First entry overlapping `span` whose start address is `>= from`.
    ///
    /// Entries are returned in start order. An entry that begins before
    /// `span` but reaches into it is found as long as its start is `>= from`;
    /// since entries never overlap each other, at most one such entry exists.
    #[must_use]
    pub fn first_overlap_at_or_after(&self, span: MemSpan, from: u64) -> Option<(MemSpan, &T)> {
        let scan_from = if from >= span.addr() {
            from
        } else {
            // The only candidate starting before the span is its predecessor.
            match self.entries.range(..span.addr()).next_back() {
                Some((&start, entry)) if start >= from && start + entry.size > span.addr() => start,
                _ => span.addr(),
            }
        };
        self.entries
            .range(scan_from..span.end())
            .next()
            .map(|(&addr, entry)| {
                let found = MemSpan::new(addr, entry.size).expect("set holds only valid spans");
                (found, &entry.payload)
            })
    }

    /// Classify `span` against the set.
    ///
    /// The decision is made against the lowest-start entry overlapping the
    /// span: fully contained, hanging off the entry's front, or hanging off
    /// its back.
    #[must_use]
    pub fn classify(&self, span: MemSpan) -> Overlap {
        let Some((found, _)) = self.first_overlap_at_or_after(span, 0) else {
            return Overlap::NotPresent;
        };
        if span.addr() < found.addr() {
            Overlap::OverlapHead
        } else if span.end() > found.end() {
            Overlap::OverlapTail
        } else {
            Overlap::FullyInside
        }
    }

    /// True iff any entry overlaps `span`.
    #[must_use]
    pub fn contains_any(&self, span: MemSpan) -> bool {
        self.first_overlap_at_or_after(span, 0).is_some()
    }

    /// Insert without coalescing. The caller must have cleared any overlap.
    pub fn insert_nonmerging(&mut self, span: MemSpan, payload: T) {
        debug_assert!(
            !self.contains_any(span),
            "insert_nonmerging with overlapping entry at {span}"
        );
        self.entries.insert(
            span.addr(),
            Entry {
                size: span.size(),
                payload,
            },
        );
    }

    /// Insert `span`, absorbing every entry it overlaps or touches into a
    /// single entry spanning the union. The merged entry carries `payload`;
    /// payloads of absorbed entries are dropped.
    ///
    /// Inserting overlapping or adjacent spans in any order yields the same
    /// set afterwards.
    pub fn insert_merging(&mut self, span: MemSpan, payload: T) {
        let mut hull = span;
        loop {
            let mut absorbed = false;

            // Predecessor reaching up to (or into) the hull.
            if let Some((&start, entry)) = self.entries.range(..hull.addr()).next_back() {
                if start + entry.size >= hull.addr() {
                    let (removed, _) = self.remove_exact(start).expect("entry just observed");
                    hull = hull.hull(removed);
                    absorbed = true;
                }
            }

            // Entries starting inside the hull or exactly at its end.
            while let Some((&start, _)) = self.entries.range(hull.addr()..=hull.end()).next() {
                let (removed, _) = self.remove_exact(start).expect("entry just observed");
                hull = hull.hull(removed);
                absorbed = true;
            }

            if !absorbed {
                break;
            }
        }
        self.entries.insert(
            hull.addr(),
            Entry {
                size: hull.size(),
                payload,
            },
        );
    }
}

impl<T: Clone> IntervalSet<T> {
    /// Subtract `span` from the set.
    ///
    /// Every entry overlapping `span` loses the overlapped bytes: entries
    /// fully inside the span are deleted, entries strictly containing it
    /// are split into two fragments, and head/tail overlaps are shrunk.
    /// Fragments keep a clone of the original entry's payload.
    pub fn remove_range(&mut self, span: MemSpan) {
        let mut cursor = 0_u64;
        while let Some((found, _)) = self.first_overlap_at_or_after(span, cursor) {
            let (old, payload) = self
                .remove_exact(found.addr())
                .expect("entry just observed");

            if let Some(head) = old.slice(old.addr(), span.addr()) {
                self.entries.insert(
                    head.addr(),
                    Entry {
                        size: head.size(),
                        payload: payload.clone(),
                    },
                );
            }
            if let Some(tail) = old.slice(span.end(), old.end()) {
                self.entries.insert(
                    tail.addr(),
                    Entry {
                        size: tail.size(),
                        payload: payload.clone(),
                    },
                );
            }

            cursor = old.end();
        }
    }
}
