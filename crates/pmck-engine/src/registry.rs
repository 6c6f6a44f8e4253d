//! Registered persistent-memory and loggable regions.
//!
//! Two interval sets over the same backbone: `persistent` holds the
//! regions the traced program declared as persistent memory, `loggable`
//! holds the sub-regions whose stores are logged even while the global
//! logging toggle is off. Out-of-range or zero-size inputs are coerced to
//! no-ops; the registry has no error surface.

use pmck_interval::{IntervalSet, Overlap};
use pmck_types::MemSpan;

#[derive(Debug, Default)]
pub struct RegionRegistry {
    persistent: IntervalSet<()>,
    loggable: IntervalSet<()>,
}

impl RegionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent mapping; overlapping or adjacent mappings merge.
    pub fn register(&mut self, addr: u64, size: u64) {
        if let Some(span) = MemSpan::new(addr, size) {
            self.persistent.insert_merging(span, ());
        }
    }

    /// Remove a span from the persistent mappings, splitting partial overlaps.
    pub fn deregister(&mut self, addr: u64, size: u64) {
        if let Some(span) = MemSpan::new(addr, size) {
            self.persistent.remove_range(span);
        }
    }

    /// Classify a span against the persistent mappings.
    #[must_use]
    pub fn classify(&self, addr: u64, size: u64) -> Overlap {
        MemSpan::new(addr, size).map_or(Overlap::NotPresent, |span| self.persistent.classify(span))
    }

    /// True iff the span overlaps any persistent mapping.
    #[must_use]
    pub fn contains_any(&self, span: MemSpan) -> bool {
        self.persistent.contains_any(span)
    }

    /// Ordered dump of the persistent mappings.
    pub fn persistent_regions(&self) -> impl Iterator<Item = MemSpan> + '_ {
        self.persistent.iter().map(|(span, ())| span)
    }

    pub fn add_loggable(&mut self, addr: u64, size: u64) {
        if let Some(span) = MemSpan::new(addr, size) {
            self.loggable.insert_merging(span, ());
        }
    }

    pub fn remove_loggable(&mut self, addr: u64, size: u64) {
        if let Some(span) = MemSpan::new(addr, size) {
            self.loggable.remove_range(span);
        }
    }

    /// True iff at least one loggable region is registered.
    #[must_use]
    pub fn has_loggable(&self) -> bool {
        !self.loggable.is_empty()
    }

    /// True iff the span overlaps a loggable region.
    #[must_use]
    pub fn is_loggable(&self, span: MemSpan) -> bool {
        self.loggable.contains_any(span)
    }

    /// Ordered dump of the loggable regions.
    pub fn loggable_regions(&self) -> impl Iterator<Item = MemSpan> + '_ {
        self.loggable.iter().map(|(span, ())| span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(addr: u64, size: u64) -> MemSpan {
        MemSpan::new(addr, size).expect("valid span")
    }

    #[test]
    fn zero_size_inputs_are_noops() {
        let mut registry = RegionRegistry::new();
        registry.register(0x1000, 0);
        registry.add_loggable(0x1000, 0);
        assert_eq!(registry.persistent_regions().count(), 0);
        assert!(!registry.has_loggable());
        assert_eq!(registry.classify(0x1000, 0), Overlap::NotPresent);

        registry.register(0x1000, 0x40);
        registry.deregister(0x1000, 0);
        assert_eq!(registry.persistent_regions().count(), 1);
    }

    #[test]
    fn register_then_classify() {
        let mut registry = RegionRegistry::new();
        registry.register(0x1000, 0x40);
        assert_eq!(registry.classify(0x1000, 0x40), Overlap::FullyInside);
        assert_eq!(registry.classify(0x1010, 0x8), Overlap::FullyInside);
        assert_eq!(registry.classify(0x0FF0, 0x20), Overlap::OverlapHead);
        assert_eq!(registry.classify(0x1030, 0x20), Overlap::OverlapTail);
        assert_eq!(registry.classify(0x2000, 0x40), Overlap::NotPresent);
    }

    #[test]
    fn deregister_splits_partial_overlap() {
        let mut registry = RegionRegistry::new();
        registry.register(0x1000, 0x100);
        registry.deregister(0x1040, 0x40);

        let regions: Vec<(u64, u64)> = registry
            .persistent_regions()
            .map(|s| (s.addr(), s.size()))
            .collect();
        assert_eq!(regions, vec![(0x1000, 0x40), (0x1080, 0x80)]);
        assert_eq!(registry.classify(0x1040, 0x40), Overlap::NotPresent);
    }

    #[test]
    fn loggable_set_is_independent() {
        let mut registry = RegionRegistry::new();
        registry.register(0x1000, 0x100);
        registry.add_loggable(0x2000, 0x40);

        assert!(registry.is_loggable(span(0x2000, 0x8)));
        assert!(!registry.is_loggable(span(0x1000, 0x8)));
        assert!(registry.contains_any(span(0x1000, 0x8)));
        assert!(!registry.contains_any(span(0x2000, 0x8)));

        registry.remove_loggable(0x2000, 0x40);
        assert!(!registry.has_loggable());
    }
}
