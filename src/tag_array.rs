//! Tag array (C2): set-associative metadata plus the tag→way inverse index.
//!
//! Lookup for page-granularity schemes goes through the TLB side-index
//! (§3 "TLB entry"); for AlloyCache (one way per set) lookup is a single
//! comparison. The invariant enforced in debug builds is spec invariant 1:
//! `tlb[t].way = w` implies `cache[set].ways[w]` is valid with tag `t`.

use std::collections::HashMap;

use crate::address::LineAddr;

pub const NONE_WAY: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, Default)]
pub struct Way {
    pub tag: LineAddr,
    pub valid: bool,
    pub dirty: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Set {
    pub ways: Vec<Way>,
}

impl Set {
    pub fn new(num_ways: usize) -> Self {
        Set {
            ways: vec![Way::default(); num_ways],
        }
    }

    pub fn first_empty(&self) -> Option<u32> {
        self.ways.iter().position(|w| !w.valid).map(|i| i as u32)
    }

    pub fn has_empty_way(&self) -> bool {
        self.first_empty().is_some()
    }

    pub fn lookup(&self, tag: LineAddr) -> Option<u32> {
        self.ways
            .iter()
            .position(|w| w.valid && w.tag == tag)
            .map(|i| i as u32)
    }
}

/// Inverse index entry keyed by `tag` (§3 "TLB entry"). `way = NONE_WAY` means
/// not currently cached. `touch_bitvec`/`dirty_bitvec` track the 16 4-line
/// groups within a 4 KB page for the UnisonCache/Tagless footprint predictor;
/// `count` is read only by the OS-placement stub (C5).
#[derive(Clone, Copy, Debug, Default)]
pub struct TlbEntry {
    pub way: u32,
    pub count: u64,
    pub touch_bitvec: u16,
    pub dirty_bitvec: u16,
}

impl TlbEntry {
    pub fn cached(way: u32) -> Self {
        TlbEntry {
            way,
            count: 0,
            touch_bitvec: 0,
            dirty_bitvec: 0,
        }
    }
}

pub struct TagArray {
    pub sets: Vec<Set>,
    pub tlb: HashMap<LineAddr, TlbEntry>,
    num_ways: usize,
}

impl TagArray {
    pub fn new(num_sets: usize, num_ways: usize) -> Self {
        TagArray {
            sets: (0..num_sets).map(|_| Set::new(num_ways)).collect(),
            tlb: HashMap::new(),
            num_ways,
        }
    }

    pub fn num_ways(&self) -> usize {
        self.num_ways
    }

    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }

    /// Single-way lookup used by AlloyCache, bypassing the TLB (invariant 7:
    /// `num_ways = 1` for AlloyCache, so the TLB side-index buys nothing).
    pub fn lookup_line(&self, set: usize, tag: LineAddr) -> Option<u32> {
        self.sets[set].lookup(tag)
    }

    /// Page-granularity lookup via the TLB. Asserts invariant 1 in debug
    /// builds: if the TLB claims a way, that way must actually hold the tag.
    pub fn lookup_page(&self, set: usize, tag: LineAddr) -> Option<u32> {
        let entry = self.tlb.get(&tag)?;
        if entry.way == NONE_WAY {
            return None;
        }
        debug_assert!(
            self.sets[set].ways[entry.way as usize].valid
                && self.sets[set].ways[entry.way as usize].tag == tag,
            "invariant 1 violated: tlb[{tag}].way={} but set {set} way doesn't match",
            entry.way
        );
        Some(entry.way)
    }

    pub fn install(&mut self, set: usize, way: u32, tag: LineAddr, dirty: bool) {
        let w = &mut self.sets[set].ways[way as usize];
        w.tag = tag;
        w.valid = true;
        w.dirty = dirty;
    }

    pub fn invalidate(&mut self, set: usize, way: u32) {
        let w = &mut self.sets[set].ways[way as usize];
        *w = Way::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_then_invalidate_restores_empty_way() {
        let mut arr = TagArray::new(4, 4);
        assert!(arr.sets[0].has_empty_way());
        arr.install(0, 0, 7, false);
        assert_eq!(arr.sets[0].lookup(7), Some(0));
        arr.invalidate(0, 0);
        assert!(!arr.sets[0].ways[0].valid);
        assert!(arr.sets[0].has_empty_way());
    }

    #[test]
    fn first_empty_picks_lowest_index() {
        let mut arr = TagArray::new(1, 4);
        arr.install(0, 2, 99, false);
        assert_eq!(arr.sets[0].first_empty(), Some(0));
    }

    #[test]
    fn page_lookup_follows_tlb() {
        let mut arr = TagArray::new(4, 4);
        arr.install(1, 2, 42, false);
        arr.tlb.insert(42, TlbEntry::cached(2));
        assert_eq!(arr.lookup_page(1, 42), Some(2));
        assert_eq!(arr.lookup_page(1, 43), None);
    }
}
