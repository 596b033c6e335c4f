//! Tag buffer (C6) — bounded associative structure tracking pending remaps
//! for HybridCache (§4.5).
//!
//! Flat `S*W` array with per-set LRU ranks among `remap=false` ways, per
//! design note "tag-buffer 2-D slotting" — this avoids the array-of-pointers
//! indirection `mc.cpp`'s `TagBufferEntry**` uses for the same structure.

use crate::address::LineAddr;

#[derive(Clone, Copy, Debug)]
struct Entry {
    tag: LineAddr,
    remap: bool,
    lru: u32,
}

pub struct TagBuffer {
    num_ways: u32,
    num_sets: u32,
    entries: Vec<Entry>,
    entry_occupied: u32,
    last_clear_time: u64,
}

impl TagBuffer {
    pub fn new(total_entries: u32) -> Self {
        let num_ways = 8;
        let num_sets = (total_entries / num_ways).max(1);
        let entries = (0..num_sets * num_ways)
            .map(|i| Entry {
                tag: 0,
                remap: false,
                lru: i % num_ways,
            })
            .collect();
        TagBuffer {
            num_ways,
            num_sets,
            entries,
            entry_occupied: 0,
            last_clear_time: 0,
        }
    }

    pub fn num_ways(&self) -> u32 {
        self.num_ways
    }

    fn set_of(&self, tag: LineAddr) -> u32 {
        (tag % self.num_sets as u64) as u32
    }

    fn slot(&self, set: u32, way: u32) -> usize {
        (set * self.num_ways + way) as usize
    }

    /// Returns the matching way, or `num_ways()` (not a sentinel constant) if
    /// the tag isn't present — mirrors `existInTB`'s `return _num_ways;`.
    pub fn exist_in_tb(&self, tag: LineAddr) -> u32 {
        let set = self.set_of(tag);
        for way in 0..self.num_ways {
            if self.entries[self.slot(set, way)].tag == tag {
                return way;
            }
        }
        self.num_ways
    }

    pub fn can_insert(&self, tag: LineAddr) -> bool {
        let set = self.set_of(tag);
        (0..self.num_ways).any(|way| {
            let e = &self.entries[self.slot(set, way)];
            !e.remap || e.tag == tag
        })
    }

    /// Same-set special case: when both tags hash to the same tag-buffer
    /// set, a plain conjunction of singleton checks double-counts the slot
    /// that could admit either — at least two ways must be admissible.
    pub fn can_insert_pair(&self, tag1: LineAddr, tag2: LineAddr) -> bool {
        let set1 = self.set_of(tag1);
        let set2 = self.set_of(tag2);
        if set1 != set2 {
            return self.can_insert(tag1) && self.can_insert(tag2);
        }
        let admissible = (0..self.num_ways)
            .filter(|&way| {
                let e = &self.entries[self.slot(set1, way)];
                !e.remap || e.tag == tag1 || e.tag == tag2
            })
            .count();
        admissible >= 2
    }

    pub fn insert(&mut self, tag: LineAddr, remap: bool) {
        let set = self.set_of(tag);
        let exist_way = self.exist_in_tb(tag);
        if exist_way < self.num_ways {
            let slot = self.slot(set, exist_way);
            debug_assert_eq!(self.entries[slot].tag, tag);
            if remap {
                if !self.entries[slot].remap {
                    self.entry_occupied += 1;
                }
                self.entries[slot].remap = true;
            } else if !self.entries[slot].remap {
                self.update_lru(set, exist_way);
            }
            return;
        }

        let mut max_lru = 0;
        let mut replace_way = self.num_ways;
        for way in 0..self.num_ways {
            let e = &self.entries[self.slot(set, way)];
            if !e.remap && e.lru >= max_lru {
                max_lru = e.lru;
                replace_way = way;
            }
        }
        assert!(
            replace_way != self.num_ways,
            "tag buffer set {set} has no way with remap=false to evict"
        );
        let slot = self.slot(set, replace_way);
        self.entries[slot].tag = tag;
        self.entries[slot].remap = remap;
        if remap {
            self.entry_occupied += 1;
        } else {
            self.update_lru(set, replace_way);
        }
    }

    fn update_lru(&mut self, set: u32, way: u32) {
        debug_assert!(!self.entries[self.slot(set, way)].remap);
        let target_lru = self.entries[self.slot(set, way)].lru;
        for w in 0..self.num_ways {
            let slot = self.slot(set, w);
            if !self.entries[slot].remap && self.entries[slot].lru < target_lru {
                self.entries[slot].lru += 1;
            }
        }
        let slot = self.slot(set, way);
        self.entries[slot].lru = 0;
    }

    pub fn occupancy(&self) -> f64 {
        self.entry_occupied as f64 / self.num_ways as f64 / self.num_sets as f64
    }

    pub fn clear(&mut self) {
        self.entry_occupied = 0;
        for set in 0..self.num_sets {
            for way in 0..self.num_ways {
                let slot = self.slot(set, way);
                self.entries[slot] = Entry {
                    tag: 0,
                    remap: false,
                    lru: way,
                };
            }
        }
    }

    pub fn set_clear_time(&mut self, time: u64) {
        self.last_clear_time = time;
    }

    pub fn clear_time(&self) -> u64 {
        self.last_clear_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup() {
        let mut tb = TagBuffer::new(64);
        assert_eq!(tb.exist_in_tb(7), tb.num_ways());
        tb.insert(7, false);
        assert_ne!(tb.exist_in_tb(7), tb.num_ways());
    }

    #[test]
    fn remap_flag_tracks_occupancy() {
        let mut tb = TagBuffer::new(64);
        assert_eq!(tb.occupancy(), 0.0);
        tb.insert(1, true);
        assert!(tb.occupancy() > 0.0);
        tb.clear();
        assert_eq!(tb.occupancy(), 0.0);
    }

    #[test]
    fn clear_restores_initial_state() {
        let mut tb = TagBuffer::new(16);
        tb.insert(3, true);
        tb.insert(19, false);
        tb.clear();
        for set in 0..tb.num_sets {
            for way in 0..tb.num_ways {
                let e = &tb.entries[tb.slot(set, way)];
                assert_eq!(e.tag, 0);
                assert!(!e.remap);
                assert_eq!(e.lru, way);
            }
        }
    }

    #[test]
    fn overflow_refusal_when_all_ways_pinned() {
        // num_ways=8, num_sets=1: pin all 8 ways with remap=true then the
        // ninth distinct tag colliding in the same set must be refused.
        let mut tb = TagBuffer::new(8);
        for tag in 1..=8u64 {
            assert!(tb.can_insert(tag));
            tb.insert(tag, true);
        }
        assert!(!tb.can_insert(9));
    }

    #[test]
    fn can_insert_pair_same_set_requires_two_admissible() {
        let mut tb = TagBuffer::new(8);
        for tag in 1..=7u64 {
            tb.insert(tag, true);
        }
        // one way left (tag=0 slot), so a pair of fresh tags cannot both fit.
        assert!(!tb.can_insert_pair(100, 101));
    }
}
