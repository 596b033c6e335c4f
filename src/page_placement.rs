//! Page-placement policy (C4) — LRU and Frequency-Based Replacement (§4.3).
//!
//! Shared per-set state: an LRU rank array (`0..num_ways-1`) and a
//! fixed-size array of `ChunkEntry`s per set (`num_entries_per_chunk = 9`,
//! asserted greater than `num_ways`); the first `num_ways` slots mirror the
//! set's currently cached tags (invariant 3), the rest are "shadow"
//! candidates used only by FBR.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::address::{Granularity, LineAddr};
use crate::scheme::{ReqType, Scheme};
use crate::tag_array::Set;
use crate::tag_buffer::TagBuffer;

const NUM_ENTRIES_PER_CHUNK: usize = 9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlacementKind {
    Lru,
    Fbr,
}

#[derive(Clone, Copy, Debug, Default)]
struct ChunkEntry {
    tag: LineAddr,
    valid: bool,
    count: u32,
}

struct ChunkInfo {
    entries: [ChunkEntry; NUM_ENTRIES_PER_CHUNK],
}

impl Default for ChunkInfo {
    fn default() -> Self {
        ChunkInfo {
            entries: [ChunkEntry::default(); NUM_ENTRIES_PER_CHUNK],
        }
    }
}

pub struct PagePlacementPolicy {
    rng: StdRng,
    scheme: Scheme,
    kind: PlacementKind,
    sample_rate: f64,
    enable_replace: bool,
    max_count: u32,
    chunks: Vec<ChunkInfo>,
    lru_ranks: Vec<Vec<u32>>,
    num_ways: usize,
    num_sets: usize,
}

/// Outcome of a miss-path decision: which way (if any) to install into, and
/// whether a counter (chunk-entry) access occurred — the latter feeds C7's
/// `_numCounterAccess` statistic.
pub struct MissOutcome {
    pub way: Option<u32>,
    pub counter_access: bool,
}

impl PagePlacementPolicy {
    pub fn new(
        seed: u64,
        scheme: Scheme,
        kind: PlacementKind,
        sample_rate: f64,
        enable_replace: bool,
        granularity: Granularity,
        num_sets: usize,
        num_ways: usize,
    ) -> Self {
        assert!(
            NUM_ENTRIES_PER_CHUNK > num_ways,
            "num_entries_per_chunk must exceed num_ways"
        );
        let max_count = if sample_rate < 1.0 {
            if granularity > 4096 {
                255
            } else {
                31
            }
        } else {
            255
        };
        PagePlacementPolicy {
            rng: StdRng::seed_from_u64(seed),
            scheme,
            kind,
            sample_rate,
            enable_replace,
            max_count,
            chunks: (0..num_sets).map(|_| ChunkInfo::default()).collect(),
            lru_ranks: (0..num_sets)
                .map(|_| (0..num_ways as u32).collect())
                .collect(),
            num_ways,
            num_sets,
        }
    }

    fn update_lru(&mut self, set_num: usize, way: u32) {
        let ranks = &mut self.lru_ranks[set_num];
        let target = ranks[way as usize];
        for r in ranks.iter_mut() {
            if *r < target {
                *r += 1;
            }
        }
        ranks[way as usize] = 0;
    }

    /// Effective sample rate and miss-rate-tune flag for FBR's warmup ramp:
    /// full rate until `num_requests < num_sets * num_ways * 512`.
    fn fbr_effective_rate(&self, num_requests: u64) -> (f64, bool) {
        let mut rate = self.sample_rate;
        let mut miss_rate_tune = rate != 1.0;
        if num_requests < (self.num_sets * self.num_ways) as u64 * 512 {
            rate = 1.0;
        }
        if rate == 1.0 {
            miss_rate_tune = false;
        }
        (rate, miss_rate_tune)
    }

    fn sample_or_not(&mut self, rate: f64, miss_rate_tune: bool, recent_miss_rate: f64) -> bool {
        let f: f64 = self.rng.gen();
        if miss_rate_tune {
            f < rate * recent_miss_rate
        } else {
            f < rate
        }
    }

    fn compare_counter(&self, granularity: Granularity, cand_count: u32, victim_count: u32) -> bool {
        let threshold = victim_count as f64 + (granularity as f64 / 64.0 / 2.0) * self.sample_rate;
        cand_count as f64 >= threshold
    }

    fn pick_victim_way(&self, chunk_idx: usize) -> u32 {
        let chunk = &self.chunks[chunk_idx];
        let mut min_count = u32::MAX;
        let mut min_idx = self.num_ways as u32;
        for way in 0..self.num_ways {
            debug_assert!(chunk.entries[way].valid);
            if chunk.entries[way].count < min_count {
                min_count = chunk.entries[way].count;
                min_idx = way as u32;
            }
        }
        min_idx
    }

    fn handle_counter_overflow(&mut self, chunk_idx: usize, overflow_idx: usize) {
        let chunk = &mut self.chunks[chunk_idx];
        for i in 0..NUM_ENTRIES_PER_CHUNK {
            if i == overflow_idx {
                chunk.entries[i].count = (chunk.entries[i].count + 1) / 2;
            } else {
                chunk.entries[i].count /= 2;
            }
        }
    }

    /// Find (or, if `allocate`, lazily create) the chunk entry for `tag`.
    /// Returns `NUM_ENTRIES_PER_CHUNK` (the invalid sentinel) if none could
    /// be found/allocated. Shadow-slot replacement probability is `1/count`
    /// (counts of zero are always replaced) — matching the source's
    /// `f > 1.0 / count` rejection test, not the inverse.
    fn get_chunk_entry(&mut self, tag: LineAddr, chunk_idx: usize, allocate: bool) -> usize {
        let chunk = &self.chunks[chunk_idx];
        let mut idx = NUM_ENTRIES_PER_CHUNK;
        for i in 0..NUM_ENTRIES_PER_CHUNK {
            if chunk.entries[i].valid && chunk.entries[i].tag == tag {
                return i;
            } else if !chunk.entries[i].valid && idx == NUM_ENTRIES_PER_CHUNK {
                idx = i;
            }
        }
        if idx == NUM_ENTRIES_PER_CHUNK && allocate {
            let shadow_span = NUM_ENTRIES_PER_CHUNK - self.num_ways;
            let candidate = self.num_ways + self.rng.gen_range(0..shadow_span);
            let f: f64 = self.rng.gen();
            let count = self.chunks[chunk_idx].entries[candidate].count;
            if count > 0 && f > 1.0 / count as f64 {
                idx = NUM_ENTRIES_PER_CHUNK;
            } else {
                idx = candidate;
            }
        }
        if idx < NUM_ENTRIES_PER_CHUNK {
            let e = &mut self.chunks[chunk_idx].entries[idx];
            e.valid = true;
            e.tag = tag;
            e.count = 0;
        }
        idx
    }

    pub fn handle_cache_miss(
        &mut self,
        tag: LineAddr,
        req_type: ReqType,
        set_num: usize,
        set: &Set,
        granularity: Granularity,
        num_requests: u64,
        recent_miss_rate: f64,
        tag_buffer: &TagBuffer,
    ) -> MissOutcome {
        if self.kind == PlacementKind::Lru {
            if let Some(way) = set.first_empty() {
                self.update_lru(set_num, way);
                return MissOutcome {
                    way: Some(way),
                    counter_access: false,
                };
            }
            if !self.enable_replace {
                return MissOutcome {
                    way: None,
                    counter_access: false,
                };
            }
            let f: f64 = self.rng.gen();
            if f < self.sample_rate {
                let lru_way = (0..self.num_ways as u32)
                    .find(|&w| self.lru_ranks[set_num][w as usize] == self.num_ways as u32 - 1);
                if let Some(way) = lru_way {
                    if self.scheme == Scheme::HybridCache {
                        let victim_tag = set.ways[way as usize].tag;
                        if !tag_buffer.can_insert_pair(tag, victim_tag) {
                            return MissOutcome {
                                way: None,
                                counter_access: false,
                            };
                        }
                    }
                    self.update_lru(set_num, way);
                    return MissOutcome {
                        way: Some(way),
                        counter_access: false,
                    };
                }
            }
            return MissOutcome {
                way: None,
                counter_access: false,
            };
        }

        debug_assert_eq!(self.kind, PlacementKind::Fbr);
        if req_type == ReqType::Store {
            return MissOutcome {
                way: None,
                counter_access: false,
            };
        }
        let (rate, tune) = self.fbr_effective_rate(num_requests);
        let update_fbr = set.has_empty_way() || self.sample_or_not(rate, tune, recent_miss_rate);
        if !update_fbr {
            return MissOutcome {
                way: None,
                counter_access: false,
            };
        }
        let empty_way = set.first_empty();
        let idx = self.get_chunk_entry(tag, set_num, true);
        if idx == NUM_ENTRIES_PER_CHUNK {
            return MissOutcome {
                way: None,
                counter_access: true,
            };
        }
        self.chunks[set_num].entries[idx].count += 1;
        if self.chunks[set_num].entries[idx].count >= self.max_count {
            self.handle_counter_overflow(set_num, idx);
        }
        if let Some(way) = empty_way {
            debug_assert_eq!(idx, way as usize);
            return MissOutcome {
                way: Some(way),
                counter_access: true,
            };
        }
        debug_assert!(idx >= self.num_ways);
        let victim_way = self.pick_victim_way(set_num);
        debug_assert!((victim_way as usize) < self.num_ways);
        let cand_count = self.chunks[set_num].entries[idx].count;
        let victim_count = self.chunks[set_num].entries[victim_way as usize].count;
        let victim_tag = self.chunks[set_num].entries[victim_way as usize].tag;
        if self.compare_counter(granularity, cand_count, victim_count)
            && tag_buffer.can_insert_pair(tag, victim_tag)
        {
            self.chunks[set_num]
                .entries
                .swap(idx, victim_way as usize);
            MissOutcome {
                way: Some(victim_way),
                counter_access: true,
            }
        } else {
            MissOutcome {
                way: None,
                counter_access: true,
            }
        }
    }

    pub fn handle_cache_hit(
        &mut self,
        tag: LineAddr,
        set_num: usize,
        hit_way: u32,
        num_requests: u64,
        recent_miss_rate: f64,
    ) -> bool {
        if self.kind == PlacementKind::Lru {
            self.update_lru(set_num, hit_way);
            return false;
        }
        let (rate, tune) = self.fbr_effective_rate(num_requests);
        if !self.sample_or_not(rate, tune, recent_miss_rate) {
            return false;
        }
        let idx = self.get_chunk_entry(tag, set_num, false);
        debug_assert!(idx < self.num_ways);
        self.chunks[set_num].entries[idx].count += 1;
        if self.chunks[set_num].entries[idx].count >= self.max_count {
            self.handle_counter_overflow(set_num, idx);
        }
        true
    }

    /// `flush_chunk` (§4.3): zero every ChunkEntry in a set, used by C8 when
    /// the bandwidth balancer invalidates a HybridCache set.
    pub fn flush_chunk(&mut self, set_num: usize) {
        self.chunks[set_num] = ChunkInfo::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag_array::Way;

    fn lru_policy(num_sets: usize, num_ways: usize) -> PagePlacementPolicy {
        PagePlacementPolicy::new(
            1,
            Scheme::UnisonCache,
            PlacementKind::Lru,
            1.0,
            true,
            4096,
            num_sets,
            num_ways,
        )
    }

    #[test]
    fn lru_installs_into_empty_way_first() {
        let mut p = lru_policy(4, 4);
        let set = Set::new(4);
        let tb = TagBuffer::new(64);
        let outcome = p.handle_cache_miss(1, ReqType::Load, 0, &set, 4096, 0, 0.0, &tb);
        assert_eq!(outcome.way, Some(0));
    }

    #[test]
    fn lru_disabled_replace_refuses_full_set() {
        let mut p = PagePlacementPolicy::new(
            1,
            Scheme::UnisonCache,
            PlacementKind::Lru,
            1.0,
            false,
            4096,
            4,
            2,
        );
        let mut set = Set::new(2);
        set.ways[0] = Way {
            tag: 10,
            valid: true,
            dirty: false,
        };
        set.ways[1] = Way {
            tag: 11,
            valid: true,
            dirty: false,
        };
        let tb = TagBuffer::new(64);
        let outcome = p.handle_cache_miss(12, ReqType::Load, 0, &set, 4096, 0, 0.0, &tb);
        assert_eq!(outcome.way, None);
    }

    #[test]
    fn fbr_store_never_replaces() {
        let mut p = PagePlacementPolicy::new(
            1,
            Scheme::UnisonCache,
            PlacementKind::Fbr,
            1.0,
            true,
            4096,
            4,
            4,
        );
        let set = Set::new(4);
        let tb = TagBuffer::new(64);
        let outcome = p.handle_cache_miss(1, ReqType::Store, 0, &set, 4096, 1000, 0.5, &tb);
        assert_eq!(outcome.way, None);
    }

    #[test]
    fn hybridcache_lru_refuses_replacement_when_tag_buffer_is_full() {
        let mut p = PagePlacementPolicy::new(1, Scheme::HybridCache, PlacementKind::Lru, 1.0, true, 4096, 4, 2);
        let mut set = Set::new(2);
        set.ways[0] = Way { tag: 10, valid: true, dirty: false };
        set.ways[1] = Way { tag: 11, valid: true, dirty: false };
        let mut tb = TagBuffer::new(8);
        for tag in 1..=8u64 {
            tb.insert(tag, true);
        }
        let outcome = p.handle_cache_miss(12, ReqType::Load, 0, &set, 4096, 0, 0.0, &tb);
        assert_eq!(outcome.way, None);
    }

    #[test]
    fn flush_chunk_clears_all_entries() {
        let mut p = lru_policy(2, 2);
        p.chunks[0].entries[0] = ChunkEntry {
            tag: 5,
            valid: true,
            count: 7,
        };
        p.flush_chunk(0);
        assert!(!p.chunks[0].entries[0].valid);
        assert_eq!(p.chunks[0].entries[0].count, 0);
    }
}
