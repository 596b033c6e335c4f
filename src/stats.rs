//! Named statistics counters (§2 "Controller pipeline", supplemented from
//! `mc.h`'s `Counter` fields). Bulk cross-run aggregation is the named
//! external "statistics aggregation" collaborator (spec.md §1); this struct
//! only accumulates within one controller's lifetime.

use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
pub struct Counters {
    pub num_placement: u64,
    pub num_clean_eviction: u64,
    pub num_dirty_eviction: u64,
    pub num_load_hit: u64,
    pub num_load_miss: u64,
    pub num_store_hit: u64,
    pub num_store_miss: u64,
    pub num_counter_access: u64,
    pub num_tag_load: u64,
    pub num_tag_store: u64,
    pub num_tag_buffer_flush: u64,
    pub num_tb_dirty_hit: u64,
    pub num_tb_dirty_miss: u64,
    pub num_touched_lines: u64,
    pub num_evicted_lines: u64,
}

impl Counters {
    pub fn num_hit(&self) -> u64 {
        self.num_load_hit + self.num_store_hit
    }

    pub fn num_miss(&self) -> u64 {
        self.num_load_miss + self.num_store_miss
    }

    /// Ordered snapshot keyed by the same names `mc.h` used, in the style of
    /// the teacher's `AnalysisStats` reporting.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        let mut m = BTreeMap::new();
        m.insert("num_placement", self.num_placement);
        m.insert("num_clean_eviction", self.num_clean_eviction);
        m.insert("num_dirty_eviction", self.num_dirty_eviction);
        m.insert("num_load_hit", self.num_load_hit);
        m.insert("num_load_miss", self.num_load_miss);
        m.insert("num_store_hit", self.num_store_hit);
        m.insert("num_store_miss", self.num_store_miss);
        m.insert("num_counter_access", self.num_counter_access);
        m.insert("num_tag_load", self.num_tag_load);
        m.insert("num_tag_store", self.num_tag_store);
        m.insert("num_tag_buffer_flush", self.num_tag_buffer_flush);
        m.insert("num_tb_dirty_hit", self.num_tb_dirty_hit);
        m.insert("num_tb_dirty_miss", self.num_tb_dirty_miss);
        m.insert("num_touched_lines", self.num_touched_lines);
        m.insert("num_evicted_lines", self.num_evicted_lines);
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() {
        let mut c = Counters::default();
        c.num_load_hit = 3;
        c.num_store_miss = 2;
        assert_eq!(c.num_hit(), 3);
        assert_eq!(c.num_miss(), 2);
        assert_eq!(c.snapshot()["num_load_hit"], 3);
    }
}
