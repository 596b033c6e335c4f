//! Controller pipeline (C7) and bandwidth balancer (C8) — §4.6, §4.8.
//!
//! Single per-controller lock (§5): `access` holds it for the entire
//! non-PUTS path, so every near/far submission and metadata update inside
//! one call is atomic with respect to other callers. PUTS is answered
//! without ever touching the lock.

use std::sync::Mutex;

use crate::address::{footprint_bit, near_addr, near_channel, set_of, tag_of, LineAddr};
use crate::backend::{DdrBackend, SimpleMemory, TimingBackend};
use crate::config::{Config, ExtDramType, PlacementPolicyKind};
use crate::line_placement::LinePlacementPolicy;
use crate::os_placement::OsPlacementPolicy;
use crate::page_placement::{PagePlacementPolicy, PlacementKind};
use crate::scheme::{MesiState, Priority, ReqKind, ReqType, Scheme};
use crate::stats::Counters;
use crate::tag_array::{TagArray, TlbEntry, NONE_WAY};
use crate::tag_buffer::TagBuffer;

#[derive(Clone, Copy, Debug)]
pub struct Request {
    pub line_addr: LineAddr,
    pub kind: ReqKind,
    pub cycle: u64,
    /// NOEXCL: absent (false) means a GETS miss is granted Exclusive rather
    /// than Shared (§4.6 "Coherence side-effect").
    pub no_excl: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Response {
    pub data_ready_cycle: u64,
    pub state: MesiState,
}

struct Inner {
    scheme: Scheme,
    granularity: u64,
    num_ways: u32,
    num_sets: u64,
    mcdram_per_mc: u32,
    sram_tag: bool,
    llc_latency: u32,
    footprint_size: u32,
    bw_balance: bool,
    step_length: u64,

    tag_array: TagArray,
    tag_buffer: TagBuffer,
    line_policy: Option<LinePlacementPolicy>,
    page_policy: Option<PagePlacementPolicy>,
    os_policy: Option<OsPlacementPolicy>,
    next_evict_idx: u64,
    ds_index: u64,

    num_requests: u64,
    num_hit_per_step: u64,
    num_miss_per_step: u64,
    mc_bw_per_step: u64,
    ext_bw_per_step: u64,
    stats: Counters,

    ext_dram: Box<dyn TimingBackend>,
    mcdram: Vec<Box<dyn TimingBackend>>,
}

pub struct Controller {
    inner: Mutex<Inner>,
}

impl Controller {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let scheme = config.cache_scheme;
        let granularity = config.cache_granularity;
        let cache_size = config.mcdram_size_mb as u64 * 1024 * 1024;

        // Geometry constraints asserted at init (§6).
        let num_ways = match scheme {
            Scheme::Hma => (cache_size / granularity) as u32,
            _ => config.num_ways,
        };
        assert!(num_ways > 0, "num_ways must be positive");
        let num_sets: u64 = match scheme {
            // Invariant 6: Tagless is fully associative with a single set.
            Scheme::Tagless | Scheme::Hma => 1,
            _ => (cache_size / (granularity * num_ways as u64)).max(1),
        };
        let step_length = (cache_size / 640).max(1);

        let ext_dram: Box<dyn TimingBackend> = match config.ext_dram_type {
            ExtDramType::Simple => Box::new(SimpleMemory::new(config.far_latency)),
            ExtDramType::Ddr => Box::new(DdrBackend::new(1)),
            ExtDramType::Md1 | ExtDramType::Dramsim => {
                anyhow::bail!(
                    "sys.mem.ext_dram.type: MD1/DRAMSim are named external collaborators, not implemented in-core"
                );
            }
        };
        let mcdram = (0..config.mcdram_per_mc.max(1))
            .map(|_| Box::new(SimpleMemory::new(config.near_latency)) as Box<dyn TimingBackend>)
            .collect();

        let line_policy = (scheme == Scheme::AlloyCache).then(|| {
            LinePlacementPolicy::new(config.seed, config.sample_rate, config.enable_replace)
        });
        let page_policy = matches!(scheme, Scheme::UnisonCache | Scheme::HybridCache).then(|| {
            let kind = match config.placement_policy {
                PlacementPolicyKind::Lru => PlacementKind::Lru,
                PlacementPolicyKind::Fbr => PlacementKind::Fbr,
            };
            PagePlacementPolicy::new(
                config.seed.wrapping_add(1),
                scheme,
                kind,
                config.sample_rate,
                config.enable_replace,
                granularity,
                num_sets as usize,
                num_ways as usize,
            )
        });
        let os_policy = (scheme == Scheme::Hma).then(|| OsPlacementPolicy::new(config.os_quantum));

        info!(
            "controller initialized: scheme={:?} num_sets={} num_ways={} granularity={}",
            scheme, num_sets, num_ways, granularity
        );

        Ok(Controller {
            inner: Mutex::new(Inner {
                scheme,
                granularity,
                num_ways,
                num_sets,
                mcdram_per_mc: config.mcdram_per_mc.max(1),
                sram_tag: config.sram_tag,
                llc_latency: config.l3_latency,
                footprint_size: config.footprint_size,
                bw_balance: config.bw_balance,
                step_length,
                tag_array: TagArray::new(num_sets as usize, num_ways as usize),
                tag_buffer: TagBuffer::new(config.tag_buffer_size),
                line_policy,
                page_policy,
                os_policy,
                next_evict_idx: 0,
                ds_index: 0,
                num_requests: 0,
                num_hit_per_step: 0,
                num_miss_per_step: 0,
                mc_bw_per_step: 0,
                ext_bw_per_step: 0,
                stats: Counters::default(),
                ext_dram,
                mcdram,
            }),
        })
    }

    /// Entry point `access(req) → data_ready_cycle` (§4.6). PUTS bypasses
    /// the lock entirely, per §5.
    pub fn access(&self, req: Request) -> Response {
        if let ReqKind::Puts = req.kind {
            return Response {
                data_ready_cycle: req.cycle,
                state: MesiState::Invalid,
            };
        }
        let mut inner = self.inner.lock().expect("controller mutex poisoned");
        inner.handle(req)
    }

    pub fn ds_index(&self) -> u64 {
        self.inner.lock().unwrap().ds_index
    }

    pub fn stats(&self) -> Counters {
        self.inner.lock().unwrap().stats.clone()
    }

    pub fn tag_buffer_occupancy(&self) -> f64 {
        self.inner.lock().unwrap().tag_buffer.occupancy()
    }

    pub fn num_hit_per_step(&self) -> u64 {
        self.inner.lock().unwrap().num_hit_per_step
    }

    pub fn num_miss_per_step(&self) -> u64 {
        self.inner.lock().unwrap().num_miss_per_step
    }
}

impl Inner {
    fn recent_miss_rate(&self) -> f64 {
        let denom = self.num_miss_per_step + self.num_hit_per_step;
        if denom == 0 {
            0.0
        } else {
            self.num_miss_per_step as f64 / denom as f64
        }
    }

    fn access_size(&self) -> u32 {
        match self.scheme {
            Scheme::UnisonCache | Scheme::Tagless => self.footprint_size,
            _ => (self.granularity / 64) as u32,
        }
    }

    fn near_access(&mut self, channel: usize, addr: LineAddr, priority: Priority, beats: u32, cycle: u64) -> u64 {
        self.mc_bw_per_step += beats as u64;
        self.mcdram[channel].access(addr, priority, beats, cycle)
    }

    fn far_access(&mut self, addr: LineAddr, priority: Priority, beats: u32, cycle: u64) -> u64 {
        self.ext_bw_per_step += beats as u64;
        self.ext_dram.access(addr, priority, beats, cycle)
    }

    fn count_hit(&mut self, req_type: ReqType) {
        self.num_hit_per_step += 1;
        match req_type {
            ReqType::Load => self.stats.num_load_hit += 1,
            ReqType::Store => self.stats.num_store_hit += 1,
        }
    }

    fn count_miss(&mut self, req_type: ReqType) {
        self.num_miss_per_step += 1;
        match req_type {
            ReqType::Load => self.stats.num_load_miss += 1,
            ReqType::Store => self.stats.num_store_miss += 1,
        }
    }

    fn handle(&mut self, req: Request) -> Response {
        self.num_requests += 1;
        let req_type = req.kind.req_type();
        let state = match req.kind {
            ReqKind::Putx => MesiState::Invalid,
            ReqKind::Puts => unreachable!("PUTS bypasses the lock"),
            ReqKind::Gets => {
                if req.no_excl {
                    MesiState::Shared
                } else {
                    MesiState::Exclusive
                }
            }
            ReqKind::Getx => MesiState::Modified,
        };

        let data_ready_cycle = match self.scheme {
            Scheme::NoCache => self.far_access(req.line_addr, Priority::Critical, 4, req.cycle),
            Scheme::CacheOnly => {
                let channel = near_channel(req.line_addr, self.mcdram_per_mc) as usize;
                let addr = near_addr(req.line_addr, self.mcdram_per_mc);
                self.near_access(channel, addr, Priority::Critical, 4, req.cycle)
            }
            _ => self.access_cached(&req, req_type),
        };

        self.post_step_update();
        Response {
            data_ready_cycle,
            state,
        }
    }

    fn access_cached(&mut self, req: &Request, req_type: ReqType) -> u64 {
        let addr = req.line_addr;
        let channel = near_channel(addr, self.mcdram_per_mc) as usize;
        let near_line = near_addr(addr, self.mcdram_per_mc);
        let tag = tag_of(addr, self.granularity);
        let set = set_of(tag, self.num_sets);
        let mut cycle = req.cycle;

        if (set as u64) < self.ds_index {
            // Uncached region: route straight to far memory (glossary
            // "ds_index").
            cycle = self.far_access(addr, Priority::Critical, 4, cycle);
            self.count_miss(req_type);
            return cycle;
        }

        let mut hit_way: Option<u32> = None;
        let mut probe_scheduled = false;

        match self.scheme {
            Scheme::Tagless | Scheme::Hma => {
                hit_way = self.tag_array.lookup_page(set, tag);
                if hit_way.is_none() {
                    debug_assert!(self.tag_array.sets[set].lookup(tag).is_none());
                }
            }
            Scheme::UnisonCache => {
                hit_way = self.tag_array.lookup_page(set, tag);
                let beats = if req_type == ReqType::Load { 6 } else { 2 };
                cycle = self.near_access(channel, near_line, Priority::Critical, beats, cycle);
                match req_type {
                    ReqType::Load => self.stats.num_tag_load += 1,
                    ReqType::Store => self.stats.num_tag_store += 1,
                }
            }
            Scheme::HybridCache => {
                hit_way = self.tag_array.lookup_page(set, tag);
                if req_type == ReqType::Store {
                    if self.tag_buffer.exist_in_tb(tag) == self.tag_buffer.num_ways() {
                        self.stats.num_tb_dirty_miss += 1;
                        if !self.sram_tag {
                            probe_scheduled = true;
                        }
                    } else {
                        self.stats.num_tb_dirty_hit += 1;
                    }
                }
                if self.sram_tag {
                    cycle += self.llc_latency as u64;
                }
            }
            Scheme::AlloyCache => {
                let way0 = self.tag_array.sets[set].ways[0];
                hit_way = (way0.valid && way0.tag == tag).then_some(0);
                if req_type == ReqType::Load {
                    if self.sram_tag {
                        cycle += self.llc_latency as u64;
                    } else {
                        cycle = self.near_access(channel, near_line, Priority::Critical, 6, cycle);
                    }
                    self.stats.num_tag_load += 1;
                }
            }
            Scheme::NoCache | Scheme::CacheOnly => unreachable!(),
        }

        let cycle = match hit_way {
            None => self.handle_miss(req, req_type, tag, set, channel, near_line, cycle, probe_scheduled),
            Some(way) => self.handle_hit(req, req_type, tag, set, channel, near_line, cycle, way, probe_scheduled),
        };

        self.maybe_flush_tag_buffer(cycle);
        cycle
    }

    fn select_replacement_way(&mut self, req_type: ReqType, tag: LineAddr, set: usize) -> (Option<u32>, bool) {
        match self.scheme {
            Scheme::AlloyCache => {
                let occupant = self.tag_array.sets[set].ways[0];
                let way = self
                    .line_policy
                    .as_mut()
                    .expect("AlloyCache always has a line-placement policy")
                    .handle_cache_miss(&occupant)
                    .then_some(0);
                (way, false)
            }
            Scheme::Hma => {
                self.os_policy
                    .as_mut()
                    .expect("HMA always has an OS-placement policy")
                    .notify_access();
                (None, false)
            }
            Scheme::Tagless => {
                let way = (self.next_evict_idx % self.num_ways as u64) as u32;
                self.next_evict_idx = (self.next_evict_idx + 1) % self.num_ways as u64;
                (Some(way), false)
            }
            Scheme::UnisonCache | Scheme::HybridCache => {
                let set_snapshot = self.tag_array.sets[set].clone();
                let num_requests = self.num_requests;
                let granularity = self.granularity;
                let recent_miss_rate = self.recent_miss_rate();
                let tag_buffer = &self.tag_buffer;
                let outcome = self
                    .page_policy
                    .as_mut()
                    .expect("UnisonCache/HybridCache always have a page-placement policy")
                    .handle_cache_miss(
                        tag,
                        req_type,
                        set,
                        &set_snapshot,
                        granularity,
                        num_requests,
                        recent_miss_rate,
                        tag_buffer,
                    );
                (outcome.way, outcome.counter_access)
            }
            Scheme::NoCache | Scheme::CacheOnly => unreachable!(),
        }
    }

    /// Models the original's "one counter read + one counter write" FBR
    /// counter probe (mc.cpp's trailing `counter_access && !sram_tag` block):
    /// two 2-beat near accesses, counted once, skipped entirely when the tag
    /// is pinned in SRAM.
    fn counter_access_hook(&mut self, channel: usize, near_line: LineAddr, cycle: u64, counter_access: bool) {
        if counter_access && !self.sram_tag {
            self.stats.num_counter_access += 1;
            self.near_access(channel, near_line, Priority::OffCriticalPath, 2, cycle);
            self.near_access(channel, near_line, Priority::OffCriticalPath, 2, cycle);
        }
    }

    fn handle_miss(
        &mut self,
        req: &Request,
        req_type: ReqType,
        tag: LineAddr,
        set: usize,
        channel: usize,
        near_line: LineAddr,
        mut cycle: u64,
        probe_scheduled: bool,
    ) -> u64 {
        self.count_miss(req_type);
        trace!("miss: scheme={:?} set={set} tag={tag}", self.scheme);

        let (replace_way, counter_access) = self.select_replacement_way(req_type, tag, set);
        self.counter_access_hook(channel, near_line, cycle, counter_access);

        match self.scheme {
            Scheme::AlloyCache => {
                if req_type == ReqType::Load {
                    let priority = if !self.sram_tag && (set as u64) >= self.ds_index {
                        Priority::Dependent
                    } else {
                        Priority::Critical
                    };
                    cycle = self.far_access(req.line_addr, priority, 4, cycle);
                } else if replace_way.is_none() {
                    cycle = self.far_access(req.line_addr, Priority::Critical, 4, cycle);
                } else {
                    cycle = self.far_access(req.line_addr, Priority::Critical, 4, cycle);
                }
            }
            Scheme::Hma => {
                cycle = self.far_access(req.line_addr, Priority::Critical, 4, cycle);
            }
            Scheme::UnisonCache => {
                if req_type == ReqType::Load || replace_way.is_none() {
                    cycle = self.far_access(req.line_addr, Priority::Dependent, 4, cycle);
                }
            }
            Scheme::HybridCache => {
                if probe_scheduled {
                    cycle = self.near_access(channel, near_line, Priority::Critical, 2, cycle);
                    self.stats.num_tag_load += 1;
                    cycle = self.far_access(req.line_addr, Priority::Dependent, 4, cycle);
                } else {
                    cycle = self.far_access(req.line_addr, Priority::Critical, 4, cycle);
                }
            }
            Scheme::Tagless => {
                cycle = self.far_access(req.line_addr, Priority::Critical, 4, cycle);
            }
            Scheme::NoCache | Scheme::CacheOnly => unreachable!(),
        }

        let data_ready_cycle = cycle;

        if let Some(way) = replace_way {
            self.install_replacement(req, tag, set, channel, near_line, way, data_ready_cycle);
        } else if self.scheme == Scheme::HybridCache && req_type == ReqType::Load {
            if self.tag_buffer.can_insert(tag) {
                self.tag_buffer.insert(tag, false);
            } else {
                warn!("tag buffer refused speculative insert for tag {tag}");
            }
        }

        data_ready_cycle
    }

    /// Near install, victim eviction/writeback, and way/TLB install — the
    /// "if replacement is chosen" branch of §4.6. `start_cycle` is the
    /// data-ready cycle already returned to the caller; everything here runs
    /// off the critical path (priority 2) and its own cycle isn't chained
    /// back into the caller's result.
    fn install_replacement(
        &mut self,
        req: &Request,
        tag: LineAddr,
        set: usize,
        channel: usize,
        near_line: LineAddr,
        way: u32,
        start_cycle: u64,
    ) {
        let mut cycle = start_cycle;
        let access_size = self.access_size();

        match self.scheme {
            Scheme::AlloyCache => {
                let beats = if self.sram_tag { 4 } else { 6 };
                cycle = self.near_access(channel, near_line, Priority::OffCriticalPath, beats, cycle);
            }
            _ => {
                cycle = self.far_access(req.line_addr, Priority::OffCriticalPath, access_size * 4, cycle);
                cycle = self.near_access(channel, near_line, Priority::OffCriticalPath, access_size * 4, cycle);
                if !self.sram_tag {
                    cycle = self.near_access(channel, near_line, Priority::OffCriticalPath, 2, cycle);
                }
                if self.scheme == Scheme::Tagless {
                    cycle = self.far_access(req.line_addr, Priority::OffCriticalPath, 2, cycle);
                    cycle = self.far_access(req.line_addr, Priority::OffCriticalPath, 2, cycle);
                }
            }
        }

        self.stats.num_tag_store += 1;
        self.stats.num_placement += 1;

        let victim = self.tag_array.sets[set].ways[way as usize];
        if victim.valid {
            let victim_tag = victim.tag;
            let victim_dirty_bitvec = self
                .tag_array
                .tlb
                .get(&victim_tag)
                .map(|e| e.dirty_bitvec)
                .unwrap_or(0);
            if matches!(self.scheme, Scheme::UnisonCache | Scheme::Tagless) {
                let touch = self.tag_array.tlb.get(&victim_tag).map(|e| e.touch_bitvec).unwrap_or(0);
                self.stats.num_touched_lines += touch.count_ones() as u64;
                self.stats.num_evicted_lines += 1;
            }
            if let Some(e) = self.tag_array.tlb.get_mut(&victim_tag) {
                e.way = NONE_WAY;
            }

            if self.scheme == Scheme::HybridCache {
                assert!(
                    self.tag_buffer.can_insert_pair(tag, victim_tag),
                    "HybridCache replacement without prior tag-buffer admission check"
                );
                self.tag_buffer.insert(tag, true);
                self.tag_buffer.insert(victim_tag, true);
            }

            if victim.dirty {
                self.stats.num_dirty_eviction += 1;
                match self.scheme {
                    Scheme::AlloyCache => {
                        if req.kind.req_type() == ReqType::Store && self.sram_tag {
                            cycle = self.near_access(channel, near_line, Priority::OffCriticalPath, 4, cycle);
                        }
                        cycle = self.far_access(req.line_addr, Priority::OffCriticalPath, 4, cycle);
                    }
                    Scheme::HybridCache => {
                        let beats = (self.granularity / 64) as u32 * 4;
                        cycle = self.near_access(channel, near_line, Priority::OffCriticalPath, beats, cycle);
                        let _ = self.far_access(req.line_addr, Priority::OffCriticalPath, beats, cycle);
                    }
                    Scheme::UnisonCache | Scheme::Tagless => {
                        let beats = victim_dirty_bitvec.count_ones() * 4 * 4;
                        cycle = self.near_access(channel, near_line, Priority::OffCriticalPath, beats, cycle);
                        cycle = self.far_access(req.line_addr, Priority::OffCriticalPath, beats, cycle);
                        if self.scheme == Scheme::Tagless {
                            cycle = self.far_access(req.line_addr, Priority::OffCriticalPath, 2, cycle);
                            let _ = self.far_access(req.line_addr, Priority::OffCriticalPath, 2, cycle);
                        }
                    }
                    _ => {}
                }
            } else {
                self.stats.num_clean_eviction += 1;
            }
        }

        let dirty = matches!(req.kind, ReqKind::Putx);
        self.tag_array.install(set, way, tag, dirty);
        let mut entry = TlbEntry::cached(way);
        if self.scheme.is_page_granularity() {
            let bit = footprint_bit(req.line_addr, tag);
            entry.touch_bitvec = 1 << bit;
            if req.kind.req_type() == ReqType::Store {
                entry.dirty_bitvec = 1 << bit;
            }
        }
        self.tag_array.tlb.insert(tag, entry);
    }

    fn handle_hit(
        &mut self,
        req: &Request,
        req_type: ReqType,
        tag: LineAddr,
        set: usize,
        channel: usize,
        near_line: LineAddr,
        mut cycle: u64,
        hit_way: u32,
        probe_scheduled: bool,
    ) -> u64 {
        self.count_hit(req_type);
        debug!("hit: scheme={:?} set={set} way={hit_way}", self.scheme);

        match self.scheme {
            Scheme::AlloyCache => {
                if (req_type == ReqType::Load && self.sram_tag) || req_type == ReqType::Store {
                    cycle = self.near_access(channel, near_line, Priority::Critical, 4, cycle);
                }
            }
            Scheme::UnisonCache => {
                if req_type == ReqType::Store {
                    cycle = self.near_access(channel, near_line, Priority::Dependent, 4, cycle);
                }
                let counter_access = self.page_hit_hook(tag, set, hit_way);
                self.counter_access_hook(channel, near_line, cycle, counter_access);
                self.near_access(channel, near_line, Priority::OffCriticalPath, 2, cycle);
                self.stats.num_tag_store += 1;
                let bit = footprint_bit(req.line_addr, tag);
                if let Some(e) = self.tag_array.tlb.get_mut(&tag) {
                    e.touch_bitvec |= 1 << bit;
                    if req_type == ReqType::Store {
                        e.dirty_bitvec |= 1 << bit;
                    }
                }
            }
            Scheme::HybridCache => {
                if probe_scheduled {
                    cycle = self.near_access(channel, near_line, Priority::Critical, 2, cycle);
                    self.stats.num_tag_load += 1;
                    cycle = self.near_access(channel, near_line, Priority::Dependent, 4, cycle);
                } else {
                    cycle = self.near_access(channel, near_line, Priority::Critical, 4, cycle);
                    if req_type == ReqType::Load && self.tag_buffer.can_insert(tag) {
                        self.tag_buffer.insert(tag, false);
                    }
                }
                let counter_access = self.page_hit_hook(tag, set, hit_way);
                self.counter_access_hook(channel, near_line, cycle, counter_access);
            }
            Scheme::Tagless => {
                cycle = self.near_access(channel, near_line, Priority::Critical, 4, cycle);
                let bit = footprint_bit(req.line_addr, tag);
                if let Some(e) = self.tag_array.tlb.get_mut(&tag) {
                    e.touch_bitvec |= 1 << bit;
                    if req_type == ReqType::Store {
                        e.dirty_bitvec |= 1 << bit;
                    }
                }
            }
            Scheme::Hma => {}
            Scheme::NoCache | Scheme::CacheOnly => unreachable!(),
        }

        if matches!(req.kind, ReqKind::Putx) {
            self.tag_array.sets[set].ways[hit_way as usize].dirty = true;
        }

        cycle
    }

    fn page_hit_hook(&mut self, tag: LineAddr, set: usize, hit_way: u32) -> bool {
        let num_requests = self.num_requests;
        let recent_miss_rate = self.recent_miss_rate();
        self.page_policy
            .as_mut()
            .expect("UnisonCache/HybridCache always have a page-placement policy")
            .handle_cache_hit(tag, set, hit_way, num_requests, recent_miss_rate)
    }

    fn maybe_flush_tag_buffer(&mut self, cycle: u64) {
        if self.scheme != Scheme::HybridCache {
            return;
        }
        if self.tag_buffer.occupancy() > 0.7 {
            self.tag_buffer.clear();
            self.tag_buffer.set_clear_time(cycle);
            self.stats.num_tag_buffer_flush += 1;
            info!("tag buffer flushed at cycle {cycle}");
        }
    }

    fn post_step_update(&mut self) {
        if self.num_requests % self.step_length != 0 {
            return;
        }
        self.num_hit_per_step /= 2;
        self.num_miss_per_step /= 2;
        self.mc_bw_per_step /= 2;
        self.ext_bw_per_step /= 2;

        if !self.bw_balance {
            return;
        }
        let denom = self.mc_bw_per_step + self.ext_bw_per_step;
        let delta: i64 = if denom == 0 {
            0
        } else {
            let ratio = self.mc_bw_per_step as f64 / denom as f64;
            if (ratio - 0.8).abs() < 0.02 {
                0
            } else {
                ((self.num_sets as f64 / 1000.0) * (ratio - 0.8) / 0.01) as i64
            }
        };
        self.bandwidth_balance(delta);
    }

    /// Bandwidth balancer (C8, §4.8).
    fn bandwidth_balance(&mut self, delta: i64) {
        if delta > 0 {
            let end = (self.ds_index + delta as u64).min(self.num_sets);
            for set in self.ds_index..end {
                let set_idx = set as usize;
                for way in 0..self.num_ways {
                    let w = self.tag_array.sets[set_idx].ways[way as usize];
                    if !w.valid {
                        continue;
                    }
                    if w.dirty {
                        let synthetic_addr = w.tag * (self.granularity / 64);
                        let channel = near_channel(synthetic_addr, self.mcdram_per_mc) as usize;
                        let near_line = near_addr(synthetic_addr, self.mcdram_per_mc);
                        let beats = (self.granularity / 64) as u32 * 4;
                        self.near_access(channel, near_line, Priority::OffCriticalPath, beats, 0);
                        self.far_access(synthetic_addr, Priority::OffCriticalPath, beats, 0);
                    }
                    if self.scheme == Scheme::HybridCache {
                        let victim_tag = w.tag;
                        if let Some(e) = self.tag_array.tlb.get_mut(&victim_tag) {
                            e.way = NONE_WAY;
                        }
                        if !self.tag_buffer.can_insert(victim_tag) {
                            self.tag_buffer.clear();
                            self.stats.num_tag_buffer_flush += 1;
                        }
                        self.tag_buffer.insert(victim_tag, true);
                    }
                    self.tag_array.invalidate(set_idx, way);
                }
                if let Some(p) = self.page_policy.as_mut() {
                    p.flush_chunk(set_idx);
                }
            }
        }
        self.ds_index = ((self.ds_index as i64 + delta).max(0) as u64).min(self.num_sets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a controller directly from an `Inner`, bypassing `Config`'s
    /// MB-granularity sizing so tests can use the exact small geometries the
    /// concrete scenarios name (`num_sets=4, num_ways=4, G=4096`, ...).
    fn make_controller(
        scheme: Scheme,
        granularity: u64,
        num_ways: u32,
        num_sets: u64,
        far_latency: u64,
        near_latency: u64,
    ) -> Controller {
        let line_policy = (scheme == Scheme::AlloyCache).then(|| LinePlacementPolicy::new(1, 1.0, true));
        let page_policy = matches!(scheme, Scheme::UnisonCache | Scheme::HybridCache).then(|| {
            PagePlacementPolicy::new(
                1,
                scheme,
                PlacementKind::Lru,
                1.0,
                true,
                granularity,
                num_sets as usize,
                num_ways as usize,
            )
        });
        let os_policy = (scheme == Scheme::Hma).then(|| OsPlacementPolicy::new(1_000_000));

        Controller {
            inner: Mutex::new(Inner {
                scheme,
                granularity,
                num_ways,
                num_sets,
                mcdram_per_mc: 4,
                sram_tag: false,
                llc_latency: 0,
                footprint_size: 16,
                bw_balance: false,
                step_length: 1_000_000,
                tag_array: TagArray::new(num_sets as usize, num_ways as usize),
                tag_buffer: TagBuffer::new(1024),
                line_policy,
                page_policy,
                os_policy,
                next_evict_idx: 0,
                ds_index: 0,
                num_requests: 0,
                num_hit_per_step: 0,
                num_miss_per_step: 0,
                mc_bw_per_step: 0,
                ext_bw_per_step: 0,
                stats: Counters::default(),
                ext_dram: Box::new(SimpleMemory::new(far_latency)),
                mcdram: (0..4)
                    .map(|_| Box::new(SimpleMemory::new(near_latency)) as Box<dyn TimingBackend>)
                    .collect(),
            }),
        }
    }

    /// S1: NoCache, one GETS at `lineAddr=0x1000, cycle=0` returns 100 and
    /// grants Exclusive (NOEXCL absent).
    #[test]
    fn s1_nocache_gets_returns_far_latency_and_grants_exclusive() {
        let c = make_controller(Scheme::NoCache, 64, 1, 4, 100, 50);
        let resp = c.access(Request {
            line_addr: 0x1000,
            kind: ReqKind::Gets,
            cycle: 0,
            no_excl: false,
        });
        assert_eq!(resp.data_ready_cycle, 100);
        assert_eq!(resp.state, MesiState::Exclusive);
    }

    /// S2: AlloyCache cold LOAD at `lineAddr=0x40` with `sample_rate=1`
    /// installs into the only way; the unconditional 6-beat tag+data probe
    /// (near) is chained before the far fetch, so the returned cycle is
    /// far-latency + near-latency.
    #[test]
    fn s2_alloycache_cold_load_install_costs_far_plus_near() {
        let c = make_controller(Scheme::AlloyCache, 64, 1, 4, 100, 50);
        let resp = c.access(Request {
            line_addr: 0x40,
            kind: ReqKind::Gets,
            cycle: 0,
            no_excl: false,
        });
        assert_eq!(resp.data_ready_cycle, 150);
        let stats = c.stats();
        assert_eq!(stats.num_load_miss, 1);
        assert_eq!(stats.num_load_hit, 0);
    }

    /// S3: HybridCache LOAD hit after install pins the tag in the tag
    /// buffer with `remap=false` (occupancy only counts `remap=true`
    /// entries, so it stays at 0 and the opportunistic flush never fires).
    #[test]
    fn s3_hybridcache_second_load_hits_and_pins_tag_buffer_unremapped() {
        let c = make_controller(Scheme::HybridCache, 4096, 4, 4, 100, 50);
        let addr = 4096 * 5;
        c.access(Request {
            line_addr: addr,
            kind: ReqKind::Gets,
            cycle: 0,
            no_excl: false,
        });
        c.access(Request {
            line_addr: addr,
            kind: ReqKind::Gets,
            cycle: 0,
            no_excl: false,
        });
        let stats = c.stats();
        assert_eq!(stats.num_load_miss, 1);
        assert_eq!(stats.num_load_hit, 1);
        assert_eq!(c.tag_buffer_occupancy(), 0.0);
    }

    /// S4: UnisonCache, a page with two stored (PUTX) lines carries a
    /// two-bit `dirty_bitvec`; evicting it on a fresh LOAD to a different
    /// page pays `popcount · 4 · 4 = 32` writeback beats in addition to the
    /// miss's own tag-probe/fetch/install beats. With `footprint_size=16`
    /// (`access_size = 16`) the evicting access's total near bandwidth is
    /// `6 (tag probe) + 64 (page write) + 2 (tag store) + 32 (writeback) =
    /// 104`, and far bandwidth is `4 (fetch) + 64 (page read) + 32
    /// (writeback) = 100`.
    #[test]
    fn s4_unisoncache_dirty_eviction_writeback_beats_match_popcount() {
        let c = make_controller(Scheme::UnisonCache, 4096, 1, 1, 100, 50);
        c.access(Request {
            line_addr: 0,
            kind: ReqKind::Putx,
            cycle: 0,
            no_excl: false,
        });
        c.access(Request {
            line_addr: 4,
            kind: ReqKind::Putx,
            cycle: 0,
            no_excl: false,
        });
        let (mc_before, ext_before) = {
            let inner = c.inner.lock().unwrap();
            (inner.mc_bw_per_step, inner.ext_bw_per_step)
        };
        c.access(Request {
            line_addr: 4096,
            kind: ReqKind::Gets,
            cycle: 0,
            no_excl: false,
        });
        let (mc_after, ext_after) = {
            let inner = c.inner.lock().unwrap();
            (inner.mc_bw_per_step, inner.ext_bw_per_step)
        };
        assert_eq!(c.stats().num_dirty_eviction, 1);
        assert_eq!(mc_after - mc_before, 104);
        assert_eq!(ext_after - ext_before, 100);
    }

    /// S5: the bandwidth balancer raises `ds_index` (bounded by `num_sets`)
    /// when `mc_bw` dominates `ext_bw` well past the 0.8 target ratio.
    #[test]
    fn s5_bandwidth_balancer_raises_ds_index_when_mc_bw_dominates() {
        let c = make_controller(Scheme::HybridCache, 4096, 4, 100, 100, 50);
        {
            let mut inner = c.inner.lock().unwrap();
            inner.bw_balance = true;
            inner.step_length = 1;
            inner.num_requests = 1;
            inner.mc_bw_per_step = 90;
            inner.ext_bw_per_step = 10;
            inner.post_step_update();
        }
        let ds_index = c.ds_index();
        assert!(ds_index > 0);
        assert!(ds_index <= 100);
    }

    /// Invariant 6: `ds_index` never exceeds `num_sets`, even when `delta`
    /// would overshoot it.
    #[test]
    fn bandwidth_balance_clamps_ds_index_to_num_sets() {
        let c = make_controller(Scheme::AlloyCache, 64, 1, 4, 100, 50);
        {
            let mut inner = c.inner.lock().unwrap();
            inner.bandwidth_balance(1000);
        }
        assert_eq!(c.ds_index(), 4);
    }

    /// Sets below `ds_index` bypass the cache entirely and count as misses
    /// without touching near memory.
    #[test]
    fn uncached_region_below_ds_index_routes_straight_to_far_memory() {
        let c = make_controller(Scheme::AlloyCache, 64, 1, 4, 100, 50);
        {
            let mut inner = c.inner.lock().unwrap();
            inner.ds_index = 4;
        }
        let resp = c.access(Request {
            line_addr: 0x40,
            kind: ReqKind::Gets,
            cycle: 0,
            no_excl: false,
        });
        assert_eq!(resp.data_ready_cycle, 100);
        assert_eq!(c.stats().num_load_miss, 1);
    }

    /// PUTS bypasses the controller lock and returns the request cycle
    /// unchanged with state Invalid (§4.6 "Coherence side-effect").
    #[test]
    fn puts_bypasses_lock_and_returns_request_cycle() {
        let c = make_controller(Scheme::NoCache, 64, 1, 4, 100, 50);
        let resp = c.access(Request {
            line_addr: 0x40,
            kind: ReqKind::Puts,
            cycle: 42,
            no_excl: false,
        });
        assert_eq!(resp.data_ready_cycle, 42);
        assert_eq!(resp.state, MesiState::Invalid);
    }
}
