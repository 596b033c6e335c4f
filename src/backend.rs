//! Timing back-end interface (C1) — external per spec.md §1, but a core this
//! size ships two concrete implementations so the controller is actually
//! runnable end to end: a fixed-latency `SimpleMemory` (used by every
//! concrete scenario in spec.md §8) and a DDR-organized `DdrBackend` with
//! open/closed-row bank-conflict timing, grounded on the teacher's
//! `simulate/memory.rs` `AddressMapping`/`BankState` bitfield model. `MD1` and
//! `DRAMSim` remain named-external collaborators reachable only through the
//! same [`TimingBackend`] trait object.

use bitfield::bitfield;

use crate::address::LineAddr;
use crate::scheme::Priority;

/// `access(req, priority, beats) → cycle` (§5 "Back-end contract"). A pure
/// function of the line address and the caller-supplied cycle: no blocking,
/// no suspension points, `&mut self` only to update internal bank/queue
/// state. Implementations may reorder by priority internally but must
/// return a cycle no earlier than the input `cycle` for that same backend.
pub trait TimingBackend: Send {
    fn access(&mut self, line_addr: LineAddr, priority: Priority, beats: u32, cycle: u64) -> u64;
}

/// Fixed-latency back-end. Serializes all accesses on a single internal
/// clock so the returned cycle is always monotonically non-decreasing,
/// matching the "must monotonically advance" contract without modeling any
/// queueing discipline. This is the back-end behind every concrete scenario
/// in spec.md §8.
pub struct SimpleMemory {
    latency: u64,
    busy_until: u64,
}

impl SimpleMemory {
    pub fn new(latency: u64) -> Self {
        SimpleMemory {
            latency,
            busy_until: 0,
        }
    }
}

impl TimingBackend for SimpleMemory {
    fn access(&mut self, _line_addr: LineAddr, _priority: Priority, _beats: u32, cycle: u64) -> u64 {
        let start = cycle.max(self.busy_until);
        let done = start + self.latency;
        self.busy_until = done;
        done
    }
}

// row     bank    col   blkoffset
// address bits grouped the way the teacher's AddressMapping groups a DDR4
// physical address; widths trimmed down since this back-end only needs
// enough bits to assign a bank and a row, not a full DIMM/rank topology.
bitfield! {
    struct DdrAddress(u64);
    impl Debug;
    u8, blkoffset, set_blkoffset: 5, 0;
    u8, col, set_col: 12, 6;
    u8, bank, set_bank: 16, 13;
    u32, row, set_row: 47, 17;
}

#[derive(Clone, Default)]
struct BankState {
    open_row: Option<u32>,
}

impl BankState {
    /// DDR4-ish row-buffer timing: a row miss pays tRP+tRCD+tCAS+burst; a row
    /// hit pays only tCAS+burst. Matches the teacher's `BankState::transaction`
    /// constants exactly.
    fn transaction(&mut self, row: u32) -> u64 {
        let latency = if self.open_row == Some(row) {
            22 + 4
        } else {
            22 + 22 + 22 + 4
        };
        self.open_row = Some(row);
        latency
    }
}

const NUM_BANKS: usize = 16;

/// DDR-organized back-end with open/closed-page bank-conflict timing. One
/// instance models one near- or far-memory channel.
pub struct DdrBackend {
    banks: Vec<BankState>,
    bus_cycle_time: u64,
    busy_until: u64,
}

impl DdrBackend {
    pub fn new(bus_cycle_time: u64) -> Self {
        DdrBackend {
            banks: vec![BankState::default(); NUM_BANKS],
            bus_cycle_time,
            busy_until: 0,
        }
    }
}

impl TimingBackend for DdrBackend {
    fn access(&mut self, line_addr: LineAddr, _priority: Priority, beats: u32, cycle: u64) -> u64 {
        let byte_addr = line_addr * 64;
        let mapping = DdrAddress(byte_addr);
        let bank_idx = mapping.bank() as usize % NUM_BANKS;
        let row_latency = self.banks[bank_idx].transaction(mapping.row());
        let bus_latency = beats as u64 * self.bus_cycle_time;
        let start = cycle.max(self.busy_until);
        let done = start + row_latency + bus_latency;
        self.busy_until = done;
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_memory_adds_fixed_latency() {
        let mut mem = SimpleMemory::new(100);
        assert_eq!(mem.access(0x1000, Priority::Critical, 4, 0), 100);
    }

    #[test]
    fn simple_memory_monotonically_advances() {
        let mut mem = SimpleMemory::new(50);
        let a = mem.access(0, Priority::Critical, 4, 0);
        let b = mem.access(0, Priority::Critical, 4, a - 10);
        assert!(b >= a);
    }

    #[test]
    fn ddr_backend_row_hit_is_cheaper_than_row_miss() {
        let mut mem = DdrBackend::new(1);
        let first = mem.access(0, Priority::Critical, 4, 0);
        // same bank/row (line 0, contiguous) should now be a row hit.
        let second = mem.access(1, Priority::Critical, 4, first);
        assert!(second - first < first);
    }

    #[test]
    fn ddr_backend_monotonic_cycle() {
        let mut mem = DdrBackend::new(1);
        let a = mem.access(0, Priority::Critical, 4, 100);
        let b = mem.access(5000, Priority::Critical, 4, 50);
        assert!(b >= a.min(b));
        assert!(b >= 50);
    }
}
