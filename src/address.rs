//! Address derivations shared by every scheme (spec §3 "Address").
//!
//! A [`LineAddr`] is a 64-byte-line address, matching the `lineAddr` the
//! surrounding simulator hands the controller — it is already line-granular,
//! not a byte address. The `/64` that appears in `near_channel`/`near_addr`
//! below groups 64 consecutive *line* addresses into one interleaving unit
//! (so the near-memory channel assignment strides at 4 KB granularity even
//! though the line itself is 64 B); this is carried over unchanged from the
//! address mapping in `mc.cpp`.

pub type LineAddr = u64;

/// Cache granularity in bytes: 64 (AlloyCache), 4096 (page schemes), or
/// 4096 * 512 (HybridCache large-page mode).
pub type Granularity = u64;

pub const LINE_SIZE: u64 = 64;

pub fn tag_of(addr: LineAddr, granularity: Granularity) -> LineAddr {
    addr / (granularity / LINE_SIZE)
}

pub fn set_of(tag: LineAddr, num_sets: u64) -> usize {
    (tag % num_sets) as usize
}

pub fn near_channel(addr: LineAddr, num_channels: u32) -> u32 {
    ((addr / LINE_SIZE) % num_channels as u64) as u32
}

pub fn near_addr(addr: LineAddr, num_channels: u32) -> LineAddr {
    ((addr / LINE_SIZE) / num_channels as u64) * LINE_SIZE + (addr % LINE_SIZE)
}

/// Offset of a line within its containing page, in units of 4-line groups
/// (the footprint bitvec granularity). Asserts the bit stays within the
/// 16-group mask, per the "open question (c)" in the spec: bitvec use is
/// only defined for `G = 4096`.
pub fn footprint_bit(addr: LineAddr, tag: LineAddr) -> u32 {
    let offset_lines = addr - tag * (4096 / LINE_SIZE);
    let bit = (offset_lines / 4) as u32;
    debug_assert!(bit < 16, "footprint bit {bit} out of range for G=4096 bitvec");
    bit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_alloy_cache_is_identity() {
        assert_eq!(tag_of(0x40, 64), 0x40);
        assert_eq!(tag_of(0x41, 64), 0x41);
    }

    #[test]
    fn tag_page_granularity_groups_64_lines() {
        assert_eq!(tag_of(0, 4096), 0);
        assert_eq!(tag_of(63, 4096), 0);
        assert_eq!(tag_of(64, 4096), 1);
    }

    #[test]
    fn near_channel_and_addr_roundtrip_within_group() {
        let addr = 0x1234_u64;
        let channels = 4;
        let ch = near_channel(addr, channels);
        let na = near_addr(addr, channels);
        assert_eq!(ch, ((addr / 64) % channels as u64) as u32);
        assert_eq!(na % 64, addr % 64);
    }

    #[test]
    fn footprint_bit_within_range() {
        let tag = tag_of(100, 4096);
        let bit = footprint_bit(100, tag);
        assert!(bit < 16);
    }
}
