//! Configuration (§6 "External interfaces"). A typed `Config` deserialized
//! from TOML replaces the original `Config::get<T>(key, default)` stringly
//! typed map — every key enumerated in spec.md §6 is a field here, and an
//! unrecognized key is a deserialization error rather than a silently
//! ignored typo.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::scheme::Scheme;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
#[clap(rename_all = "UPPERCASE")]
pub enum PlacementPolicyKind {
    Lru,
    Fbr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum ExtDramType {
    Simple,
    Ddr,
    Md1,
    Dramsim,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// `sys.caches.l3.latency` — added when SRAM-tag is modeled.
    pub l3_latency: u32,
    /// `sys.mem.cache_scheme`
    pub cache_scheme: Scheme,
    /// `sys.mem.sram_tag`
    pub sram_tag: bool,
    /// `sys.mem.ext_dram.type`
    pub ext_dram_type: ExtDramType,
    /// `sys.mem.mcdram.cache_granularity` — 64, 4096, or 4096*512.
    pub cache_granularity: u64,
    /// `sys.mem.mcdram.num_ways`
    pub num_ways: u32,
    /// `sys.mem.mcdram.size` in MB.
    pub mcdram_size_mb: u32,
    /// `sys.mem.mcdram.mcdramPerMC`
    pub mcdram_per_mc: u32,
    /// `sys.mem.mcdram.placementPolicy`
    pub placement_policy: PlacementPolicyKind,
    /// `sys.mem.mcdram.sampleRate`, shared by C3 and C4.
    pub sample_rate: f64,
    /// `sys.mem.mcdram.enableReplace`
    pub enable_replace: bool,
    /// `sys.mem.mcdram.footprint_size` — lines per installed page.
    pub footprint_size: u32,
    /// `sys.mem.mcdram.tag_buffer_size`
    pub tag_buffer_size: u32,
    /// `sys.mem.bwBalance`
    pub bw_balance: bool,
    /// `sys.mem.enableTrace` — tracing to disk is an external concern; this
    /// only gates whether the driver binary writes one.
    pub enable_trace: bool,
    /// Far-memory fixed latency, cycles (used by `SimpleMemory`).
    pub far_latency: u64,
    /// Near-memory fixed latency, cycles (used by `SimpleMemory`).
    pub near_latency: u64,
    /// Seed shared by C3/C4's private PRNGs (§9 "random streams": each
    /// policy still gets its own `StdRng`, just derived from this one seed).
    pub seed: u64,
    /// HMA's `os_quantum` — requests between `remap_pages()` invocations.
    pub os_quantum: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            l3_latency: 0,
            cache_scheme: Scheme::AlloyCache,
            sram_tag: false,
            ext_dram_type: ExtDramType::Simple,
            cache_granularity: 64,
            num_ways: 1,
            mcdram_size_mb: 512,
            mcdram_per_mc: 4,
            placement_policy: PlacementPolicyKind::Lru,
            sample_rate: 1.0,
            enable_replace: true,
            footprint_size: 16,
            tag_buffer_size: 1024,
            bw_balance: false,
            enable_trace: false,
            far_latency: 100,
            near_latency: 50,
            seed: 1,
            os_quantum: 1_000_000,
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("parsing configuration TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Geometry constraints asserted at init (§6). Config errors fail fast
    /// with the offending key named, per §7 — these are `anyhow::bail!`,
    /// not assertions, because they describe a bad config, not a bug.
    pub fn validate(&self) -> Result<()> {
        use anyhow::bail;
        match self.cache_scheme {
            Scheme::AlloyCache => {
                if self.cache_granularity != 64 {
                    bail!("sys.mem.mcdram.cache_granularity must be 64 for AlloyCache");
                }
                if self.num_ways != 1 {
                    bail!("sys.mem.mcdram.num_ways must be 1 for AlloyCache");
                }
            }
            Scheme::UnisonCache => {
                if self.cache_granularity != 4096 {
                    bail!("sys.mem.mcdram.cache_granularity must be 4096 for UnisonCache");
                }
            }
            Scheme::HybridCache => {
                if self.cache_granularity != 4096 && self.cache_granularity != 4096 * 512 {
                    bail!(
                        "sys.mem.mcdram.cache_granularity must be 4096 or 4096*512 for HybridCache"
                    );
                }
            }
            Scheme::Tagless => {
                // num_sets is derived at controller construction; nothing to
                // check about num_ways here since num_sets=1 is enforced
                // there, not via cache_granularity.
            }
            Scheme::Hma | Scheme::NoCache | Scheme::CacheOnly => {}
        }
        if self.bw_balance && !self.cache_scheme.supports_bw_balance() {
            bail!("sys.mem.bwBalance is only valid for AlloyCache or HybridCache");
        }
        // Open question (c): bitvec footprint tracking is only defined for
        // G=4096; large-page HybridCache must not rely on it.
        if self.cache_granularity > 4096
            && matches!(self.cache_scheme, Scheme::UnisonCache | Scheme::Tagless)
        {
            bail!("footprint bitvec tracking is undefined above G=4096");
        }
        if !(0.0..=1.0).contains(&self.sample_rate) {
            bail!("sys.mem.mcdram.sampleRate must be in [0,1]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn alloy_cache_rejects_wrong_granularity() {
        let mut c = Config::default();
        c.cache_granularity = 4096;
        assert!(c.validate().is_err());
    }

    #[test]
    fn bw_balance_rejected_for_unsupported_scheme() {
        let mut c = Config::default();
        c.cache_scheme = Scheme::NoCache;
        c.bw_balance = true;
        assert!(c.validate().is_err());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let toml = "cache_scheme = \"AlloyCache\"\nbogus_key = 1\n";
        assert!(Config::from_toml_str(toml).is_err());
    }
}
