//! Enumerations shared across the cache controller: the cache scheme itself,
//! the request kind, and the coherence state the caller observes.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// One of the seven DRAM-cache organizations the controller pipeline dispatches on.
///
/// Kept as a single sum type rather than per-method `match`es scattered across
/// the controller: every scheme-dependent decision in `controller` matches on
/// this enum once per call site, so adding a scheme is a compile error at every
/// site that needs updating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "PascalCase")]
#[clap(rename_all = "PascalCase")]
pub enum Scheme {
    AlloyCache,
    UnisonCache,
    Hma,
    HybridCache,
    NoCache,
    CacheOnly,
    Tagless,
}

impl Scheme {
    /// Bandwidth balancing (C8) is only defined for AlloyCache and HybridCache.
    pub fn supports_bw_balance(self) -> bool {
        matches!(self, Scheme::AlloyCache | Scheme::HybridCache)
    }

    pub fn is_page_granularity(self) -> bool {
        matches!(
            self,
            Scheme::UnisonCache | Scheme::Hma | Scheme::HybridCache | Scheme::Tagless
        )
    }
}

/// Request type as seen by the cache controller. LOAD/STORE map onto GETS/GETX
/// at the coherence layer; PUTS/PUTX are handled before scheme dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReqKind {
    /// Shared-state read request (GETS).
    Gets,
    /// Exclusive-state read/write request (GETX).
    Getx,
    /// Clean writeback from the LLC.
    Puts,
    /// Dirty writeback from the LLC.
    Putx,
}

impl ReqKind {
    pub fn req_type(self) -> ReqType {
        match self {
            ReqKind::Gets | ReqKind::Puts => ReqType::Load,
            ReqKind::Getx | ReqKind::Putx => ReqType::Store,
        }
    }

    pub fn is_put(self) -> bool {
        matches!(self, ReqKind::Puts | ReqKind::Putx)
    }
}

/// Coarser LOAD/STORE distinction used by the placement policies (C3/C4),
/// which don't care about the coherence sub-state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReqType {
    Load,
    Store,
}

/// MESI-ish state communicated back to the caller. The core only ever
/// produces I/S/E/M; it never observes a remote M (no other core model).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MesiState {
    Invalid,
    Shared,
    Exclusive,
    Modified,
}

/// Priority passed to the timing back-end (C1). Ordered critical-path first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Priority {
    /// On the critical path for the caller's returned cycle.
    Critical = 0,
    /// Dependent on a critical-path access but itself the "second half".
    Dependent = 1,
    /// Off the critical path entirely (writebacks, installs, GIPT updates).
    OffCriticalPath = 2,
}
