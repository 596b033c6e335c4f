#[macro_use]
extern crate log;

pub mod address;
pub mod backend;
pub mod cli;
pub mod config;
pub mod controller;
pub mod line_placement;
pub mod os_placement;
pub mod page_placement;
pub mod scheme;
pub mod stats;
pub mod tag_array;
pub mod tag_buffer;
pub mod trace;

pub use crate::cli::Args;
pub use crate::config::Config;
pub use crate::controller::{Controller, Request, Response};
pub use crate::scheme::{MesiState, Priority, ReqKind, ReqType, Scheme};
pub use crate::stats::Counters;
pub use crate::trace::{TraceEntry, TraceReader};
