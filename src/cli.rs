//! Driver CLI, grounded on the teacher's `cli.rs` (`clap::Parser` derive,
//! a flat top-level `Args` struct).

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a TOML configuration file (see spec.md §6 for the key table).
    /// Falls back to `Config::default()` when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Binary trace file to replay (§6 "Trace on-disk format").
    #[arg(required = true)]
    pub trace: PathBuf,
}
