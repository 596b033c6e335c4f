#[macro_use]
extern crate log;

use anyhow::Result;
use clap::Parser;

use mcdram_cache_sim::*;

pub fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.validate()?;
    let controller = Controller::new(&config)?;

    let mut cycle = 0u64;
    let mut replayed = 0u64;
    for entry in TraceReader::open(&args.trace)? {
        let entry = entry?;
        let kind = match entry.req_type {
            ReqType::Load => ReqKind::Gets,
            ReqType::Store => ReqKind::Getx,
        };
        let response = controller.access(Request {
            line_addr: entry.line_addr,
            kind,
            cycle,
            no_excl: false,
        });
        cycle = response.data_ready_cycle;
        replayed += 1;
    }

    let stats = controller.stats();
    info!("replayed {replayed} requests, final cycle {cycle}");
    for (name, value) in stats.snapshot() {
        info!("{name} = {value}");
    }
    Ok(())
}
