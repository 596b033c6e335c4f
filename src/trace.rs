//! Trace replay (§6 "Trace on-disk format", supplemented). The writer side
//! is external to the core (`sys.mem.enableTrace` just gates whether the
//! surrounding simulator records one); this reader lets the shipped driver
//! binary replay a recorded trace through the controller end to end.
//!
//! Framing: a `u32` zero header, then back-to-back `(u64 line address, u32
//! type flag)` records — 0 for load, 1 for store. The "10,000 entries per
//! block" note in the format only describes how the writer batches its
//! appends; nothing on disk marks a block boundary, so the reader just
//! streams records until EOF.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::address::LineAddr;
use crate::scheme::ReqType;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    pub line_addr: LineAddr,
    pub req_type: ReqType,
}

pub struct TraceReader {
    reader: BufReader<File>,
}

impl TraceReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening trace file {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut header = [0u8; 4];
        reader
            .read_exact(&mut header)
            .context("reading trace header")?;
        if u32::from_le_bytes(header) != 0 {
            bail!("trace file {} has a non-zero header", path.display());
        }
        Ok(TraceReader { reader })
    }
}

impl Iterator for TraceReader {
    type Item = Result<TraceEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut addr_buf = [0u8; 8];
        match self.reader.read_exact(&mut addr_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e).context("reading trace line address")),
        }
        let mut type_buf = [0u8; 4];
        if let Err(e) = self.reader.read_exact(&mut type_buf) {
            return Some(Err(e).context("reading trace type flag (truncated record)"));
        }
        let line_addr = u64::from_le_bytes(addr_buf);
        let req_type = match u32::from_le_bytes(type_buf) {
            0 => ReqType::Load,
            1 => ReqType::Store,
            other => return Some(Err(anyhow::anyhow!("unknown trace type flag {other}"))),
        };
        Some(Ok(TraceEntry { line_addr, req_type }))
    }
}
