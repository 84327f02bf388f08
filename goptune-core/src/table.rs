
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Final parameters for one GOP, consumed by the final-pass encoder as it
/// crosses the GOP boundary tracked by the running `frame_count` sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GopRecord {
    pub frame_count:    u64,
    pub unsharpen:      f64,
    pub aq_strength:    f64,
    pub target_quality: f64,
    pub crf:            u32,
}

/// Append-only parameter table, indexed by GOP number. Records are
/// immutable once appended.
#[derive(Debug, Default)]
pub struct ParamTable {
    records: Vec<GopRecord>,
}

impl ParamTable {
    pub const fn new() -> Self {
        ParamTable {
            records: Vec::new(),
        }
    }

    /// Appends the record for the next GOP and returns its index.
    pub fn append(&mut self, record: GopRecord) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, gop: usize) -> Option<&GopRecord> {
        self.records.get(gop)
    }

    pub fn records(&self) -> &[GopRecord] {
        &self.records
    }

    /// Total decoded frames accounted for by the table so far.
    pub fn total_frames(&self) -> u64 {
        self.records.iter().map(|r| r.frame_count).sum()
    }
}

/// Flat-file journal of the table, one JSON record per line, flushed per
/// GOP so an interrupted run leaves every completed record on disk.
pub struct Journal {
    writer: BufWriter<File>,
}

impl Journal {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Journal {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    pub fn append(&mut self, record: &GopRecord) -> io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()
    }
}
