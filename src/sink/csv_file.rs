//! Append-only CSV file sink. The header is written once, when the file is empty.
//! A batch lands whole or not at all: a failed write is cut back to the prior length.

use super::{AnomalyRow, AnomalySink};
use crate::error::{Result, StreamError};
use crate::stream::ScoredEvent;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Append target that can be cut back to an earlier length.
trait Truncate: Write {
    fn size(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

fn encode(rows: &[ScoredEvent], header: bool) -> std::result::Result<Vec<u8>, BoxError> {
    let mut writer = ::csv::WriterBuilder::new()
        .has_headers(header)
        .from_writer(Vec::new());
    for row in rows {
        writer.serialize(AnomalyRow::from_scored(row))?;
    }
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}

/// Append one encoded batch; on failure the target is restored to its prior length.
fn append_batch<T: Truncate>(target: &mut T, rows: &[ScoredEvent]) -> std::result::Result<(), BoxError> {
    let prior = target.size()?;
    let bytes = encode(rows, prior == 0)?;
    if let Err(e) = target.write_all(&bytes).and_then(|()| target.flush()) {
        if let Err(undo) = target.truncate_to(prior) {
            return Err(format!("{} (rollback to {} bytes failed: {})", e, prior, undo).into());
        }
        return Err(e.into());
    }
    Ok(())
}

pub struct CsvSink {
    path: PathBuf,
    name: String,
}

impl CsvSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StreamError::persistence("csv", format!("{}: {}", parent.display(), e)))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            name: format!("csv:{}", path.display()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, rows: &[ScoredEvent]) -> std::result::Result<(), BoxError> {
        // reopened per batch so a transient failure does not wedge the sink
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        append_batch(&mut file, rows)
    }
}

impl AnomalySink for CsvSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn append(&mut self, rows: &[ScoredEvent]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.write(rows)
            .map_err(|e| StreamError::persistence(self.name.clone(), e))
    }
}
