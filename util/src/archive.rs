//! # Archives
//!
//! Per-cycle records written as csv files into the session's archive directory. A module keeps
//! one [`Archiver`] per record type and implements [`Archived`] to write them after each cycle.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use csv::{Writer, WriterBuilder};
use serde::Serialize;
use std::{fs::File, path::Path};
use thiserror::Error;

use crate::session::Session;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Writer for one csv archive.
///
/// `Archiver::default()` is not backed by a file and drops every record, which is what a module
/// holds until it is initialised with a session.
#[derive(Default)]
pub struct Archiver {
    writer: Option<Writer<File>>,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Could not create archive file: {0}")]
    CreateError(std::io::Error),

    #[error("Could not write archive record: {0}")]
    WriteError(csv::Error),

    #[error("Could not flush archive: {0}")]
    FlushError(std::io::Error),
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Implemented by modules which archive their state each cycle.
pub trait Archived {
    fn write(&mut self) -> Result<(), ArchiveError>;
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Archiver {
    /// Open a new archive at `path`, relative to the session's archive directory.
    ///
    /// Records must be flat structs, csv has no representation for nested sequences.
    pub fn from_path<P: AsRef<Path>>(session: &Session, path: P) -> Result<Self, ArchiveError> {
        let full_path = session.arch_root.join(path);

        if let Some(dir) = full_path.parent() {
            std::fs::create_dir_all(dir).map_err(ArchiveError::CreateError)?;
        }

        let file = File::create(&full_path).map_err(ArchiveError::CreateError)?;

        Ok(Self {
            writer: Some(WriterBuilder::new().has_headers(true).from_writer(file)),
        })
    }

    pub fn is_active(&self) -> bool {
        self.writer.is_some()
    }

    /// Append one record, flushing so archives survive a crash.
    pub fn serialise<T: Serialize>(&mut self, record: T) -> Result<(), ArchiveError> {
        let writer = match self.writer.as_mut() {
            Some(w) => w,
            None => return Ok(()),
        };

        writer.serialize(record).map_err(ArchiveError::WriteError)?;
        writer.flush().map_err(ArchiveError::FlushError)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Serialize)]
    struct Record {
        time_s: f64,
        value: f64,
    }

    #[test]
    fn test_inactive_archiver_discards() {
        let mut arch = Archiver::default();

        assert!(!arch.is_active());
        assert!(arch.serialise(Record { time_s: 0.0, value: 1.0 }).is_ok());
    }
}
