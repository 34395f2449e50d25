// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Append-Only Log Writer
//!
//! - Records are framed and checksummed (see [`crate::codec`])
//! - With `sync` on, every append is fsync'd before returning
//! - No rewriting: the only in-place changes are dropping a torn tail on open
//!   and cutting back a frame whose append failed
//! - A writer that cannot cut back a failed frame refuses all further writes

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use crate::codec::{encode_frame, LogHeader, HEADER_SIZE};
use crate::error::{LogError, Result};
use crate::record::LogRecord;

pub struct LogWriter {
    file: File,
    sync: bool,
    bytes_written: u64,
    /// Why the writer stopped accepting appends.
    poisoned: Option<String>,
}

impl LogWriter {
    /// Open or create a log file.
    ///
    /// A new (or empty) file gets a header; an existing file must carry a
    /// valid one. `valid_len`, when given, truncates the file to that length
    /// first (used to drop a torn tail found during replay).
    pub fn open(path: impl AsRef<Path>, sync: bool, valid_len: Option<u64>) -> Result<Self> {
        let path = path.as_ref();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        if let Some(len) = valid_len {
            if file.metadata()?.len() > len {
                file.set_len(len)?;
                file.sync_all()?;
            }
        }

        let mut len = file.metadata()?.len();
        if len == 0 {
            file.write_all(&LogHeader::current().to_bytes())?;
            file.sync_all()?;
            len = HEADER_SIZE as u64;
        } else {
            let mut header = [0u8; HEADER_SIZE];
            file.read_exact(&mut header)?;
            LogHeader::from_bytes(&header)?;
        }

        Ok(Self {
            file,
            sync,
            bytes_written: len,
            poisoned: None,
        })
    }

    /// Append one record. Returns only after the frame reached the OS (and
    /// the disk, when syncing).
    ///
    /// On failure the file is cut back to its previous length, so a frame
    /// the caller saw fail never reappears on replay.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        self.check_usable()?;
        let frame = encode_frame(record)?;

        if let Err(e) = self.write_frame(&frame) {
            self.discard_partial();
            return Err(e.into());
        }

        self.bytes_written += frame.len() as u64;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.file.write_all(frame)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Drop whatever a failed append left past the last good frame.
    fn discard_partial(&mut self) {
        if let Err(e) = self.file.set_len(self.bytes_written) {
            self.poisoned = Some(format!("cannot cut back failed frame: {}", e));
        }
    }

    fn check_usable(&self) -> Result<()> {
        match &self.poisoned {
            Some(reason) => Err(LogError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    pub fn sync(&mut self) -> Result<()> {
        self.check_usable()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Current file length in bytes, header included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::LogReader;
    use tempfile::tempdir;

    #[test]
    fn test_writer_creates_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");

        let writer = LogWriter::open(&path, true, None).unwrap();
        assert_eq!(writer.bytes_written(), HEADER_SIZE as u64);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), HEADER_SIZE as u64);
    }

    #[test]
    fn test_writer_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        std::fs::write(&path, b"definitely not a conduit log").unwrap();

        assert!(LogWriter::open(&path, true, None).is_err());
    }

    #[test]
    fn test_writer_appends_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");

        let first_len = {
            let mut writer = LogWriter::open(&path, false, None).unwrap();
            writer
                .append(&LogRecord::GroupCreated {
                    group: "g".into(),
                    at_ms: 1,
                })
                .unwrap();
            writer.bytes_written()
        };

        let writer = LogWriter::open(&path, false, None).unwrap();
        assert_eq!(writer.bytes_written(), first_len);
    }

    fn group(name: &str) -> LogRecord {
        LogRecord::GroupCreated {
            group: name.into(),
            at_ms: 1,
        }
    }

    #[test]
    fn test_partial_frame_is_cut_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");

        let mut writer = LogWriter::open(&path, false, None).unwrap();
        writer.append(&group("a")).unwrap();

        // Leftovers of an append that failed halfway
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"\x2a\x00\x00")
            .unwrap();
        writer.discard_partial();

        writer.append(&group("b")).unwrap();
        drop(writer);

        let mut reader = LogReader::open(&path).unwrap();
        let records: Vec<_> = reader.by_ref().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(records, vec![group("a"), group("b")]);
        assert_eq!(reader.torn_bytes(), 0);
    }

    #[test]
    fn test_failed_append_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");

        let mut writer = LogWriter::open(&path, false, None).unwrap();
        writer.append(&group("a")).unwrap();
        let good_len = writer.bytes_written();

        // A read-only handle makes both the write and the cut-back fail
        writer.file = File::open(&path).unwrap();
        assert!(matches!(writer.append(&group("dropped")), Err(LogError::Io(_))));

        // Poisoned: later appends are refused instead of landing after a gap
        assert!(matches!(writer.append(&group("c")), Err(LogError::Unavailable(_))));
        assert!(matches!(writer.sync(), Err(LogError::Unavailable(_))));
        drop(writer);

        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
        let records: Vec<_> = LogReader::open(&path)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records, vec![group("a")]);
    }
}
