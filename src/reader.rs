// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Log Reader for Replay
//!
//! Reads a whole log file and yields its records in order. A partial final
//! frame (crash mid-append) ends iteration and is reported through
//! [`LogReader::torn_bytes`]; a checksum failure anywhere is an error.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::codec::{decode_frame, FrameDecode, LogHeader, HEADER_SIZE};
use crate::error::Result;
use crate::record::LogRecord;

pub struct LogReader {
    buf: Vec<u8>,
    offset: usize,
    failed: bool,
}

impl LogReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Self::from_bytes(buf)
    }

    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        LogHeader::from_bytes(&buf)?;
        Ok(Self {
            buf,
            offset: HEADER_SIZE,
            failed: false,
        })
    }

    /// Length of the well-formed prefix read so far.
    pub fn valid_len(&self) -> u64 {
        self.offset as u64
    }

    /// Bytes after the last complete frame. Only meaningful once iteration
    /// has finished.
    pub fn torn_bytes(&self) -> u64 {
        (self.buf.len() - self.offset) as u64
    }
}

impl Iterator for LogReader {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }

        match decode_frame(&self.buf[self.offset..], self.offset as u64) {
            Ok(FrameDecode::Record(record, used)) => {
                self.offset += used;
                Some(Ok(record))
            }
            Ok(FrameDecode::Incomplete) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::LogWriter;
    use tempfile::tempdir;

    #[test]
    fn test_reader_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");

        {
            let mut writer = LogWriter::open(&path, false, None).unwrap();
            for i in 0..3 {
                writer
                    .append(&LogRecord::GroupCreated {
                        group: format!("g{}", i),
                        at_ms: i,
                    })
                    .unwrap();
            }
        }

        let mut reader = LogReader::open(&path).unwrap();
        let records: Vec<_> = reader.by_ref().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(reader.torn_bytes(), 0);
    }
}
