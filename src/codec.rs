// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! On-disk framing for log files.
//!
//! # File Format
//! ```text
//! [Header: 16 bytes][Frame][Frame][Frame]...
//! ```
//!
//! Header:
//! - magic: 8 bytes (`CNDTLOG\0`)
//! - version: u32 (1)
//! - reserved: u32 (0)
//!
//! Frame:
//! - body_len: u32
//! - checksum: u64 (CRC-64 of body)
//! - header_check: u32 (low half of the CRC-64 of the 12 bytes above)
//! - body: bincode-encoded [`LogRecord`]
//!
//! A frame is torn only when fewer than [`FRAME_HEADER_SIZE`] bytes remain,
//! or when its header verifies and the body runs past the end of the file.
//! A header that does not verify is corruption, never a torn tail.

use byteorder::{ByteOrder, LittleEndian};
use crc64fast::Digest;

use crate::error::{LogError, Result};
use crate::record::LogRecord;

pub const MAGIC: [u8; 8] = *b"CNDTLOG\0";
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 16;
pub const FRAME_HEADER_SIZE: usize = 4 + 8 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    pub version: u32,
}

impl LogHeader {
    pub fn current() -> Self {
        Self { version: VERSION }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(&MAGIC);
        LittleEndian::write_u32(&mut bytes[8..12], self.version);
        LittleEndian::write_u32(&mut bytes[12..16], 0);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(LogError::InvalidHeader(format!(
                "expected {} header bytes, found {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        if bytes[0..8] != MAGIC {
            return Err(LogError::InvalidHeader("bad magic".into()));
        }
        let version = LittleEndian::read_u32(&bytes[8..12]);
        if version != VERSION {
            return Err(LogError::InvalidHeader(format!(
                "version mismatch: file={}, expected={}",
                version, VERSION
            )));
        }
        Ok(Self { version })
    }
}

pub fn checksum(body: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(body);
    digest.sum64()
}

fn header_check(prefix: &[u8]) -> u32 {
    checksum(prefix) as u32
}

/// Encode a record into a complete frame.
pub fn encode_frame(record: &LogRecord) -> Result<Vec<u8>> {
    let body = bincode::serde::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| LogError::Serialization(e.to_string()))?;

    let mut frame = vec![0u8; FRAME_HEADER_SIZE + body.len()];
    LittleEndian::write_u32(&mut frame[0..4], body.len() as u32);
    LittleEndian::write_u64(&mut frame[4..12], checksum(&body));
    let check = header_check(&frame[0..12]);
    LittleEndian::write_u32(&mut frame[12..16], check);
    frame[FRAME_HEADER_SIZE..].copy_from_slice(&body);
    Ok(frame)
}

#[derive(Debug)]
pub enum FrameDecode {
    /// A full frame: the record and the number of bytes it occupied.
    Record(LogRecord, usize),
    /// Not enough bytes left for a full frame (torn tail).
    Incomplete,
}

/// Decode the frame starting at `buf[0]`. `offset` is its file position, used
/// for error reporting only.
pub fn decode_frame(buf: &[u8], offset: u64) -> Result<FrameDecode> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(FrameDecode::Incomplete);
    }
    let stored_check = LittleEndian::read_u32(&buf[12..16]);
    let found_check = header_check(&buf[0..12]);
    if stored_check != found_check {
        return Err(LogError::ChecksumMismatch {
            offset,
            expected: stored_check as u64,
            found: found_check as u64,
        });
    }

    let body_len = LittleEndian::read_u32(&buf[0..4]) as usize;
    let expected = LittleEndian::read_u64(&buf[4..12]);

    let total = FRAME_HEADER_SIZE + body_len;
    if buf.len() < total {
        return Ok(FrameDecode::Incomplete);
    }

    let body = &buf[FRAME_HEADER_SIZE..total];
    let found = checksum(body);
    if found != expected {
        return Err(LogError::ChecksumMismatch {
            offset,
            expected,
            found,
        });
    }

    let (record, _) = bincode::serde::decode_from_slice::<LogRecord, _>(body, bincode::config::standard())
        .map_err(|e| LogError::Serialization(e.to_string()))?;

    Ok(FrameDecode::Record(record, total))
}
