// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Checksum mismatch at offset {offset}: expected {expected:#x}, found {found:#x}")]
    ChecksumMismatch {
        offset: u64,
        expected: u64,
        found: u64,
    },

    #[error("Unknown consumer group: {0}")]
    UnknownGroup(String),

    #[error("Log unavailable: {0}")]
    Unavailable(String),
}

impl LogError {
    /// Whether the failure is about reaching the log rather than the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LogError::Io(_) | LogError::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, LogError>;
