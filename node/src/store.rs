// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Cold Store
//!
//! Persistent destination of the cold path. Rows are keyed uniquely by the
//! log entry id, so writing the same entry twice leaves exactly one row.
//!
//! `RecordStore` either keeps rows in memory or, when given a path, appends
//! every new row to a JSON-lines file that is replayed on open. A file-backed
//! store holds only each row's byte offset in memory and reads the line back
//! on `get`. Both keep an index of ingestion times for windowed counts.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;

use conduit_log::EntryId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
    /// Write refused by the fault injector.
    #[error("Injected store write failure")]
    Injected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub entry_id: EntryId,
    pub payload: serde_json::Value,
    pub produced_at_ms: u64,
    pub received_at_ms: u64,
    pub ingested_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with this entry id already existed; nothing was written.
    Duplicate,
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

pub trait ColdStore: Send + Sync {
    /// Insert unless a row with the same entry id exists.
    fn insert_if_absent(&self, record: PersistedRecord) -> StoreFuture<'_, InsertOutcome>;

    fn get(&self, id: EntryId) -> StoreFuture<'_, Option<PersistedRecord>>;

    fn len(&self) -> StoreFuture<'_, usize>;

    /// Rows whose `ingested_at_ms` is at or after `since_ms`.
    fn count_ingested_since(&self, since_ms: u64) -> StoreFuture<'_, usize>;

    fn flush(&self) -> StoreFuture<'_, ()>;
}

enum Rows {
    Memory(BTreeMap<EntryId, PersistedRecord>),
    File {
        path: PathBuf,
        file: File,
        /// Byte offset of each row's line.
        offsets: BTreeMap<EntryId, u64>,
        len: u64,
    },
}

struct StoreInner {
    rows: Rows,
    /// Rows per ingestion millisecond.
    ingested: BTreeMap<u64, usize>,
}

impl StoreInner {
    fn contains(&self, id: EntryId) -> bool {
        match &self.rows {
            Rows::Memory(rows) => rows.contains_key(&id),
            Rows::File { offsets, .. } => offsets.contains_key(&id),
        }
    }

    fn row_count(&self) -> usize {
        match &self.rows {
            Rows::Memory(rows) => rows.len(),
            Rows::File { offsets, .. } => offsets.len(),
        }
    }

    fn index(&mut self, ingested_at_ms: u64) {
        *self.ingested.entry(ingested_at_ms).or_insert(0) += 1;
    }
}

pub struct RecordStore {
    inner: Mutex<StoreInner>,
}

impl RecordStore {
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                rows: Rows::Memory(BTreeMap::new()),
                ingested: BTreeMap::new(),
            }),
        }
    }

    /// Open (or create) a file-backed store and index its rows.
    ///
    /// A final line without a trailing newline is an interrupted write and
    /// is cut off; any other unparsable line is `Corrupt`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut offsets = BTreeMap::new();
        let mut ingested = BTreeMap::new();
        let mut valid_len = 0u64;

        if path.exists() {
            let mut reader = BufReader::new(File::open(path)?);
            let mut line = String::new();
            let mut line_no = 0usize;
            loop {
                line.clear();
                let n = reader.read_line(&mut line)?;
                if n == 0 {
                    break;
                }
                line_no += 1;

                if !line.ends_with('\n') {
                    tracing::warn!("Record store {:?}: dropping partial line {}", path, line_no);
                    break;
                }
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    let record: PersistedRecord = serde_json::from_str(trimmed).map_err(|e| StoreError::Corrupt {
                        line: line_no,
                        reason: e.to_string(),
                    })?;
                    if offsets.insert(record.entry_id, valid_len).is_none() {
                        *ingested.entry(record.ingested_at_ms).or_insert(0) += 1;
                    }
                }
                valid_len += n as u64;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() > valid_len {
            file.set_len(valid_len)?;
        }

        tracing::info!("Record store opened at {:?} with {} rows", path, offsets.len());

        Ok(Self {
            inner: Mutex::new(StoreInner {
                rows: Rows::File {
                    path: path.to_path_buf(),
                    file,
                    offsets,
                    len: valid_len,
                },
                ingested,
            }),
        })
    }
}

fn read_row(path: &Path, offset: u64) -> Result<PersistedRecord, StoreError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line)?;
    Ok(serde_json::from_str(line.trim())?)
}

impl ColdStore for RecordStore {
    fn insert_if_absent(&self, record: PersistedRecord) -> StoreFuture<'_, InsertOutcome> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if inner.contains(record.entry_id) {
                return Ok(InsertOutcome::Duplicate);
            }

            let ingested_at_ms = record.ingested_at_ms;
            match &mut inner.rows {
                Rows::Memory(rows) => {
                    rows.insert(record.entry_id, record);
                }
                Rows::File {
                    file, offsets, len, ..
                } => {
                    let mut line = serde_json::to_vec(&record)?;
                    line.push(b'\n');
                    if let Err(e) = file.write_all(&line).and_then(|_| file.flush()) {
                        // Cut the partial line so the next row starts clean.
                        if let Err(trunc) = file.set_len(*len) {
                            tracing::error!("Record store could not drop partial row: {}", trunc);
                        }
                        return Err(e.into());
                    }
                    offsets.insert(record.entry_id, *len);
                    *len += line.len() as u64;
                }
            }
            inner.index(ingested_at_ms);
            Ok(InsertOutcome::Inserted)
        })
    }

    fn get(&self, id: EntryId) -> StoreFuture<'_, Option<PersistedRecord>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            match &inner.rows {
                Rows::Memory(rows) => Ok(rows.get(&id).cloned()),
                Rows::File { path, offsets, .. } => match offsets.get(&id) {
                    Some(offset) => read_row(path, *offset).map(Some),
                    None => Ok(None),
                },
            }
        })
    }

    fn len(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move { Ok(self.inner.lock().await.row_count()) })
    }

    fn count_ingested_since(&self, since_ms: u64) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner.ingested.range(since_ms..).map(|(_, n)| n).sum())
        })
    }

    fn flush(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            if let Rows::File { file, .. } = &inner.rows {
                file.sync_all()?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(id: u64, ingested_at_ms: u64) -> PersistedRecord {
        PersistedRecord {
            entry_id: EntryId(id),
            payload: json!({ "metric": "cpu", "value": 42.5 }),
            produced_at_ms: 1_000,
            received_at_ms: 1_001,
            ingested_at_ms,
        }
    }

    #[tokio::test]
    async fn test_same_entry_twice_is_one_row() {
        let store = RecordStore::in_memory();

        assert_eq!(store.insert_if_absent(record(7, 10)).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert_if_absent(record(7, 20)).await.unwrap(), InsertOutcome::Duplicate);

        assert_eq!(store.len().await.unwrap(), 1);
        // First write wins
        assert_eq!(store.get(EntryId(7)).await.unwrap().unwrap().ingested_at_ms, 10);
    }

    #[tokio::test]
    async fn test_count_ingested_since() {
        let store = RecordStore::in_memory();
        for (id, at) in [(1, 100), (2, 200), (3, 300)] {
            store.insert_if_absent(record(id, at)).await.unwrap();
        }
        assert_eq!(store.count_ingested_since(200).await.unwrap(), 2);
        assert_eq!(store.count_ingested_since(301).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_store_reloads_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.jsonl");

        {
            let store = RecordStore::open(&path).unwrap();
            store.insert_if_absent(record(1, 10)).await.unwrap();
            store.insert_if_absent(record(2, 10)).await.unwrap();
            store.flush().await.unwrap();
        }

        let store = RecordStore::open(&path).unwrap();
        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(store.insert_if_absent(record(2, 99)).await.unwrap(), InsertOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_file_store_reads_rows_back_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.jsonl");

        {
            let store = RecordStore::open(&path).unwrap();
            for (id, at) in [(1, 100), (2, 200), (3, 300)] {
                store.insert_if_absent(record(id, at)).await.unwrap();
            }
            assert_eq!(store.get(EntryId(2)).await.unwrap(), Some(record(2, 200)));
        }

        let store = RecordStore::open(&path).unwrap();
        assert_eq!(store.get(EntryId(3)).await.unwrap(), Some(record(3, 300)));
        assert_eq!(store.get(EntryId(9)).await.unwrap(), None);
        assert_eq!(store.count_ingested_since(200).await.unwrap(), 2);

        store.insert_if_absent(record(4, 400)).await.unwrap();
        assert_eq!(store.get(EntryId(4)).await.unwrap(), Some(record(4, 400)));
        assert_eq!(store.count_ingested_since(250).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_partial_last_line_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.jsonl");

        {
            let store = RecordStore::open(&path).unwrap();
            store.insert_if_absent(record(1, 10)).await.unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"{\"entryId\":2,\"payl").unwrap();
        }

        let store = RecordStore::open(&path).unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
        store.insert_if_absent(record(3, 10)).await.unwrap();
        drop(store);

        let store = RecordStore::open(&path).unwrap();
        assert_eq!(store.len().await.unwrap(), 2);
    }
}
