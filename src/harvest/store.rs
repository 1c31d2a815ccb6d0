//! Append-only CSV tables.
//!
//! Rows are encoded in memory and land on disk with a single `write_all`, so a
//! crash can at most leave one torn trailing row. A row is complete only when
//! it is newline-terminated and as wide as the header. Readers skip anything
//! else, and the first append of a table truncates the file back to the end
//! of its last complete row, so a torn tail (even one cut inside a quoted
//! field) never swallows later rows.
use std::collections::HashSet;
use std::io::SeekFrom;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use csv::{ByteRecord, ReaderBuilder, WriterBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{HarvestError, Result};
use crate::normalization::profile::ProfileRecord;

/// A row type with a fixed column layout and a primary key column.
pub trait TableRow: Serialize + Send + Sync + 'static {
    /// Column names in serialization order.
    const HEADER: &'static [&'static str];
    const KEY_COLUMN: &'static str;

    fn key(&self) -> &str;
}

/// The harvested profiles dataset.
pub type RecordStore = AppendTable<ProfileRecord>;

#[derive(Debug)]
pub struct AppendTable<R> {
    path: PathBuf,
    /// Guards appends; `true` once the on-disk tail is known to end on a
    /// complete row.
    tail_checked: Mutex<bool>,
    _row: PhantomData<fn(R)>,
}

impl<R: TableRow> AppendTable<R> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tail_checked: Mutex::new(false),
            _row: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keys of every complete row already persisted. A missing or empty file
    /// yields an empty set; an unreadable or foreign header is corruption.
    pub async fn load_keys(&self) -> Result<HashSet<String>> {
        let Some(bytes) = self.read_all().await? else {
            return Ok(HashSet::new());
        };
        let Scan { header, rows, .. } = scan_rows::<R>(&self.path, &bytes)?;
        let key_idx = header
            .iter()
            .position(|h| h == R::KEY_COLUMN.as_bytes())
            .ok_or_else(|| HarvestError::corrupt(&self.path, "key column missing from header"))?;

        let mut keys = HashSet::with_capacity(rows.len());
        for row in rows {
            match row.get(key_idx).map(std::str::from_utf8) {
                Some(Ok(key)) if !key.trim().is_empty() => {
                    keys.insert(key.trim().to_string());
                }
                _ => warn!(path = %self.path.display(), "skipping row without a usable key"),
            }
        }
        debug!(path = %self.path.display(), keys = keys.len(), "loaded existing keys");
        Ok(keys)
    }

    /// Append one row, writing the header first if the file is new or empty.
    /// Calls are serialized; I/O failures are a `StoreWrite`.
    pub async fn append(&self, row: &R) -> Result<()> {
        let line = encode_row(row).map_err(|e| self.write_err(e))?;

        let mut tail_checked = self.tail_checked.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.path)
            .await
            .map_err(|e| self.write_err(e))?;

        let mut len = file.metadata().await.map_err(|e| self.write_err(e))?.len();
        if len > 0 && !*tail_checked {
            len = self.truncate_torn_tail(&mut file, len).await?;
        }

        let mut buf = Vec::with_capacity(line.len() + 256);
        if len == 0 {
            buf.extend(encode_header::<R>().map_err(|e| self.write_err(e))?);
        }
        buf.extend_from_slice(&line);

        // Re-verify on the next append if this write does not complete.
        *tail_checked = false;
        file.write_all(&buf).await.map_err(|e| self.write_err(e))?;
        file.flush().await.map_err(|e| self.write_err(e))?;
        file.sync_data().await.map_err(|e| self.write_err(e))?;
        *tail_checked = true;
        Ok(())
    }

    /// Cut the file back to the end of its last complete row and return the
    /// new length.
    async fn truncate_torn_tail(&self, file: &mut tokio::fs::File, len: u64) -> Result<u64> {
        let mut bytes = Vec::with_capacity(len as usize);
        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|e| self.write_err(e))?;
        file.read_to_end(&mut bytes)
            .await
            .map_err(|e| self.write_err(e))?;

        let keep = scan_rows::<R>(&self.path, &bytes)?.complete_len as u64;
        if keep < bytes.len() as u64 {
            warn!(
                path = %self.path.display(),
                dropped_bytes = bytes.len() as u64 - keep,
                "truncating torn trailing row before append"
            );
            file.set_len(keep).await.map_err(|e| self.write_err(e))?;
            file.sync_data().await.map_err(|e| self.write_err(e))?;
        }
        Ok(keep)
    }

    async fn read_all(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HarvestError::io(&self.path, e)),
        }
    }

    fn write_err(&self, source: impl Into<std::io::Error>) -> HarvestError {
        HarvestError::StoreWrite {
            path: self.path.clone(),
            source: source.into(),
        }
    }
}

impl<R: TableRow + DeserializeOwned> AppendTable<R> {
    /// Every complete row, in file order.
    pub async fn load_rows(&self) -> Result<Vec<R>> {
        let Some(bytes) = self.read_all().await? else {
            return Ok(Vec::new());
        };
        let Scan { header, rows, .. } = scan_rows::<R>(&self.path, &bytes)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match row.deserialize::<R>(Some(&header)) {
                Ok(r) => out.push(r),
                Err(err) => warn!(path = %self.path.display(), %err, "skipping undecodable row"),
            }
        }
        Ok(out)
    }
}

struct Scan {
    header: ByteRecord,
    rows: Vec<ByteRecord>,
    /// Byte length of the prefix that ends on the last complete row.
    complete_len: usize,
}

fn terminated(bytes: &[u8], end: usize) -> bool {
    end > 0 && bytes.get(end - 1) == Some(&b'\n')
}

/// Validates the header against `R::HEADER` and returns it with every
/// complete row.
fn scan_rows<R: TableRow>(path: &Path, bytes: &[u8]) -> Result<Scan> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let header = rdr
        .byte_headers()
        .map_err(|e| HarvestError::corrupt(path, format!("unreadable header: {e}")))?
        .clone();
    let header_end = rdr.position().byte() as usize;

    // A header cut short by a crash during the very first append.
    if !terminated(bytes, header_end) {
        let expected = encode_header::<R>().map_err(|e| HarvestError::corrupt(path, e.to_string()))?;
        if expected.starts_with(bytes) {
            return Ok(Scan {
                header: ByteRecord::from(R::HEADER.to_vec()),
                rows: Vec::new(),
                complete_len: 0,
            });
        }
    }

    let matches = header.len() == R::HEADER.len()
        && header
            .iter()
            .zip(R::HEADER)
            .all(|(got, want)| got == want.as_bytes());
    if !matches {
        return Err(HarvestError::corrupt(
            path,
            format!(
                "header {:?} does not match expected {:?}",
                header
                    .iter()
                    .map(String::from_utf8_lossy)
                    .collect::<Vec<_>>(),
                R::HEADER
            ),
        ));
    }

    let mut rows = Vec::new();
    let mut complete_len = header_end;
    let mut rec = ByteRecord::new();
    let mut idx = 0usize;
    loop {
        match rdr.read_byte_record(&mut rec) {
            Ok(false) => break,
            Ok(true) => {
                idx += 1;
                let end = rdr.position().byte() as usize;
                if rec.len() == header.len() && terminated(bytes, end) {
                    rows.push(rec.clone());
                    complete_len = end;
                } else {
                    warn!(
                        path = %path.display(),
                        row = idx,
                        fields = rec.len(),
                        "skipping torn row"
                    );
                }
            }
            Err(err) => {
                idx += 1;
                warn!(path = %path.display(), row = idx, %err, "skipping unreadable row");
            }
        }
    }
    Ok(Scan {
        header,
        rows,
        complete_len,
    })
}

fn encode_header<R: TableRow>() -> std::result::Result<Vec<u8>, csv::Error> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    wtr.write_record(R::HEADER)?;
    wtr.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

fn encode_row<R: TableRow>(row: &R) -> std::result::Result<Vec<u8>, csv::Error> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    wtr.serialize(row)?;
    wtr.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}
