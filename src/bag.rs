//! The Bag — an append-only, length-prefixed binary record container.
//!
//! # On-disk layout
//!
//! ```text
//! repeat for each record i in [0, N):
//!   u64_le length_i
//!   length_i bytes payload_i
//! u64_le offset_0      // byte offset of record 0's length header (=0)
//! u64_le offset_1
//! ...
//! u64_le offset_{N-1}
//! u64_le count = N
//! ```
//!
//! The trailer sits at the file's tail; the last 8 bytes are always the
//! record count. Given total file size `S`, the offset array starts at
//! `S − 8·(N+1)`. This is the only structural metadata a Bag carries — no
//! checksum, no codec identity, no timestamps. Everything above the byte
//! layer (types, columns, sharding) is built on top in `dataset.rs` and
//! `sharded.rs`.
//!
//! # Endianness
//!
//! Every numeric field is little-endian, written and read with `byteorder`.
//!
//! # Failure semantics
//!
//! A length header promising more bytes than the file actually holds is a
//! corruption error, raised at the point of read. An absent or mismatched
//! trailer (missing count, offsets that don't fit before the trailer) is
//! also corruption. The writer only makes the trailer durable on `close()` —
//! a process killed mid-stream leaves payload bytes but no index, and that
//! file is not readable. Rebuilding the index by scanning payload framing is
//! future work, not attempted here.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{GranularError, Result};

const LEN_HEADER_SIZE: u64 = 8;

// ── Writer ───────────────────────────────────────────────────────────────────

/// Appends length-prefixed records to a file and writes the trailing offset
/// index on close.
///
/// Small appends are accumulated into an internal `BufWriter` so the common
/// case of many small records costs one syscall per flush, not one per
/// record, inlined via `std::io::BufWriter` since a Bag has no other
/// buffering concern.
pub struct BagWriter {
    writer: BufWriter<File>,
    offsets: Vec<u64>,
    /// Current write cursor, tracked explicitly so `append` doesn't need a
    /// `stream_position()` syscall per record.
    cursor: u64,
    closed: bool,
}

impl BagWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            offsets: Vec::new(),
            cursor: 0,
            closed: false,
        })
    }

    /// Append one record, returning its 0-based index.
    pub fn append(&mut self, data: &[u8]) -> Result<usize> {
        let index = self.offsets.len();
        self.offsets.push(self.cursor);
        self.writer.write_u64::<LittleEndian>(data.len() as u64)?;
        self.writer.write_all(data)?;
        self.cursor += LEN_HEADER_SIZE + data.len() as u64;
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Total bytes this Bag will occupy on disk, including the trailer that
    /// has not been written yet. Tracked incrementally rather than queried
    /// from the filesystem so it stays correct even while buffered.
    pub fn size(&self) -> u64 {
        self.cursor + LEN_HEADER_SIZE * (self.offsets.len() as u64 + 1)
    }

    /// Flush the trailing offset index and fsync the underlying file. Must
    /// be called exactly once; further appends after `close()` are a logic
    /// error in the caller, not guarded against here.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        for &offset in &self.offsets {
            self.writer.write_u64::<LittleEndian>(offset)?;
        }
        self.writer.write_u64::<LittleEndian>(self.offsets.len() as u64)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for BagWriter {
    fn drop(&mut self) {
        // Best-effort: a writer that already errored, or whose caller forgot
        // to call close(), must not panic on drop. Silently swallow — the
        // caller that cares about durability calls close() and checks it.
        let _ = self.close();
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Random-access reader over a closed Bag file.
///
/// `cache_index` controls whether the offset array is held in memory after
/// open (trading a little memory for avoiding a re-read on every lookup) or
/// re-read from disk on demand. Either way correctness is identical.
pub struct BagReader {
    file: File,
    len: usize,
    index: IndexSource,
}

enum IndexSource {
    Cached(Vec<u64>),
    OnDemand { trailer_start: u64 },
}

impl BagReader {
    pub fn open<P: AsRef<Path>>(path: P, cache_index: bool) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.seek(SeekFrom::End(0))?;

        if file_size < LEN_HEADER_SIZE {
            return Err(GranularError::corruption("bag file too small to contain a trailer"));
        }
        file.seek(SeekFrom::End(-(LEN_HEADER_SIZE as i64)))?;
        let count = file.read_u64::<LittleEndian>()?;

        let trailer_size = LEN_HEADER_SIZE * (count + 1);
        if trailer_size > file_size {
            return Err(GranularError::corruption(format!(
                "bag trailer claims {count} records but file is only {file_size} bytes"
            )));
        }
        let trailer_start = file_size - trailer_size;

        let index = if cache_index {
            file.seek(SeekFrom::Start(trailer_start))?;
            let mut offsets = Vec::with_capacity(count as usize);
            for _ in 0..count {
                offsets.push(file.read_u64::<LittleEndian>()?);
            }
            IndexSource::Cached(offsets)
        } else {
            IndexSource::OnDemand { trailer_start }
        };

        Ok(Self { file, len: count as usize, index })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total on-disk byte size of the Bag, including framing and trailer.
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn offset_of(&mut self, index: usize) -> Result<u64> {
        match &self.index {
            IndexSource::Cached(offsets) => Ok(offsets[index]),
            IndexSource::OnDemand { trailer_start } => {
                self.file.seek(SeekFrom::Start(trailer_start + LEN_HEADER_SIZE * index as u64))?;
                Ok(self.file.read_u64::<LittleEndian>()?)
            }
        }
    }

    /// Return record `index`'s raw bytes. Out-of-range indices raise
    /// `GranularError::Index` — single-index access never clips.
    pub fn get(&mut self, index: usize) -> Result<Vec<u8>> {
        if index >= self.len {
            return Err(GranularError::Index { index: index as i64, len: self.len });
        }
        let offset = self.offset_of(index)?;
        self.file.seek(SeekFrom::Start(offset))?;
        let declared_len = self.file.read_u64::<LittleEndian>()?;
        let mut buf = vec![0u8; declared_len as usize];
        self.file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                GranularError::corruption(format!(
                    "record {index} length header promises {declared_len} bytes past EOF"
                ))
            } else {
                GranularError::Io(e)
            }
        })?;
        Ok(buf)
    }

    /// Return the records whose indices fall in the intersection of `range`
    /// with `[0, len)`. Out-of-range indices are silently skipped — this
    /// never raises `GranularError::Index`.
    pub fn get_range(&mut self, range: std::ops::Range<i64>) -> Result<Vec<Vec<u8>>> {
        let start = range.start.max(0) as usize;
        let end = range.end.max(0) as usize;
        let end = end.min(self.len);
        if start >= end {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(end - start);
        for i in start..end {
            out.push(self.get(i)?);
        }
        Ok(out)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::collection::vec as prop_vec;
    use proptest::prelude::*;

    fn write_bag(dir: &std::path::Path, records: &[Vec<u8>]) -> std::path::PathBuf {
        let path = dir.join("file.bag");
        let mut writer = BagWriter::create(&path).unwrap();
        for record in records {
            writer.append(record).unwrap();
        }
        writer.close().unwrap();
        path
    }

    proptest! {
        /// For all byte sequences appended to a `BagWriter`, a freshly-opened
        /// `BagReader` yields exactly the original bytes back at every index.
        #[test]
        fn get_returns_exactly_what_was_appended(
            records in prop_vec(prop_vec(any::<u8>(), 0..256), 0..64),
            cache_index in any::<bool>(),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let path = write_bag(dir.path(), &records);
            let mut reader = BagReader::open(&path, cache_index).unwrap();
            prop_assert_eq!(reader.len(), records.len());
            for (i, expected) in records.iter().enumerate() {
                prop_assert_eq!(&reader.get(i).unwrap(), expected);
            }
        }

        /// For all integer ranges, `get_range(r)` equals the sequential
        /// collection of every in-bounds index in `r`, clipped silently —
        /// never an error, regardless of how far `r` overshoots `len`.
        #[test]
        fn get_range_equals_clipped_sequential_gets(
            records in prop_vec(prop_vec(any::<u8>(), 0..64), 0..64),
            start in -10i64..80,
            len_delta in 0i64..90,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let path = write_bag(dir.path(), &records);
            let mut reader = BagReader::open(&path, true).unwrap();
            let end = start + len_delta;
            let range = start..end;

            let expected: Vec<Vec<u8>> = range
                .clone()
                .filter(|&i| i >= 0 && (i as usize) < records.len())
                .map(|i| records[i as usize].clone())
                .collect();
            let actual = reader.get_range(range).unwrap();
            prop_assert_eq!(actual, expected);
        }

        /// Byte accounting: after closing a `BagWriter`, the file's on-disk
        /// size equals `writer.size()` computed incrementally during
        /// appends, for any sequence of record sizes.
        #[test]
        fn writer_size_matches_file_size_on_disk(
            records in prop_vec(prop_vec(any::<u8>(), 0..128), 0..64),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("file.bag");
            let mut writer = BagWriter::create(&path).unwrap();
            for record in &records {
                writer.append(record).unwrap();
            }
            let reported = writer.size();
            writer.close().unwrap();
            let on_disk = std::fs::metadata(&path).unwrap().len();
            prop_assert_eq!(reported, on_disk);
        }
    }
}
