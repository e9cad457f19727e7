//! Sharded Dataset: many Dataset directories under one root, so
//! coordination-free writers can each own a disjoint stripe of shards and
//! readers can reconstruct one logical, order-preserving sequence from
//! however many shards exist.
//!
//! # Layout
//!
//! ```text
//! <root>/000000/   a plain Dataset directory (spec.json + per-field bags)
//! <root>/000001/
//! ...
//! ```
//!
//! Shard directory names are zero-padded decimal indices, at least six
//! digits wide, sorted numerically rather than lexicographically so a run
//! past `999999` shards still orders correctly.
//!
//! # Strided assignment
//!
//! A writer constructed with `shard_start = s, shard_step = k` creates and
//! owns shards `s, s+k, s+2k, ...` — disjoint from every other writer on the
//! same root using a different `shard_start` in `[0, k)`. No lock file, no
//! shared counter: two writers racing to create a shard directory never
//! pick the same index because each only ever touches indices in its own
//! residue class. A reader opened with its own `shard_start`/`shard_step`
//! mirrors this to read back only the shards one particular distributed
//! consumer is responsible for; the default (`shard_start = 0, shard_step =
//! 1`) reads every shard.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::CodecRegistry;
use crate::dataset::{DatasetReader, DatasetWriter, Record, Selection};
use crate::error::{GranularError, Result};
use crate::spec::Spec;

const SHARD_WIDTH: usize = 6;

fn shard_dir(root: &Path, index: usize) -> PathBuf {
    root.join(format!("{index:0width$}", width = SHARD_WIDTH))
}

/// Discover every shard directory directly under `root`: entries whose name
/// parses as a plain decimal integer and which contain a `spec.json`.
/// Returned sorted by numeric index, not by directory-listing order.
fn discover_shards(root: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut found = Vec::new();
    if !root.exists() {
        return Ok(found);
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Ok(index) = name.parse::<usize>() {
            if entry.path().join("spec.json").is_file() {
                found.push((index, entry.path()));
            }
        }
    }
    found.sort_by_key(|(index, _)| *index);
    Ok(found)
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// When to roll the currently open shard and start a fresh one. Either
/// bound may be set; whichever is reached first triggers the roll.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardLimits {
    pub max_records: Option<usize>,
    pub max_bytes: Option<u64>,
}

pub struct ShardedDatasetWriter {
    root: PathBuf,
    spec: Spec,
    registry: Arc<CodecRegistry>,
    limits: ShardLimits,
    shard_step: usize,
    next_shard_index: usize,
    current: Option<DatasetWriter>,
    current_shard_index: usize,
}

impl ShardedDatasetWriter {
    pub fn create(
        root: impl AsRef<Path>,
        spec: Spec,
        registry: Arc<CodecRegistry>,
        limits: ShardLimits,
        shard_start: usize,
        shard_step: usize,
    ) -> Result<Self> {
        if shard_step == 0 {
            return Err(GranularError::type_error("shard_step must be at least 1"));
        }
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            spec,
            registry,
            limits,
            shard_step,
            next_shard_index: shard_start,
            current: None,
            current_shard_index: shard_start,
        })
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.current.is_none() {
            let dir = shard_dir(&self.root, self.next_shard_index);
            self.current_shard_index = self.next_shard_index;
            self.current = Some(DatasetWriter::create(dir, self.spec.clone(), Arc::clone(&self.registry))?);
            self.next_shard_index += self.shard_step;
        }
        Ok(())
    }

    fn should_roll(&self, writer: &DatasetWriter) -> bool {
        self.limits.max_records.is_some_and(|n| writer.len() >= n)
            || self.limits.max_bytes.is_some_and(|b| writer.size() >= b)
    }

    /// Append to the currently open shard (opening one first if none is
    /// open yet), then roll to a fresh shard if that append just pushed the
    /// shard to either configured limit. The roll always happens *after*
    /// the append, never before: checking a freshly-opened, empty shard
    /// against the limits first would immediately roll it away before a
    /// single record landed, leaving a spurious empty shard directory
    /// behind whenever `shard_size` is smaller than a new Dataset's
    /// baseline trailer overhead. Returns `(shard_index,
    /// record_index_within_shard)`.
    pub fn append(&mut self, record: &Record) -> Result<(usize, usize)> {
        self.ensure_open()?;
        let shard_index = self.current_shard_index;
        let index = self.current.as_mut().unwrap().append(record)?;
        if self.should_roll(self.current.as_ref().unwrap()) {
            self.roll()?;
        }
        Ok((shard_index, index))
    }

    fn roll(&mut self) -> Result<()> {
        if let Some(mut writer) = self.current.take() {
            writer.close()?;
        }
        Ok(())
    }

    /// Finalize whatever shard is currently open. A shard directory is only
    /// ever created by `ensure_open` on the first `append`, so there is
    /// never an empty shard left behind by a writer that appended nothing.
    pub fn close(&mut self) -> Result<()> {
        self.roll()
    }
}

impl Drop for ShardedDatasetWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct ShardedDatasetReader {
    spec: Spec,
    shards: Vec<DatasetReader>,
    shard_dirs: Vec<PathBuf>,
    /// `offsets[i]` is the first global index living in `shards[i]`;
    /// `offsets.last()` is the total record count.
    offsets: Vec<usize>,
}

impl ShardedDatasetReader {
    /// Open every shard under `root` whose index satisfies
    /// `index % shard_step == shard_start % shard_step`, in ascending
    /// numeric order, and present them as one concatenated sequence.
    pub fn open(
        root: impl AsRef<Path>,
        registry: Arc<CodecRegistry>,
        cache_index: bool,
        cache_refs: bool,
        shard_start: usize,
        shard_step: usize,
    ) -> Result<Self> {
        if shard_step == 0 {
            return Err(GranularError::type_error("shard_step must be at least 1"));
        }
        let root = root.as_ref();
        let all = discover_shards(root)?;
        let selected: Vec<(usize, PathBuf)> = all
            .into_iter()
            .filter(|(index, _)| index % shard_step == shard_start % shard_step)
            .collect();

        let mut spec: Option<Spec> = None;
        let mut shards = Vec::with_capacity(selected.len());
        let mut shard_dirs = Vec::with_capacity(selected.len());
        let mut offsets = Vec::with_capacity(selected.len() + 1);
        let mut total = 0usize;
        offsets.push(0);

        for (index, dir) in selected {
            let reader = DatasetReader::open(&dir, Arc::clone(&registry), cache_index, cache_refs)?;
            match &spec {
                None => spec = Some(reader.spec().clone()),
                Some(canonical) if !canonical.matches(reader.spec()) => {
                    return Err(GranularError::corruption(format!(
                        "shard {index} spec disagrees with earlier shards"
                    )));
                }
                _ => {}
            }
            total += reader.len();
            offsets.push(total);
            shards.push(reader);
            shard_dirs.push(dir);
        }

        Ok(Self {
            spec: spec.unwrap_or_else(|| Spec::new(Vec::<(String, String)>::new(), &registry).unwrap()),
            shards,
            shard_dirs,
            offsets,
        })
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn len(&self) -> usize {
        *self.offsets.last().unwrap_or(&0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shards(&self) -> &[PathBuf] {
        &self.shard_dirs
    }

    pub fn size(&self) -> Result<u64> {
        let mut total = 0u64;
        for shard in &self.shards {
            total += shard.size()?;
        }
        Ok(total)
    }

    /// Map a global record index to `(shard position, index within shard)`.
    fn locate(&self, index: i64) -> Result<(usize, usize)> {
        let len = self.len();
        if index < 0 || index as usize >= len {
            return Err(GranularError::Index { index, len });
        }
        let global = index as usize;
        // offsets is sorted and short (one entry per shard); a linear scan
        // avoids pulling in a binary-search edge case for the common
        // few-shards-per-reader case.
        for shard_pos in 0..self.shards.len() {
            if global < self.offsets[shard_pos + 1] {
                return Ok((shard_pos, global - self.offsets[shard_pos]));
            }
        }
        unreachable!("index {global} within len {len} but not located in any shard")
    }

    pub fn get(&mut self, index: i64) -> Result<Record> {
        let (shard_pos, local) = self.locate(index)?;
        self.shards[shard_pos].get(local as i64)
    }

    pub fn get_selected(
        &mut self,
        index: i64,
        selection: &std::collections::BTreeMap<String, Selection>,
    ) -> Result<Record> {
        let (shard_pos, local) = self.locate(index)?;
        self.shards[shard_pos].get_selected(local as i64, selection)
    }

    /// Decode every record in `indices`, in the given order. Each index is
    /// located to its shard first; the per-shard batches are then decoded
    /// through `DatasetReader::get_many`, which is where the `parallel`
    /// feature's Rayon-accelerated decode actually runs.
    pub fn get_many(&mut self, indices: &[i64]) -> Result<Vec<Record>> {
        let mut per_shard: Vec<Vec<(usize, i64)>> = vec![Vec::new(); self.shards.len()];
        for (pos, &index) in indices.iter().enumerate() {
            let (shard_pos, local) = self.locate(index)?;
            per_shard[shard_pos].push((pos, local as i64));
        }

        let mut records: Vec<Option<Record>> = (0..indices.len()).map(|_| None).collect();
        for (shard_pos, entries) in per_shard.into_iter().enumerate() {
            if entries.is_empty() {
                continue;
            }
            let locals: Vec<i64> = entries.iter().map(|(_, local)| *local).collect();
            let decoded = self.shards[shard_pos].get_many(&locals)?;
            for ((pos, _), record) in entries.into_iter().zip(decoded) {
                records[pos] = Some(record);
            }
        }
        Ok(records.into_iter().map(|r| r.expect("every position is assigned to exactly one shard")).collect())
    }
}
