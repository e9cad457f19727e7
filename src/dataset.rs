//! Dataset: a directory of Bags, one per field, decomposing heterogeneous
//! records into homogeneous columns.
//!
//! # Layout
//!
//! ```text
//! <dir>/spec.json   field name -> type-string, canonical form
//! <dir>/refs.bag     one entry per Dataset record: the concatenation, in
//!                    sorted field order, of a (u64_le start, u32_le count)
//!                    pair for every variadic field. Zero bytes per entry
//!                    if the spec has no variadic fields.
//! <dir>/<field>.bag  one record per Dataset record (scalar fields), or the
//!                    concatenated elements of every record (variadic
//!                    fields, indexed into via refs.bag)
//! ```
//!
//! A variadic field's own Bag never stores per-record boundaries — that is
//! exactly what the reference Bag is for, the same separation kept between
//! a block's payload and its structural index elsewhere in this crate.
//! Unlike a scalar field's Bag, a variadic field's Bag length is the total
//! element count across every record, not the record count — only the
//! reference Bag and the scalar fields' Bags are guaranteed to share the
//! Dataset's record count.

use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::bag::{BagReader, BagWriter};
use crate::codec::{CodecRegistry, Value};
use crate::error::{GranularError, Result};
use crate::spec::{FieldKind, ScalarType, Spec};

const REF_ENTRY_SIZE: usize = 12; // u64 start + u32 count

/// One field's worth of a record: a single value for a scalar field, or the
/// ordered list of element values for a variadic field.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Scalar(Value),
    Variadic(Vec<Value>),
}

pub type Record = BTreeMap<String, Field>;

/// What to return for one field of one record under `get_selected`. Fields
/// absent from the selection map default to full inclusion, the same as
/// `get`.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Include (`true`) or omit (`false`) the field entirely. The only
    /// selection kind valid for scalar fields.
    Include(bool),
    /// Include only the elements of a variadic field in this sub-range,
    /// clipped to `[0, count)` the same way `BagReader::get_range` clips.
    /// Using this against a scalar field is a type error.
    Range(Range<i64>),
}

fn field_bag_path(dir: &Path, field: &str) -> PathBuf {
    dir.join(format!("{field}.bag"))
}

fn refs_bag_path(dir: &Path) -> PathBuf {
    dir.join("refs.bag")
}

/// The variadic field names in canonical (sorted) order — the order their
/// `(start, count)` pairs appear within one reference entry.
fn variadic_field_names(spec: &Spec) -> Vec<String> {
    spec.field_names()
        .filter(|name| spec.kind_of(name).unwrap().is_variadic())
        .map(str::to_string)
        .collect()
}

fn decode_ref_entry(bytes: &[u8], variadic_fields: &[String]) -> Result<BTreeMap<String, (u64, u32)>> {
    let expected = REF_ENTRY_SIZE * variadic_fields.len();
    if bytes.len() != expected {
        return Err(GranularError::corruption(format!(
            "reference entry is {} bytes, expected {expected} for {} variadic field(s)",
            bytes.len(),
            variadic_fields.len()
        )));
    }
    let mut cursor = std::io::Cursor::new(bytes);
    let mut out = BTreeMap::new();
    for name in variadic_fields {
        let start = cursor.read_u64::<LittleEndian>()?;
        let count = cursor.read_u32::<LittleEndian>()?;
        out.insert(name.clone(), (start, count));
    }
    Ok(out)
}

fn check_record_keys(spec: &Spec, record: &Record) -> Result<()> {
    let expected: Vec<&str> = spec.field_names().collect();
    if record.len() != expected.len() || expected.iter().any(|f| !record.contains_key(*f)) {
        let given: Vec<&str> = record.keys().map(String::as_str).collect();
        return Err(GranularError::type_error(format!(
            "record keys {given:?} do not match spec fields {expected:?}"
        )));
    }
    Ok(())
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct DatasetWriter {
    dir: PathBuf,
    spec: Spec,
    registry: Arc<CodecRegistry>,
    fields: BTreeMap<String, BagWriter>,
    refs: BagWriter,
    len: usize,
}

impl DatasetWriter {
    /// Create a fresh Dataset directory. `dir` must not already contain a
    /// `spec.json` — callers append to an existing dataset by opening its
    /// shard directory again only through `ShardedDatasetWriter`, never by
    /// re-creating a plain `DatasetWriter` on top of old files.
    pub fn create(dir: impl AsRef<Path>, spec: Spec, registry: Arc<CodecRegistry>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        spec.write(&dir)?;

        let mut fields = BTreeMap::new();
        for name in spec.field_names() {
            fields.insert(name.to_string(), BagWriter::create(field_bag_path(&dir, name))?);
        }
        let refs = BagWriter::create(refs_bag_path(&dir))?;

        Ok(Self { dir, spec, registry, fields, refs, len: 0 })
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size(&self) -> u64 {
        self.fields.values().map(BagWriter::size).sum::<u64>() + self.refs.size()
    }

    /// Append one record. Its keys must exactly match the spec's field
    /// names, and each field's value must be a `Field::Scalar` or
    /// `Field::Variadic` matching the field's declared cardinality.
    pub fn append(&mut self, record: &Record) -> Result<usize> {
        check_record_keys(&self.spec, record)?;
        let mut ref_entry = Vec::with_capacity(REF_ENTRY_SIZE * self.fields.len());
        for name in self.spec.field_names() {
            let kind = self.spec.kind_of(name).unwrap();
            let field_value = &record[name];
            match (kind, field_value) {
                (FieldKind::Scalar(scalar), Field::Scalar(value)) => {
                    let bytes = self.registry.encode(name, scalar, value)?;
                    self.fields.get_mut(name).unwrap().append(&bytes)?;
                }
                (FieldKind::Variadic(scalar), Field::Variadic(items)) => {
                    let bag = self.fields.get_mut(name).unwrap();
                    let start = bag.len() as u64;
                    for item in items {
                        let bytes = self.registry.encode(name, scalar, item)?;
                        bag.append(&bytes)?;
                    }
                    ref_entry.write_u64::<LittleEndian>(start).unwrap();
                    ref_entry.write_u32::<LittleEndian>(items.len() as u32).unwrap();
                }
                (FieldKind::Scalar(_), Field::Variadic(_)) => {
                    return Err(GranularError::type_error(format!("field {name:?} is scalar, got a list")));
                }
                (FieldKind::Variadic(_), Field::Scalar(_)) => {
                    return Err(GranularError::type_error(format!("field {name:?} is variadic, got a single value")));
                }
            }
        }
        self.refs.append(&ref_entry)?;
        self.len += 1;
        Ok(self.len - 1)
    }

    /// Flush and fsync every underlying Bag. Must be called exactly once.
    pub fn close(&mut self) -> Result<()> {
        for bag in self.fields.values_mut() {
            bag.close()?;
        }
        self.refs.close()?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct DatasetReader {
    spec: Spec,
    registry: Arc<CodecRegistry>,
    fields: BTreeMap<String, BagReader>,
    refs: BagReader,
    variadic_fields: Vec<String>,
    len: usize,
}

impl DatasetReader {
    pub fn open(
        dir: impl AsRef<Path>,
        registry: Arc<CodecRegistry>,
        cache_index: bool,
        cache_refs: bool,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let spec = Spec::read(dir, &registry)?;
        let refs = BagReader::open(refs_bag_path(dir), cache_refs)?;
        let len = refs.len();

        let mut fields = BTreeMap::new();
        for name in spec.field_names() {
            let field_reader = BagReader::open(field_bag_path(dir, name), cache_index)?;
            if !spec.kind_of(name).unwrap().is_variadic() && field_reader.len() != len {
                return Err(GranularError::corruption(format!(
                    "scalar field {name:?} has {} records, expected {len}",
                    field_reader.len()
                )));
            }
            fields.insert(name.to_string(), field_reader);
        }

        let variadic_fields = variadic_field_names(&spec);
        Ok(Self { spec, registry, fields, refs, variadic_fields, len })
    }

    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size(&self) -> Result<u64> {
        let mut total = self.refs.size()?;
        for bag in self.fields.values() {
            total += bag.size()?;
        }
        Ok(total)
    }

    fn check_index(&self, index: i64) -> Result<usize> {
        if index < 0 || index as usize >= self.len {
            return Err(GranularError::Index { index, len: self.len });
        }
        Ok(index as usize)
    }

    fn read_variadic(&mut self, field: &str, record_index: usize, range: Option<Range<i64>>) -> Result<Vec<Value>> {
        let entry_bytes = self.refs.get(record_index)?;
        let entries = decode_ref_entry(&entry_bytes, &self.variadic_fields)?;
        let (start, count) = entries[field];
        let count = count as u64;

        let (lo, hi) = match range {
            None => (start, start + count),
            Some(r) => {
                let lo = start + r.start.max(0) as u64;
                let hi = (start + r.end.max(0) as u64).min(start + count);
                (lo.min(start + count), hi)
            }
        };

        let scalar = self.spec.kind_of(field).unwrap().scalar_type().clone();
        let bag = self.fields.get_mut(field).unwrap();
        let raw = bag.get_range(lo as i64..hi as i64)?;
        let mut out = Vec::with_capacity(raw.len());
        for bytes in raw {
            out.push(self.registry.decode(field, &scalar, &bytes)?);
        }
        Ok(out)
    }

    /// Decode every field of record `index`.
    pub fn get(&mut self, index: i64) -> Result<Record> {
        let i = self.check_index(index)?;
        let field_names: Vec<String> = self.spec.field_names().map(str::to_string).collect();
        let mut record = BTreeMap::new();
        for name in field_names {
            let kind = self.spec.kind_of(&name).unwrap().clone();
            let value = match &kind {
                FieldKind::Scalar(scalar) => {
                    let bytes = self.fields.get_mut(&name).unwrap().get(i)?;
                    Field::Scalar(self.registry.decode(&name, scalar, &bytes)?)
                }
                FieldKind::Variadic(_) => Field::Variadic(self.read_variadic(&name, i, None)?),
            };
            record.insert(name, value);
        }
        Ok(record)
    }

    /// Decode a projected subset of record `index`'s fields. `selection` is
    /// an allowlist: fields absent from it are omitted from the result,
    /// exactly like fields explicitly marked `Selection::Include(false)`.
    pub fn get_selected(&mut self, index: i64, selection: &BTreeMap<String, Selection>) -> Result<Record> {
        let i = self.check_index(index)?;
        let field_names: Vec<String> = self.spec.field_names().map(str::to_string).collect();
        let mut record = BTreeMap::new();
        for name in field_names {
            let kind = self.spec.kind_of(&name).unwrap().clone();
            let sel = selection.get(&name);
            match (&kind, sel) {
                (_, None) | (_, Some(Selection::Include(false))) => {}
                (_, Some(Selection::Include(true))) => {
                    let value = match &kind {
                        FieldKind::Scalar(scalar) => {
                            let bytes = self.fields.get_mut(&name).unwrap().get(i)?;
                            Field::Scalar(self.registry.decode(&name, scalar, &bytes)?)
                        }
                        FieldKind::Variadic(_) => Field::Variadic(self.read_variadic(&name, i, None)?),
                    };
                    record.insert(name, value);
                }
                (FieldKind::Scalar(_), Some(Selection::Range(_))) => {
                    return Err(GranularError::type_error(format!(
                        "field {name:?} is scalar; range selection only applies to variadic fields"
                    )));
                }
                (FieldKind::Variadic(_), Some(Selection::Range(r))) => {
                    record.insert(name.clone(), Field::Variadic(self.read_variadic(&name, i, Some(r.clone()))?));
                }
            }
        }
        Ok(record)
    }

    /// Decode every field of every record in `indices`, in the given order.
    ///
    /// Bag reads are always sequential — each `BagReader` owns one
    /// non-reentrant file cursor, so there is no way to fetch two records'
    /// raw bytes from the same field concurrently — but decoding is a pure
    /// function of `(scalar type, bytes)` with no shared state, so once
    /// every raw chunk for the whole batch has been collected, decoding
    /// runs across the `rayon` global pool when the `parallel` feature is
    /// enabled. This is the same split `perf::compress_chunks_parallel`
    /// draws between sequential I/O and parallel compute.
    pub fn get_many(&mut self, indices: &[i64]) -> Result<Vec<Record>> {
        let mut raw = Vec::new();
        for (pos, &index) in indices.iter().enumerate() {
            let i = self.check_index(index)?;
            let field_names: Vec<String> = self.spec.field_names().map(str::to_string).collect();
            for name in field_names {
                let kind = self.spec.kind_of(&name).unwrap().clone();
                match kind {
                    FieldKind::Scalar(scalar) => {
                        let bytes = self.fields.get_mut(&name).unwrap().get(i)?;
                        raw.push((pos, name, RawField { scalar, chunks: vec![bytes], variadic: false }));
                    }
                    FieldKind::Variadic(scalar) => {
                        let entry_bytes = self.refs.get(i)?;
                        let entries = decode_ref_entry(&entry_bytes, &self.variadic_fields)?;
                        let (start, count) = entries[&name];
                        let bag = self.fields.get_mut(&name).unwrap();
                        let chunks = bag.get_range(start as i64..(start + count as u64) as i64)?;
                        raw.push((pos, name, RawField { scalar, chunks, variadic: true }));
                    }
                }
            }
        }

        let registry = &self.registry;

        #[cfg(feature = "parallel")]
        let decoded: Vec<Result<(usize, String, Field)>> = {
            use rayon::prelude::*;
            raw.into_par_iter().map(|(pos, name, rf)| decode_raw_field(registry, pos, name, rf)).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let decoded: Vec<Result<(usize, String, Field)>> =
            raw.into_iter().map(|(pos, name, rf)| decode_raw_field(registry, pos, name, rf)).collect();

        let mut records: Vec<Record> = (0..indices.len()).map(|_| Record::new()).collect();
        for item in decoded {
            let (pos, name, field) = item?;
            records[pos].insert(name, field);
        }
        Ok(records)
    }
}

/// Raw bytes for one field of one record, collected sequentially and
/// decoded afterward — one chunk for a scalar field, the element chunks in
/// order for a variadic field.
struct RawField {
    scalar: ScalarType,
    chunks: Vec<Vec<u8>>,
    variadic: bool,
}

fn decode_raw_field(
    registry: &CodecRegistry,
    pos: usize,
    name: String,
    raw: RawField,
) -> Result<(usize, String, Field)> {
    let field = if raw.variadic {
        let mut items = Vec::with_capacity(raw.chunks.len());
        for bytes in &raw.chunks {
            items.push(registry.decode(&name, &raw.scalar, bytes)?);
        }
        Field::Variadic(items)
    } else {
        Field::Scalar(registry.decode(&name, &raw.scalar, &raw.chunks[0])?)
    };
    Ok((pos, name, field))
}
