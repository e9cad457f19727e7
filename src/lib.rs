//! # granular — random-access storage for large heterogeneous record datasets
//!
//! Format guarantees:
//! - Every numeric field on disk is little-endian except the `mp4` codec's
//!   box framing, which uses the big-endian framing every ISO-BMFF reader
//!   expects
//! - A Bag is append-only and self-contained: payload bytes followed by a
//!   trailing offset index and record count, reconstructible from the file
//!   alone
//! - A Dataset's `spec.json` is the single source of truth for field names
//!   and types; opening a Dataset against a registry that cannot decode one
//!   of its types fails immediately, not on first access to that field
//! - A Sharded Dataset never shares mutable state between writers — two
//!   writers with disjoint `(shard_start, shard_step)` residues never touch
//!   the same shard directory
//! - The codec registry is an explicit value passed into every open call,
//!   never a process-global table

pub mod bag;
pub mod codec;
pub mod dataset;
pub mod error;
pub mod sharded;
pub mod spec;

pub use bag::{BagReader, BagWriter};
pub use codec::{CodecRegistry, FieldCodec, Tensor, Value};
pub use dataset::{DatasetReader, DatasetWriter, Field, Record, Selection};
pub use error::{GranularError, Result};
pub use sharded::{ShardLimits, ShardedDatasetReader, ShardedDatasetWriter};
pub use spec::{Dtype, FieldKind, ScalarType, Spec};
