//! Error taxonomy shared by every layer (Bag, Spec, Dataset, Sharded Dataset).
//!
//! One crate-wide `thiserror` enum rather than a per-module one, since every
//! layer here ultimately surfaces the same five semantic kinds: corruption,
//! type mismatch, out-of-range index, I/O, and codec failure.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GranularError {
    /// File tail inconsistent, offset out of bounds, reference entry points
    /// past a Bag, spec disagreement across shards, unknown type-string.
    #[error("corrupt: {0}")]
    Corruption(String),

    /// Record keys disagree with spec at append; projection uses a
    /// non-boolean on a scalar field; projection uses a range on a scalar
    /// field.
    #[error("type error: {0}")]
    Type(String),

    /// Integer index outside `[0, len)`. Only raised for single-index
    /// access — range access clips silently and never raises this.
    #[error("index {index} out of range for length {len}")]
    Index { index: i64, len: usize },

    /// Underlying filesystem failure, surfaced verbatim.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// An encoder or decoder rejected its input. The field name is attached
    /// so callers can tell which column misbehaved.
    #[error("codec error on field {field:?}: {source}")]
    Codec {
        field: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl GranularError {
    pub fn corruption(msg: impl Into<String>) -> Self {
        GranularError::Corruption(msg.into())
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        GranularError::Type(msg.into())
    }

    pub fn codec(field: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        GranularError::Codec { field: field.into(), source: Box::new(source) }
    }
}

pub type Result<T> = std::result::Result<T, GranularError>;
