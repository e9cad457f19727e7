//! Codec registry: pure functions mapping declared field types to and from
//! byte sequences.
//!
//! # Identity rules
//!
//! Unlike a frozen on-disk UUID (useful when many different archives need
//! to agree on a codec identity without a shared process), a Granular codec
//! is identified by the *type-string family* named in `spec.json` —
//! `"utf8"`, `"int"`, `"array"`, and so on.
//! The registry itself is never written to disk; it is a value the caller
//! constructs once (`CodecRegistry::builtin()`) and passes explicitly into
//! every `DatasetWriter`/`DatasetReader`/`ShardedDataset*` open call: no
//! mutable global table populated by import side effects, just an explicit,
//! `Clone`-cheap value.
//!
//! # Dispatch
//!
//! A [`FieldCodec`] implementation handles one type family and is handed
//! the fully parsed [`ScalarType`] (carrying parameters like `int(N)`'s
//! width or `array(...)`'s dtype/shape) at both encode and decode time, so
//! one codec instance serves every parameterization of its family.

mod image_codec;
mod mp4;
mod tensor;

pub use tensor::Tensor;

use std::collections::HashMap;

use crate::error::{GranularError, Result};
use crate::spec::{Dtype, ScalarType};

/// The semantic value of one field, passed to encoders and returned by
/// decoders. Which variant is valid for a given field is determined by its
/// `ScalarType` — callers are expected to match the spec, and a mismatch is
/// reported as a `GranularError::Codec`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Bytes(Vec<u8>),
    Int(i64),
    Array(Tensor),
    Msgpack(rmpv::Value),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Int(_) => "int",
            Value::Array(_) => "array",
            Value::Msgpack(_) => "msgpack",
        }
    }
}

/// Encodes/decodes one value of a given (possibly parameterized) scalar
/// type to/from bytes.
pub trait FieldCodec: Send + Sync {
    fn encode(&self, scalar: &ScalarType, value: &Value) -> Result<Vec<u8>>;
    fn decode(&self, scalar: &ScalarType, bytes: &[u8]) -> Result<Value>;
}

/// Returns the family key a `ScalarType` dispatches under. Parameters
/// (`int(N)`'s width, `array(...)`'s dtype/dims) are carried in the
/// `ScalarType` itself and re-read by the codec at encode/decode time.
fn family_key(scalar: &ScalarType) -> &'static str {
    match scalar {
        ScalarType::Utf8 => "utf8",
        ScalarType::Bytes => "bytes",
        ScalarType::Int(_) => "int",
        ScalarType::Array(..) => "array",
        ScalarType::Msgpack => "msgpack",
        ScalarType::Jpg => "jpg",
        ScalarType::Png => "png",
        ScalarType::Mp4 => "mp4",
    }
}

/// An immutable `{type family -> codec}` table. Built once via
/// [`CodecRegistry::builtin`] and shared (cheaply, behind an `Arc` if the
/// caller wants to hand it to multiple threads) across every open Dataset.
pub struct CodecRegistry {
    codecs: HashMap<&'static str, Box<dyn FieldCodec>>,
}

impl CodecRegistry {
    /// The built-in registry: every type family named in the format notes.
    pub fn builtin() -> Self {
        let mut codecs: HashMap<&'static str, Box<dyn FieldCodec>> = HashMap::new();
        codecs.insert("utf8", Box::new(Utf8Codec));
        codecs.insert("bytes", Box::new(BytesCodec));
        codecs.insert("int", Box::new(IntCodec));
        codecs.insert("array", Box::new(ArrayCodec));
        codecs.insert("msgpack", Box::new(MsgpackCodec));
        codecs.insert("jpg", Box::new(image_codec::JpgCodec));
        codecs.insert("png", Box::new(image_codec::PngCodec));
        codecs.insert("mp4", Box::new(mp4::Mp4Codec));
        Self { codecs }
    }

    /// Register (or override) the codec for one type family. Lets a caller
    /// extend the registry with a custom media codec without touching this
    /// crate.
    pub fn register(&mut self, family: &'static str, codec: Box<dyn FieldCodec>) {
        self.codecs.insert(family, codec);
    }

    pub fn check_supported(&self, scalar: &ScalarType) -> Result<()> {
        let key = family_key(scalar);
        if self.codecs.contains_key(key) {
            Ok(())
        } else {
            Err(GranularError::corruption(format!("unsupported type family {key:?}")))
        }
    }

    fn get(&self, scalar: &ScalarType) -> Result<&dyn FieldCodec> {
        let key = family_key(scalar);
        self.codecs
            .get(key)
            .map(|b| b.as_ref())
            .ok_or_else(|| GranularError::corruption(format!("unsupported type family {key:?}")))
    }

    pub fn encode(&self, field: &str, scalar: &ScalarType, value: &Value) -> Result<Vec<u8>> {
        self.get(scalar)?
            .encode(scalar, value)
            .map_err(|e| wrap_field_error(field, e))
    }

    pub fn decode(&self, field: &str, scalar: &ScalarType, bytes: &[u8]) -> Result<Value> {
        self.get(scalar)?
            .decode(scalar, bytes)
            .map_err(|e| wrap_field_error(field, e))
    }
}

fn wrap_field_error(field: &str, err: GranularError) -> GranularError {
    match err {
        GranularError::Codec { source, .. } => GranularError::Codec { field: field.to_string(), source },
        other => other,
    }
}

fn type_mismatch(scalar: &ScalarType, value: &Value) -> GranularError {
    GranularError::Codec {
        field: String::new(),
        source: Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("value {:?} does not match declared type {scalar:?}", value.type_name()),
        )),
    }
}

// ── utf8 ─────────────────────────────────────────────────────────────────────

struct Utf8Codec;

impl FieldCodec for Utf8Codec {
    fn encode(&self, scalar: &ScalarType, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(type_mismatch(scalar, value)),
        }
    }

    fn decode(&self, _scalar: &ScalarType, bytes: &[u8]) -> Result<Value> {
        String::from_utf8(bytes.to_vec())
            .map(Value::Text)
            .map_err(|e| GranularError::Codec { field: String::new(), source: Box::new(e) })
    }
}

// ── bytes ────────────────────────────────────────────────────────────────────

struct BytesCodec;

impl FieldCodec for BytesCodec {
    fn encode(&self, scalar: &ScalarType, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            _ => Err(type_mismatch(scalar, value)),
        }
    }

    fn decode(&self, _scalar: &ScalarType, bytes: &[u8]) -> Result<Value> {
        Ok(Value::Bytes(bytes.to_vec()))
    }
}

// ── int / int(N) ─────────────────────────────────────────────────────────────

struct IntCodec;

impl FieldCodec for IntCodec {
    fn encode(&self, scalar: &ScalarType, value: &Value) -> Result<Vec<u8>> {
        let width = match scalar {
            ScalarType::Int(n) => *n,
            _ => return Err(type_mismatch(scalar, value)),
        };
        let v = match value {
            Value::Int(v) => *v,
            _ => return Err(type_mismatch(scalar, value)),
        };
        if width == 0 || width > 8 {
            return Err(GranularError::Codec {
                field: String::new(),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("int width {width} must be in 1..=8"),
                )),
            });
        }
        Ok(v.to_le_bytes()[..width].to_vec())
    }

    fn decode(&self, scalar: &ScalarType, bytes: &[u8]) -> Result<Value> {
        let width = match scalar {
            ScalarType::Int(n) => *n,
            _ => {
                return Err(GranularError::corruption("int codec invoked with non-int scalar type"));
            }
        };
        if bytes.len() != width {
            return Err(GranularError::corruption(format!(
                "int(width={width}) record has {} bytes",
                bytes.len()
            )));
        }
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(bytes);
        // Sign-extend: if the top bit of the narrow value is set, fill the
        // remaining high bytes with 0xFF before reinterpreting as i64.
        if width < 8 && bytes[width - 1] & 0x80 != 0 {
            for b in &mut buf[width..] {
                *b = 0xFF;
            }
        }
        Ok(Value::Int(i64::from_le_bytes(buf)))
    }
}

// ── array(dtype, dims...) ────────────────────────────────────────────────────

struct ArrayCodec;

impl FieldCodec for ArrayCodec {
    fn encode(&self, scalar: &ScalarType, value: &Value) -> Result<Vec<u8>> {
        let (dtype, dims) = match scalar {
            ScalarType::Array(d, dims) => (*d, dims),
            _ => return Err(type_mismatch(scalar, value)),
        };
        match value {
            Value::Array(tensor) => {
                if tensor.dtype != dtype || tensor.shape != *dims {
                    return Err(GranularError::Codec {
                        field: String::new(),
                        source: Box::new(std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            format!(
                                "tensor shape/dtype {:?}/{:?} does not match declared array({:?},{:?})",
                                tensor.shape, tensor.dtype, dtype, dims
                            ),
                        )),
                    });
                }
                Ok(tensor.data.clone())
            }
            _ => Err(type_mismatch(scalar, value)),
        }
    }

    fn decode(&self, scalar: &ScalarType, bytes: &[u8]) -> Result<Value> {
        let (dtype, dims) = match scalar {
            ScalarType::Array(d, dims) => (*d, dims.clone()),
            _ => return Err(GranularError::corruption("array codec invoked with non-array scalar type")),
        };
        let expected = dtype.byte_width() * dims.iter().product::<usize>();
        if bytes.len() != expected {
            return Err(GranularError::corruption(format!(
                "array record has {} bytes, expected {expected} for shape {dims:?}",
                bytes.len()
            )));
        }
        Ok(Value::Array(Tensor { dtype, shape: dims, data: bytes.to_vec() }))
    }
}

// ── msgpack ──────────────────────────────────────────────────────────────────

struct MsgpackCodec;

impl FieldCodec for MsgpackCodec {
    fn encode(&self, scalar: &ScalarType, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::Msgpack(v) => {
                let mut out = Vec::new();
                rmpv::encode::write_value(&mut out, v).map_err(|e| GranularError::Codec {
                    field: String::new(),
                    source: Box::new(e),
                })?;
                Ok(out)
            }
            _ => Err(type_mismatch(scalar, value)),
        }
    }

    fn decode(&self, _scalar: &ScalarType, bytes: &[u8]) -> Result<Value> {
        let mut cursor = std::io::Cursor::new(bytes);
        let v = rmpv::decode::read_value(&mut cursor).map_err(|e| GranularError::Codec {
            field: String::new(),
            source: Box::new(e),
        })?;
        Ok(Value::Msgpack(v))
    }
}

pub(crate) fn expect_image_tensor<'a>(scalar: &ScalarType, value: &'a Value) -> Result<&'a Tensor> {
    match value {
        Value::Array(t) if t.dtype == Dtype::Uint8 => Ok(t),
        _ => Err(type_mismatch(scalar, value)),
    }
}
