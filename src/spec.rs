//! The Spec: field-name → type-string mapping, and the type-string grammar.
//!
//! Parsed grammar (see format notes):
//!
//! ```text
//! type := "utf8" | "bytes" | "msgpack" | "jpg" | "png" | "mp4"
//!       | "int" | "int(" N ")"
//!       | type "[]"
//!       | "array(" dtype ("," dim)+ ")"
//! dtype := "float16" | "float32" | "float64"
//!        | "uint8" | "uint16" | "uint32" | "uint64"
//!        | "int8" | "int16" | "int32" | "int64" | "bool"
//! ```
//!
//! A trailing `[]` marks a field **variadic**: its Bag holds one record per
//! element and the Dataset's reference entry carries `(start, count)`.
//! Everything else is **scalar**: one Bag record per Dataset record. This
//! classification is fixed at parse time rather than inferred per-use.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::codec::CodecRegistry;
use crate::error::{GranularError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    Float16,
    Float32,
    Float64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Bool,
}

impl Dtype {
    pub fn byte_width(self) -> usize {
        match self {
            Dtype::Float16 | Dtype::Uint16 | Dtype::Int16 => 2,
            Dtype::Float32 | Dtype::Uint32 | Dtype::Int32 => 4,
            Dtype::Float64 | Dtype::Uint64 | Dtype::Int64 => 8,
            Dtype::Uint8 | Dtype::Int8 | Dtype::Bool => 1,
        }
    }

    fn from_name(s: &str) -> Option<Self> {
        Some(match s {
            "float16" => Dtype::Float16,
            "float32" => Dtype::Float32,
            "float64" => Dtype::Float64,
            "uint8" => Dtype::Uint8,
            "uint16" => Dtype::Uint16,
            "uint32" => Dtype::Uint32,
            "uint64" => Dtype::Uint64,
            "int8" => Dtype::Int8,
            "int16" => Dtype::Int16,
            "int32" => Dtype::Int32,
            "int64" => Dtype::Int64,
            "bool" => Dtype::Bool,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Dtype::Float16 => "float16",
            Dtype::Float32 => "float32",
            Dtype::Float64 => "float64",
            Dtype::Uint8 => "uint8",
            Dtype::Uint16 => "uint16",
            Dtype::Uint32 => "uint32",
            Dtype::Uint64 => "uint64",
            Dtype::Int8 => "int8",
            Dtype::Int16 => "int16",
            Dtype::Int32 => "int32",
            Dtype::Int64 => "int64",
            Dtype::Bool => "bool",
        }
    }
}

/// A scalar field type — the element type of a variadic field, or the type
/// of a non-variadic field directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarType {
    Utf8,
    Bytes,
    /// Signed integer of `N` bytes; bare `int` is `Int(8)`.
    Int(usize),
    Array(Dtype, Vec<usize>),
    Msgpack,
    Jpg,
    Png,
    Mp4,
}

/// A field's fully parsed type: scalar (one Bag record per Dataset record)
/// or variadic (one Bag record per element, with `(start, count)` tracked
/// in the reference entry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarType),
    Variadic(ScalarType),
}

impl FieldKind {
    pub fn is_variadic(&self) -> bool {
        matches!(self, FieldKind::Variadic(_))
    }

    pub fn scalar_type(&self) -> &ScalarType {
        match self {
            FieldKind::Scalar(t) | FieldKind::Variadic(t) => t,
        }
    }
}

/// Parse a type-string into its `FieldKind`. Unknown spellings are a
/// corruption error — the caller is opening a spec that names a type this
/// build's registry cannot dispatch.
pub fn parse_type(type_string: &str) -> Result<FieldKind> {
    let s = type_string.trim();
    if let Some(inner) = s.strip_suffix("[]") {
        let scalar = parse_scalar(inner)?;
        return Ok(FieldKind::Variadic(scalar));
    }
    Ok(FieldKind::Scalar(parse_scalar(s)?))
}

fn parse_scalar(s: &str) -> Result<ScalarType> {
    match s {
        "utf8" => return Ok(ScalarType::Utf8),
        "bytes" => return Ok(ScalarType::Bytes),
        "msgpack" => return Ok(ScalarType::Msgpack),
        "jpg" => return Ok(ScalarType::Jpg),
        "png" => return Ok(ScalarType::Png),
        "mp4" => return Ok(ScalarType::Mp4),
        "int" => return Ok(ScalarType::Int(8)),
        _ => {}
    }
    if let Some(inner) = s.strip_prefix("int(").and_then(|r| r.strip_suffix(')')) {
        let n: usize = inner
            .trim()
            .parse()
            .map_err(|_| GranularError::corruption(format!("invalid int(N) width: {s:?}")))?;
        return Ok(ScalarType::Int(n));
    }
    if let Some(inner) = s.strip_prefix("array(").and_then(|r| r.strip_suffix(')')) {
        let mut parts = inner.split(',').map(str::trim);
        let dtype_name = parts
            .next()
            .ok_or_else(|| GranularError::corruption(format!("empty array() type: {s:?}")))?;
        let dtype = Dtype::from_name(dtype_name)
            .ok_or_else(|| GranularError::corruption(format!("unknown array dtype: {dtype_name:?}")))?;
        let dims: std::result::Result<Vec<usize>, _> = parts.map(|p| p.parse::<usize>()).collect();
        let dims = dims.map_err(|_| GranularError::corruption(format!("invalid array dims: {s:?}")))?;
        if dims.is_empty() {
            return Err(GranularError::corruption(format!("array() needs at least one dimension: {s:?}")));
        }
        return Ok(ScalarType::Array(dtype, dims));
    }
    Err(GranularError::corruption(format!("unrecognized type string: {s:?}")))
}

/// Render a `FieldKind` back to its canonical type-string, the inverse of
/// `parse_type`. Used when constructing a `Spec` programmatically.
pub fn render_type(kind: &FieldKind) -> String {
    let body = render_scalar(kind.scalar_type());
    match kind {
        FieldKind::Scalar(_) => body,
        FieldKind::Variadic(_) => format!("{body}[]"),
    }
}

fn render_scalar(t: &ScalarType) -> String {
    match t {
        ScalarType::Utf8 => "utf8".to_string(),
        ScalarType::Bytes => "bytes".to_string(),
        ScalarType::Msgpack => "msgpack".to_string(),
        ScalarType::Jpg => "jpg".to_string(),
        ScalarType::Png => "png".to_string(),
        ScalarType::Mp4 => "mp4".to_string(),
        ScalarType::Int(8) => "int".to_string(),
        ScalarType::Int(n) => format!("int({n})"),
        ScalarType::Array(dtype, dims) => {
            let dims = dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(",");
            format!("array({},{})", dtype.name(), dims)
        }
    }
}

/// The immutable field-name → type mapping for a Dataset.
///
/// Field names are kept in a `BTreeMap` so iteration and on-disk
/// serialization are always in sorted lexicographic order — insertion order
/// is never preserved, by design.
#[derive(Debug, Clone)]
pub struct Spec {
    fields: BTreeMap<String, FieldKind>,
}

impl Spec {
    /// Build and validate a spec from field name → type-string pairs.
    /// Every type string must parse and name a type the registry can
    /// encode/decode.
    pub fn new<I, S1, S2>(fields: I, registry: &CodecRegistry) -> Result<Self>
    where
        I: IntoIterator<Item = (S1, S2)>,
        S1: Into<String>,
        S2: AsRef<str>,
    {
        let mut parsed = BTreeMap::new();
        for (name, type_string) in fields {
            let name = name.into();
            if name.is_empty() {
                return Err(GranularError::type_error("field names must be non-empty"));
            }
            let kind = parse_type(type_string.as_ref())?;
            registry.check_supported(kind.scalar_type())?;
            parsed.insert(name, kind);
        }
        Ok(Self { fields: parsed })
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn kind_of(&self, field: &str) -> Option<&FieldKind> {
        self.fields.get(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Write `spec.json`: field names sorted, type-strings in canonical
    /// form, no other keys.
    pub fn write(&self, dir: &Path) -> Result<()> {
        let mut map = serde_json::Map::new();
        for (name, kind) in &self.fields {
            map.insert(name.clone(), serde_json::Value::String(render_type(kind)));
        }
        let json = serde_json::Value::Object(map);
        fs::write(dir.join("spec.json"), serde_json::to_vec_pretty(&json).unwrap())?;
        Ok(())
    }

    /// Read and validate `spec.json` against `registry`. Unknown types fail
    /// immediately — there is no partial open.
    pub fn read(dir: &Path, registry: &CodecRegistry) -> Result<Self> {
        let bytes = fs::read(dir.join("spec.json"))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| GranularError::corruption(format!("spec.json is not valid JSON: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| GranularError::corruption("spec.json must be a JSON object"))?;
        let mut fields = Vec::with_capacity(object.len());
        for (name, type_value) in object {
            let type_string = type_value
                .as_str()
                .ok_or_else(|| GranularError::corruption(format!("spec.json field {name:?} is not a string")))?;
            fields.push((name.clone(), type_string.to_string()));
        }
        Self::new(fields, registry)
    }

    /// Compare two specs for exact equality of field names and types —
    /// used to reject a Sharded Dataset whose shards disagree.
    pub fn matches(&self, other: &Spec) -> bool {
        self.fields == other.fields
    }
}
