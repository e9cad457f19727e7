//! Raw tensor payload shared by `array(...)`, `jpg`, `png`, and `mp4` —
//! bytes, shape and dtype travel together so a decoder never has to guess
//! what it just read back.

use crate::spec::Dtype;

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    /// Raw little-endian element bytes, `shape.iter().product() *
    /// dtype.byte_width()` long.
    pub data: Vec<u8>,
}

impl Tensor {
    pub fn new(dtype: Dtype, shape: Vec<usize>, data: Vec<u8>) -> Self {
        Self { dtype, shape, data }
    }

    pub fn from_u8(shape: Vec<usize>, data: Vec<u8>) -> Self {
        Self { dtype: Dtype::Uint8, shape, data }
    }

    pub fn from_f32(shape: Vec<usize>, values: Vec<f32>) -> Self {
        let mut data = Vec::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Self { dtype: Dtype::Float32, shape, data }
    }

    /// Build a `float16` tensor from full-precision values, rounding each
    /// one to `half::f16` before packing its 2-byte little-endian bits. The
    /// raw `Vec<u8>` storage has no way to do this narrowing on its own.
    pub fn from_f16(shape: Vec<usize>, values: Vec<f32>) -> Self {
        let mut data = Vec::with_capacity(values.len() * 2);
        for v in values {
            data.extend_from_slice(&half::f16::from_f32(v).to_le_bytes());
        }
        Self { dtype: Dtype::Float16, shape, data }
    }

    /// Decode a `float16` tensor's raw bytes back to full-precision values,
    /// the inverse of `from_f16`.
    pub fn to_f16_values(&self) -> Vec<f32> {
        self.data
            .chunks_exact(2)
            .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.iter().product()
    }
}
