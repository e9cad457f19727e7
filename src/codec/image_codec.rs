//! `jpg` and `png` codecs: a Tensor of shape `(height, width, channels)` and
//! dtype `uint8`, delegated to the `image` crate for the actual container
//! format instead of hand-rolling JFIF/DEFLATE the way `mp4.rs` hand-rolls
//! its box framing — these are real, widely-consumed container formats with
//! a mature crate, unlike the synthetic video container below.

use std::io::Cursor;

use image::{ColorType, DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb, Rgba};

use super::{expect_image_tensor, FieldCodec, Tensor, Value};
use crate::error::{GranularError, Result};
use crate::spec::ScalarType;

fn decode_error(source: image::ImageError) -> GranularError {
    GranularError::Codec { field: String::new(), source: Box::new(source) }
}

fn tensor_to_dynamic_image(tensor: &Tensor) -> Result<DynamicImage> {
    if tensor.shape.len() != 3 {
        return Err(GranularError::type_error(format!(
            "image tensor must be rank 3 (height, width, channels), got shape {:?}",
            tensor.shape
        )));
    }
    let [height, width, channels] = [tensor.shape[0], tensor.shape[1], tensor.shape[2]];
    let expected = height * width * channels;
    if tensor.data.len() != expected {
        return Err(GranularError::corruption(format!(
            "image tensor declares {expected} bytes but carries {}",
            tensor.data.len()
        )));
    }
    match channels {
        1 => ImageBuffer::<Luma<u8>, _>::from_raw(width as u32, height as u32, tensor.data.clone())
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| GranularError::corruption("image buffer dimensions do not fit pixel data")),
        3 => ImageBuffer::<Rgb<u8>, _>::from_raw(width as u32, height as u32, tensor.data.clone())
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| GranularError::corruption("image buffer dimensions do not fit pixel data")),
        4 => ImageBuffer::<Rgba<u8>, _>::from_raw(width as u32, height as u32, tensor.data.clone())
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| GranularError::corruption("image buffer dimensions do not fit pixel data")),
        n => Err(GranularError::type_error(format!("unsupported channel count {n}, expected 1, 3 or 4"))),
    }
}

fn dynamic_image_to_tensor(img: DynamicImage) -> Tensor {
    let width = img.width() as usize;
    let height = img.height() as usize;
    match img.color() {
        ColorType::L8 => Tensor::from_u8(vec![height, width, 1], img.into_luma8().into_raw()),
        ColorType::Rgba8 => Tensor::from_u8(vec![height, width, 4], img.into_rgba8().into_raw()),
        _ => Tensor::from_u8(vec![height, width, 3], img.into_rgb8().into_raw()),
    }
}

pub(super) struct JpgCodec;

impl FieldCodec for JpgCodec {
    fn encode(&self, scalar: &ScalarType, value: &Value) -> Result<Vec<u8>> {
        let tensor = expect_image_tensor(scalar, value)?;
        if tensor.shape.get(2) != Some(&3) {
            return Err(GranularError::type_error("jpg encoding requires a 3-channel (RGB) tensor"));
        }
        let image = tensor_to_dynamic_image(tensor)?;
        let mut out = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
            .map_err(decode_error)?;
        Ok(out)
    }

    fn decode(&self, _scalar: &ScalarType, bytes: &[u8]) -> Result<Value> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg).map_err(decode_error)?;
        let tensor = dynamic_image_to_tensor(image.into_rgb8().into());
        Ok(Value::Array(Tensor::from_u8(tensor.shape, tensor.data)))
    }
}

pub(super) struct PngCodec;

impl FieldCodec for PngCodec {
    fn encode(&self, scalar: &ScalarType, value: &Value) -> Result<Vec<u8>> {
        let tensor = expect_image_tensor(scalar, value)?;
        match tensor.shape.get(2) {
            Some(3) | Some(4) => {}
            _ => return Err(GranularError::type_error("png encoding requires a 3- or 4-channel tensor")),
        }
        let image = tensor_to_dynamic_image(tensor)?;
        let mut out = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(decode_error)?;
        Ok(out)
    }

    fn decode(&self, _scalar: &ScalarType, bytes: &[u8]) -> Result<Value> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Png).map_err(decode_error)?;
        let tensor = dynamic_image_to_tensor(image);
        Ok(Value::Array(tensor))
    }
}
