//! `mp4` codec: a minimal, hand-rolled ISO-BMFF-style box container.
//!
//! This is deliberately not a real H.264/MP4 encoder — there is no general,
//! dependency-light way to produce standards-compliant H.264 bitstreams from
//! raw frames without linking a system codec library, and fabricating calls
//! against an unverified crate API for it would be worse than admitting the
//! limitation. Instead this stores the same content real MP4 muxing would
//! need (raw RGB frames plus their shape) inside real ISO-BMFF box framing —
//! big-endian `u32` size + 4-byte type tag, the convention every real
//! `.mp4`/`.mov` parser expects — so the container is genuine even though the
//! payload codec is not. Round-trips losslessly; does not open in a video
//! player.
//!
//! Box layout:
//!
//! ```text
//! "ftyp" box: size(4) "ftyp" "gran"(4) minor_version=0(4) "gran"(4)
//! "gdim" box: size(4) "gdim" frames(4) height(4) width(4) channels(4)
//! "mdat" box: size(4) "mdat" <frames * height * width * channels bytes, raw u8>
//! ```
//!
//! Note the box header's own big-endian framing is unrelated to — and not to
//! be confused with — the little-endian framing the rest of this crate uses
//! for Bag records; box layouts the world already parses this way are
//! reproduced as the world has them, not reinvented to match.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use super::{expect_image_tensor, FieldCodec, Tensor, Value};
use crate::error::{GranularError, Result};
use crate::spec::ScalarType;

fn write_box(out: &mut Vec<u8>, tag: &[u8; 4], body: &[u8]) {
    out.write_u32::<BigEndian>((8 + body.len()) as u32).unwrap();
    out.extend_from_slice(tag);
    out.extend_from_slice(body);
}

fn read_box(cursor: &mut Cursor<&[u8]>) -> Result<([u8; 4], Vec<u8>)> {
    let size = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| GranularError::corruption("mp4 box truncated before size"))? as usize;
    let mut tag = [0u8; 4];
    cursor
        .read_exact(&mut tag)
        .map_err(|_| GranularError::corruption("mp4 box truncated before tag"))?;
    if size < 8 {
        return Err(GranularError::corruption(format!("mp4 box {tag:?} declares impossible size {size}")));
    }
    let mut body = vec![0u8; size - 8];
    cursor
        .read_exact(&mut body)
        .map_err(|_| GranularError::corruption(format!("mp4 box {tag:?} body truncated")))?;
    Ok((tag, body))
}

pub(super) struct Mp4Codec;

impl FieldCodec for Mp4Codec {
    fn encode(&self, scalar: &ScalarType, value: &Value) -> Result<Vec<u8>> {
        let tensor = expect_image_tensor(scalar, value)?;
        if tensor.shape.len() != 4 {
            return Err(GranularError::type_error(format!(
                "mp4 encoding requires a rank-4 tensor (frames, height, width, channels), got shape {:?}",
                tensor.shape
            )));
        }
        let [frames, height, width, channels] =
            [tensor.shape[0], tensor.shape[1], tensor.shape[2], tensor.shape[3]];
        let expected = frames * height * width * channels;
        if tensor.data.len() != expected {
            return Err(GranularError::corruption(format!(
                "mp4 tensor declares {expected} bytes but carries {}",
                tensor.data.len()
            )));
        }

        let mut out = Vec::new();
        let mut ftyp_body = Vec::new();
        ftyp_body.extend_from_slice(b"gran");
        ftyp_body.write_u32::<BigEndian>(0).unwrap();
        ftyp_body.extend_from_slice(b"gran");
        write_box(&mut out, b"ftyp", &ftyp_body);

        let mut gdim_body = Vec::new();
        for dim in [frames, height, width, channels] {
            gdim_body.write_u32::<BigEndian>(dim as u32).unwrap();
        }
        write_box(&mut out, b"gdim", &gdim_body);

        write_box(&mut out, b"mdat", &tensor.data);
        Ok(out)
    }

    fn decode(&self, _scalar: &ScalarType, bytes: &[u8]) -> Result<Value> {
        let mut cursor = Cursor::new(bytes);

        let (tag, ftyp_body) = read_box(&mut cursor)?;
        if &tag != b"ftyp" || ftyp_body.get(..4) != Some(&b"gran"[..]) {
            return Err(GranularError::corruption("mp4 payload missing gran ftyp box"));
        }

        let (tag, gdim_body) = read_box(&mut cursor)?;
        if &tag != b"gdim" || gdim_body.len() != 16 {
            return Err(GranularError::corruption("mp4 payload missing gdim box"));
        }
        let mut dim_reader = Cursor::new(&gdim_body[..]);
        let frames = dim_reader.read_u32::<BigEndian>()? as usize;
        let height = dim_reader.read_u32::<BigEndian>()? as usize;
        let width = dim_reader.read_u32::<BigEndian>()? as usize;
        let channels = dim_reader.read_u32::<BigEndian>()? as usize;

        let (tag, mdat_body) = read_box(&mut cursor)?;
        if &tag != b"mdat" {
            return Err(GranularError::corruption("mp4 payload missing mdat box"));
        }
        let expected = frames * height * width * channels;
        if mdat_body.len() != expected {
            return Err(GranularError::corruption(format!(
                "mp4 mdat declares {} bytes, expected {expected} for shape [{frames},{height},{width},{channels}]",
                mdat_body.len()
            )));
        }

        Ok(Value::Array(Tensor::from_u8(vec![frames, height, width, channels], mdat_body)))
    }
}
