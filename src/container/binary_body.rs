//! Alternate fixed binary body for very large models.
//!
//! Denser than the structured text body: a marker, a format version, a
//! coordinate width selector, a length-prefixed JSON metadata block, cell
//! counts, then flat fixed-width little-endian coordinate records (voxels
//! first, then supports), and a trailing CRC32 over everything after the
//! marker. Width 2 is chosen automatically when every coordinate component
//! fits in an i16.

use crate::body::Model;
use crate::grid::{SubVoxelKey, VoxelKey};
use crate::pacing::{Cancelled, PaceFn, Progress, StepControl, COORD_PARSE_CHUNK};
use crate::scale::ScaleSetting;
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const BINARY_BODY_MARKER: &[u8; 4] = b"VXBB";
pub const BINARY_BODY_VERSION: u8 = 1;

const WIDTH_I16: u8 = 2;
const WIDTH_I32: u8 = 4;

#[derive(Debug)]
pub enum BinaryBodyError {
    TooShort,
    BadMarker,
    UnsupportedVersion(u8),
    BadWidth(u8),
    Metadata(serde_json::Error),
    Truncated,
    ChecksumMismatch,
    Cancelled(Cancelled),
}

impl fmt::Display for BinaryBodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "binary body shorter than its fixed header"),
            Self::BadMarker => write!(f, "binary body marker mismatch"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported binary body version {v}"),
            Self::BadWidth(w) => write!(f, "invalid coordinate width selector {w}"),
            Self::Metadata(err) => write!(f, "binary body metadata block: {err}"),
            Self::Truncated => write!(f, "binary body record area truncated"),
            Self::ChecksumMismatch => write!(f, "binary body checksum mismatch"),
            Self::Cancelled(_) => write!(f, "binary body decode cancelled"),
        }
    }
}

impl std::error::Error for BinaryBodyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Metadata(err) => Some(err),
            Self::Cancelled(err) => Some(err),
            _ => None,
        }
    }
}

/// Scalar fields of the model, carried as one small JSON block so the record
/// area stays flat and fixed-width.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinaryMeta {
    version: u32,
    kind: String,
    color: String,
    edges_visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scale: Option<ScaleSetting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mm_per_unit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_side_mm: Option<f64>,
}

pub fn is_binary_body(bytes: &[u8]) -> bool {
    bytes.len() >= BINARY_BODY_MARKER.len() && &bytes[..4] == BINARY_BODY_MARKER
}

fn fits_i16(model: &Model) -> bool {
    let ok = |v: i32| v >= i16::MIN as i32 && v <= i16::MAX as i32;
    model
        .voxels
        .iter()
        .all(|k| ok(k.x) && ok(k.y) && ok(k.z))
        && model
            .supports
            .iter()
            .all(|k| ok(k.x) && ok(k.y) && ok(k.z))
}

fn push_component(out: &mut Vec<u8>, value: i32, width: u8) {
    if width == WIDTH_I16 {
        out.extend_from_slice(&(value as i16).to_le_bytes());
    } else {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Encode a model into the binary body layout. Records are written in
/// canonical key order so equal models produce identical bytes.
pub fn encode_binary_body(model: &Model) -> Vec<u8> {
    let width = if fits_i16(model) { WIDTH_I16 } else { WIDTH_I32 };

    let meta = BinaryMeta {
        version: model.version,
        kind: model.kind.clone(),
        color: model.color.clone(),
        edges_visible: model.edges_visible,
        scale: model.scale,
        mm_per_unit: model.mm_per_unit,
        max_side_mm: model.max_side_mm,
    };
    // In-memory serialization of a well-formed struct cannot fail.
    let meta_bytes = serde_json::to_vec(&meta).unwrap_or_default();

    let mut voxels: Vec<VoxelKey> = model.voxels.iter().copied().collect();
    voxels.sort_unstable();
    let mut supports: Vec<SubVoxelKey> = model.supports.iter().copied().collect();
    supports.sort_unstable();

    let record_bytes = (voxels.len() + supports.len()) * 3 * width as usize;
    let mut body =
        Vec::with_capacity(2 + 4 + meta_bytes.len() + 8 + record_bytes);
    body.push(BINARY_BODY_VERSION);
    body.push(width);
    body.extend_from_slice(&(meta_bytes.len() as u32).to_le_bytes());
    body.extend_from_slice(&meta_bytes);
    body.extend_from_slice(&(voxels.len() as u32).to_le_bytes());
    body.extend_from_slice(&(supports.len() as u32).to_le_bytes());
    for key in &voxels {
        push_component(&mut body, key.x, width);
        push_component(&mut body, key.y, width);
        push_component(&mut body, key.z, width);
    }
    for key in &supports {
        push_component(&mut body, key.x, width);
        push_component(&mut body, key.y, width);
        push_component(&mut body, key.z, width);
    }

    let mut hasher = Hasher::new();
    hasher.update(&body);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(4 + body.len() + 4);
    out.extend_from_slice(BINARY_BODY_MARKER);
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], BinaryBodyError> {
        if self.pos + n > self.bytes.len() {
            return Err(BinaryBodyError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, BinaryBodyError> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32, BinaryBodyError> {
        let slice = self.take(4)?;
        Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    fn take_component(&mut self, width: u8) -> Result<i32, BinaryBodyError> {
        if width == WIDTH_I16 {
            let slice = self.take(2)?;
            Ok(i16::from_le_bytes([slice[0], slice[1]]) as i32)
        } else {
            let slice = self.take(4)?;
            Ok(i32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
        }
    }
}

/// Decode a binary body into a model, pacing through the record area.
pub fn decode_binary_body(bytes: &[u8], pace: &mut PaceFn) -> Result<Model, BinaryBodyError> {
    if bytes.len() < 4 + 2 + 4 + 8 + 4 {
        return Err(BinaryBodyError::TooShort);
    }
    if !is_binary_body(bytes) {
        return Err(BinaryBodyError::BadMarker);
    }

    let crc_offset = bytes.len() - 4;
    let stored_crc = u32::from_le_bytes([
        bytes[crc_offset],
        bytes[crc_offset + 1],
        bytes[crc_offset + 2],
        bytes[crc_offset + 3],
    ]);
    let mut hasher = Hasher::new();
    hasher.update(&bytes[4..crc_offset]);
    if hasher.finalize() != stored_crc {
        return Err(BinaryBodyError::ChecksumMismatch);
    }

    let mut cursor = Cursor {
        bytes: &bytes[..crc_offset],
        pos: 4,
    };
    let version = cursor.take_u8()?;
    if version != BINARY_BODY_VERSION {
        return Err(BinaryBodyError::UnsupportedVersion(version));
    }
    let width = cursor.take_u8()?;
    if width != WIDTH_I16 && width != WIDTH_I32 {
        return Err(BinaryBodyError::BadWidth(width));
    }

    let meta_len = cursor.take_u32()? as usize;
    let meta_bytes = cursor.take(meta_len)?;
    let meta: BinaryMeta = serde_json::from_slice(meta_bytes).map_err(BinaryBodyError::Metadata)?;

    let voxel_count = cursor.take_u32()? as usize;
    let support_count = cursor.take_u32()? as usize;
    let total = voxel_count + support_count;

    // Counts come from the payload and the checksum is not keyed, so they
    // must be checked against the bytes actually present before a single
    // byte is allocated for them.
    let record_bytes = total
        .checked_mul(3 * width as usize)
        .ok_or(BinaryBodyError::Truncated)?;
    if record_bytes != cursor.bytes.len() - cursor.pos {
        return Err(BinaryBodyError::Truncated);
    }

    let mut model = Model {
        version: meta.version,
        kind: meta.kind,
        color: meta.color,
        edges_visible: meta.edges_visible,
        scale: meta.scale,
        mm_per_unit: meta.mm_per_unit,
        max_side_mm: meta.max_side_mm,
        ..Model::default()
    };
    model.voxels.reserve(voxel_count);
    model.supports.reserve(support_count);

    let mut done = 0usize;
    let mut pace_step = |done: usize| -> Result<(), BinaryBodyError> {
        let verdict = pace(Progress {
            done,
            total: Some(total),
        });
        if verdict == StepControl::Cancel {
            return Err(BinaryBodyError::Cancelled(Cancelled));
        }
        Ok(())
    };

    for i in 0..voxel_count {
        let x = cursor.take_component(width)?;
        let y = cursor.take_component(width)?;
        let z = cursor.take_component(width)?;
        model.voxels.insert(VoxelKey::new(x, y, z));
        done += 1;
        if (i + 1) % COORD_PARSE_CHUNK == 0 {
            pace_step(done)?;
        }
    }
    for i in 0..support_count {
        let x = cursor.take_component(width)?;
        let y = cursor.take_component(width)?;
        let z = cursor.take_component(width)?;
        model.supports.insert(SubVoxelKey::new(x, y, z));
        done += 1;
        if (i + 1) % COORD_PARSE_CHUNK == 0 {
            pace_step(done)?;
        }
    }
    pace_step(done)?;

    Ok(model)
}
