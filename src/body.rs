//! Versioned structural body of a saved model.
//!
//! The body is JSON with an explicit integer `version` discriminant. Five
//! historical shapes overlap; each is a concrete struct here with one
//! normalization function into the runtime [`Model`]. Bodies carrying only a
//! coordinate array and no version tag are the implicit legacy snapshot
//! format, treated as version 0.

use crate::grid::{SubVoxelKey, VoxelKey};
use crate::pacing::{self, Cancelled, PaceFn, Progress, StepControl};
use crate::scale::ScaleSetting;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

pub const BODY_VERSION: u32 = 5;
pub const MODEL_KIND: &str = "voxel-model";
pub const DEFAULT_COLOR: &str = "#9e9e9e";

/// Models with at least this many cells build their body text incrementally
/// in paced chunks instead of one serde pass.
pub const LARGE_MODEL_CELLS: usize = 10_000;

#[derive(Debug)]
pub enum BodyError {
    Json(serde_json::Error),
    UnsupportedVersion(u32),
}

impl fmt::Display for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(err) => write!(f, "body is not valid structured text: {err}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported body version {v}"),
        }
    }
}

impl std::error::Error for BodyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::UnsupportedVersion(_) => None,
        }
    }
}

impl From<serde_json::Error> for BodyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

/// Unversioned legacy snapshot: a bare coordinate array.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotV0 {
    #[serde(alias = "cubes")]
    pub voxels: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BodyV1 {
    pub version: u32,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(alias = "cubes")]
    pub voxels: Vec<String>,
}

/// Shape shared by versions 2 and 3: adds model color and edge visibility.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyV2 {
    pub version: u32,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub edges_visible: Option<bool>,
    #[serde(alias = "cubes")]
    pub voxels: Vec<String>,
}

/// Shape shared by versions 4 and 5: adds the support array, the scale
/// setting, and the convenience scale fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyV4 {
    pub version: u32,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub edges_visible: Option<bool>,
    #[serde(alias = "cubes")]
    pub voxels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleSetting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mm_per_unit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_side_mm: Option<f64>,
}

/// Tagged union over every accepted body shape.
#[derive(Clone, Debug)]
pub enum VersionedBody {
    V0(SnapshotV0),
    V1(BodyV1),
    V2(BodyV2),
    V3(BodyV2),
    V4(BodyV4),
    V5(BodyV4),
}

impl VersionedBody {
    /// Full structured parse of a body. The version discriminant selects the
    /// shape; a missing discriminant selects the version-0 snapshot.
    pub fn from_json(bytes: &[u8]) -> Result<Self, BodyError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let version = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as u32;
        match version {
            0 => Ok(Self::V0(serde_json::from_value(value)?)),
            1 => Ok(Self::V1(serde_json::from_value(value)?)),
            2 => Ok(Self::V2(serde_json::from_value(value)?)),
            3 => Ok(Self::V3(serde_json::from_value(value)?)),
            4 => Ok(Self::V4(serde_json::from_value(value)?)),
            5 => Ok(Self::V5(serde_json::from_value(value)?)),
            other => Err(BodyError::UnsupportedVersion(other)),
        }
    }
}

/// Per-model cell counts, handed to the persistence collaborator alongside
/// the encoded envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellCounts {
    pub voxels: usize,
    pub supports: usize,
}

/// Normalized in-memory model, independent of which body shape it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    pub version: u32,
    pub kind: String,
    pub color: String,
    pub edges_visible: bool,
    pub voxels: HashSet<VoxelKey>,
    pub supports: HashSet<SubVoxelKey>,
    pub scale: Option<ScaleSetting>,
    pub mm_per_unit: Option<f64>,
    pub max_side_mm: Option<f64>,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            version: BODY_VERSION,
            kind: MODEL_KIND.to_string(),
            color: DEFAULT_COLOR.to_string(),
            edges_visible: true,
            voxels: HashSet::new(),
            supports: HashSet::new(),
            scale: None,
            mm_per_unit: None,
            max_side_mm: None,
        }
    }
}

/// Malformed coordinate tokens are skipped, not fatal.
fn parse_voxel_keys(raw: &[String]) -> HashSet<VoxelKey> {
    raw.iter().filter_map(|s| VoxelKey::parse(s)).collect()
}

fn parse_sub_keys(raw: &[String]) -> HashSet<SubVoxelKey> {
    raw.iter().filter_map(|s| SubVoxelKey::parse(s)).collect()
}

impl Model {
    pub fn normalize(body: VersionedBody) -> Self {
        match body {
            VersionedBody::V0(b) => Self::normalize_v0(b),
            VersionedBody::V1(b) => Self::normalize_v1(b),
            VersionedBody::V2(b) => Self::normalize_v2_v3(b, 2),
            VersionedBody::V3(b) => Self::normalize_v2_v3(b, 3),
            VersionedBody::V4(b) => Self::normalize_v4_v5(b, 4),
            VersionedBody::V5(b) => Self::normalize_v4_v5(b, 5),
        }
    }

    fn normalize_v0(body: SnapshotV0) -> Self {
        Self {
            version: 0,
            voxels: parse_voxel_keys(&body.voxels),
            ..Self::default()
        }
    }

    fn normalize_v1(body: BodyV1) -> Self {
        Self {
            version: 1,
            kind: body.kind.unwrap_or_else(|| MODEL_KIND.to_string()),
            voxels: parse_voxel_keys(&body.voxels),
            ..Self::default()
        }
    }

    fn normalize_v2_v3(body: BodyV2, version: u32) -> Self {
        Self {
            version,
            kind: body.kind.unwrap_or_else(|| MODEL_KIND.to_string()),
            color: body.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            edges_visible: body.edges_visible.unwrap_or(true),
            voxels: parse_voxel_keys(&body.voxels),
            ..Self::default()
        }
    }

    fn normalize_v4_v5(body: BodyV4, version: u32) -> Self {
        Self {
            version,
            kind: body.kind.unwrap_or_else(|| MODEL_KIND.to_string()),
            color: body.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            edges_visible: body.edges_visible.unwrap_or(true),
            voxels: parse_voxel_keys(&body.voxels),
            supports: body.supports.as_deref().map(parse_sub_keys).unwrap_or_default(),
            scale: body.scale,
            mm_per_unit: body.mm_per_unit,
            max_side_mm: body.max_side_mm,
        }
    }

    pub fn cell_counts(&self) -> CellCounts {
        CellCounts {
            voxels: self.voxels.len(),
            supports: self.supports.len(),
        }
    }

    fn sorted_voxel_strings(&self) -> Vec<String> {
        let mut keys: Vec<VoxelKey> = self.voxels.iter().copied().collect();
        keys.sort_unstable();
        keys.iter().map(VoxelKey::to_string).collect()
    }

    fn sorted_support_strings(&self) -> Vec<String> {
        let mut keys: Vec<SubVoxelKey> = self.supports.iter().copied().collect();
        keys.sort_unstable();
        keys.iter().map(SubVoxelKey::to_string).collect()
    }

    /// Serialize to the current (version 5) body text.
    ///
    /// Small models go through serde in one step. Large models append the
    /// coordinate arrays in fixed-size chunks, consulting the pace callback
    /// between chunks. Cell order is canonical either way, so the same model
    /// always produces the same bytes.
    pub fn to_body_bytes(&self, pace: &mut PaceFn) -> Result<Vec<u8>, Cancelled> {
        let voxels = self.sorted_voxel_strings();
        let supports = self.sorted_support_strings();

        if voxels.len() + supports.len() < LARGE_MODEL_CELLS {
            let body = BodyV4 {
                version: BODY_VERSION,
                kind: Some(self.kind.clone()),
                color: Some(self.color.clone()),
                edges_visible: Some(self.edges_visible),
                voxels,
                supports: if supports.is_empty() {
                    None
                } else {
                    Some(supports)
                },
                scale: self.scale,
                mm_per_unit: self.mm_per_unit,
                max_side_mm: self.max_side_mm,
            };
            // In-memory serialization of a well-formed struct cannot fail.
            return Ok(serde_json::to_vec(&body).unwrap_or_default());
        }

        self.build_large_body(&voxels, &supports, pace)
    }

    fn build_large_body(
        &self,
        voxels: &[String],
        supports: &[String],
        pace: &mut PaceFn,
    ) -> Result<Vec<u8>, Cancelled> {
        let total = voxels.len() + supports.len();
        let mut done = 0usize;
        // Keys average ~10 bytes plus quotes and comma.
        let mut out = String::with_capacity(total * 13 + 256);

        out.push_str(&format!(
            "{{\"version\":{},\"kind\":{},\"color\":{},\"edgesVisible\":{}",
            BODY_VERSION,
            json_string(&self.kind),
            json_string(&self.color),
            self.edges_visible
        ));

        out.push_str(",\"voxels\":[");
        append_key_array(&mut out, voxels, &mut done, total, pace)?;
        out.push(']');

        if !supports.is_empty() {
            out.push_str(",\"supports\":[");
            append_key_array(&mut out, supports, &mut done, total, pace)?;
            out.push(']');
        }

        if let Some(scale) = &self.scale {
            out.push_str(",\"scale\":");
            out.push_str(&serde_json::to_string(scale).unwrap_or_default());
        }
        if let Some(mm_per_unit) = self.mm_per_unit {
            out.push_str(&format!(",\"mmPerUnit\":{mm_per_unit}"));
        }
        if let Some(max_side_mm) = self.max_side_mm {
            out.push_str(&format!(",\"maxSideMm\":{max_side_mm}"));
        }
        out.push('}');
        Ok(out.into_bytes())
    }

    /// SHA-256 hex over the canonical body bytes; stable for a given model.
    pub fn fingerprint(&self) -> String {
        let bytes = self
            .to_body_bytes(&mut pacing::run_to_completion)
            .unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        let mut hex = String::with_capacity(64);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        hex
    }
}

fn json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn append_key_array(
    out: &mut String,
    keys: &[String],
    done: &mut usize,
    total: usize,
    pace: &mut PaceFn,
) -> Result<(), Cancelled> {
    let mut first = true;
    for chunk in keys.chunks(pacing::TEXT_BUILD_CHUNK) {
        for key in chunk {
            if !first {
                out.push(',');
            }
            first = false;
            out.push('"');
            out.push_str(key);
            out.push('"');
        }
        *done += chunk.len();
        let verdict = pace(Progress {
            done: *done,
            total: Some(total),
        });
        if verdict == StepControl::Cancel {
            return Err(Cancelled);
        }
    }
    Ok(())
}
