//! Fast structural parser for decoded body bytes.
//!
//! Generic JSON parsing is the dominant load cost for models with hundreds
//! of thousands of cells, so the fast path scans the byte buffer for the
//! known field-name literals and hand-rolls minimal value readers, parsing
//! the coordinate arrays directly into the occupancy sets without building
//! a document tree. When the fast path cannot locate the coordinate array
//! it falls back to a full structured parse — correctness over speed.

use crate::body::{BodyError, Model, VersionedBody, BODY_VERSION};
use crate::container::binary_body::{self, BinaryBodyError};
use crate::grid::{SubVoxelKey, VoxelKey};
use crate::pacing::{Cancelled, PaceFn, Progress, StepControl, COORD_PARSE_CHUNK};
use crate::scale::ScaleSetting;
use std::fmt;

#[derive(Debug)]
pub enum BodyParseError {
    Structured(BodyError),
    Binary(BinaryBodyError),
    Cancelled(Cancelled),
}

impl fmt::Display for BodyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured(err) => write!(f, "{err}"),
            Self::Binary(err) => write!(f, "{err}"),
            Self::Cancelled(_) => write!(f, "body parse cancelled"),
        }
    }
}

impl std::error::Error for BodyParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Structured(err) => Some(err),
            Self::Binary(err) => Some(err),
            Self::Cancelled(err) => Some(err),
        }
    }
}

/// Parse decoded body bytes into a model.
///
/// Dispatches on the binary-body marker first; otherwise runs the byte-scan
/// fast path, and falls back to a full structured parse when the fast
/// path's assumptions do not hold (unexpected or legacy payload shapes).
pub fn parse_body(bytes: &[u8], pace: &mut PaceFn) -> Result<Model, BodyParseError> {
    if binary_body::is_binary_body(bytes) {
        return binary_body::decode_binary_body(bytes, pace).map_err(|err| match err {
            BinaryBodyError::Cancelled(cancelled) => BodyParseError::Cancelled(cancelled),
            other => BodyParseError::Binary(other),
        });
    }

    match fast_parse(bytes, pace)? {
        Some(model) => Ok(model),
        None => {
            log::warn!("fast body parse missed; falling back to full structured parse");
            let body = VersionedBody::from_json(bytes).map_err(BodyParseError::Structured)?;
            Ok(Model::normalize(body))
        }
    }
}

/// `Ok(None)` means "assumptions violated, use the fallback".
fn fast_parse(bytes: &[u8], pace: &mut PaceFn) -> Result<Option<Model>, BodyParseError> {
    let version = match read_field_u32(bytes, b"\"version\"") {
        Some(v) if v > BODY_VERSION => return Ok(None),
        Some(v) => v,
        None => 0,
    };

    let Some(voxels_start) = find_array_start(bytes, &[b"\"voxels\"".as_slice(), b"\"cubes\"".as_slice()]) else {
        return Ok(None);
    };

    let mut model = Model {
        version,
        ..Model::default()
    };
    // Fields are honored from the version that introduced them, matching
    // the structured shapes: kind at 1, color and edges at 2, scale and
    // supports at 4.
    if version >= 1 {
        if let Some(kind) = read_field_string(bytes, b"\"kind\"") {
            model.kind = kind;
        }
    }
    if version >= 2 {
        if let Some(color) = read_field_string(bytes, b"\"color\"") {
            model.color = color;
        }
        if let Some(flag) = read_field_bool(bytes, b"\"edgesVisible\"") {
            model.edges_visible = flag;
        }
    }
    if version >= 4 {
        model.scale = read_field_scale(bytes);
        model.mm_per_unit = read_field_f64(bytes, b"\"mmPerUnit\"");
        model.max_side_mm = read_field_f64(bytes, b"\"maxSideMm\"");
    }

    let mut done = 0usize;
    scan_coord_array(bytes, voxels_start, pace, &mut done, |x, y, z| {
        model.voxels.insert(VoxelKey::new(x, y, z));
    })
    .map_err(BodyParseError::Cancelled)?;

    if version >= 4 {
        if let Some(supports_start) = find_array_start(bytes, &[b"\"supports\"".as_slice()]) {
            scan_coord_array(bytes, supports_start, pace, &mut done, |x, y, z| {
                model.supports.insert(SubVoxelKey::new(x, y, z));
            })
            .map_err(BodyParseError::Cancelled)?;
        }
    }

    Ok(Some(model))
}

fn find(bytes: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| from + pos)
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Position just past the field name's `:` delimiter, or `None`.
fn after_colon(bytes: &[u8], name: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(at) = find(bytes, name, from) {
        let i = skip_ws(bytes, at + name.len());
        if i < bytes.len() && bytes[i] == b':' {
            return Some(skip_ws(bytes, i + 1));
        }
        from = at + 1;
    }
    None
}

/// Signed integer by digit accumulation. Returns the value and the index
/// one past its last digit.
fn read_int(bytes: &[u8], mut i: usize) -> Option<(i64, usize)> {
    let negative = if i < bytes.len() && bytes[i] == b'-' {
        i += 1;
        true
    } else {
        false
    };
    let start = i;
    let mut value: i64 = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        value = value.checked_mul(10)?.checked_add((bytes[i] - b'0') as i64)?;
        i += 1;
    }
    if i == start {
        return None;
    }
    Some((if negative { -value } else { value }, i))
}

fn read_field_u32(bytes: &[u8], name: &[u8]) -> Option<u32> {
    let i = after_colon(bytes, name)?;
    let (value, _) = read_int(bytes, i)?;
    u32::try_from(value).ok()
}

/// Number read until the next JSON delimiter; handles the float fields.
fn read_field_f64(bytes: &[u8], name: &[u8]) -> Option<f64> {
    let start = after_colon(bytes, name)?;
    let mut end = start;
    while end < bytes.len() && !matches!(bytes[end], b',' | b'}' | b']') && !bytes[end].is_ascii_whitespace() {
        end += 1;
    }
    std::str::from_utf8(&bytes[start..end]).ok()?.parse().ok()
}

/// String value: everything up to the closing quote. The body's string
/// fields (kind, color) never contain escapes.
fn read_field_string(bytes: &[u8], name: &[u8]) -> Option<String> {
    let i = after_colon(bytes, name)?;
    if i >= bytes.len() || bytes[i] != b'"' {
        return None;
    }
    let start = i + 1;
    let end = find(bytes, b"\"", start)?;
    String::from_utf8(bytes[start..end].to_vec()).ok()
}

/// Boolean by first character.
fn read_field_bool(bytes: &[u8], name: &[u8]) -> Option<bool> {
    let i = after_colon(bytes, name)?;
    match bytes.get(i) {
        Some(b't') => Some(true),
        Some(b'f') => Some(false),
        _ => None,
    }
}

/// The scale setting is a small nested object; slice its balanced braces
/// and hand that snippet alone to the structured parser.
fn read_field_scale(bytes: &[u8]) -> Option<ScaleSetting> {
    let start = after_colon(bytes, b"\"scale\"")?;
    if bytes.get(start) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_slice(&bytes[start..start + offset + 1]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Position just past the `[` of the first of the named array fields.
fn find_array_start(bytes: &[u8], names: &[&[u8]]) -> Option<usize> {
    for name in names {
        if let Some(i) = after_colon(bytes, name) {
            if bytes.get(i) == Some(&b'[') {
                return Some(i + 1);
            }
        }
    }
    None
}

/// One quoted `"x,y,z"` token. Returns the triple and the index one past
/// the closing quote.
fn read_coord_token(bytes: &[u8], i: usize) -> Option<((i32, i32, i32), usize)> {
    if bytes.get(i) != Some(&b'"') {
        return None;
    }
    let (x, i) = read_int(bytes, i + 1)?;
    if bytes.get(i) != Some(&b',') {
        return None;
    }
    let (y, i) = read_int(bytes, i + 1)?;
    if bytes.get(i) != Some(&b',') {
        return None;
    }
    let (z, i) = read_int(bytes, i + 1)?;
    if bytes.get(i) != Some(&b'"') {
        return None;
    }
    let triple = (
        i32::try_from(x).ok()?,
        i32::try_from(y).ok()?,
        i32::try_from(z).ok()?,
    );
    Some((triple, i + 1))
}

/// Walk a coordinate array from just past its `[`, inserting every
/// well-formed token via `insert`. Malformed tokens are skipped (fail
/// closed per key); the pace callback runs every parse chunk.
fn scan_coord_array(
    bytes: &[u8],
    start: usize,
    pace: &mut PaceFn,
    done: &mut usize,
    mut insert: impl FnMut(i32, i32, i32),
) -> Result<(), Cancelled> {
    let mut i = start;
    let mut since_pace = 0usize;
    loop {
        i = skip_ws(bytes, i);
        match bytes.get(i) {
            None | Some(&b']') => break,
            Some(&b',') => {
                i += 1;
                continue;
            }
            Some(&b'"') => match read_coord_token(bytes, i) {
                Some(((x, y, z), next)) => {
                    insert(x, y, z);
                    i = next;
                    *done += 1;
                    since_pace += 1;
                    if since_pace >= COORD_PARSE_CHUNK {
                        since_pace = 0;
                        let verdict = pace(Progress {
                            done: *done,
                            total: None,
                        });
                        if verdict == StepControl::Cancel {
                            return Err(Cancelled);
                        }
                    }
                }
                None => {
                    // Malformed token: resync past its closing quote.
                    i = match find(bytes, b"\"", i + 1) {
                        Some(end) => end + 1,
                        None => break,
                    };
                }
            },
            Some(_) => {
                i += 1;
            }
        }
    }
    let verdict = pace(Progress {
        done: *done,
        total: None,
    });
    if verdict == StepControl::Cancel {
        return Err(Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::DEFAULT_COLOR;
    use crate::pacing::run_to_completion;

    fn fast(bytes: &[u8]) -> Model {
        parse_body(bytes, &mut run_to_completion).unwrap()
    }

    #[test]
    fn fast_path_matches_full_parse() {
        let body = br##"{"version":5,"kind":"voxel-model","color":"#abcdef","edgesVisible":false,
            "voxels":["0,0,0","-1,2,-3"],"supports":["4,4,4"],
            "scale":{"mode":"maxSide","maxSideMm":120.0},"mmPerUnit":12.0,"maxSideMm":120.0}"##;
        let fast_model = fast(body);
        let full_model = Model::normalize(VersionedBody::from_json(body).unwrap());
        assert_eq!(fast_model, full_model);
        assert_eq!(fast_model.scale, Some(ScaleSetting::MaxSide { max_side_mm: 120.0 }));
        assert_eq!(fast_model.mm_per_unit, Some(12.0));
    }

    #[test]
    fn whitespace_heavy_bodies_still_take_the_fast_path() {
        let body = b"{\n  \"version\" : 2,\n  \"color\" : \"#102030\",\n  \"edgesVisible\" : true,\n  \"voxels\" : [ \"1,2,3\" , \"4,5,6\" ]\n}";
        let model = fast(body);
        assert_eq!(model.version, 2);
        assert_eq!(model.color, "#102030");
        assert_eq!(model.voxels.len(), 2);
        assert!(model.voxels.contains(&VoxelKey::new(4, 5, 6)));
    }

    #[test]
    fn unversioned_snapshot_parses_as_v0() {
        let model = fast(br#"{"voxels":["7,8,9"]}"#);
        assert_eq!(model.version, 0);
        assert!(model.voxels.contains(&VoxelKey::new(7, 8, 9)));
    }

    #[test]
    fn legacy_cubes_field_is_found() {
        let model = fast(br#"{"cubes":["1,1,1","2,2,2"]}"#);
        assert_eq!(model.voxels.len(), 2);
    }

    #[test]
    fn malformed_tokens_are_skipped_not_fatal() {
        let model = fast(br#"{"voxels":["0,0,0","1,2","x,y,z","5,5,5","99999999999,0,0"]}"#);
        assert_eq!(model.voxels.len(), 2);
        assert!(model.voxels.contains(&VoxelKey::new(5, 5, 5)));
    }

    #[test]
    fn future_version_falls_back_and_surfaces_the_version_error() {
        let err = parse_body(br#"{"version":9,"voxels":["0,0,0"]}"#, &mut run_to_completion)
            .unwrap_err();
        assert!(matches!(
            err,
            BodyParseError::Structured(BodyError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn body_without_coordinate_array_falls_back() {
        // No voxels field at all: the fast path misses and the structured
        // parse reports the real shape problem.
        let _ = env_logger::builder().is_test(true).try_init();
        let err = parse_body(br#"{"version":1,"kind":"voxel-model"}"#, &mut run_to_completion)
            .unwrap_err();
        assert!(matches!(err, BodyParseError::Structured(BodyError::Json(_))));
    }

    #[test]
    fn binary_body_is_dispatched_by_marker() {
        let mut model = Model::default();
        model.voxels.insert(VoxelKey::new(1, 2, 3));
        let bytes = binary_body::encode_binary_body(&model);
        let back = fast(&bytes);
        assert_eq!(back, model);
    }

    #[test]
    fn legacy_versions_ignore_fields_they_predate() {
        // A version-1 body has no color or edge-visibility slot; stray
        // fields must not leak in through the fast path, which would
        // diverge from the structured parse.
        let body = br##"{"version":1,"kind":"voxel-model","color":"#111111",
            "edgesVisible":false,"voxels":["0,0,0"]}"##;
        let fast_model = fast(body);
        let full_model = Model::normalize(VersionedBody::from_json(body).unwrap());
        assert_eq!(fast_model, full_model);
        assert_eq!(fast_model.color, DEFAULT_COLOR);
        assert!(fast_model.edges_visible);
    }

    #[test]
    fn supports_are_only_read_for_v4_and_later() {
        let body = br#"{"version":2,"voxels":["0,0,0"],"supports":["9,9,9"]}"#;
        let model = fast(body);
        assert!(model.supports.is_empty());
    }

    #[test]
    fn large_array_reports_progress_and_can_cancel() {
        let mut body = String::from(r#"{"version":1,"voxels":["#);
        for i in 0..(COORD_PARSE_CHUNK * 2 + 10) {
            if i > 0 {
                body.push(',');
            }
            body.push_str(&format!("\"{i},0,0\""));
        }
        body.push_str("]}");

        let mut calls = 0usize;
        let model = parse_body(body.as_bytes(), &mut |_: Progress| {
            calls += 1;
            StepControl::Continue
        })
        .unwrap();
        assert_eq!(model.voxels.len(), COORD_PARSE_CHUNK * 2 + 10);
        assert!(calls >= 3);

        let err = parse_body(body.as_bytes(), &mut |_| StepControl::Cancel).unwrap_err();
        assert!(matches!(err, BodyParseError::Cancelled(_)));
    }

    #[test]
    fn scale_snippet_is_parsed_in_isolation() {
        let body = br#"{"version":4,"voxels":["0,0,0"],"scale":{"mode":"blockEdge","edgeMm":8.0}}"#;
        let model = fast(body);
        assert_eq!(model.scale, Some(ScaleSetting::BlockEdge { edge_mm: 8.0 }));
    }
}
