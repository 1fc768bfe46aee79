use serde::{Deserialize, Serialize};

/// Manufacturing size ceiling: resolved models larger than this on their
/// longest side get an oversize warning.
pub const MAX_PRINTABLE_SIDE_MM: f64 = 180.0;

/// Requested physical-size policy. Exactly one of the two modes; immutable.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ScaleSetting {
    /// Pin the model's longest side to a physical length.
    #[serde(rename_all = "camelCase")]
    MaxSide { max_side_mm: f64 },
    /// Pin every base cube's edge to a physical length.
    #[serde(rename_all = "camelCase")]
    BlockEdge { edge_mm: f64 },
}

/// Clamp ranges for the two policies.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClampRanges {
    pub min_max_side_mm: f64,
    pub max_max_side_mm: f64,
    pub min_edge_mm: f64,
    pub max_edge_mm: f64,
}

impl Default for ClampRanges {
    fn default() -> Self {
        Self {
            min_max_side_mm: 10.0,
            max_max_side_mm: 300.0,
            min_edge_mm: 0.5,
            max_edge_mm: 30.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScaleMode {
    MaxSide,
    BlockEdge,
}

/// Physical scale derived from a setting and the model's world extents.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedScale {
    pub mode: ScaleMode,
    pub mm_per_unit: f64,
    pub max_side_mm: f64,
    pub warn_too_large: bool,
}

/// Resolve a scale setting against the model's longest world-space side.
///
/// Pure derivation, no persisted state. A zero or non-finite `bbox_max_dim`
/// is floored to 1 so neither mode can divide by zero.
pub fn resolve(bbox_max_dim_world: f64, setting: ScaleSetting, ranges: ClampRanges) -> ResolvedScale {
    let max_dim = if bbox_max_dim_world.is_finite() && bbox_max_dim_world > 0.0 {
        bbox_max_dim_world
    } else {
        1.0
    };

    match setting {
        ScaleSetting::MaxSide { max_side_mm } => {
            let clamped = max_side_mm
                .clamp(ranges.min_max_side_mm, ranges.max_max_side_mm)
                .round();
            ResolvedScale {
                mode: ScaleMode::MaxSide,
                mm_per_unit: clamped / max_dim,
                max_side_mm: clamped,
                warn_too_large: clamped > MAX_PRINTABLE_SIDE_MM,
            }
        }
        ScaleSetting::BlockEdge { edge_mm } => {
            let clamped = edge_mm.clamp(ranges.min_edge_mm, ranges.max_edge_mm);
            let max_side_mm = max_dim * clamped;
            ResolvedScale {
                mode: ScaleMode::BlockEdge,
                mm_per_unit: clamped,
                max_side_mm,
                warn_too_large: max_side_mm > MAX_PRINTABLE_SIDE_MM,
            }
        }
    }
}
