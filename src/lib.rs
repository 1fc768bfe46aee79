//! voxpack — voxel print-packaging engine.
//!
//! The core behind a voxel modeling tool's "make it printable" and save/load
//! paths: physical-scale resolution, connectivity analysis and support-bridge
//! synthesis across the base and sub grids, and a compact envelope format
//! with optional compression and password-derived authenticated encryption.
//! Everything long-running is chunked and paced so the host's single UI
//! thread stays responsive; rendering, persistence, and pricing are external
//! collaborators that only ever see plain values and byte buffers.

pub mod body;
pub mod bounds;
pub mod bridge;
pub mod connectivity;
pub mod container;
pub mod grid;
pub mod pacing;
pub mod parser;
pub mod scale;

pub use body::{CellCounts, Model, VersionedBody, BODY_VERSION};
pub use bounds::MixedBounds;
pub use bridge::{synthesize_bridges, BridgeOutcome, DEFAULT_MARGIN_BASE_CELLS};
pub use connectivity::{component_count, components};
pub use container::{
    decode, encode, pack_model, unpack_model, BodyFormat, ContainerError, DecodedBody,
    EncodeOptions, PackOptions, PackedModel,
};
pub use grid::{expand_to_sub_grid, normalize_occupancy, GridCell, SubVoxelKey, VoxelKey};
pub use pacing::{run_to_completion, Cancelled, PaceFn, Progress, StepControl};
pub use parser::{parse_body, BodyParseError};
pub use scale::{resolve, ClampRanges, ResolvedScale, ScaleMode, ScaleSetting};
