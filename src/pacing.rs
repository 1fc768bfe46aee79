//! Cooperative chunking for long-running operations.
//!
//! The engine runs on the host's single logical thread; every operation that
//! can take non-trivial time on large inputs (text building, compression,
//! coordinate parsing, transfer encoding) loops over fixed-size chunks and
//! calls back into the host between chunks. The host uses the callback to
//! repaint, report progress, or cancel. Cancellation is coarse: a chunk that
//! has started always completes before the callback is consulted again.

use std::fmt;

/// Progress snapshot passed to the pace callback between chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    /// Units completed so far (cells, bytes — operation-defined).
    pub done: usize,
    /// Total units when known up front; streaming decompression does not
    /// know its output size.
    pub total: Option<usize>,
}

impl Progress {
    pub fn percent(&self) -> Option<f32> {
        match self.total {
            Some(total) if total > 0 => Some(self.done as f32 * 100.0 / total as f32),
            Some(_) => Some(100.0),
            None => None,
        }
    }
}

/// Host verdict between chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepControl {
    Continue,
    Cancel,
}

/// Callback invoked between chunks of a long-running operation.
pub type PaceFn<'a> = dyn FnMut(Progress) -> StepControl + 'a;

/// The host cancelled a multi-chunk operation between chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled by host between chunks")
    }
}

impl std::error::Error for Cancelled {}

// Tuned chunk sizes. Constants, not derived from any resource probe.
pub const COORD_PARSE_CHUNK: usize = 8192;
pub const TEXT_BUILD_CHUNK: usize = 4096;
pub const COMPRESS_CHUNK: usize = 16 * 1024;
/// Multiple of 3 so chunk boundaries never split a base64 quantum.
pub const BASE64_CHUNK: usize = 12 * 1024;

/// Pace callback that never cancels, for callers without a scheduler.
pub fn run_to_completion(_: Progress) -> StepControl {
    StepControl::Continue
}
