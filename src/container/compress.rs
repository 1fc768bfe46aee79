//! Chunked raw-deflate streaming with a stall watchdog.
//!
//! The compressor object is single-use and owned by the operation that
//! created it; it is dropped on every exit path. The watchdog counts chunk
//! passes that make no forward progress (no input consumed, no output
//! produced); past the limit the operation is abandoned so a stalled stream
//! can never hang the host, and the encoder falls back to the uncompressed
//! body.

use crate::pacing::{Cancelled, PaceFn, Progress, StepControl, COMPRESS_CHUNK};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// Consecutive no-progress passes tolerated before abandoning the stream.
const STALL_LIMIT: u32 = 8;

/// Hard ceiling on inflated output, guards against decompression bombs.
const MAX_INFLATED_BYTES: usize = 1 << 30;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CompressOutcome {
    Compressed(Vec<u8>),
    /// The stream stopped making forward progress; caller falls back to the
    /// uncompressed body.
    Stalled,
}

#[derive(Debug)]
pub(crate) enum InflateError {
    /// Not a valid stream for this format's compressor.
    BadStream,
    /// Output ceiling exceeded or the stream never terminated.
    Runaway,
    Cancelled(Cancelled),
}

pub(crate) fn deflate_chunked(
    input: &[u8],
    pace: &mut PaceFn,
) -> Result<CompressOutcome, Cancelled> {
    let mut stream = Compress::new(Compression::default(), false);
    let mut out = Vec::with_capacity(input.len() / 2 + 64);
    let mut stalled_passes = 0u32;
    let mut pos = 0usize;

    while pos < input.len() {
        let end = (pos + COMPRESS_CHUNK).min(input.len());
        let before_in = stream.total_in();
        let before_out = stream.total_out();
        out.reserve(COMPRESS_CHUNK + 64);
        if stream
            .compress_vec(&input[pos..end], &mut out, FlushCompress::None)
            .is_err()
        {
            return Ok(CompressOutcome::Stalled);
        }
        pos += (stream.total_in() - before_in) as usize;
        if stream.total_in() == before_in && stream.total_out() == before_out {
            stalled_passes += 1;
            if stalled_passes >= STALL_LIMIT {
                return Ok(CompressOutcome::Stalled);
            }
        } else {
            stalled_passes = 0;
        }
        let verdict = pace(Progress {
            done: pos,
            total: Some(input.len()),
        });
        if verdict == StepControl::Cancel {
            return Err(Cancelled);
        }
    }

    loop {
        let before_out = stream.total_out();
        out.reserve(1024);
        match stream.compress_vec(&[], &mut out, FlushCompress::Finish) {
            Ok(Status::StreamEnd) => break,
            Ok(_) => {
                if stream.total_out() == before_out {
                    stalled_passes += 1;
                    if stalled_passes >= STALL_LIMIT {
                        return Ok(CompressOutcome::Stalled);
                    }
                } else {
                    stalled_passes = 0;
                }
            }
            Err(_) => return Ok(CompressOutcome::Stalled),
        }
    }

    Ok(CompressOutcome::Compressed(out))
}

pub(crate) fn inflate_chunked(input: &[u8], pace: &mut PaceFn) -> Result<Vec<u8>, InflateError> {
    let mut stream = Decompress::new(false);
    let mut out = Vec::with_capacity(input.len() * 2 + 64);
    let mut stalled_passes = 0u32;
    let mut pos = 0usize;

    loop {
        let end = (pos + COMPRESS_CHUNK).min(input.len());
        let before_in = stream.total_in();
        let before_out = stream.total_out();
        out.reserve(COMPRESS_CHUNK * 2 + 64);
        let status = stream
            .decompress_vec(&input[pos..end], &mut out, FlushDecompress::None)
            .map_err(|_| InflateError::BadStream)?;
        pos += (stream.total_in() - before_in) as usize;

        if out.len() > MAX_INFLATED_BYTES {
            return Err(InflateError::Runaway);
        }
        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {}
        }
        if pos >= input.len() && stream.total_out() == before_out {
            // Input exhausted and nothing more comes out: truncated stream.
            stalled_passes += 1;
            if stalled_passes >= STALL_LIMIT {
                return Err(InflateError::BadStream);
            }
        } else if stream.total_in() == before_in && stream.total_out() == before_out {
            stalled_passes += 1;
            if stalled_passes >= STALL_LIMIT {
                return Err(InflateError::Runaway);
            }
        } else {
            stalled_passes = 0;
        }

        let verdict = pace(Progress {
            done: pos,
            total: None,
        });
        if verdict == StepControl::Cancel {
            return Err(InflateError::Cancelled(Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::run_to_completion;

    fn deflate(input: &[u8]) -> Vec<u8> {
        match deflate_chunked(input, &mut run_to_completion).unwrap() {
            CompressOutcome::Compressed(bytes) => bytes,
            CompressOutcome::Stalled => panic!("compressor stalled on healthy input"),
        }
    }

    #[test]
    fn round_trip_small() {
        let input = b"hello voxel world".to_vec();
        let packed = deflate(&input);
        let unpacked = inflate_chunked(&packed, &mut run_to_completion).unwrap();
        assert_eq!(unpacked, input);
    }

    #[test]
    fn round_trip_large_compressible() {
        let input: Vec<u8> = (0..200_000u32).map(|i| (i % 7) as u8).collect();
        let packed = deflate(&input);
        assert!(packed.len() < input.len());
        let unpacked = inflate_chunked(&packed, &mut run_to_completion).unwrap();
        assert_eq!(unpacked, input);
    }

    #[test]
    fn inflate_rejects_garbage() {
        let garbage = vec![0xFFu8; 512];
        assert!(matches!(
            inflate_chunked(&garbage, &mut run_to_completion),
            Err(InflateError::BadStream)
        ));
    }

    #[test]
    fn inflate_rejects_truncated_stream() {
        let input: Vec<u8> = (0..50_000u32).map(|i| (i % 13) as u8).collect();
        let packed = deflate(&input);
        let truncated = &packed[..packed.len() / 2];
        assert!(inflate_chunked(truncated, &mut run_to_completion).is_err());
    }

    #[test]
    fn compression_reports_progress_in_input_order() {
        let input: Vec<u8> = vec![42u8; 300_000];
        let mut last = 0usize;
        let packed = deflate_chunked(&input, &mut |p: Progress| {
            assert!(p.done >= last);
            last = p.done;
            StepControl::Continue
        })
        .unwrap();
        assert_eq!(last, input.len());
        assert!(matches!(packed, CompressOutcome::Compressed(_)));
    }

    #[test]
    fn cancel_stops_compression() {
        let input = vec![7u8; 400_000];
        let result = deflate_chunked(&input, &mut |_| StepControl::Cancel);
        assert!(matches!(result, Err(Cancelled)));
    }
}
