//! Chunked base64 transfer encoding.
//!
//! For hosts whose storage layer is string-valued. Encode chunks are a
//! multiple of 3 bytes and decode chunks a multiple of 4 characters, so
//! chunk boundaries never split a base64 quantum and the concatenated
//! output equals a single-pass encode.

use crate::pacing::{Cancelled, PaceFn, Progress, StepControl, BASE64_CHUNK};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;

const DECODE_CHUNK: usize = BASE64_CHUNK / 3 * 4;

#[derive(Debug)]
pub enum TransferError {
    InvalidEncoding(base64::DecodeError),
    Cancelled(Cancelled),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEncoding(err) => write!(f, "invalid base64 transfer encoding: {err}"),
            Self::Cancelled(_) => write!(f, "transfer decode cancelled"),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidEncoding(err) => Some(err),
            Self::Cancelled(err) => Some(err),
        }
    }
}

pub fn encode_base64_chunked(bytes: &[u8], pace: &mut PaceFn) -> Result<String, Cancelled> {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    let mut done = 0usize;
    for chunk in bytes.chunks(BASE64_CHUNK) {
        out.push_str(&STANDARD.encode(chunk));
        done += chunk.len();
        let verdict = pace(Progress {
            done,
            total: Some(bytes.len()),
        });
        if verdict == StepControl::Cancel {
            return Err(Cancelled);
        }
    }
    Ok(out)
}

pub fn decode_base64_chunked(text: &str, pace: &mut PaceFn) -> Result<Vec<u8>, TransferError> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 4 * 3);
    let mut done = 0usize;
    for chunk in bytes.chunks(DECODE_CHUNK) {
        let decoded = STANDARD
            .decode(chunk)
            .map_err(TransferError::InvalidEncoding)?;
        out.extend_from_slice(&decoded);
        done += chunk.len();
        let verdict = pace(Progress {
            done,
            total: Some(bytes.len()),
        });
        if verdict == StepControl::Cancel {
            return Err(TransferError::Cancelled(Cancelled));
        }
    }
    Ok(out)
}
