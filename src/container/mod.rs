//! Binary envelope format for persisted models.
//!
//! Fixed-width header followed by a variable-length body:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 4 | format tag `VXP1` |
//! | 4 | 1 | flags: bit0 encrypted, bit1 compressed |
//! | 5 | 3 | reserved, zero |
//! | 8 | 4 | key-derivation iteration count, LE (encrypted only) |
//! | 12 | 16 | salt (encrypted only) |
//! | 28 | 12 | nonce (encrypted only) |
//! | 40.. | — | ciphertext (encrypted), else body from offset 8 |
//!
//! The body is either the structured text body or the fixed binary body;
//! the envelope codec never inspects it — structural parsing is the
//! caller's job.

pub mod binary_body;
mod compress;
mod crypto;
pub mod transfer;

pub use crypto::{
    LEGACY_PASSPHRASE, MAX_PBKDF2_ITERATIONS, NONCE_LEN, PBKDF2_ITERATIONS, SALT_LEN,
};

use crate::body::{CellCounts, Model};
use crate::pacing::{Cancelled, PaceFn};
use crate::parser::{self, BodyParseError};
use compress::{CompressOutcome, InflateError};
use std::fmt;

pub const FORMAT_TAG: &[u8; 4] = b"VXP1";
pub const FLAG_ENCRYPTED: u8 = 0b0000_0001;
pub const FLAG_COMPRESSED: u8 = 0b0000_0010;

const PLAIN_HEADER_LEN: usize = 8;
const CRYPTO_PARAMS_LEN: usize = 4 + SALT_LEN + NONCE_LEN;

/// Recoverable envelope failures. Stable `code()` strings let the host
/// render one consistent message per kind regardless of the underlying
/// cause; none of these should ever take down the host process.
#[derive(Debug)]
pub enum ContainerError {
    BadSignature,
    HeaderTooSmall,
    /// Authentication failure — most commonly a wrong password. The host is
    /// expected to re-prompt and retry.
    DecryptFailed,
    DecompressionUnsupported,
    Cancelled(Cancelled),
    /// Any lower-level failure outside the fixed taxonomy.
    Unpack(Box<dyn std::error::Error + Send + Sync>),
}

impl ContainerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadSignature => "bad_signature",
            Self::HeaderTooSmall => "header_too_small",
            Self::DecryptFailed => "decrypt_failed",
            Self::DecompressionUnsupported => "decompression_unsupported",
            Self::Cancelled(_) => "cancelled",
            Self::Unpack(_) => "unpack_failed",
        }
    }

    fn internal(message: &str) -> Self {
        Self::Unpack(message.to_string().into())
    }
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSignature => write!(f, "not a model envelope (bad signature)"),
            Self::HeaderTooSmall => write!(f, "envelope header truncated"),
            Self::DecryptFailed => write!(f, "envelope decryption failed (wrong password?)"),
            Self::DecompressionUnsupported => {
                write!(f, "envelope body cannot be decompressed")
            }
            Self::Cancelled(_) => write!(f, "envelope operation cancelled"),
            Self::Unpack(err) => write!(f, "envelope unpack failed: {err}"),
        }
    }
}

impl std::error::Error for ContainerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Cancelled(err) => Some(err),
            Self::Unpack(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EncodeOptions<'a> {
    /// Encrypt the body with a key derived from this password. `None` emits
    /// an unencrypted envelope; the legacy fixed passphrase is a decode-only
    /// compatibility path and is never chosen here.
    pub password: Option<&'a str>,
    pub compress: bool,
}

/// Raw decoded body plus what the header said about it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedBody {
    pub bytes: Vec<u8>,
    pub was_encrypted: bool,
    pub was_compressed: bool,
}

/// Encode a body into an envelope.
///
/// Compression degrades gracefully: a stalled stream or output larger than
/// the input falls back to the uncompressed body. Salt and nonce are random
/// per call; key material is derived fresh and dropped with this frame.
pub fn encode(
    body: &[u8],
    options: EncodeOptions<'_>,
    pace: &mut PaceFn,
) -> Result<Vec<u8>, ContainerError> {
    let mut flags = 0u8;

    let payload: Vec<u8> = if options.compress {
        match compress::deflate_chunked(body, pace) {
            Ok(CompressOutcome::Compressed(packed)) if packed.len() < body.len() => {
                flags |= FLAG_COMPRESSED;
                packed
            }
            Ok(CompressOutcome::Compressed(_)) => body.to_vec(),
            Ok(CompressOutcome::Stalled) => {
                log::warn!("compressor stalled; storing body uncompressed");
                body.to_vec()
            }
            Err(cancelled) => return Err(ContainerError::Cancelled(cancelled)),
        }
    } else {
        body.to_vec()
    };

    let mut out = Vec::with_capacity(PLAIN_HEADER_LEN + CRYPTO_PARAMS_LEN + payload.len() + 16);
    out.extend_from_slice(FORMAT_TAG);

    match options.password {
        Some(password) => {
            flags |= FLAG_ENCRYPTED;
            out.push(flags);
            out.extend_from_slice(&[0u8; 3]);

            let salt = crypto::random_salt();
            let nonce = crypto::random_nonce();
            let key = crypto::derive_key(password, &salt, PBKDF2_ITERATIONS);
            let ciphertext = crypto::seal(&key, &nonce, &payload)
                .map_err(|_| ContainerError::internal("cipher initialization failed"))?;

            out.extend_from_slice(&PBKDF2_ITERATIONS.to_le_bytes());
            out.extend_from_slice(&salt);
            out.extend_from_slice(&nonce);
            out.extend_from_slice(&ciphertext);
        }
        None => {
            out.push(flags);
            out.extend_from_slice(&[0u8; 3]);
            out.extend_from_slice(&payload);
        }
    }

    Ok(out)
}

/// Decode an envelope back to its raw body bytes.
///
/// When the encrypted flag is set and no password is supplied, the legacy
/// fixed passphrase is tried for backward compatibility with the earlier
/// format revision. A wrong password surfaces as [`ContainerError::DecryptFailed`],
/// never as a parse error.
pub fn decode(
    bytes: &[u8],
    password: Option<&str>,
    pace: &mut PaceFn,
) -> Result<DecodedBody, ContainerError> {
    if bytes.len() < PLAIN_HEADER_LEN {
        return Err(ContainerError::HeaderTooSmall);
    }
    if &bytes[..4] != FORMAT_TAG {
        return Err(ContainerError::BadSignature);
    }
    let flags = bytes[4];
    let was_encrypted = flags & FLAG_ENCRYPTED != 0;
    let was_compressed = flags & FLAG_COMPRESSED != 0;

    let mut payload: Vec<u8> = if was_encrypted {
        if bytes.len() < PLAIN_HEADER_LEN + CRYPTO_PARAMS_LEN {
            return Err(ContainerError::HeaderTooSmall);
        }
        let iterations = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if iterations == 0 || iterations > MAX_PBKDF2_ITERATIONS {
            return Err(ContainerError::DecryptFailed);
        }
        let salt = &bytes[12..12 + SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[28..28 + NONCE_LEN]);

        let key = crypto::derive_key(password.unwrap_or(LEGACY_PASSPHRASE), salt, iterations);
        crypto::open(&key, &nonce, &bytes[PLAIN_HEADER_LEN + CRYPTO_PARAMS_LEN..])
            .map_err(|_| ContainerError::DecryptFailed)?
    } else {
        bytes[PLAIN_HEADER_LEN..].to_vec()
    };

    if was_compressed {
        payload = compress::inflate_chunked(&payload, pace).map_err(|err| match err {
            InflateError::Cancelled(cancelled) => ContainerError::Cancelled(cancelled),
            InflateError::BadStream => ContainerError::DecompressionUnsupported,
            InflateError::Runaway => ContainerError::internal("decompressed body exceeds ceiling"),
        })?;
    }

    Ok(DecodedBody {
        bytes: payload,
        was_encrypted,
        was_compressed,
    })
}

/// Body layout selector for [`pack_model`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BodyFormat {
    /// Versioned structured text body; interoperable with every reader.
    #[default]
    Text,
    /// Fixed binary body; densest option for very large models.
    Binary,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PackOptions<'a> {
    pub password: Option<&'a str>,
    pub compress: bool,
    pub body_format: BodyFormat,
}

/// Envelope plus the metadata record the persistence collaborator stores
/// alongside it.
#[derive(Clone, Debug)]
pub struct PackedModel {
    pub envelope: Vec<u8>,
    pub fingerprint: String,
    pub counts: CellCounts,
}

/// Serialize a model end to end: body build, optional compression, optional
/// encryption.
pub fn pack_model(
    model: &Model,
    options: &PackOptions<'_>,
    pace: &mut PaceFn,
) -> Result<PackedModel, ContainerError> {
    let body = match options.body_format {
        BodyFormat::Text => model.to_body_bytes(pace).map_err(ContainerError::Cancelled)?,
        BodyFormat::Binary => binary_body::encode_binary_body(model),
    };
    let envelope = encode(
        &body,
        EncodeOptions {
            password: options.password,
            compress: options.compress,
        },
        pace,
    )?;
    Ok(PackedModel {
        envelope,
        fingerprint: model.fingerprint(),
        counts: model.cell_counts(),
    })
}

/// Decode an envelope and structurally parse its body into a model.
pub fn unpack_model(
    bytes: &[u8],
    password: Option<&str>,
    pace: &mut PaceFn,
) -> Result<Model, ContainerError> {
    let decoded = decode(bytes, password, pace)?;
    parser::parse_body(&decoded.bytes, pace).map_err(|err| match err {
        BodyParseError::Cancelled(cancelled) => ContainerError::Cancelled(cancelled),
        other => ContainerError::Unpack(Box::new(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::VoxelKey;
    use crate::pacing::run_to_completion;
    use rand::RngCore;

    fn model_of_size(n: i32) -> Model {
        let mut model = Model {
            color: "#336699".to_string(),
            edges_visible: false,
            ..Model::default()
        };
        for i in 0..n {
            model.voxels.insert(VoxelKey::new(i % 60, (i / 60) % 60, i / 3600));
        }
        model
    }

    fn round_trip(model: &Model, password: Option<&str>, compress: bool) {
        let options = PackOptions {
            password,
            compress,
            body_format: BodyFormat::Text,
        };
        let packed = pack_model(model, &options, &mut run_to_completion).unwrap();
        let back = unpack_model(&packed.envelope, password, &mut run_to_completion).unwrap();
        assert_eq!(back.voxels, model.voxels);
        assert_eq!(back.supports, model.supports);
        assert_eq!(back.color, model.color);
        assert_eq!(back.edges_visible, model.edges_visible);
    }

    #[test]
    fn round_trip_single_cell_all_modes() {
        let model = model_of_size(1);
        for password in [None, Some("x")] {
            for compress in [false, true] {
                round_trip(&model, password, compress);
            }
        }
    }

    #[test]
    fn round_trip_thousand_cells_all_modes() {
        let model = model_of_size(1_000);
        for password in [None, Some("x")] {
            for compress in [false, true] {
                round_trip(&model, password, compress);
            }
        }
    }

    #[test]
    fn round_trip_two_hundred_thousand_cells() {
        let model = model_of_size(200_000);
        round_trip(&model, Some("x"), true);
    }

    #[test]
    fn round_trip_binary_body() {
        let model = model_of_size(500);
        let options = PackOptions {
            password: Some("pw"),
            compress: true,
            body_format: BodyFormat::Binary,
        };
        let packed = pack_model(&model, &options, &mut run_to_completion).unwrap();
        let back = unpack_model(&packed.envelope, Some("pw"), &mut run_to_completion).unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn wrong_password_is_an_authentication_error() {
        let model = model_of_size(10);
        let options = PackOptions {
            password: Some("a"),
            ..PackOptions::default()
        };
        let packed = pack_model(&model, &options, &mut run_to_completion).unwrap();
        let err = unpack_model(&packed.envelope, Some("b"), &mut run_to_completion).unwrap_err();
        assert!(matches!(err, ContainerError::DecryptFailed));
        assert_eq!(err.code(), "decrypt_failed");
    }

    #[test]
    fn runaway_iteration_counts_are_rejected_without_deriving() {
        // A tampered header asking for u32::MAX iterations must fail fast
        // instead of spending hours in key derivation.
        let model = model_of_size(3);
        let options = PackOptions {
            password: Some("pw"),
            ..PackOptions::default()
        };
        let mut packed = pack_model(&model, &options, &mut run_to_completion).unwrap();
        packed.envelope[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        let err =
            unpack_model(&packed.envelope, Some("pw"), &mut run_to_completion).unwrap_err();
        assert!(matches!(err, ContainerError::DecryptFailed));
    }

    #[test]
    fn missing_password_on_encrypted_envelope_tries_legacy_passphrase() {
        let body = b"{\"voxels\":[\"0,0,0\"]}";
        let envelope = encode(
            body,
            EncodeOptions {
                password: Some(LEGACY_PASSPHRASE),
                compress: false,
            },
            &mut run_to_completion,
        )
        .unwrap();
        let decoded = decode(&envelope, None, &mut run_to_completion).unwrap();
        assert_eq!(decoded.bytes, body);
        assert!(decoded.was_encrypted);
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut envelope = encode(b"{}", EncodeOptions::default(), &mut run_to_completion).unwrap();
        envelope[0] = b'Q';
        let err = decode(&envelope, None, &mut run_to_completion).unwrap_err();
        assert!(matches!(err, ContainerError::BadSignature));
        assert_eq!(err.code(), "bad_signature");
    }

    #[test]
    fn short_buffers_are_header_too_small() {
        let err = decode(b"VXP1", None, &mut run_to_completion).unwrap_err();
        assert!(matches!(err, ContainerError::HeaderTooSmall));

        // Encrypted flag set but crypto parameters missing.
        let mut envelope = Vec::new();
        envelope.extend_from_slice(FORMAT_TAG);
        envelope.push(FLAG_ENCRYPTED);
        envelope.extend_from_slice(&[0u8; 3]);
        envelope.extend_from_slice(&[0u8; 10]);
        let err = decode(&envelope, Some("x"), &mut run_to_completion).unwrap_err();
        assert!(matches!(err, ContainerError::HeaderTooSmall));
    }

    #[test]
    fn compressed_flag_with_garbage_body_is_unsupported() {
        let mut envelope = Vec::new();
        envelope.extend_from_slice(FORMAT_TAG);
        envelope.push(FLAG_COMPRESSED);
        envelope.extend_from_slice(&[0u8; 3]);
        envelope.extend_from_slice(&[0xFF; 64]);
        let err = decode(&envelope, None, &mut run_to_completion).unwrap_err();
        assert!(matches!(err, ContainerError::DecompressionUnsupported));
        assert_eq!(err.code(), "decompression_unsupported");
    }

    #[test]
    fn incompressible_body_falls_back_to_stored() {
        // Full-entropy bytes gain stored-block overhead under deflate, so
        // the output is never smaller; flags must show uncompressed and the
        // body must still round-trip.
        let _ = env_logger::builder().is_test(true).try_init();
        let mut body = vec![0u8; 4096];
        rand::thread_rng().fill_bytes(&mut body);
        let envelope = encode(
            &body,
            EncodeOptions {
                password: None,
                compress: true,
            },
            &mut run_to_completion,
        )
        .unwrap();
        let decoded = decode(&envelope, None, &mut run_to_completion).unwrap();
        assert_eq!(decoded.bytes, body);
        assert!(!decoded.was_compressed);
    }

    #[test]
    fn metadata_record_reports_counts_and_fingerprint() {
        let model = model_of_size(25);
        let packed = pack_model(&model, &PackOptions::default(), &mut run_to_completion).unwrap();
        assert_eq!(packed.counts.voxels, 25);
        assert_eq!(packed.counts.supports, 0);
        assert_eq!(packed.fingerprint, model.fingerprint());
        assert_eq!(packed.fingerprint.len(), 64);
    }

    #[test]
    fn envelopes_differ_per_call_but_decode_identically() {
        // Fresh salt and nonce per operation: same input, different bytes.
        let model = model_of_size(5);
        let options = PackOptions {
            password: Some("pw"),
            ..PackOptions::default()
        };
        let a = pack_model(&model, &options, &mut run_to_completion).unwrap();
        let b = pack_model(&model, &options, &mut run_to_completion).unwrap();
        assert_ne!(a.envelope, b.envelope);
        let model_a = unpack_model(&a.envelope, Some("pw"), &mut run_to_completion).unwrap();
        let model_b = unpack_model(&b.envelope, Some("pw"), &mut run_to_completion).unwrap();
        assert_eq!(model_a, model_b);
    }
}
