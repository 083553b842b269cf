// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! At-rest envelope codec for opaque payloads.
//!
//! Stored blobs carry a two-byte ASCII prefix selecting the encoding.
//! Payloads written before the prefix was introduced have no prefix and are
//! returned verbatim. The discriminant space is numeric, so a payload whose
//! first byte is not a digit is unambiguously legacy.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Length of the envelope prefix.
pub const ENCODING_OFFSET: usize = 2;

/// Supported envelope encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Pre-envelope payload with no prefix.
    LegacyUnencoded,
    /// `"00"` prefix, payload stored verbatim.
    Unencoded,
    /// `"01"` prefix, payload stored base64-encoded.
    Base64,
}

impl Encoding {
    fn prefix(self) -> Option<[u8; 2]> {
        match self {
            Self::LegacyUnencoded => None,
            Self::Unencoded => Some(*b"00"),
            Self::Base64 => Some(*b"01"),
        }
    }
}

/// Envelope codec errors.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// The payload prefix named an encoding this build does not know.
    #[error("unknown payload encoding: {0:?}")]
    UnknownEncoding([u8; 2]),

    /// The base64 body failed to decode.
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Wrap `payload` in the envelope for `encoding`.
pub fn encode(encoding: Encoding, payload: &[u8]) -> Vec<u8> {
    match encoding.prefix() {
        None => payload.to_vec(),
        Some(prefix) => {
            let body = match encoding {
                Encoding::Base64 => STANDARD.encode(payload).into_bytes(),
                _ => payload.to_vec(),
            };
            let mut out = Vec::with_capacity(ENCODING_OFFSET + body.len());
            out.extend_from_slice(&prefix);
            out.extend_from_slice(&body);
            out
        }
    }
}

/// Unwrap an enveloped payload, detecting the encoding from its prefix.
///
/// A payload whose first byte is not an ASCII digit carries no envelope and
/// is returned verbatim. Digit-prefixed payloads with a prefix this build
/// does not know are rejected rather than guessed at.
pub fn decode(payload: &[u8]) -> Result<Vec<u8>, EncodingError> {
    if payload.len() < ENCODING_OFFSET || !payload[0].is_ascii_digit() {
        return Ok(payload.to_vec());
    }
    match [payload[0], payload[1]] {
        p if p == *b"00" => Ok(payload[ENCODING_OFFSET..].to_vec()),
        p if p == *b"01" => Ok(STANDARD.decode(&payload[ENCODING_OFFSET..])?),
        p => Err(EncodingError::UnknownEncoding(p)),
    }
}
