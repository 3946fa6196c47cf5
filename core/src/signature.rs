//! Signature codec.
//!
//! Converts between three representations of a P-256 ECDSA signature:
//!
//! - the backend-native ASN.1 DER form (`SEQUENCE { INTEGER r, INTEGER s }`),
//!   which is variable length,
//! - the canonical fixed 64-byte form (`r ‖ s`, each 32 bytes big-endian),
//! - a URL-safe, unpadded base64 text form for embedding in scannable codes.
//!
//! All decoding entry points treat their input as untrusted and report every
//! structural problem as a distinct [`SignatureError`] variant.

use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::{Engine as _, alphabet};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

const SEQUENCE_TAG: u8 = 0x30;
const INTEGER_TAG: u8 = 0x02;
const SCALAR_LEN: usize = 32;

/// Text engine: URL-safe alphabet, no padding on encode, padding optional on decode.
const TEXT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Structural failures while decoding a signature.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// A tag byte did not match the expected ASN.1 tag.
    #[error("expected tag 0x{expected:02x} at offset {offset}, found 0x{found:02x}")]
    UnexpectedTag {
        /// Tag that should have been present.
        expected: u8,
        /// Tag that was found.
        found: u8,
        /// Byte offset of the tag.
        offset: usize,
    },

    /// Input ended before a tag or length field was complete.
    #[error("input truncated at offset {offset}")]
    Truncated {
        /// Offset where more bytes were needed.
        offset: usize,
    },

    /// A declared length runs past the end of the enclosing buffer.
    #[error("declared length {declared} exceeds the {available} bytes available")]
    LengthOverflow {
        /// Length declared by the field.
        declared: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// Long-form length used for a value that fits the short form, or padded with zeros.
    #[error("non-minimal length encoding at offset {offset}")]
    NonMinimalLength {
        /// Offset of the length field.
        offset: usize,
    },

    /// Indefinite or oversized long-form length.
    #[error("unsupported length form at offset {offset}")]
    UnsupportedLength {
        /// Offset of the length field.
        offset: usize,
    },

    /// Bytes remain after the structure ended.
    #[error("{extra} trailing bytes after signature structure")]
    TrailingBytes {
        /// Number of unexpected bytes.
        extra: usize,
    },

    /// An INTEGER field has no content bytes.
    #[error("empty integer at offset {offset}")]
    EmptyInteger {
        /// Offset of the integer tag.
        offset: usize,
    },

    /// R or S needs more than 32 bytes.
    #[error("integer of {len} significant bytes does not fit in 32 bytes")]
    IntegerTooLarge {
        /// Significant (non-zero-prefix) length of the integer.
        len: usize,
    },

    /// Canonical form must be exactly 64 bytes.
    #[error("canonical signature must be 64 bytes, got {len}")]
    InvalidCanonicalLength {
        /// Length that was supplied.
        len: usize,
    },

    /// Text form is not valid URL-safe base64.
    #[error("invalid signature text: {reason}")]
    InvalidText {
        /// Decoder failure description.
        reason: String,
    },
}

/// Canonical fixed-size signature: 32-byte R followed by 32-byte S, big-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanonicalSignature([u8; CanonicalSignature::LEN]);

impl CanonicalSignature {
    /// Size of the canonical form in bytes.
    pub const LEN: usize = 2 * SCALAR_LEN;

    /// Wrap a 64-byte array.
    #[must_use]
    pub const fn from_array(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a slice that must be exactly 64 bytes long.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::InvalidCanonicalLength`] for any other length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureError> {
        let array: [u8; Self::LEN] = bytes
            .try_into()
            .map_err(|_| SignatureError::InvalidCanonicalLength { len: bytes.len() })?;
        Ok(Self(array))
    }

    /// Raw canonical bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// The R scalar, big-endian.
    #[must_use]
    pub fn r(&self) -> &[u8] {
        &self.0[..SCALAR_LEN]
    }

    /// The S scalar, big-endian.
    #[must_use]
    pub fn s(&self) -> &[u8] {
        &self.0[SCALAR_LEN..]
    }

    /// Decode the backend-native DER form.
    ///
    /// R and S are left-padded to 32 bytes. Leading zero bytes (including the
    /// sign byte DER adds when the high bit is set) are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`SignatureError`] describing the first structural problem found.
    pub fn from_der(der: &[u8]) -> Result<Self, SignatureError> {
        expect_tag(der, 0, SEQUENCE_TAG)?;
        let (declared, body_start) = read_length(der, 1)?;
        let available = der.len() - body_start;
        if declared > available {
            return Err(SignatureError::LengthOverflow { declared, available });
        }
        if declared < available {
            return Err(SignatureError::TrailingBytes {
                extra: available - declared,
            });
        }

        let end = der.len();
        let (r, after_r) = read_integer(der, body_start, end)?;
        let (s, after_s) = read_integer(der, after_r, end)?;
        if after_s != end {
            return Err(SignatureError::TrailingBytes {
                extra: end - after_s,
            });
        }

        let mut out = [0u8; Self::LEN];
        left_pad_into(r, &mut out[..SCALAR_LEN])?;
        left_pad_into(s, &mut out[SCALAR_LEN..])?;
        Ok(Self(out))
    }

    /// Encode as minimal DER, the form signing backends emit.
    #[must_use]
    pub fn to_der(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(Self::LEN + 6);
        encode_integer(&mut body, self.r());
        encode_integer(&mut body, self.s());

        let mut der = Vec::with_capacity(body.len() + 3);
        der.push(SEQUENCE_TAG);
        encode_length(&mut der, body.len());
        der.extend_from_slice(&body);
        der
    }

    /// URL-safe base64 without padding.
    #[must_use]
    pub fn to_text(&self) -> String {
        TEXT_ENGINE.encode(self.0)
    }

    /// Parse the text form. Padding is optional, surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// - [`SignatureError::InvalidText`] for characters outside the URL-safe alphabet
    /// - [`SignatureError::InvalidCanonicalLength`] if the decoded bytes are not 64 long
    pub fn from_text(text: &str) -> Result<Self, SignatureError> {
        let bytes = TEXT_ENGINE
            .decode(text.trim())
            .map_err(|e| SignatureError::InvalidText {
                reason: e.to_string(),
            })?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for CanonicalSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CanonicalSignature")
            .field(&self.to_text())
            .finish()
    }
}

impl fmt::Display for CanonicalSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl Serialize for CanonicalSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_text())
    }
}

impl<'de> Deserialize<'de> for CanonicalSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_text(&text).map_err(serde::de::Error::custom)
    }
}

fn expect_tag(der: &[u8], offset: usize, expected: u8) -> Result<(), SignatureError> {
    let found = *der.get(offset).ok_or(SignatureError::Truncated { offset })?;
    if found != expected {
        return Err(SignatureError::UnexpectedTag {
            expected,
            found,
            offset,
        });
    }
    Ok(())
}

/// Read a DER length at `offset`; returns the length and the offset after the field.
fn read_length(der: &[u8], offset: usize) -> Result<(usize, usize), SignatureError> {
    let first = *der.get(offset).ok_or(SignatureError::Truncated { offset })?;
    if first < 0x80 {
        return Ok((usize::from(first), offset + 1));
    }

    let count = usize::from(first & 0x7f);
    if count == 0 || count > 4 {
        return Err(SignatureError::UnsupportedLength { offset });
    }
    let bytes = der
        .get(offset + 1..offset + 1 + count)
        .ok_or(SignatureError::Truncated { offset: offset + 1 })?;
    if bytes.first() == Some(&0) {
        return Err(SignatureError::NonMinimalLength { offset });
    }
    let length = bytes
        .iter()
        .fold(0usize, |acc, byte| (acc << 8) | usize::from(*byte));
    if length < 0x80 {
        return Err(SignatureError::NonMinimalLength { offset });
    }
    Ok((length, offset + 1 + count))
}

fn read_integer(der: &[u8], offset: usize, end: usize) -> Result<(&[u8], usize), SignatureError> {
    if offset >= end {
        return Err(SignatureError::Truncated { offset });
    }
    expect_tag(der, offset, INTEGER_TAG)?;
    let (declared, start) = read_length(&der[..end], offset + 1)?;
    let available = end - start;
    if declared > available {
        return Err(SignatureError::LengthOverflow {
            declared,
            available,
        });
    }
    if declared == 0 {
        return Err(SignatureError::EmptyInteger { offset });
    }
    Ok((&der[start..start + declared], start + declared))
}

fn left_pad_into(integer: &[u8], out: &mut [u8]) -> Result<(), SignatureError> {
    let significant = strip_leading_zeros(integer);
    if significant.len() > out.len() {
        return Err(SignatureError::IntegerTooLarge {
            len: significant.len(),
        });
    }
    let pad = out.len() - significant.len();
    out[pad..].copy_from_slice(significant);
    Ok(())
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

fn encode_integer(out: &mut Vec<u8>, scalar: &[u8]) {
    let significant = strip_leading_zeros(scalar);
    let needs_sign_byte = significant.first().is_none_or(|b| b & 0x80 != 0);
    let len = significant.len() + usize::from(needs_sign_byte);

    out.push(INTEGER_TAG);
    encode_length(out, len);
    if needs_sign_byte {
        out.push(0x00);
    }
    out.extend_from_slice(significant);
}

fn encode_length(out: &mut Vec<u8>, len: usize) {
    match u8::try_from(len) {
        Ok(short) if short < 0x80 => out.push(short),
        _ => {
            let bytes = len.to_be_bytes();
            let significant = strip_leading_zeros(&bytes);
            #[allow(clippy::cast_possible_truncation)] // At most size_of::<usize>() bytes
            let count = significant.len() as u8;
            out.push(0x80 | count);
            out.extend_from_slice(significant);
        }
    }
}
