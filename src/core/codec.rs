//! Line codec: conversion between display text and wire bytes.
//!
//! Outbound text is normalized to CR+LF line endings and encoded in a
//! configurable 8-bit encoding (GBK by default, matching the devices this
//! tool grew up around). Inbound bytes are decoded either as two-byte
//! windows for text display or rendered as hex digits. All functions are
//! pure; the session engine decides when to call them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Text encoding used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// GBK, the legacy double-byte Chinese charset.
    #[default]
    Gbk,
    /// UTF-8
    Utf8,
    /// Latin-1 (Windows-1252 superset)
    Latin1,
}

impl TextEncoding {
    fn repr(self) -> &'static encoding_rs::Encoding {
        match self {
            Self::Gbk => encoding_rs::GBK,
            Self::Utf8 => encoding_rs::UTF_8,
            Self::Latin1 => encoding_rs::WINDOWS_1252,
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gbk => write!(f, "GBK"),
            Self::Utf8 => write!(f, "UTF-8"),
            Self::Latin1 => write!(f, "Latin-1"),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gbk" | "gb2312" => Ok(Self::Gbk),
            "utf8" | "utf-8" => Ok(Self::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" | "windows-1252" => Ok(Self::Latin1),
            other => Err(EncodingError::Unknown(other.to_string())),
        }
    }
}

/// Codec errors
#[derive(Debug, Error)]
pub enum EncodingError {
    /// A character in the input has no representation in the target encoding.
    #[error("character {0:?} is not representable in {1}")]
    Unmappable(char, TextEncoding),

    /// A two-byte window did not decode to a valid character.
    #[error("invalid byte pair {0:#04X} {1:#04X} for {2}")]
    InvalidPair(u8, u8, TextEncoding),

    /// A byte buffer is not valid text in the given encoding.
    #[error("input is not valid {0} text")]
    InvalidText(TextEncoding),

    /// Unrecognized encoding name.
    #[error("unknown encoding: {0}")]
    Unknown(String),
}

/// Encode display text to wire bytes.
///
/// Line endings are normalized first: a lone `\n` becomes `\r\n`, an
/// existing `\r\n` is left alone. The round trip through [`decode`] is
/// therefore intentionally lossy for bare-LF input.
pub fn encode(text: &str, encoding: TextEncoding) -> Result<Vec<u8>, EncodingError> {
    let normalized = normalize_line_endings(text);
    let (bytes, _, had_errors) = encoding.repr().encode(&normalized);
    if had_errors {
        return Err(EncodingError::Unmappable(
            first_unmappable(&normalized, encoding),
            encoding,
        ));
    }
    Ok(bytes.into_owned())
}

/// Strictly decode a whole byte buffer as text.
pub fn decode(bytes: &[u8], encoding: TextEncoding) -> Result<String, EncodingError> {
    let (text, _, had_errors) = encoding.repr().decode(bytes);
    if had_errors {
        return Err(EncodingError::InvalidText(encoding));
    }
    Ok(text.into_owned())
}

/// Decode exactly two accumulated inbound bytes.
///
/// The display path collects inbound bytes in pairs on the assumption that
/// every character is two bytes in the configured encoding. Pairs decode
/// independently of each other; note that in GBK an all-ASCII pair
/// legitimately yields two characters.
pub fn decode_pair(hi: u8, lo: u8, encoding: TextEncoding) -> Result<String, EncodingError> {
    decode(&[hi, lo], encoding).map_err(|_| EncodingError::InvalidPair(hi, lo, encoding))
}

/// Render a single byte as two uppercase hex digits.
pub fn to_hex(byte: u8) -> String {
    format!("{byte:02X}")
}

fn normalize_line_endings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut prev_cr = false;
    for c in text.chars() {
        if c == '\n' && !prev_cr {
            out.push('\r');
        }
        out.push(c);
        prev_cr = c == '\r';
    }
    out
}

fn first_unmappable(text: &str, encoding: TextEncoding) -> char {
    text.chars()
        .find(|c| {
            let (_, _, bad) = encoding.repr().encode(&c.to_string());
            bad
        })
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_inserts_cr_before_lf() {
        let bytes = encode("hello\n", TextEncoding::Gbk).unwrap();
        assert_eq!(bytes, b"hello\r\n");
    }

    #[test]
    fn test_encode_keeps_existing_crlf() {
        let bytes = encode("a\r\nb\n", TextEncoding::Gbk).unwrap();
        assert_eq!(bytes, b"a\r\nb\r\n");
    }

    #[test]
    fn test_encode_gbk_double_byte() {
        // "你" is C4 E3 in GBK
        let bytes = encode("你", TextEncoding::Gbk).unwrap();
        assert_eq!(bytes, [0xC4, 0xE3]);
    }

    #[test]
    fn test_encode_unmappable_fails() {
        let err = encode("中", TextEncoding::Latin1).unwrap_err();
        assert!(matches!(err, EncodingError::Unmappable('中', _)));
    }

    #[test]
    fn test_decode_round_trip() {
        let text = "温度=25\r\n";
        let bytes = encode(text, TextEncoding::Gbk).unwrap();
        assert_eq!(decode(&bytes, TextEncoding::Gbk).unwrap(), text);
    }

    #[test]
    fn test_decode_pair_gbk() {
        assert_eq!(decode_pair(0xC4, 0xE3, TextEncoding::Gbk).unwrap(), "你");
    }

    #[test]
    fn test_decode_pairs_are_independent() {
        // Two consecutive windows decode on their own, not as one stream.
        assert_eq!(decode_pair(0x41, 0x42, TextEncoding::Gbk).unwrap(), "AB");
        assert_eq!(decode_pair(0x43, 0x44, TextEncoding::Gbk).unwrap(), "CD");
    }

    #[test]
    fn test_decode_pair_invalid() {
        let err = decode_pair(0x81, 0x20, TextEncoding::Gbk).unwrap_err();
        assert!(matches!(err, EncodingError::InvalidPair(0x81, 0x20, _)));
    }

    #[test]
    fn test_to_hex_uppercase() {
        assert_eq!(to_hex(0x0A), "0A");
        assert_eq!(to_hex(0xFF), "FF");
        assert_eq!(to_hex(0x00), "00");
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("gbk".parse::<TextEncoding>().unwrap(), TextEncoding::Gbk);
        assert_eq!("UTF-8".parse::<TextEncoding>().unwrap(), TextEncoding::Utf8);
        assert!("ebcdic".parse::<TextEncoding>().is_err());
    }
}
