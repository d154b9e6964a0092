/*
 * vSMTP mail transfer agent
 *
 * Copyright (C) 2003 - viridIT SAS
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

use crate::{
    charset,
    config::Limits,
    content_type::{ContentType, TransferEncoding},
    DecodingError, DecodingResult, EncodingError, EncodingResult,
};

/// base64 decoder accepting missing padding and trailing bits.
const LENIENT_BASE64: base64::engine::GeneralPurpose = base64::engine::GeneralPurpose::new(
    &base64::alphabet::STANDARD,
    base64::engine::GeneralPurposeConfig::new()
        .with_decode_padding_mode(base64::engine::DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Maximum length of a base64 line, see rfc2045 section 6.8.
const BASE64_LINE_LENGTH: usize = 76;

/// Decoded content of a leaf part.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum Body {
    /// `text/*` content, converted from its charset.
    Text(String),
    /// Anything else, transfer decoded.
    Bytes(Vec<u8>),
}

impl Body {
    ///
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(_) => None,
        }
    }

    /// The content as bytes, text is returned as utf-8.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }

    ///
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    ///
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for Body {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

/// Lenient base64 decoding: whitespace and characters outside of the
/// alphabet are skipped, missing padding is tolerated.
pub fn decode_base64(input: &[u8]) -> Result<Vec<u8>, base64::DecodeError> {
    let cleaned = input
        .iter()
        .copied()
        .filter(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
        .collect::<Vec<_>>();

    match base64::Engine::decode(&LENIENT_BASE64, &cleaned) {
        Ok(decoded) => Ok(decoded),
        // several encoded blocks glued together, keep the first one.
        Err(error) => match memchr::memchr(b'=', &cleaned) {
            Some(padding) if padding + 2 < cleaned.len() => {
                tracing::debug!(%error, "Padding inside base64 content, truncating");
                base64::Engine::decode(&LENIENT_BASE64, &cleaned[..padding])
            }
            _ => Err(error),
        },
    }
}

/// Wrap base64 output in lines of [`BASE64_LINE_LENGTH`].
fn encode_base64(input: &[u8]) -> Vec<u8> {
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, input);

    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_LENGTH * 2);
    for (i, line) in encoded.as_bytes().chunks(BASE64_LINE_LENGTH).enumerate() {
        if i != 0 {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(line);
    }
    out
}

/// Turn lone `\n` into `\r\n`.
fn to_crlf(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / 40);
    let mut previous = 0;
    for byte in input {
        if *byte == b'\n' && previous != b'\r' {
            out.push(b'\r');
        }
        out.push(*byte);
        previous = *byte;
    }
    out
}

/// Decode the raw content of a part, transfer encoding first, then charset.
#[tracing::instrument(level = "trace", skip(raw, content_type), fields(len = raw.len(), content_type = %content_type.format_type()))]
pub fn decode(
    raw: &[u8],
    content_type: &ContentType,
    encoding: TransferEncoding,
) -> DecodingResult<Body> {
    let bytes = match encoding {
        TransferEncoding::Base64 => decode_base64(raw).map_err(|error| DecodingError::Body {
            encoding: encoding.to_string(),
            reason: error.to_string(),
        })?,
        TransferEncoding::QuotedPrintable => {
            quoted_printable::decode(raw, quoted_printable::ParseMode::Robust).map_err(|error| {
                DecodingError::Body {
                    encoding: encoding.to_string(),
                    reason: error.to_string(),
                }
            })?
        }
        TransferEncoding::SevenBit | TransferEncoding::EightBit | TransferEncoding::Binary => {
            raw.to_vec()
        }
    };

    if !content_type.is_text() && !content_type.is_headers_container() {
        return Ok(Body::Bytes(bytes));
    }

    let charset = content_type.charset();
    let text = charset::decode(&bytes, charset.as_deref());

    if content_type.subtype() == "html" && charset.as_deref() == Some(charset::UTF_8) {
        return Ok(Body::Text(text.replace('\u{a0}', "&nbsp;")));
    }
    Ok(Body::Text(text))
}

/// Result of [`encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Transfer encoded content.
    pub bytes: Vec<u8>,
    /// Transfer encoding used.
    pub encoding: TransferEncoding,
    /// Charset used for text bodies.
    pub charset: Option<String>,
}

/// Encode a body for a part of type `content_type`.
///
/// The declared charset is kept if it can represent the text, otherwise
/// `ascii` or `utf-8` is used. `preferred` is the encoding currently in use,
/// it is never downgraded.
pub fn encode(
    body: &Body,
    content_type: &ContentType,
    preferred: TransferEncoding,
    limits: &Limits,
) -> EncodingResult<Encoded> {
    let (bytes, charset, encoding) = match body {
        Body::Text(text) => {
            let declared = content_type.charset().filter(|charset| !charset.is_empty());

            let (charset, bytes) = match declared
                .and_then(|charset| charset::encode(text, &charset).map(|bytes| (charset, bytes)))
            {
                Some(encoded) => encoded,
                None if text.is_ascii() => (charset::ASCII.to_string(), text.as_bytes().to_vec()),
                None => (
                    charset::UTF_8.to_string(),
                    charset::encode(text, charset::UTF_8)
                        .ok_or_else(|| EncodingError::Charset(charset::UTF_8.to_string()))?,
                ),
            };
            let bytes = to_crlf(&bytes);

            let encoding = if charset::is_latin(&charset) {
                let long_lines = bytes
                    .split(|b| *b == b'\n')
                    .any(|line| line.strip_suffix(b"\r").unwrap_or(line).len() > limits.max_body_line_length);

                if long_lines || !bytes.is_ascii() {
                    preferred.stronger(TransferEncoding::QuotedPrintable)
                } else {
                    preferred
                }
            } else {
                preferred.stronger(TransferEncoding::Base64)
            };

            (bytes, Some(charset), encoding)
        }
        Body::Bytes(bytes) => (
            bytes.clone(),
            None,
            preferred.stronger(TransferEncoding::Base64),
        ),
    };

    let bytes = match encoding {
        TransferEncoding::Base64 => encode_base64(&bytes),
        TransferEncoding::QuotedPrintable => quoted_printable::encode(&bytes),
        TransferEncoding::SevenBit | TransferEncoding::EightBit | TransferEncoding::Binary => bytes,
    };

    tracing::trace!(%encoding, ?charset, len = bytes.len(), "Body encoded");

    Ok(Encoded {
        bytes,
        encoding,
        charset,
    })
}
