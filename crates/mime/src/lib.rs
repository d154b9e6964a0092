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

//! A library to parse, inspect and modify MIME messages.
//!
//! A message is parsed into a tree of [`MimePart`] keeping a handle on the
//! original buffer. Headers and bodies are decoded on first access, and
//! serializing a tree writes the untouched regions back byte for byte.

// #![doc(html_no_source)]
// #![deny(missing_docs)]
// #![forbid(unsafe_code)]
// //
// #![warn(rust_2018_idioms)]
// #![warn(clippy::all)]
// #![warn(clippy::pedantic)]
// #![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

/// average size of a mail
pub const MAIL_SIZE: usize = 1_000_000; // 1MB

/// Minimal mailbox list parsing, used to write address headers.
pub mod address;
/// Decoded bodies and transfer encodings.
pub mod body;
/// Charset names and conversions.
pub mod charset;
/// Tunable limits of the parser and the encoder.
pub mod config;
/// `Content-Type` and `Content-Transfer-Encoding` values.
pub mod content_type;
/// Construction of new parts.
pub mod create;
/// Errors raised by the engine.
pub mod errors;
/// Header blocks of a part.
pub mod headers;
/// Tokenizer and tree builder.
pub mod parsing;
/// The tree of parts of a message.
pub mod part;
/// Production of the bytes of a message.
pub mod serializer;

pub use body::Body;
pub use config::Limits;
pub use content_type::{ContentType, HeadersKind, Kind, TransferEncoding};
pub use errors::{
    DecodingError, DecodingResult, EncodingError, EncodingResult, MimeError, MimeResult,
};
pub use headers::{HeaderValue, MimeHeaders, WithParams};
pub use part::{MimePart, Walk};
