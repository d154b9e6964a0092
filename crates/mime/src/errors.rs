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

/// Errors raised while reading a message: malformed or hostile input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodingError {
    /// A header line is longer than the configured maximum.
    #[error("header line is not supposed to be longer than {expected} bytes but got {got}")]
    LineTooLong {
        /// Maximum size expected.
        expected: usize,
        /// Actual size.
        got: usize,
    },
    /// Header names must be non-empty, printable ASCII.
    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),
    /// Something that is not a header where a header was expected.
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    /// The token operation ceiling was hit, the structure is pathological.
    #[error("too many operations while parsing mime structure: {got}, max is {max}")]
    TooManyOperations {
        /// Configured ceiling.
        max: usize,
        /// Operation count reached.
        got: usize,
    },
    ///
    #[error("Boundary not found in Content-Type header parameters, {0}")]
    BoundaryNotFound(String),
    ///
    #[error("Misplaced boundary in mime message, {0}")]
    MisplacedBoundary(String),
    /// The body could not be transfer-decoded.
    #[error("failed to decode {encoding} body: {reason}")]
    Body {
        /// Transfer encoding in use.
        encoding: String,
        /// Underlying failure.
        reason: String,
    },
}

/// Errors raised while producing the bytes of a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// A root part must carry at least one header.
    #[error("cannot serialize a root part without headers")]
    NoHeaders,
    /// The body cannot be represented with the requested charset.
    #[error("body cannot be encoded with charset '{0}'")]
    Charset(String),
    /// Only leaves and headers containers carry a body of their own.
    #[error("a {0} part does not carry a body")]
    NoBody(String),
    /// The operation requires a multipart node.
    #[error("cannot append parts to a non-multipart {0} part")]
    NotMultipart(String),
    /// A multipart content type without `boundary` parameter.
    #[error("no boundary to separate the parts of '{0}'")]
    NoBoundary(String),
}

/// Any error raised by the engine.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, thiserror::Error)]
pub enum MimeError {
    ///
    #[error("{0}")]
    Io(#[from] std::io::Error),
    ///
    #[error("decoding failed: {0}")]
    Decoding(#[from] DecodingError),
    ///
    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodingError),
}

/// Result emitted while decoding.
pub type DecodingResult<T> = Result<T, DecodingError>;

/// Result emitted while encoding.
pub type EncodingResult<T> = Result<T, EncodingError>;

/// Result emitted by the engine's top level operations.
pub type MimeResult<T> = Result<T, MimeError>;
