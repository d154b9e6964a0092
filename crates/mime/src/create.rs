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

//! Construction of new parts.
//!
//! Every function returns a root part, which stops being one when appended
//! to a multipart. `MIME-Version` is added when a root is written.

use crate::{
    body::{self, Body},
    config::Limits,
    content_type::{ContentType, TransferEncoding},
    headers::{
        MimeHeaders, WithParams, CONTENT_DISPOSITION, CONTENT_TRANSFER_ENCODING, CONTENT_TYPE,
    },
    part::{BodyContainer, Container, MimePart, PartContainer},
    EncodingError, EncodingResult,
};

/// A boundary that cannot be found in a body by chance.
#[must_use]
pub fn new_boundary() -> String {
    format!("=_{}", uuid::Uuid::new_v4().simple())
}

fn root(mut part: MimePart) -> MimePart {
    part.is_root = true;
    part
}

fn leaf(
    mut content_type: ContentType,
    body: Body,
    disposition: Option<&str>,
    filename: Option<&str>,
) -> EncodingResult<MimePart> {
    let limits = Limits::default();
    let encoded = body::encode(&body, &content_type, TransferEncoding::SevenBit, &limits)?;
    if let Some(charset) = &encoded.charset {
        content_type.set_charset(charset);
    }

    let mut headers = MimeHeaders::default();
    headers.add(CONTENT_TYPE, &content_type);
    headers.add(CONTENT_TRANSFER_ENCODING, encoded.encoding.as_ref());

    if disposition.is_some() || filename.is_some() {
        let mut value = WithParams::new(disposition.unwrap_or("attachment"));
        if let Some(filename) = filename {
            value.params.push(("filename".to_string(), filename.to_string()));
        }
        headers.add(CONTENT_DISPOSITION, value);
    }

    tracing::trace!(
        content_type = %content_type.format_type(),
        encoding = %encoded.encoding,
        "Leaf created"
    );

    Ok(root(MimePart::new(
        Container::Body(BodyContainer {
            content_type,
            headers,
            body,
            encoded: bytes::Bytes::from(encoded.bytes),
        }),
        limits,
    )))
}

/// A `text/<subtype>` leaf.
///
/// The charset is kept if it can represent `body`, otherwise `ascii` or
/// `utf-8` is used.
pub fn text(
    subtype: &str,
    body: &str,
    charset: Option<&str>,
    disposition: Option<&str>,
    filename: Option<&str>,
) -> EncodingResult<MimePart> {
    let mut content_type = ContentType::new("text", subtype);
    if let Some(charset) = charset {
        content_type.set_charset(charset);
    }
    leaf(content_type, Body::Text(body.to_string()), disposition, filename)
}

/// A `<main>/<subtype>` leaf carrying bytes.
pub fn binary(
    main: &str,
    subtype: &str,
    body: impl Into<Vec<u8>>,
    filename: Option<&str>,
    disposition: Option<&str>,
    charset: Option<&str>,
) -> EncodingResult<MimePart> {
    let mut content_type = ContentType::new(main, subtype);
    if let Some(charset) = charset {
        content_type.set_charset(charset);
    }
    if let Some(filename) = filename {
        content_type.set_param("name", filename);
    }
    leaf(content_type, Body::Bytes(body.into()), disposition, filename)
}

/// A file attached to a message, `attachment` disposition by default.
pub fn attachment(
    content_type: ContentType,
    body: impl Into<Body>,
    filename: &str,
    disposition: Option<&str>,
) -> EncodingResult<MimePart> {
    leaf(
        content_type,
        body.into(),
        Some(disposition.unwrap_or("attachment")),
        Some(filename),
    )
}

/// An empty `multipart/<subtype>` with a generated boundary.
#[must_use]
pub fn multipart(subtype: &str) -> MimePart {
    let content_type = ContentType::new("multipart", subtype).with_param("boundary", new_boundary());
    container(content_type)
}

fn container(content_type: ContentType) -> MimePart {
    let mut headers = MimeHeaders::default();
    headers.add(CONTENT_TYPE, &content_type);

    root(MimePart::new(
        Container::Part(PartContainer::constructed(content_type, headers)),
        Limits::default(),
    ))
}

/// A multipart holding `children`, a boundary is generated if the
/// content type has none.
pub fn from_parts(
    mut content_type: ContentType,
    children: impl IntoIterator<Item = MimePart>,
) -> EncodingResult<MimePart> {
    if !content_type.is_multipart() {
        return Err(EncodingError::NotMultipart(content_type.format_type()));
    }
    if content_type.boundary().is_none() {
        content_type.set_param("boundary", new_boundary());
    }

    let mut part = container(content_type);
    for child in children {
        part.append(child)?;
    }
    Ok(part)
}

/// A `message/rfc822` part enclosing `message`.
#[must_use]
pub fn message_container(mut message: MimePart) -> MimePart {
    message.is_root = false;

    let mut part = container(ContentType::new("message", "rfc822"));
    part.enclosed = Some(Box::new(message));
    part
}
