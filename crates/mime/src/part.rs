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

//! Definition of the tree of parts of a message.

use crate::{
    body::{self, Body},
    config::Limits,
    content_type::{ContentType, Kind, TransferEncoding},
    headers::{
        parsing::split_header_block, MimeHeaders, WithParams, CONTENT_DISPOSITION,
        CONTENT_TRANSFER_ENCODING, CONTENT_TYPE,
    },
    parsing::builder,
    DecodingResult, EncodingError, EncodingResult, MimeResult,
};
use once_cell::unsync::OnceCell;

/// A region of the original buffer.
///
/// ```text
/// start        header_end   body_start             end
///   |  headers   |  CRLF      |  body                 |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// The whole message, shared by every part.
    pub buffer: bytes::Bytes,
    ///
    pub start: usize,
    /// End of the header block, before the empty line.
    pub header_end: usize,
    /// After the empty line, equal to `header_end` if there is none.
    pub body_start: usize,
    ///
    pub end: usize,
}

impl Source {
    /// The bytes of the part, as found in the buffer.
    #[must_use]
    pub fn span(&self) -> bytes::Bytes {
        self.buffer.slice(self.start..self.end)
    }

    /// The header lines, without the empty line that ends them.
    #[must_use]
    pub fn header_block(&self) -> bytes::Bytes {
        self.buffer.slice(self.start..self.header_end.min(self.end))
    }

    /// The empty line between the headers and the body, if any.
    #[must_use]
    pub fn separator(&self) -> bytes::Bytes {
        self.buffer
            .slice(self.header_end.min(self.end)..self.body_start.max(self.header_end).min(self.end))
    }

    /// The raw, transfer encoded, body.
    #[must_use]
    pub fn body(&self) -> bytes::Bytes {
        self.buffer.slice(self.body_start.min(self.end)..self.end)
    }
}

/// A parsed leaf: headers and body are decoded on first access.
#[derive(Debug, Clone)]
pub struct StreamContainer {
    pub(crate) content_type: ContentType,
    pub(crate) source: Source,
    headers: OnceCell<MimeHeaders>,
    body: OnceCell<Body>,
    /// set when the body is replaced.
    encoded: Option<bytes::Bytes>,
}

impl StreamContainer {
    pub(crate) const fn new(content_type: ContentType, source: Source) -> Self {
        Self {
            content_type,
            source,
            headers: OnceCell::new(),
            body: OnceCell::new(),
            encoded: None,
        }
    }
}

/// A leaf built from a decoded body.
#[derive(Debug, Clone)]
pub struct BodyContainer {
    pub(crate) content_type: ContentType,
    pub(crate) headers: MimeHeaders,
    pub(crate) body: Body,
    pub(crate) encoded: bytes::Bytes,
}

/// Offsets of the text around the children of a parsed multipart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartLayout {
    /// Boundary in use when the part was parsed.
    pub boundary: String,
    /// Text before the first delimiter.
    pub preamble: std::ops::Range<usize>,
    /// Closing delimiter, line breaks included. `None` if the multipart is
    /// not terminated.
    pub final_boundary: Option<std::ops::Range<usize>>,
    /// Text after the closing delimiter.
    pub epilogue: Option<std::ops::Range<usize>>,
}

/// A multipart or a message container.
#[derive(Debug, Clone)]
pub struct PartContainer {
    pub(crate) content_type: ContentType,
    headers: OnceCell<MimeHeaders>,
    pub(crate) source: Option<Source>,
    /// Only for parsed multiparts.
    pub layout: Option<MultipartLayout>,
}

impl PartContainer {
    pub(crate) const fn parsed(
        content_type: ContentType,
        source: Source,
        layout: Option<MultipartLayout>,
    ) -> Self {
        Self {
            content_type,
            headers: OnceCell::new(),
            source: Some(source),
            layout,
        }
    }

    pub(crate) fn constructed(content_type: ContentType, headers: MimeHeaders) -> Self {
        Self {
            content_type,
            headers: OnceCell::from(headers),
            source: None,
            layout: None,
        }
    }
}

/// Storage of a part.
#[derive(Debug, Clone)]
pub enum Container {
    /// Parsed leaf or headers container.
    Stream(StreamContainer),
    /// Constructed leaf.
    Body(BodyContainer),
    /// Multipart or message container.
    Part(PartContainer),
}

impl Container {
    ///
    #[must_use]
    pub const fn content_type(&self) -> &ContentType {
        match self {
            Self::Stream(container) => &container.content_type,
            Self::Body(container) => &container.content_type,
            Self::Part(container) => &container.content_type,
        }
    }

    fn content_type_mut(&mut self) -> &mut ContentType {
        match self {
            Self::Stream(container) => &mut container.content_type,
            Self::Body(container) => &mut container.content_type,
            Self::Part(container) => &mut container.content_type,
        }
    }

    /// The region of the buffer the part was parsed from.
    #[must_use]
    pub const fn source(&self) -> Option<&Source> {
        match self {
            Self::Stream(container) => Some(&container.source),
            Self::Body(_) => None,
            Self::Part(container) => container.source.as_ref(),
        }
    }
}

/// The delimiter line opening a part inside its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiter {
    /// Boundary of the parent when the part was parsed.
    pub boundary: String,
    /// The delimiter as found in the buffer, surrounding line breaks included.
    pub bytes: bytes::Bytes,
}

/// A node of a message tree.
///
/// Parsed parts keep a handle on the original buffer and decode their
/// headers and body on first access only. A part that was not modified is
/// written back byte for byte.
#[derive(Debug, Clone)]
pub struct MimePart {
    pub(crate) container: Container,
    /// Children of a multipart.
    pub(crate) parts: Vec<MimePart>,
    /// The message or header block of a container.
    pub(crate) enclosed: Option<Box<MimePart>>,
    pub(crate) is_root: bool,
    /// set when children are added, removed or reordered.
    pub(crate) parts_changed: bool,
    pub(crate) delimiter: Option<Delimiter>,
    pub(crate) limits: Limits,
}

impl MimePart {
    pub(crate) const fn new(container: Container, limits: Limits) -> Self {
        Self {
            container,
            parts: vec![],
            enclosed: None,
            is_root: false,
            parts_changed: false,
            delimiter: None,
            limits,
        }
    }

    /// Parse a message with the default [`Limits`].
    pub fn from_bytes(buffer: impl Into<bytes::Bytes>) -> DecodingResult<Self> {
        Self::from_bytes_with(buffer, &Limits::default())
    }

    /// Parse a message.
    pub fn from_bytes_with(buffer: impl Into<bytes::Bytes>, limits: &Limits) -> DecodingResult<Self> {
        builder::build(buffer.into(), limits)
    }

    /// Parse a message, if the structure cannot be understood the whole
    /// buffer is read as a single `text/plain` part.
    pub fn from_bytes_lenient(buffer: impl Into<bytes::Bytes>, limits: &Limits) -> Self {
        let buffer = buffer.into();

        builder::build(buffer.clone(), limits).unwrap_or_else(|error| {
            tracing::warn!(%error, "Invalid mime structure, reading the message as plain text");

            let block = split_header_block(&buffer, 0, buffer.len());
            let source = Source {
                start: 0,
                header_end: block.header_end,
                body_start: block.body_start,
                end: buffer.len(),
                buffer,
            };
            let mut root = Self::new(
                Container::Stream(StreamContainer::new(ContentType::default_text(), source)),
                *limits,
            );
            root.is_root = true;
            root
        })
    }

    /// Read and parse a whole message.
    pub fn from_reader(mut reader: impl std::io::Read) -> MimeResult<Self> {
        let mut buffer = Vec::with_capacity(crate::MAIL_SIZE);
        reader.read_to_end(&mut buffer)?;
        Ok(Self::from_bytes(buffer)?)
    }

    ///
    #[must_use]
    pub const fn container(&self) -> &Container {
        &self.container
    }

    /// Limits used to parse and encode this part.
    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    ///
    #[must_use]
    pub const fn content_type(&self) -> &ContentType {
        self.container.content_type()
    }

    /// Replace the content type, the `Content-Type` header included.
    pub fn set_content_type(&mut self, content_type: ContentType) -> DecodingResult<()> {
        self.headers_mut()?.set(CONTENT_TYPE, &content_type);
        *self.container.content_type_mut() = content_type;
        Ok(())
    }

    fn headers_cell(&self) -> Option<&MimeHeaders> {
        match &self.container {
            Container::Stream(container) => container.headers.get(),
            Container::Body(container) => Some(&container.headers),
            Container::Part(container) => container.headers.get(),
        }
    }

    /// Headers of the part, parsed on first access.
    pub fn headers(&self) -> DecodingResult<&MimeHeaders> {
        match &self.container {
            Container::Stream(container) => container.headers.get_or_try_init(|| {
                MimeHeaders::parse(&container.source.header_block(), &self.limits)
            }),
            Container::Body(container) => Ok(&container.headers),
            Container::Part(container) => {
                container
                    .headers
                    .get_or_try_init(|| match &container.source {
                        Some(source) => MimeHeaders::parse(&source.header_block(), &self.limits),
                        None => Ok(MimeHeaders::default()),
                    })
            }
        }
    }

    /// Mutable headers of the part, parsed on first access.
    pub fn headers_mut(&mut self) -> DecodingResult<&mut MimeHeaders> {
        self.headers()?;

        let headers = match &mut self.container {
            Container::Stream(container) => container.headers.get_mut(),
            Container::Body(container) => Some(&mut container.headers),
            Container::Part(container) => container.headers.get_mut(),
        };
        match headers {
            Some(headers) => Ok(headers),
            None => unreachable!("headers are initialized above"),
        }
    }

    /// Remove every header named in `names`, returns the number of removed lines.
    pub fn remove_headers(&mut self, names: &[&str]) -> DecodingResult<usize> {
        let headers = self.headers_mut()?;
        Ok(names.iter().map(|name| headers.remove(name)).sum())
    }

    /// Transfer encoding declared by the part, `7bit` if none.
    pub fn content_encoding(&self) -> DecodingResult<TransferEncoding> {
        Ok(self
            .headers()?
            .get_value(CONTENT_TRANSFER_ENCODING)
            .map(TransferEncoding::parse_lenient)
            .unwrap_or_default())
    }

    ///
    #[must_use]
    pub fn content_disposition(&self) -> Option<&WithParams> {
        self.headers()
            .ok()
            .and_then(|headers| headers.get_params(CONTENT_DISPOSITION))
    }

    /// Normalized charset of the content type.
    #[must_use]
    pub fn charset(&self) -> Option<String> {
        self.content_type().charset()
    }

    /// Decoded body of a leaf or headers container, decoded on first access.
    ///
    /// Multiparts and message containers have no body of their own.
    pub fn body(&self) -> DecodingResult<Option<&Body>> {
        match &self.container {
            Container::Stream(container) => container
                .body
                .get_or_try_init(|| {
                    body::decode(
                        &container.source.body(),
                        &container.content_type,
                        self.content_encoding()?,
                    )
                })
                .map(Some),
            Container::Body(container) => Ok(Some(&container.body)),
            Container::Part(_) => Ok(None),
        }
    }

    /// Replace the body of a leaf.
    ///
    /// The charset and the transfer encoding are chosen to carry the new
    /// content, and the headers are updated accordingly.
    #[tracing::instrument(level = "debug", skip_all, fields(content_type = %self.content_type().format_type()))]
    pub fn set_body(&mut self, body: impl Into<Body>) -> MimeResult<()> {
        if let Container::Part(container) = &self.container {
            return Err(EncodingError::NoBody(container.content_type.format_type()).into());
        }

        let body = body.into();
        let preferred = self.content_encoding()?;
        let mut content_type = self.content_type().clone();

        let encoded = body::encode(&body, &content_type, preferred, &self.limits)?;
        if let Some(charset) = &encoded.charset {
            // ascii is the default, an undeclared charset stays undeclared.
            let declared = content_type.charset();
            if declared.as_ref().map_or(charset != crate::charset::ASCII, |declared| declared != charset) {
                content_type.set_charset(charset);
            }
        }
        let type_changed = &content_type != self.content_type();

        let headers = self.headers_mut()?;
        if type_changed {
            headers.set(CONTENT_TYPE, &content_type);
        }
        if encoded.encoding != preferred {
            headers.set(CONTENT_TRANSFER_ENCODING, encoded.encoding.as_ref());
        }

        tracing::debug!(
            encoding = %encoded.encoding,
            charset = ?encoded.charset,
            len = encoded.bytes.len(),
            "Body replaced"
        );

        let bytes = bytes::Bytes::from(encoded.bytes);
        match &mut self.container {
            Container::Stream(container) => {
                container.content_type = content_type;
                container.body = OnceCell::from(body.clone());
                container.encoded = Some(bytes);
            }
            Container::Body(container) => {
                container.content_type = content_type;
                container.body = body.clone();
                container.encoded = bytes;
            }
            Container::Part(_) => unreachable!("checked above"),
        }

        if self.content_type().is_headers_container() {
            let nested = self
                .enclosed
                .as_ref()
                .map_or_else(ContentType::default_text, |enclosed| {
                    enclosed.content_type().clone()
                });
            self.enclosed = Some(Box::new(builder::build_enclosed_headers(
                bytes::Bytes::from(body.into_bytes()),
                nested,
                &self.limits,
            )));
        }

        Ok(())
    }

    /// Transfer encoded body, if the part has one.
    pub(crate) fn raw_body(&self) -> Option<bytes::Bytes> {
        match &self.container {
            Container::Stream(container) => Some(
                container
                    .encoded
                    .clone()
                    .unwrap_or_else(|| container.source.body()),
            ),
            Container::Body(container) => Some(container.encoded.clone()),
            Container::Part(_) => None,
        }
    }

    /// Children of a multipart.
    #[must_use]
    pub fn parts(&self) -> &[Self] {
        &self.parts
    }

    /// Children of a multipart, for insertion, removal or reordering.
    pub fn parts_mut(&mut self) -> &mut Vec<Self> {
        self.parts_changed = true;
        &mut self.parts
    }

    /// A child of a multipart, to modify it in place.
    pub fn part_mut(&mut self, index: usize) -> Option<&mut Self> {
        self.parts.get_mut(index)
    }

    /// Add a child at the end of a multipart.
    pub fn append(&mut self, mut part: Self) -> EncodingResult<()> {
        if !self.content_type().is_multipart() {
            return Err(EncodingError::NotMultipart(self.content_type().format_type()));
        }
        part.is_root = false;
        self.parts.push(part);
        self.parts_changed = true;
        Ok(())
    }

    /// The message of a message container, or the headers of a headers container.
    #[must_use]
    pub fn enclosed(&self) -> Option<&Self> {
        self.enclosed.as_deref()
    }

    ///
    pub fn enclosed_mut(&mut self) -> Option<&mut Self> {
        self.enclosed.as_deref_mut()
    }

    /// The first message enclosed in this part or one of its descendants.
    #[must_use]
    pub fn attached_message(&self) -> Option<&Self> {
        self.walk(true, false)
            .find(|part| part.content_type().is_message_container())
            .and_then(Self::enclosed)
    }

    /// Depth first iteration over the tree.
    ///
    /// `with_self` yields this part first, `skip_enclosed` does not go down
    /// into enclosed messages and header blocks.
    #[must_use]
    pub fn walk(&self, with_self: bool, skip_enclosed: bool) -> Walk<'_> {
        let mut walk = Walk {
            stack: vec![],
            skip_enclosed,
        };
        if with_self {
            walk.stack.push(self);
        } else {
            walk.push_children(self);
        }
        walk
    }

    /// Is this the top level part of the message.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.is_root
    }

    ///
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.content_disposition()
            .map_or(false, |disposition| {
                disposition.value.eq_ignore_ascii_case("attachment")
            })
    }

    ///
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.content_disposition()
            .map_or(false, |disposition| disposition.value.eq_ignore_ascii_case("inline"))
    }

    /// A text leaf that is not an attachment: something a user would read.
    #[must_use]
    pub fn is_body(&self) -> bool {
        self.content_type().is_singlepart() && self.content_type().is_text() && !self.is_attachment()
    }

    /// `multipart/report` of a delivery status notification, or its
    /// `message/delivery-status` part.
    /// <https://www.rfc-editor.org/rfc/rfc3464>
    #[must_use]
    pub fn is_delivery_notification(&self) -> bool {
        let content_type = self.content_type();

        content_type.is_delivery_status()
            || (content_type.main() == "multipart"
                && content_type.subtype() == "report"
                && content_type
                    .param("report-type")
                    .map_or(false, |report| report.eq_ignore_ascii_case("delivery-status")))
    }

    /// File name from the `Content-Disposition` or `Content-Type` parameters,
    /// without any directory.
    #[must_use]
    pub fn detected_file_name(&self) -> Option<String> {
        let name = self
            .content_disposition()
            .and_then(|disposition| disposition.param("filename"))
            .or_else(|| self.content_type().param("name"))?;

        let name = name
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(name)
            .trim();
        Some(name.to_string()).filter(|name| !name.is_empty())
    }

    ///
    pub fn subject(&self) -> DecodingResult<Option<&str>> {
        Ok(self.headers()?.get_value("Subject"))
    }

    /// `Message-ID` without the angle brackets.
    pub fn message_id(&self) -> DecodingResult<Option<&str>> {
        Ok(self
            .headers()?
            .get_value("Message-ID")
            .map(strip_angle_brackets)
            .filter(|id| !id.is_empty()))
    }

    /// Identifiers listed in `References`, in order.
    pub fn references(&self) -> DecodingResult<Vec<&str>> {
        Ok(self
            .headers()?
            .get_value("References")
            .map(|references| {
                references
                    .split_ascii_whitespace()
                    .map(strip_angle_brackets)
                    .filter(|id| !id.is_empty())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Has anything in this part or below been modified since parsing.
    #[must_use]
    pub fn was_changed(&self) -> bool {
        self.changed_ignoring_prepends()
            || self
                .headers_cell()
                .map_or(false, |headers| headers.prepended() != 0)
    }

    /// Same as [`MimePart::was_changed`], except for the headers prepended
    /// to this part, which can be written in front of the original bytes.
    pub(crate) fn changed_ignoring_prepends(&self) -> bool {
        self.parts_changed
            || self.own_changed(true)
            || self.parts.iter().any(Self::was_changed)
            || self.enclosed.as_ref().map_or(false, |enclosed| enclosed.was_changed())
    }

    /// Have the headers or the body of this part been modified.
    pub(crate) fn own_changed(&self, ignore_prepends: bool) -> bool {
        let headers = self
            .headers_cell()
            .map_or(false, |headers| headers.have_changed(ignore_prepends));

        headers || self.body_replaced() || self.container.source().is_none()
    }

    /// Is the body different from the one in the original buffer.
    pub(crate) const fn body_replaced(&self) -> bool {
        match &self.container {
            Container::Stream(container) => container.encoded.is_some(),
            Container::Body(_) => true,
            Container::Part(_) => false,
        }
    }

    /// The bytes this part was parsed from.
    #[must_use]
    pub fn original_bytes(&self) -> Option<bytes::Bytes> {
        self.container.source().map(Source::span)
    }

    /// Length of the serialized part.
    pub fn size(&self) -> MimeResult<usize> {
        if !self.was_changed() {
            if let Some(original) = self.original_bytes() {
                return Ok(original.len());
            }
        }
        Ok(self.to_bytes()?.len())
    }

    /// Structural category of the part.
    #[must_use]
    pub fn kind(&self) -> Kind {
        self.content_type().kind()
    }
}

fn strip_angle_brackets(id: &str) -> &str {
    let id = id.trim();
    let id = id.strip_prefix('<').unwrap_or(id);
    id.strip_suffix('>').unwrap_or(id)
}

/// Iterator returned by [`MimePart::walk`].
#[derive(Debug)]
pub struct Walk<'a> {
    stack: Vec<&'a MimePart>,
    skip_enclosed: bool,
}

impl<'a> Walk<'a> {
    fn push_children(&mut self, part: &'a MimePart) {
        if !self.skip_enclosed {
            if let Some(enclosed) = part.enclosed.as_deref() {
                self.stack.push(enclosed);
            }
        }
        self.stack.extend(part.parts.iter().rev());
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a MimePart;

    fn next(&mut self) -> Option<Self::Item> {
        let part = self.stack.pop()?;
        self.push_children(part);
        Some(part)
    }
}
