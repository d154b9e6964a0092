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

use super::scanner::{self, Boundary, Token, TokensIterator};
use crate::{
    config::Limits,
    content_type::Kind,
    headers::parsing::{split_header_block, HeaderBlock},
    part::{
        Container, Delimiter, MimePart, MultipartLayout, PartContainer, Source, StreamContainer,
    },
    ContentType, DecodingError, DecodingResult,
};

/// Recursive descent over the tokens of a buffer, producing a tree of parts
/// whose spans tile the buffer.
struct Builder<'a> {
    buffer: bytes::Bytes,
    tokens: TokensIterator,
    /// boundaries of the multiparts enclosing the region being parsed.
    boundary_stack: Vec<String>,
    limits: &'a Limits,
}

/// Build the tree of parts of a whole message.
#[tracing::instrument(level = "debug", skip_all, fields(len = buffer.len()))]
pub fn build(buffer: bytes::Bytes, limits: &Limits) -> DecodingResult<MimePart> {
    let tokens = scanner::scan(&buffer);

    let mut builder = Builder {
        tokens: TokensIterator::new(tokens, limits.max_ops),
        buffer,
        boundary_stack: vec![],
        limits,
    };

    let (mut root, end) = builder.traverse(0, None)?;
    debug_assert_eq!(end, builder.buffer.len());
    root.is_root = true;

    tracing::debug!(
        operations = builder.tokens.operations(),
        content_type = %root.content_type().format_type(),
        "Message tree built"
    );
    Ok(root)
}

/// Build the part enclosed in a headers container from its body.
pub fn build_enclosed_headers(
    buffer: bytes::Bytes,
    content_type: ContentType,
    limits: &Limits,
) -> MimePart {
    let block = split_header_block(&buffer, 0, buffer.len());
    let source = Source {
        start: 0,
        header_end: block.header_end,
        body_start: block.body_start,
        end: buffer.len(),
        buffer,
    };
    MimePart::new(Container::Stream(StreamContainer::new(content_type, source)), *limits)
}

impl Builder<'_> {
    /// End of the region starting at `start`: the first upcoming boundary of
    /// an enclosing multipart, or the end of the buffer.
    fn region_end(&self, start: usize) -> usize {
        self.tokens
            .find_boundary(&self.boundary_stack)
            .map_or(self.buffer.len(), |boundary| boundary.start.max(start))
    }

    fn is_stacked(&self, boundary: &Boundary) -> bool {
        self.boundary_stack.contains(&boundary.value)
    }

    /// Consume tokens up to the next boundary of an enclosing multipart.
    /// Returns the first content type found on the way.
    fn skip_to_terminator(&mut self) -> DecodingResult<Option<ContentType>> {
        let mut first = None;
        loop {
            match self.tokens.check()?.clone() {
                Token::End => return Ok(first),
                Token::Boundary(boundary) if self.is_stacked(&boundary) => return Ok(first),
                Token::ContentType { content_type, .. } => {
                    first.get_or_insert(content_type);
                }
                Token::Boundary(_) => {}
            }
            self.tokens.next_token()?;
        }
    }

    /// Parse the region starting at `start`, returns the part and the end of its span.
    fn traverse(
        &mut self,
        start: usize,
        parent: Option<&ContentType>,
    ) -> DecodingResult<(MimePart, usize)> {
        let limit = self.region_end(start);
        let block = split_header_block(&self.buffer, start, limit);

        let mut content_type = None;
        while let Token::ContentType { offset, .. } = self.tokens.check()? {
            if *offset >= block.header_end {
                break;
            }
            // only the first Content-Type of a header block is used.
            if let Token::ContentType {
                content_type: found,
                ..
            } = self.tokens.next_token()?
            {
                content_type.get_or_insert(found);
            }
        }
        let content_type = content_type.unwrap_or_else(|| ContentType::default_for(parent));

        tracing::trace!(
            start,
            header_end = block.header_end,
            content_type = %content_type.format_type(),
            "Traversing region"
        );

        let buffer = self.buffer.clone();
        let source = |end: usize| Source {
            buffer: buffer.clone(),
            start,
            header_end: block.header_end,
            body_start: block.body_start.min(end),
            end,
        };

        match content_type.kind() {
            Kind::Singlepart => {
                self.skip_to_terminator()?;
                let end = self.region_end(start);
                let container = StreamContainer::new(content_type, source(end));
                Ok((MimePart::new(Container::Stream(container), *self.limits), end))
            }
            Kind::HeadersContainer(_) => {
                let nested = self.skip_to_terminator()?;
                let end = self.region_end(start);
                let source = source(end);

                let enclosed = build_enclosed_headers(
                    source.buffer.slice(source.body_start..end),
                    nested.unwrap_or_default(),
                    self.limits,
                );

                let container = StreamContainer::new(content_type, source);
                let mut part = MimePart::new(Container::Stream(container), *self.limits);
                part.enclosed = Some(Box::new(enclosed));
                Ok((part, end))
            }
            Kind::MessageContainer => {
                let (enclosed, end) = self.traverse(block.body_start, None)?;

                let container = PartContainer::parsed(content_type, source(end), None);
                let mut part = MimePart::new(Container::Part(container), *self.limits);
                part.enclosed = Some(Box::new(enclosed));
                Ok((part, end))
            }
            Kind::Multipart => self.multipart(start, block, content_type),
        }
    }

    fn multipart(
        &mut self,
        start: usize,
        block: HeaderBlock,
        content_type: ContentType,
    ) -> DecodingResult<(MimePart, usize)> {
        let Some(boundary) = content_type.boundary().map(str::to_string) else {
            return Err(DecodingError::BoundaryNotFound(content_type.to_string()));
        };

        // the preamble, up to the first delimiter of this multipart.
        let opening = loop {
            match self.tokens.check()?.clone() {
                Token::Boundary(found) if found.value == boundary => {
                    self.tokens.next_token()?;
                    break found;
                }
                Token::Boundary(found) if self.is_stacked(&found) => {
                    return Err(DecodingError::MisplacedBoundary(format!(
                        "'{}' found before the first '{boundary}' delimiter",
                        found.value
                    )));
                }
                Token::End => {
                    return Err(DecodingError::MisplacedBoundary(format!(
                        "no '{boundary}' delimiter found"
                    )));
                }
                Token::Boundary(_) | Token::ContentType { .. } => {
                    self.tokens.next_token()?;
                }
            }
        };

        // the header block cannot run past the first delimiter.
        let block = if block.header_end > opening.start {
            tracing::warn!(boundary, "Multipart headers not separated from the first delimiter");
            split_header_block(&self.buffer, start, opening.start.max(start))
        } else {
            block
        };

        let mut cursor = block.body_start.max(start);
        let mut parts = vec![];
        let mut final_boundary = None;
        let preamble = cursor..opening.start.max(cursor);

        self.boundary_stack.push(boundary.clone());

        let mut delimiter = Some(opening);
        while let Some(current) = delimiter.take() {
            let current_start = current.start.max(cursor).min(current.end);

            if current.is_final {
                final_boundary = Some(current_start..current.end);
                cursor = current.end;
                break;
            }

            let (mut child, child_end) = self.traverse(current.end, Some(&content_type))?;
            child.delimiter = Some(Delimiter {
                boundary: boundary.clone(),
                bytes: self.buffer.slice(current_start..current.end),
            });
            parts.push(child);
            cursor = child_end;

            match self.tokens.check()?.clone() {
                Token::Boundary(next) if next.value == boundary => {
                    self.tokens.next_token()?;
                    delimiter = Some(next);
                }
                Token::Boundary(next) => {
                    tracing::warn!(
                        boundary,
                        found = next.value,
                        "Multipart interrupted by an enclosing boundary"
                    );
                }
                Token::End => {
                    tracing::warn!(boundary, "Multipart without final boundary");
                }
                Token::ContentType { .. } => {
                    unreachable!("children consume every content type up to a stacked boundary")
                }
            }
        }

        self.boundary_stack.pop();

        // the epilogue is text, whatever it looks like.
        if final_boundary.is_some() {
            self.skip_to_terminator()?;
        }
        let end = self.region_end(cursor);
        let epilogue = final_boundary.as_ref().map(|_| cursor..end);

        let source = Source {
            buffer: self.buffer.clone(),
            start,
            header_end: block.header_end,
            body_start: block.body_start,
            end,
        };
        let container = PartContainer::parsed(
            content_type,
            source,
            Some(MultipartLayout {
                boundary,
                preamble,
                final_boundary,
                epilogue,
            }),
        );
        let mut part = MimePart::new(Container::Part(container), *self.limits);
        part.parts = parts;
        Ok((part, end))
    }
}
