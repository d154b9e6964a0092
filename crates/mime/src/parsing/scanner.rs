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

use crate::{ContentType, DecodingError, DecodingResult};

static TOKENS: once_cell::sync::Lazy<regex::bytes::Regex> = once_cell::sync::Lazy::new(|| {
    regex::bytes::Regex::new(
        r"(?im-u)(?P<ctype>^content-type:[^\r\n]*(?:\r?\n[ \t][^\r\n]*)*)|(?P<boundary>^--[^\r\n]*)",
    )
    .unwrap_or_else(|error| unreachable!("token pattern is valid: {error}"))
});

/// A line starting with `--` whose value matches a declared boundary.
#[derive(Debug, Clone, Eq)]
pub struct Boundary {
    /// The line without the leading `--`, the trailing whitespaces and,
    /// for the final boundary, the trailing `--`.
    pub value: String,
    /// Start of the delimiter, including the line break preceding the line.
    pub start: usize,
    /// End of the delimiter, including the line break following the line.
    pub end: usize,
    /// First byte of the `--` line.
    pub line_start: usize,
    /// `--boundary--`
    pub is_final: bool,
}

impl PartialEq for Boundary {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

/// Structural markers found in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A `Content-Type` header line, anywhere in the buffer.
    ContentType {
        /// Parsed value.
        content_type: ContentType,
        /// Start of the header line.
        offset: usize,
    },
    ///
    Boundary(Boundary),
    /// Nothing left to read.
    End,
}

static END: Token = Token::End;

struct Candidate {
    line_start: usize,
    line_end: usize,
}

/// Find every content type header and boundary line of a buffer.
///
/// A `--` line is a boundary only if it matches the `boundary` parameter
/// of one of the content types found, the others are plain text.
#[tracing::instrument(level = "debug", skip_all, fields(len = buffer.len()))]
#[must_use]
pub fn scan(buffer: &[u8]) -> Vec<Token> {
    let mut tokens = vec![];
    let mut candidates = vec![];
    let mut declared = vec![];

    for captures in TOKENS.captures_iter(buffer) {
        if let Some(ctype) = captures.name("ctype") {
            let value = ctype.as_bytes()["content-type:".len()..]
                .iter()
                .copied()
                .filter(|b| *b != b'\r' && *b != b'\n')
                .collect::<Vec<_>>();

            match ContentType::parse(&String::from_utf8_lossy(&value)) {
                Some(content_type) => {
                    if let Some(boundary) = content_type.boundary() {
                        declared.push(boundary.to_string());
                    }
                    tokens.push(Some(Token::ContentType {
                        content_type,
                        offset: ctype.start(),
                    }));
                }
                None => tracing::trace!(
                    offset = ctype.start(),
                    value = %String::from_utf8_lossy(&value),
                    "Unparsable Content-Type dropped"
                ),
            }
        } else if let Some(line) = captures.name("boundary") {
            tokens.push(None);
            candidates.push(Candidate {
                line_start: line.start(),
                line_end: line.end(),
            });
        }
    }

    let mut candidates = candidates.into_iter();
    let tokens = tokens
        .into_iter()
        .filter_map(|token| match token {
            Some(token) => Some(token),
            None => candidates
                .next()
                .and_then(|candidate| disambiguate(buffer, &candidate, &declared))
                .map(Token::Boundary),
        })
        .collect::<Vec<_>>();

    tracing::debug!(tokens = tokens.len(), boundaries = ?declared, "Buffer scanned");
    tokens
}

fn disambiguate(buffer: &[u8], candidate: &Candidate, declared: &[String]) -> Option<Boundary> {
    let line = &buffer[candidate.line_start + 2..candidate.line_end];
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |last| last + 1);
    let line = &line[..end];

    let (value, is_final) = if declared.iter().any(|b| b.as_bytes() == line) {
        (line, false)
    } else {
        match line.strip_suffix(b"--") {
            Some(value) if declared.iter().any(|b| b.as_bytes() == value) => (value, true),
            _ => return None,
        }
    };

    let start = if buffer[..candidate.line_start].ends_with(b"\r\n") {
        candidate.line_start - 2
    } else if buffer[..candidate.line_start].ends_with(b"\n") {
        candidate.line_start - 1
    } else {
        candidate.line_start
    };

    let rest = &buffer[candidate.line_end..];
    let end = if rest.starts_with(b"\r\n") {
        candidate.line_end + 2
    } else if rest.starts_with(b"\n") {
        candidate.line_end + 1
    } else {
        candidate.line_end
    };

    Some(Boundary {
        value: String::from_utf8_lossy(value).into_owned(),
        start,
        end,
        line_start: candidate.line_start,
        is_final,
    })
}

/// A cursor over the tokens of a buffer, counting its operations to
/// bound the work done on hostile input.
#[derive(Debug)]
pub struct TokensIterator {
    tokens: Vec<Token>,
    position: usize,
    operations: usize,
    max_operations: usize,
}

impl TokensIterator {
    ///
    #[must_use]
    pub fn new(tokens: Vec<Token>, max_operations: usize) -> Self {
        Self {
            tokens,
            position: 0,
            operations: 0,
            max_operations,
        }
    }

    fn count(&mut self) -> DecodingResult<()> {
        self.operations += 1;
        if self.operations > self.max_operations {
            tracing::warn!(max = self.max_operations, "Too many operations, giving up");
            return Err(DecodingError::TooManyOperations {
                max: self.max_operations,
                got: self.operations,
            });
        }
        Ok(())
    }

    /// Look at the current token without consuming it.
    pub fn check(&mut self) -> DecodingResult<&Token> {
        if self.position >= self.tokens.len() {
            return Ok(&END);
        }
        self.count()?;
        Ok(&self.tokens[self.position])
    }

    /// Consume the current token.
    pub fn next_token(&mut self) -> DecodingResult<Token> {
        if self.position >= self.tokens.len() {
            return Ok(Token::End);
        }
        self.count()?;
        self.position += 1;
        Ok(self.tokens[self.position - 1].clone())
    }

    /// Number of operations performed so far.
    #[must_use]
    pub const fn operations(&self) -> usize {
        self.operations
    }

    /// Start of the first upcoming boundary whose value is in `boundaries`,
    /// without consuming anything.
    #[must_use]
    pub fn find_boundary(&self, boundaries: &[String]) -> Option<&Boundary> {
        self.tokens[self.position..].iter().find_map(|token| match token {
            Token::Boundary(boundary) if boundaries.contains(&boundary.value) => Some(boundary),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundaries(tokens: &[Token]) -> Vec<(String, bool)> {
        tokens
            .iter()
            .filter_map(|token| match token {
                Token::Boundary(b) => Some((b.value.clone(), b.is_final)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn content_types_and_boundaries() {
        let input = b"Content-Type: multipart/mixed;\r\n boundary=\"abc\"\r\n\r\npreamble\r\n--abc\r\nContent-Type: text/plain\r\n\r\nhello\r\n--abc--\r\n";
        let tokens = scan(input);

        pretty_assertions::assert_eq!(tokens.len(), 4);
        assert!(matches!(
            &tokens[0],
            Token::ContentType { content_type, offset: 0 } if content_type.boundary() == Some("abc")
        ));
        pretty_assertions::assert_eq!(
            boundaries(&tokens),
            vec![("abc".to_string(), false), ("abc".to_string(), true)]
        );

        let Token::Boundary(first) = &tokens[1] else {
            panic!("expected a boundary, got {:?}", tokens[1]);
        };
        pretty_assertions::assert_eq!(&input[first.start..first.end], b"\r\n--abc\r\n");
        pretty_assertions::assert_eq!(first.line_start, 61);
    }

    #[test]
    fn undeclared_dash_lines_are_text() {
        let input = b"Content-Type: multipart/mixed; boundary=abc\n\n--abc\n\n-- \nsignature\n--not-a-boundary\n--abc--   \n";
        pretty_assertions::assert_eq!(
            boundaries(&scan(input)),
            vec![("abc".to_string(), false), ("abc".to_string(), true)]
        );
    }

    #[test]
    fn unparsable_content_type_is_dropped() {
        let tokens = scan(b"Content-Type: garbage\r\n\r\nbody");
        assert!(tokens.is_empty());
    }

    #[test]
    fn content_type_is_case_insensitive() {
        let tokens = scan(b"CONTENT-TYPE: Text/HTML\r\n\r\nbody");
        assert!(matches!(
            &tokens[..],
            [Token::ContentType { content_type, .. }] if content_type.format_type() == "text/html"
        ));
    }

    #[test]
    fn operations_are_bounded() {
        let tokens = (0..10)
            .map(|_| Token::End)
            .collect::<Vec<_>>();
        let mut iterator = TokensIterator::new(tokens, 5);

        for _ in 0..5 {
            iterator.next_token().unwrap();
        }
        pretty_assertions::assert_eq!(
            iterator.check(),
            Err(DecodingError::TooManyOperations { max: 5, got: 6 })
        );
    }

    #[test]
    fn exhausted_iterator_is_free() {
        let mut iterator = TokensIterator::new(vec![], 0);
        pretty_assertions::assert_eq!(iterator.check(), Ok(&Token::End));
        pretty_assertions::assert_eq!(iterator.next_token(), Ok(Token::End));
        pretty_assertions::assert_eq!(iterator.operations(), 0);
    }
}
