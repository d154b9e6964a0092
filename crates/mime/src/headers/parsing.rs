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

use crate::{charset, config::Limits, DecodingError, DecodingResult};

/// Offsets of a header block inside a region of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderBlock {
    /// End of the last header line, line break included.
    pub header_end: usize,
    /// First byte after the empty line separating headers from the body.
    pub body_start: usize,
}

/// A header as found in the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    ///
    pub name: String,
    /// Unfolded value, without the leading and trailing whitespaces.
    pub value: String,
    /// The header lines as they are in the buffer, line breaks included.
    pub raw: bytes::Bytes,
}

/// Find the end of the line starting at `from`.
///
/// Returns the end of the line content, without the line break, and the
/// start of the next line.
pub fn next_line(buffer: &[u8], from: usize, end: usize) -> (usize, usize) {
    match memchr::memchr(b'\n', &buffer[from..end]) {
        Some(offset) => {
            let newline = from + offset;
            let content_end = if newline > from && buffer[newline - 1] == b'\r' {
                newline - 1
            } else {
                newline
            };
            (content_end, newline + 1)
        }
        None => (end, end),
    }
}

/// Does the line start with something that looks like `name:`.
fn looks_like_header(line: &[u8]) -> bool {
    let Some(colon) = memchr::memchr(b':', line) else {
        return false;
    };
    let name = trim_end_wsp(&line[..colon]);

    !name.is_empty()
        && name
            .iter()
            .all(|b| !b.is_ascii_whitespace() && !b.is_ascii_control())
}

fn trim_end_wsp(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\t'))
        .map_or(0, |last| last + 1);
    &bytes[..end]
}

/// Locate the header block of the region `start..end`.
///
/// * an empty first line means no header at all, the body follows it.
/// * a first line that is not a header means no header and no separator,
///   the whole region is body.
/// * otherwise headers run until the first empty line, or the end of the region.
#[must_use]
pub fn split_header_block(buffer: &[u8], start: usize, end: usize) -> HeaderBlock {
    if start >= end {
        return HeaderBlock {
            header_end: start,
            body_start: start,
        };
    }

    let (content_end, next) = next_line(buffer, start, end);
    if content_end == start && next > start {
        return HeaderBlock {
            header_end: start,
            body_start: next,
        };
    }
    if !looks_like_header(&buffer[start..content_end]) {
        return HeaderBlock {
            header_end: start,
            body_start: start,
        };
    }

    let mut position = next;
    while position < end {
        let (content_end, next) = next_line(buffer, position, end);
        if content_end == position {
            return HeaderBlock {
                header_end: position,
                body_start: next,
            };
        }
        position = next;
    }

    HeaderBlock {
        header_end: end,
        body_start: end,
    }
}

/// Parse every header of a header block.
#[tracing::instrument(level = "trace", skip_all, fields(len = block.len()))]
pub fn parse_block(block: &bytes::Bytes, limits: &Limits) -> DecodingResult<Vec<RawHeader>> {
    let mut headers = vec![];
    // start of the current header, and its unfolded value.
    let mut current: Option<(usize, String, Vec<u8>)> = None;

    let mut position = 0;
    while position < block.len() {
        let (content_end, next) = next_line(block, position, block.len());
        let line = &block[position..content_end];

        if line.len() > limits.max_header_line_length {
            return Err(DecodingError::LineTooLong {
                expected: limits.max_header_line_length,
                got: line.len(),
            });
        }

        if line.is_empty() {
            break;
        }

        if line[0] == b' ' || line[0] == b'\t' {
            match &mut current {
                Some((_, _, value)) => value.extend_from_slice(line),
                None => {
                    return Err(DecodingError::MalformedHeader(
                        String::from_utf8_lossy(line).into_owned(),
                    ))
                }
            }
            position = next;
            continue;
        }

        let Some(colon) = memchr::memchr(b':', line) else {
            return Err(DecodingError::MalformedHeader(
                String::from_utf8_lossy(line).into_owned(),
            ));
        };

        let name = trim_end_wsp(&line[..colon]);
        if name.is_empty() || !name.iter().all(|b| b.is_ascii_graphic()) {
            return Err(DecodingError::InvalidHeaderName(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }

        if let Some(header) = current.take() {
            headers.push(finish(block, header, position));
        }
        current = Some((
            position,
            String::from_utf8_lossy(name).into_owned(),
            line[colon + 1..].to_vec(),
        ));
        position = next;
    }

    if let Some(header) = current.take() {
        headers.push(finish(block, header, position.min(block.len())));
    }

    Ok(headers)
}

fn finish(
    block: &bytes::Bytes,
    (start, name, value): (usize, String, Vec<u8>),
    end: usize,
) -> RawHeader {
    let value = if value.is_ascii() {
        String::from_utf8_lossy(&value).into_owned()
    } else {
        charset::decode(&value, Some(charset::UTF_8))
    };

    RawHeader {
        name,
        value: value.trim().to_string(),
        raw: block.slice(start..end),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(input: &'static str) -> bytes::Bytes {
        bytes::Bytes::from_static(input.as_bytes())
    }

    #[rstest::rstest]
    #[case("Subject: a\r\nFrom: b\r\n\r\nbody", 21, 23)]
    #[case("Subject: a\nFrom: b\n\nbody", 19, 20)]
    #[case("\r\nbody", 0, 2)]
    #[case("just a body\r\n", 0, 0)]
    #[case("Subject: a\r\n", 12, 12)]
    #[case("", 0, 0)]
    fn header_block(#[case] input: &str, #[case] header_end: usize, #[case] body_start: usize) {
        pretty_assertions::assert_eq!(
            split_header_block(input.as_bytes(), 0, input.len()),
            HeaderBlock {
                header_end,
                body_start
            }
        );
    }

    #[test]
    fn header_block_bounded_by_region() {
        let input = b"--b\r\nContent-Type: text/plain\r\n--b--\r\n";
        pretty_assertions::assert_eq!(
            split_header_block(input, 5, 31),
            HeaderBlock {
                header_end: 31,
                body_start: 31
            }
        );
    }

    #[test]
    fn unfolding() {
        let headers = parse_block(
            &block("User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:78.0) Gecko/20100101\r\n Thunderbird/78.8.1\r\nX-Empty:\r\n"),
            &Limits::default(),
        )
        .unwrap();

        pretty_assertions::assert_eq!(headers.len(), 2);
        pretty_assertions::assert_eq!(headers[0].name, "User-Agent");
        pretty_assertions::assert_eq!(
            headers[0].value,
            "Mozilla/5.0 (X11; Linux x86_64; rv:78.0) Gecko/20100101 Thunderbird/78.8.1"
        );
        pretty_assertions::assert_eq!(
            headers[0].raw,
            "User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:78.0) Gecko/20100101\r\n Thunderbird/78.8.1\r\n"
        );
        pretty_assertions::assert_eq!(headers[1].value, "");
    }

    #[test]
    fn extra_whitespace() {
        let headers = parse_block(&block("Subject :   \t hello  \r\n"), &Limits::default()).unwrap();
        pretty_assertions::assert_eq!(headers[0].name, "Subject");
        pretty_assertions::assert_eq!(headers[0].value, "hello");
    }

    #[test]
    fn raw_utf8_value() {
        let headers = parse_block(
            &bytes::Bytes::from("Subject: café\r\n".as_bytes().to_vec()),
            &Limits::default(),
        )
        .unwrap();
        pretty_assertions::assert_eq!(headers[0].value, "café");
    }

    #[test]
    fn line_too_long() {
        let line = format!("Subject: {}\r\n", "a".repeat(100));
        let limits = Limits {
            max_header_line_length: 50,
            ..Limits::default()
        };
        pretty_assertions::assert_eq!(
            parse_block(&bytes::Bytes::from(line), &limits),
            Err(DecodingError::LineTooLong {
                expected: 50,
                got: 109
            })
        );
    }

    #[test]
    fn invalid_name() {
        assert!(matches!(
            parse_block(
                &bytes::Bytes::from("Subjéct: a\r\n".as_bytes().to_vec()),
                &Limits::default()
            ),
            Err(DecodingError::InvalidHeaderName(_))
        ));
    }

    #[test]
    fn malformed() {
        assert!(matches!(
            parse_block(&block("Subject: a\r\nnot a header\r\n"), &Limits::default()),
            Err(DecodingError::MalformedHeader(_))
        ));
        assert!(matches!(
            parse_block(&block(" continuation first\r\n"), &Limits::default()),
            Err(DecodingError::MalformedHeader(_))
        ));
    }
}
