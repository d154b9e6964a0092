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

//! Production of the bytes of a message tree.
//!
//! Unmodified regions are copied from the original buffer, only what was
//! modified is rendered again.

use crate::{
    content_type::Kind,
    headers::MIME_VERSION,
    part::{Container, MimePart, Source},
    EncodingError, MimeError, MimeResult,
};

fn starts_with_line_break(bytes: &[u8]) -> bool {
    bytes.starts_with(b"\n") || bytes.starts_with(b"\r\n")
}

impl MimePart {
    /// The whole message, as it must be transmitted.
    #[tracing::instrument(level = "debug", skip_all, fields(changed = self.was_changed()))]
    pub fn to_bytes(&self) -> MimeResult<Vec<u8>> {
        let mut out = Vec::with_capacity(
            self.original_bytes()
                .map_or(crate::MAIL_SIZE, |original| original.len()),
        );
        write_part(self, &mut out)?;
        Ok(out)
    }

    /// Write the whole message into `writer`.
    pub fn to_stream<W: std::io::Write>(&self, writer: &mut W) -> MimeResult<()> {
        writer.write_all(&self.to_bytes()?)?;
        writer.flush()?;
        Ok(())
    }
}

fn write_part(part: &MimePart, out: &mut Vec<u8>) -> MimeResult<()> {
    if let Some(source) = part.container().source() {
        if !part.changed_ignoring_prepends() {
            if part.was_changed() {
                write_prepended(part, source, out)?;
            } else {
                out.extend_from_slice(&source.span());
            }
            return Ok(());
        }
    }

    let mark = out.len();
    match write_changed(part, out) {
        Err(MimeError::Decoding(error)) if !part.own_changed(false) => {
            let Some(original) = part.original_bytes() else {
                return Err(error.into());
            };
            tracing::warn!(
                %error,
                content_type = %part.content_type().format_type(),
                "Cannot render the part again, writing the original bytes"
            );
            out.truncate(mark);
            out.extend_from_slice(&original);
            Ok(())
        }
        otherwise => otherwise,
    }
}

/// New headers in front of an untouched part.
fn write_prepended(part: &MimePart, source: &Source, out: &mut Vec<u8>) -> MimeResult<()> {
    part.headers()?.write_prepended_to(out, part.limits());

    out.extend_from_slice(&source.header_block());
    let separator = source.separator();
    if separator.is_empty() && source.header_end == source.start {
        // the body must not be read as the continuation of the new headers.
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(&separator);
    out.extend_from_slice(&source.body());
    Ok(())
}

/// Header block and the empty line ending it.
fn write_head(part: &MimePart, out: &mut Vec<u8>) -> MimeResult<()> {
    let headers = part.headers()?;

    // rfc2046 allows a part without headers, not a message.
    if part.is_root() && headers.is_empty() {
        return Err(EncodingError::NoHeaders.into());
    }

    match part.container().source() {
        Some(source) if !headers.changed() => {
            out.extend_from_slice(&source.header_block());
            let separator = source.separator();
            if separator.is_empty() {
                out.extend_from_slice(b"\r\n");
            } else {
                out.extend_from_slice(&separator);
            }
        }
        _ => {
            if part.is_root() && !headers.contains(MIME_VERSION) {
                out.extend_from_slice(b"MIME-Version: 1.0\r\n");
            }
            headers.write_to(out, part.limits());
            out.extend_from_slice(b"\r\n");
        }
    }
    Ok(())
}

fn write_changed(part: &MimePart, out: &mut Vec<u8>) -> MimeResult<()> {
    write_head(part, out)?;

    match part.kind() {
        Kind::Singlepart => {
            out.extend_from_slice(&part.raw_body().unwrap_or_default());
        }
        Kind::HeadersContainer(_) => {
            match part.enclosed() {
                Some(enclosed) if enclosed.was_changed() && !part.body_replaced() => {
                    write_part(enclosed, out)?;
                }
                _ => out.extend_from_slice(&part.raw_body().unwrap_or_default()),
            }
        }
        Kind::MessageContainer if part.enclosed().is_some() => {
            if let Some(enclosed) = part.enclosed() {
                write_part(enclosed, out)?;
            }
        }
        Kind::Multipart if is_structured(part) => write_multipart(part, out)?,
        // a header block enclosed in a headers container keeps its text,
        // whatever its content type announces.
        Kind::MessageContainer | Kind::Multipart => {
            out.extend_from_slice(&part.raw_body().unwrap_or_default());
        }
    }
    Ok(())
}

fn is_structured(part: &MimePart) -> bool {
    matches!(part.container(), Container::Part(_)) || !part.parts().is_empty()
}

fn write_multipart(part: &MimePart, out: &mut Vec<u8>) -> MimeResult<()> {
    let content_type = part.content_type();
    let Some(boundary) = content_type.boundary() else {
        return Err(EncodingError::NoBoundary(content_type.format_type()).into());
    };

    let (layout, source) = match part.container() {
        Container::Part(container) => (container.layout.as_ref(), container.source.as_ref()),
        Container::Stream(_) | Container::Body(_) => (None, None),
    };
    let original = |range: &std::ops::Range<usize>| {
        source.map(|source| source.buffer.slice(range.clone()))
    };

    let body_start = out.len();
    if let Some(preamble) = layout.and_then(|layout| original(&layout.preamble)) {
        out.extend_from_slice(&preamble);
    }

    for child in part.parts() {
        let reusable = child.delimiter.as_ref().filter(|delimiter| {
            delimiter.boundary == boundary
                && (out.len() == body_start || starts_with_line_break(&delimiter.bytes))
        });
        match reusable {
            Some(delimiter) => out.extend_from_slice(&delimiter.bytes),
            None if out.len() == body_start => {
                out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            }
            None => out.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes()),
        }
        write_part(child, out)?;
    }

    let final_boundary = layout
        .filter(|layout| layout.boundary == boundary)
        .and_then(|layout| layout.final_boundary.as_ref())
        .and_then(original)
        .filter(|bytes| out.len() == body_start || starts_with_line_break(bytes));
    match final_boundary {
        Some(bytes) => out.extend_from_slice(&bytes),
        None if out.len() == body_start => {
            out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        }
        None => out.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes()),
    }

    if let Some(epilogue) = layout
        .and_then(|layout| layout.epilogue.as_ref())
        .and_then(original)
    {
        out.extend_from_slice(&epilogue);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        headers::{CONTENT_TRANSFER_ENCODING, CONTENT_TYPE},
        MimePart,
    };

    const MULTIPART: &str = concat!(
        "Subject: two parts\r\n",
        "Content-Type: multipart/mixed; boundary=X\r\n",
        "\r\n",
        "This is a multi-part message in MIME format.\r\n",
        "--X\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "first\r\n",
        "--X\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "second\r\n",
        "--X--\r\n",
        "epilogue\r\n",
    );

    fn render(part: &MimePart) -> String {
        String::from_utf8(part.to_bytes().unwrap()).unwrap()
    }

    #[test_log::test]
    fn unchanged_is_verbatim() {
        for input in [
            MULTIPART,
            "Content-Type: text/plain\r\n\r\nhello",
            "no headers at all\n\n--X--\n",
            "Content-Type: multipart/mixed; boundary=X\n\n--X\n\nunterminated",
        ] {
            let root = MimePart::from_bytes(input).unwrap();
            pretty_assertions::assert_eq!(render(&root), input);
            pretty_assertions::assert_eq!(root.size().unwrap(), input.len());
        }
    }

    #[test_log::test]
    fn prepended_header() {
        let mut root = MimePart::from_bytes(MULTIPART).unwrap();
        root.headers_mut()
            .unwrap()
            .prepend("Received", "from localhost");

        pretty_assertions::assert_eq!(
            render(&root),
            format!("Received: from localhost\r\n{MULTIPART}")
        );
    }

    #[test_log::test]
    fn prepended_header_without_header_block() {
        let mut root = MimePart::from_bytes("hello\r\n").unwrap();
        root.headers_mut().unwrap().prepend("X-Test", "1");

        pretty_assertions::assert_eq!(render(&root), "X-Test: 1\r\n\r\nhello\r\n");
    }

    #[test_log::test]
    fn localized_mutation() {
        let mut root = MimePart::from_bytes(MULTIPART).unwrap();
        root.part_mut(1).unwrap().set_body("changed").unwrap();

        let expected = MULTIPART.replace("second", "changed");
        pretty_assertions::assert_eq!(render(&root), expected);
    }

    #[test_log::test]
    fn long_line_forces_quoted_printable() {
        let mut root = MimePart::from_bytes(MULTIPART).unwrap();
        root.part_mut(0)
            .unwrap()
            .set_body("very long ascii line".repeat(1000))
            .unwrap();

        let part = &root.parts()[0];
        pretty_assertions::assert_eq!(
            part.headers()
                .unwrap()
                .get_value(CONTENT_TRANSFER_ENCODING),
            Some("quoted-printable")
        );

        let reparsed = MimePart::from_bytes(root.to_bytes().unwrap()).unwrap();
        pretty_assertions::assert_eq!(
            reparsed.parts()[0].body().unwrap().and_then(crate::Body::as_text),
            Some("very long ascii line".repeat(1000).as_str())
        );
        pretty_assertions::assert_eq!(
            reparsed.parts()[1].original_bytes(),
            root.parts()[1].original_bytes()
        );
    }

    #[test_log::test]
    fn non_ascii_forces_utf8_base64() {
        let mut root = MimePart::from_bytes(
            "Content-Type: text/plain; charset=ascii\r\n\r\nhello",
        )
        .unwrap();
        root.set_body("Привет").unwrap();

        let headers = root.headers().unwrap();
        pretty_assertions::assert_eq!(
            headers
                .get_params(CONTENT_TYPE)
                .and_then(|content_type| content_type.param("charset")),
            Some("utf-8")
        );
        pretty_assertions::assert_eq!(
            headers.get_value(CONTENT_TRANSFER_ENCODING),
            Some("base64")
        );
        pretty_assertions::assert_eq!(
            render(&root),
            "MIME-Version: 1.0\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Transfer-Encoding: base64\r\n\r\n0J/RgNC40LLQtdGC"
        );
    }

    #[test_log::test]
    fn root_without_headers() {
        let mut root = MimePart::from_bytes("hello").unwrap();
        root.set_body("bye").unwrap();
        assert!(matches!(
            root.to_bytes(),
            Err(crate::MimeError::Encoding(crate::EncodingError::NoHeaders))
        ));

        let mut root = MimePart::from_bytes("Subject: x\r\n\r\nhello").unwrap();
        root.headers_mut().unwrap().remove("Subject");
        assert!(matches!(
            root.to_bytes(),
            Err(crate::MimeError::Encoding(crate::EncodingError::NoHeaders))
        ));
    }

    #[test_log::test]
    fn rendered_root_gets_mime_version() {
        let mut root = MimePart::from_bytes("Subject: x\r\n\r\nhello").unwrap();
        root.headers_mut().unwrap().set("Subject", "y");
        pretty_assertions::assert_eq!(render(&root), "MIME-Version: 1.0\r\nSubject: y\r\n\r\nhello");
    }

    #[test_log::test]
    fn reordered_parts_keep_delimiters() {
        let mut root = MimePart::from_bytes(MULTIPART).unwrap();
        root.parts_mut().reverse();

        pretty_assertions::assert_eq!(
            render(&root),
            concat!(
                "Subject: two parts\r\n",
                "Content-Type: multipart/mixed; boundary=X\r\n",
                "\r\n",
                "This is a multi-part message in MIME format.\r\n",
                "--X\r\n",
                "Content-Type: text/plain\r\n",
                "\r\n",
                "second\r\n",
                "--X\r\n",
                "Content-Type: text/plain\r\n",
                "\r\n",
                "first\r\n",
                "--X--\r\n",
                "epilogue\r\n",
            )
        );
    }

    #[test_log::test]
    fn new_boundary() {
        let mut root = MimePart::from_bytes(MULTIPART).unwrap();
        let content_type = root.content_type().clone().with_param("boundary", "Y");
        root.set_content_type(content_type).unwrap();

        let rendered = render(&root);
        assert!(!rendered.contains("--X"));
        pretty_assertions::assert_eq!(rendered.matches("\r\n--Y\r\n").count(), 2);
        assert!(rendered.ends_with("second\r\n--Y--\r\nepilogue\r\n"));

        let reparsed = MimePart::from_bytes(rendered).unwrap();
        pretty_assertions::assert_eq!(reparsed.parts().len(), 2);
    }

    #[test_log::test]
    fn enclosed_message_mutation() {
        let input = "Content-Type: message/rfc822\r\n\r\nSubject: inner\r\n\r\nbody\r\n";
        let mut root = MimePart::from_bytes(input).unwrap();
        root.enclosed_mut()
            .unwrap()
            .headers_mut()
            .unwrap()
            .set("Subject", "changed");

        pretty_assertions::assert_eq!(
            render(&root),
            "Content-Type: message/rfc822\r\n\r\nSubject: changed\r\n\r\nbody\r\n"
        );
    }

    #[test_log::test]
    fn to_stream() {
        let root = MimePart::from_bytes(MULTIPART).unwrap();
        let mut out = vec![];
        root.to_stream(&mut out).unwrap();
        pretty_assertions::assert_eq!(out, MULTIPART.as_bytes());
    }
}
