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

use super::{encoded_word, params, HeaderValue, WithParams};
use crate::{address, config::Limits};

/// Headers holding a list of mailboxes.
const ADDRESS_HEADERS: &[&str] = &[
    "From",
    "To",
    "Cc",
    "Bcc",
    "Reply-To",
    "Sender",
    "Delivered-To",
];

/// Render a header as `Name: value\r\n`, folded.
#[must_use]
pub fn render(name: &str, value: &HeaderValue, limits: &Limits) -> String {
    let mut out = String::with_capacity(name.len() + value.as_str().len() + 4);
    out.push_str(name);
    out.push(':');

    match value {
        HeaderValue::Params(with_params) => render_params(&mut out, with_params, limits),
        HeaderValue::Text(text) => {
            // a value cannot inject header lines.
            let text = text.replace(['\r', '\n'], " ");
            let text = text.trim();

            let mailboxes = ADDRESS_HEADERS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(name))
                .then(|| address::parse_list(text))
                .flatten();

            match mailboxes {
                Some(mailboxes) => {
                    let last = mailboxes.len() - 1;
                    let units = mailboxes
                        .iter()
                        .enumerate()
                        .map(|(i, mailbox)| {
                            let mut spec = mailbox.full_spec();
                            if i != last {
                                spec.push(',');
                            }
                            spec
                        })
                        .collect::<Vec<_>>();
                    fold_units(&mut out, &units, limits);
                }
                None => render_unstructured(&mut out, text, limits),
            }
        }
    }

    out.push_str("\r\n");
    out
}

fn render_unstructured(out: &mut String, text: &str, limits: &Limits) {
    if text.is_empty() {
        return;
    }

    let hard_limit = Limits::RFC5322_LINE_LENGTH - 1;
    let too_long = text.split_ascii_whitespace().any(|word| word.len() > hard_limit);

    if !text.is_ascii() || too_long {
        fold_units(out, &encoded_word::encode(text), limits);
        return;
    }

    // every segment is a run of whitespace followed by a word, so the
    // original spacing is kept when unfolded.
    let mut line_length = out.len();
    let mut written_on_line = false;
    out.push(' ');
    line_length += 1;

    let mut rest = text;
    while !rest.is_empty() {
        let word_start = rest
            .find(|c: char| !c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let word_end = rest[word_start..]
            .find(|c: char| c.is_ascii_whitespace())
            .map_or(rest.len(), |end| word_start + end);
        let (segment, tail) = rest.split_at(word_end);

        if written_on_line && word_start != 0 && line_length + segment.len() > limits.fold_line_length {
            out.push_str("\r\n");
            line_length = 0;
        }
        out.push_str(segment);
        line_length += segment.len();
        written_on_line = true;
        rest = tail;
    }
}

fn render_params(out: &mut String, with_params: &WithParams, limits: &Limits) {
    let mut units = vec![with_params.value.clone()];
    for (name, value) in &with_params.params {
        units.extend(params::format(name, value));
    }

    let last = units.len() - 1;
    for unit in &mut units[..last] {
        unit.push(';');
    }
    fold_units(out, &units, limits);
}

/// Write units separated by a space, folding between two units when the
/// line would get longer than the preferred length.
fn fold_units(out: &mut String, units: &[String], limits: &Limits) {
    let mut line_length = out.len();
    let mut written_on_line = false;

    for unit in units {
        if written_on_line && line_length + 1 + unit.len() > limits.fold_line_length {
            out.push_str("\r\n");
            line_length = 0;
        }
        out.push(' ');
        out.push_str(unit);
        line_length += 1 + unit.len();
        written_on_line = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(name: &str, value: &str) -> String {
        render(name, &HeaderValue::Text(value.to_string()), &Limits::default())
    }

    #[test]
    fn short_ascii() {
        pretty_assertions::assert_eq!(text("Subject", "hello world"), "Subject: hello world\r\n");
        pretty_assertions::assert_eq!(text("X-Empty", ""), "X-Empty:\r\n");
    }

    #[test]
    fn long_ascii_is_folded_at_whitespace() {
        let value = "word ".repeat(40);
        let rendered = text("Subject", value.trim());

        assert!(rendered.lines().count() > 1);
        for line in rendered.split("\r\n") {
            assert!(line.len() <= 78, "{line:?}");
        }
        pretty_assertions::assert_eq!(rendered.replace("\r\n", ""), format!("Subject: {}", value.trim()));
    }

    #[test]
    fn very_long_word_is_encoded() {
        let value = "x".repeat(2000);
        let rendered = text("X-Token", &value);

        for line in rendered.split("\r\n") {
            assert!(line.len() <= Limits::RFC5322_LINE_LENGTH, "{}", line.len());
        }
        pretty_assertions::assert_eq!(
            encoded_word::decode(rendered.trim_start_matches("X-Token:").replace("\r\n", "").trim()),
            value
        );
    }

    #[test]
    fn line_breaks_are_neutralized() {
        pretty_assertions::assert_eq!(
            text("Subject", "hello\r\nBcc: victim@example.com"),
            "Subject: hello  Bcc: victim@example.com\r\n"
        );
    }

    #[test]
    fn non_ascii_is_encoded() {
        pretty_assertions::assert_eq!(
            text("Subject", "café au lait"),
            "Subject: =?utf-8?Q?caf=C3=A9_au_lait?=\r\n"
        );
    }

    #[test]
    fn addresses() {
        pretty_assertions::assert_eq!(
            text("To", "José Luis <jose@example.com>,john@example.com"),
            "To: =?utf-8?Q?Jos=C3=A9_Luis?= <jose@example.com>, john@example.com\r\n"
        );

        let many = (0..10)
            .map(|i| format!("user{i}@example.com"))
            .collect::<Vec<_>>()
            .join(", ");
        let rendered = text("Cc", &many);
        for line in rendered.split("\r\n") {
            assert!(line.len() <= 78, "{line:?}");
            assert!(!line.trim().starts_with(','));
        }
    }

    #[test]
    fn group_falls_back_to_unstructured() {
        pretty_assertions::assert_eq!(
            text("To", "undisclosed-recipients:;"),
            "To: undisclosed-recipients:;\r\n"
        );
    }

    #[test]
    fn params() {
        let value = HeaderValue::Params(WithParams {
            value: "attachment".to_string(),
            params: vec![
                ("filename".to_string(), "été.pdf".to_string()),
                ("size".to_string(), "42".to_string()),
            ],
        });
        pretty_assertions::assert_eq!(
            render("Content-Disposition", &value, &Limits::default()),
            "Content-Disposition: attachment; filename*=utf-8''%C3%A9t%C3%A9.pdf; size=42\r\n"
        );
    }
}
