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

//! `value; name=param` header values, with the continuations and
//! charset extensions of rfc2231.

use super::{encoded_word, WithParams};
use crate::charset;

/// Characters that force a parameter value to be quoted.
/// <https://www.rfc-editor.org/rfc/rfc2045#section-5.1>
#[must_use]
pub const fn is_tspecial(byte: u8) -> bool {
    matches!(
        byte,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
    )
}

/// Above this length an rfc2231 value is split into numbered sections.
const SECTION_LENGTH: usize = 60;

/// Split on `;` outside of quoted strings.
fn split_segments(value: &str) -> Vec<&str> {
    let mut segments = vec![];
    let (mut quoted, mut escaped) = (false, false);
    let mut last = 0;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                segments.push(&value[last..i]);
                last = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&value[last..]);
    segments
}

fn unquote(value: &str) -> Option<String> {
    let inner = value.strip_prefix('"')?;
    let inner = inner.strip_suffix('"').unwrap_or(inner);

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    Some(out)
}

/// Split `name*N*` into its base name, section index and encoded flag.
fn split_name(name: &str) -> (&str, Option<usize>, bool) {
    let (name, encoded) = name
        .strip_suffix('*')
        .map_or((name, false), |stripped| (stripped, true));

    match name.rsplit_once('*') {
        Some((base, index)) if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) => {
            (base, index.parse().ok(), encoded)
        }
        _ => (name, None, encoded),
    }
}

fn percent_decode(value: &str) -> Vec<u8> {
    let hex = |b: u8| char::from(b).to_digit(16);
    let bytes = value.as_bytes();

    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match (bytes[i], bytes.get(i + 1).copied().and_then(hex), bytes.get(i + 2).copied().and_then(hex)) {
            (b'%', Some(high), Some(low)) => {
                #[allow(clippy::cast_possible_truncation)]
                out.push((high * 16 + low) as u8);
                i += 3;
            }
            (other, _, _) => {
                out.push(other);
                i += 1;
            }
        }
    }
    out
}

const fn is_attribute_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#' | b'$' | b'&' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
        )
}

fn percent_encode(value: &[u8]) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value {
        if is_attribute_char(*byte) {
            out.push(char::from(*byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

struct Section {
    index: usize,
    encoded: bool,
    value: String,
}

fn assemble(mut sections: Vec<Section>) -> String {
    sections.sort_by_key(|section| section.index);

    let mut label = None;
    let mut bytes = vec![];
    for (i, section) in sections.iter().enumerate() {
        if !section.encoded {
            bytes.extend_from_slice(section.value.as_bytes());
            continue;
        }

        let mut text = section.value.as_str();
        if i == 0 {
            let mut split = section.value.splitn(3, '\'');
            if let (Some(charset), Some(_language), Some(rest)) =
                (split.next(), split.next(), split.next())
            {
                label = Some(charset).filter(|charset| !charset.is_empty());
                text = rest;
            }
        }
        bytes.extend(percent_decode(text));
    }

    charset::decode(&bytes, Some(label.unwrap_or(charset::UTF_8)))
}

/// Parse a parametrized header value.
///
/// Parameter names are lowercased, quoted values are unescaped, rfc2231
/// sections are put back together and the encoded words that some clients
/// put in quoted values are decoded. Segments without `=` are ignored.
#[must_use]
pub fn parse(value: &str) -> WithParams {
    let mut segments = split_segments(value).into_iter();
    let head = segments.next().unwrap_or_default().trim().to_string();

    let mut order: Vec<String> = vec![];
    let mut plain: Vec<(String, String)> = vec![];
    let mut extended: Vec<(String, Vec<Section>)> = vec![];

    for segment in segments {
        let Some((name, raw)) = segment.split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let raw = raw.trim();
        let value = unquote(raw).unwrap_or_else(|| raw.to_string());

        let (base, index, encoded) = split_name(&name);
        if !order.iter().any(|known| known == base) {
            order.push(base.to_string());
        }

        if index.is_none() && !encoded {
            plain.push((base.to_string(), value));
            continue;
        }

        let section = Section {
            index: index.unwrap_or_default(),
            encoded,
            value,
        };
        match extended.iter_mut().find(|(known, _)| known == base) {
            Some((_, sections)) => sections.push(section),
            None => extended.push((base.to_string(), vec![section])),
        }
    }

    let params = order
        .into_iter()
        .filter_map(|name| {
            // the extended form wins over the plain one.
            if let Some(index) = extended.iter().position(|(known, _)| *known == name) {
                let (_, sections) = extended.swap_remove(index);
                return Some((name, assemble(sections)));
            }
            plain
                .iter()
                .find(|(known, _)| *known == name)
                .map(|(_, value)| (name.clone(), encoded_word::decode(value)))
        })
        .collect();

    WithParams {
        value: head,
        params,
    }
}

/// Quote a value if it holds characters that are not allowed in a token.
#[must_use]
pub fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .bytes()
            .any(|b| is_tspecial(b) || b.is_ascii_whitespace() || b.is_ascii_control());

    if !needs_quotes {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Format a parameter as one or more `name=value` assignments.
///
/// Non ascii values use the rfc2231 `name*=utf-8''%XX` syntax, split in
/// `name*N*` sections when too long.
#[must_use]
pub fn format(name: &str, value: &str) -> Vec<String> {
    if value.is_ascii() {
        return vec![format!("{name}={}", quote(value))];
    }

    let encoded = percent_encode(value.as_bytes());
    if encoded.len() <= SECTION_LENGTH {
        return vec![format!("{name}*=utf-8''{encoded}")];
    }

    let mut sections = vec![];
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let mut cut = rest.len().min(SECTION_LENGTH);
        // never split a `%XX` escape.
        if let Some(percent) = rest[..cut].rfind('%') {
            if percent + 3 > cut {
                cut = percent;
            }
        }
        let (section, tail) = rest.split_at(cut);
        let prefix = if sections.is_empty() { "utf-8''" } else { "" };
        sections.push(format!("{name}*{}*={prefix}{section}", sections.len()));
        rest = tail;
    }
    sections
}
