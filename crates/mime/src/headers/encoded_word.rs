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

//! `=?charset?encoding?text?=` words of rfc2047.

use crate::charset;

static ENCODED_WORD: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
    regex::Regex::new(r"=\?([^?\s]+)\?([bBqQ])\?([^?\s]*)\?=")
        .unwrap_or_else(|error| unreachable!("encoded word pattern is valid: {error}"))
});

/// Maximum length of an encoded word, delimiters included.
pub const MAX_WORD_LENGTH: usize = 75;

const Q_PREFIX: &str = "=?utf-8?Q?";
const B_PREFIX: &str = "=?utf-8?B?";
const SUFFIX: &str = "?=";

/// Decode every encoded word found in `input`.
///
/// Whitespace between two adjacent encoded words is dropped, and the bytes
/// of consecutive words sharing a charset are decoded together so that a
/// multibyte sequence split across two words survives.
/// Words that cannot be decoded are kept as is.
#[must_use]
pub fn decode(input: &str) -> String {
    if !input.contains("=?") {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut pending: Option<(String, Vec<u8>)> = None;
    let mut last = 0;

    for captures in ENCODED_WORD.captures_iter(input) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let group = |i| captures.get(i).map_or("", |m| m.as_str());
        let gap = &input[last..whole.start()];
        last = whole.end();

        let Some((label, bytes)) = decode_word(group(1), group(2), group(3)) else {
            flush(&mut out, pending.take());
            out.push_str(gap);
            out.push_str(whole.as_str());
            continue;
        };

        let adjacent = pending.is_some() && gap.chars().all(char::is_whitespace);
        if !adjacent {
            flush(&mut out, pending.take());
            out.push_str(gap);
        }

        match &mut pending {
            Some((charset, buffer)) if *charset == label => buffer.extend_from_slice(&bytes),
            _ => {
                flush(&mut out, pending.take());
                pending = Some((label, bytes));
            }
        }
    }

    flush(&mut out, pending.take());
    out.push_str(&input[last..]);
    out
}

fn flush(out: &mut String, pending: Option<(String, Vec<u8>)>) {
    if let Some((label, bytes)) = pending {
        out.push_str(&charset::decode(&bytes, Some(&label)));
    }
}

fn decode_word(label: &str, encoding: &str, text: &str) -> Option<(String, Vec<u8>)> {
    // rfc2231 section 5 allows a language suffix: `=?utf-8*en?Q?...?=`
    let label = charset::normalize(label.split('*').next().unwrap_or_default());

    let bytes = if encoding.eq_ignore_ascii_case("b") {
        crate::body::decode_base64(text.as_bytes()).ok()?
    } else {
        decode_q(text.as_bytes())
    };

    Some((label, bytes))
}

fn decode_q(text: &[u8]) -> Vec<u8> {
    let hex = |b: u8| char::from(b).to_digit(16);

    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        match text[i] {
            b'_' => out.push(b' '),
            b'=' if i + 2 < text.len() => {
                match (hex(text[i + 1]), hex(text[i + 2])) {
                    (Some(high), Some(low)) => {
                        #[allow(clippy::cast_possible_truncation)]
                        out.push((high * 16 + low) as u8);
                        i += 2;
                    }
                    _ => out.push(b'='),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    out
}

const fn is_q_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'!' | b'*' | b'+' | b'-' | b'/')
}

fn q_len(c: char) -> usize {
    let mut buffer = [0; 4];
    c.encode_utf8(&mut buffer)
        .bytes()
        .map(|b| if b == b' ' || is_q_safe(b) { 1 } else { 3 })
        .sum()
}

const fn b_len(bytes: usize) -> usize {
    (bytes + 2) / 3 * 4
}

/// Encode `text` as a sequence of utf-8 encoded words, none longer than
/// [`MAX_WORD_LENGTH`]. `Q` or `B` is picked depending on which one produces
/// the shortest output. Multibyte characters are never split across words.
#[must_use]
pub fn encode(text: &str) -> Vec<String> {
    if text.is_empty() {
        return vec![];
    }

    let payload = MAX_WORD_LENGTH - Q_PREFIX.len() - SUFFIX.len();
    let use_q = text.chars().map(q_len).sum::<usize>() <= b_len(text.len());

    let mut words = vec![];
    let mut chunk = String::new();
    for c in text.chars() {
        let overflow = if use_q {
            chunk.chars().map(q_len).sum::<usize>() + q_len(c) > payload
        } else {
            b_len(chunk.len() + c.len_utf8()) > payload
        };
        if overflow && !chunk.is_empty() {
            words.push(encode_chunk(&chunk, use_q));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(encode_chunk(&chunk, use_q));
    }

    words
}

fn encode_chunk(chunk: &str, use_q: bool) -> String {
    if use_q {
        let mut out = String::from(Q_PREFIX);
        for byte in chunk.bytes() {
            match byte {
                b' ' => out.push('_'),
                b if is_q_safe(b) => out.push(char::from(b)),
                b => out.push_str(&format!("={b:02X}")),
            }
        }
        out.push_str(SUFFIX);
        out
    } else {
        format!(
            "{B_PREFIX}{}{SUFFIX}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, chunk)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case("plain text", "plain text")]
    #[case("=?utf-8?Q?caf=C3=A9?=", "café")]
    #[case("=?ISO-8859-1?Q?Andr=E9?= Pirard", "André Pirard")]
    #[case("=?UTF-8?B?w6l0w6k=?=", "été")]
    #[case("=?utf-8?B?w6l0w6k?=", "été")]
    #[case("=?utf-8?q?hello_world?=", "hello world")]
    #[case("=?utf-8*en?Q?lang?=", "lang")]
    #[case("=?utf-8?Q?a?= =?utf-8?Q?b?=", "ab")]
    #[case("=?utf-8?Q?a?=\r\n =?utf-8?Q?b?=", "ab")]
    #[case("=?utf-8?Q?a?= and =?utf-8?Q?b?=", "a and b")]
    #[case("broken =?utf-8?B?@@@?= word", "broken =?utf-8?B?@@@?= word")]
    fn decode_words(#[case] input: &str, #[case] expected: &str) {
        pretty_assertions::assert_eq!(decode(input), expected);
    }

    #[test]
    fn decode_split_multibyte() {
        // "é" is 0xC3 0xA9, split over two words.
        pretty_assertions::assert_eq!(decode("=?utf-8?Q?caf=C3?= =?utf-8?Q?=A9?="), "café");
    }

    #[test]
    fn encode_prefers_q_for_mostly_ascii() {
        pretty_assertions::assert_eq!(encode("café au lait"), vec!["=?utf-8?Q?caf=C3=A9_au_lait?="]);
    }

    #[test]
    fn encode_prefers_b_for_non_latin() {
        let words = encode("Привет мир");
        assert!(words.iter().all(|w| w.starts_with(B_PREFIX)), "{words:?}");
        pretty_assertions::assert_eq!(decode(&words.join(" ")), "Привет мир");
    }

    #[test]
    fn encode_long_text_in_bounded_words() {
        let text = "日本語のテキスト".repeat(20);
        let words = encode(&text);
        assert!(words.len() > 1);
        assert!(words.iter().all(|w| w.len() <= MAX_WORD_LENGTH), "{words:?}");
        pretty_assertions::assert_eq!(decode(&words.join("\r\n ")), text);
    }
}
