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

//! Charset names as found in the wild, and conversions from/to them.

use encoding_rs::Encoding;

pub const ASCII: &str = "ascii";
pub const UTF_8: &str = "utf-8";

/// Labels emitted by broken clients, mapped to a label `encoding_rs` knows.
/// Labels mapped to an empty string carry no information at all.
const ALIASES: &[(&str, &str)] = &[
    ("windows874", "windows-874"),
    ("x-windows-874", "windows-874"),
    ("x-windows874", "windows-874"),
    ("cp874", "windows-874"),
    ("sjis", "shift_jis"),
    ("shift-jis", "shift_jis"),
    ("x-sjis", "shift_jis"),
    ("koi8r", "koi8-r"),
    ("koi8_r", "koi8-r"),
    ("koi-8-r", "koi8-r"),
    ("utf8", UTF_8),
    ("utf_8", UTF_8),
    ("us-ascii", ASCII),
    ("ansi_x3.4-1968", ASCII),
    ("iso646-us", ASCII),
    ("us", ASCII),
    ("latin1", "iso-8859-1"),
    ("latin-1", "iso-8859-1"),
    ("iso8859-1", "iso-8859-1"),
    ("iso_8859-1", "iso-8859-1"),
    ("x-unknown", ""),
    ("unknown", ""),
    ("unknown-8bit", ""),
    ("x-user-defined", ""),
];

/// Charsets in which a 7bit or quoted-printable transfer encoding is enough.
const LATIN: &[&str] = &[ASCII, "iso-8859-1", "iso-8859-15", "windows-1252"];

/// Lowercase the label, strip quotes and garbage, and resolve known aliases.
#[must_use]
pub fn normalize(label: &str) -> String {
    let label = label
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
        .trim()
        .to_ascii_lowercase();

    ALIASES
        .iter()
        .find(|(alias, _)| *alias == label)
        .map_or(label, |(_, canonical)| (*canonical).to_string())
}

/// Is the charset a member of the 8-bit latin family.
#[must_use]
pub fn is_latin(label: &str) -> bool {
    LATIN.contains(&normalize(label).as_str())
}

/// Find the decoder for a (normalized or not) label.
#[must_use]
pub fn lookup(label: &str) -> Option<&'static Encoding> {
    let label = normalize(label);
    if label.is_empty() {
        return None;
    }
    Encoding::for_label_no_replacement(label.as_bytes())
}

/// Guess the charset of some bytes.
#[must_use]
pub fn detect(bytes: &[u8]) -> &'static Encoding {
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

/// Convert bytes to unicode using the declared charset, falling back to
/// detection when the charset is missing, unknown or wrong.
///
/// This function never fails: undecodable sequences end up as U+FFFD.
#[must_use]
pub fn decode(bytes: &[u8], label: Option<&str>) -> String {
    let label = label.map(normalize);

    match label.as_deref() {
        Some(ASCII) if bytes.is_ascii() => {
            return String::from_utf8_lossy(bytes).into_owned();
        }
        Some(ASCII) => {}
        Some(label) => {
            if let Some(encoding) = lookup(label) {
                if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes)
                {
                    return text.into_owned();
                }
            }
        }
        None if bytes.is_ascii() => {
            return String::from_utf8_lossy(bytes).into_owned();
        }
        None => {}
    }

    let mut guessed = detect(bytes);
    // a part declared in a 8-bit charset has one character per byte.
    if !guessed.is_single_byte() && label.as_deref().map_or(false, is_latin) {
        guessed = encoding_rs::WINDOWS_1252;
    }
    tracing::debug!(
        declared = ?label,
        guessed = guessed.name(),
        "Declared charset cannot decode content, falling back to detection"
    );
    guessed.decode_without_bom_handling(bytes).0.into_owned()
}

/// Convert unicode to the given charset, `None` if some characters
/// cannot be represented.
#[must_use]
pub fn encode(text: &str, label: &str) -> Option<Vec<u8>> {
    match normalize(label).as_str() {
        ASCII => text.is_ascii().then(|| text.as_bytes().to_vec()),
        UTF_8 => Some(text.as_bytes().to_vec()),
        // encoding_rs reads this label as windows-1252.
        "iso-8859-1" => text.chars().map(|c| u8::try_from(c).ok()).collect(),
        other => {
            let encoding = lookup(other)?;
            // utf-16 and friends are decode only in encoding_rs.
            if encoding.output_encoding() != encoding {
                return None;
            }
            let (bytes, _, had_errors) = encoding.encode(text);
            (!had_errors).then(|| bytes.into_owned())
        }
    }
}
