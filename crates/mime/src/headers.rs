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

use crate::{config::Limits, DecodingResult};

/// rfc2047 encoded words.
pub mod encoded_word;
/// Rendering and folding of header lines.
pub mod encoding;
/// Parametrized values and rfc2231.
pub mod params;
/// Splitting of header blocks and unfolding.
pub mod parsing;

/// `Content-Type` header name.
pub const CONTENT_TYPE: &str = "Content-Type";
/// `Content-Transfer-Encoding` header name.
pub const CONTENT_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";
/// `Content-Disposition` header name.
pub const CONTENT_DISPOSITION: &str = "Content-Disposition";
/// `MIME-Version` header name.
pub const MIME_VERSION: &str = "MIME-Version";

/// Headers whose value is stored as a [`WithParams`].
const PARAMETRIZED: &[&str] = &[CONTENT_TYPE, CONTENT_DISPOSITION, CONTENT_TRANSFER_ENCODING];

/// A header value of the form `value; name=param; ...`.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct WithParams {
    /// The value before the first `;`.
    pub value: String,
    /// Decoded parameters, lowercase names, in order of appearance.
    pub params: Vec<(String, String)>,
}

impl WithParams {
    /// Create a value without parameters.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            params: vec![],
        }
    }

    /// Find a parameter, case insensitive.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl std::fmt::Display for WithParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)?;
        for (name, value) in &self.params {
            for assignment in params::format(name, value) {
                write!(f, "; {assignment}")?;
            }
        }
        Ok(())
    }
}

/// Decoded value of a header.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    /// Unstructured text, encoded words decoded.
    Text(String),
    /// `Content-*` values with parameters.
    Params(WithParams),
}

impl HeaderValue {
    /// The text, or the main value of a parametrized header.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Params(with_params) => &with_params.value,
        }
    }

    ///
    #[must_use]
    pub const fn as_params(&self) -> Option<&WithParams> {
        match self {
            Self::Params(with_params) => Some(with_params),
            Self::Text(_) => None,
        }
    }

    /// Store the value in the form expected for the header `name`.
    fn for_header(self, name: &str) -> Self {
        let parametrized = PARAMETRIZED
            .iter()
            .any(|known| known.eq_ignore_ascii_case(name));

        match self {
            Self::Text(text) if parametrized => Self::Params(params::parse(&text)),
            Self::Params(with_params) if !parametrized => Self::Text(with_params.to_string()),
            other => other,
        }
    }
}

impl std::fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Params(with_params) => with_params.fmt(f),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<WithParams> for HeaderValue {
    fn from(value: WithParams) -> Self {
        Self::Params(value)
    }
}

impl From<&crate::ContentType> for HeaderValue {
    fn from(value: &crate::ContentType) -> Self {
        Self::Params(value.into())
    }
}

/// Train-Case name, with the usual acronyms uppercased.
#[must_use]
pub fn canonical_name(name: &str) -> String {
    use convert_case::{Case, Casing};

    let name = name.trim().from_case(Case::Kebab).to_case(Case::Train);

    name.split('-')
        .map(|segment| match segment {
            "Mime" => "MIME",
            "Id" => "ID",
            "Dkim" => "DKIM",
            "Arc" => "ARC",
            "Spf" => "SPF",
            "Ms" => "MS",
            other => other,
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    value: HeaderValue,
    /// Original bytes, written as is unless the entry is replaced.
    raw: Option<bytes::Bytes>,
}

/// Ordered list of the headers of a part.
///
/// Header ordering is significant, and a name can appear several times.
/// Lookups are case insensitive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MimeHeaders {
    entries: Vec<Entry>,
    changed: bool,
    /// number of entries inserted at the front with [`MimeHeaders::prepend`].
    prepended: usize,
}

impl MimeHeaders {
    /// Parse a header block, as delimited by [`parsing::split_header_block`].
    pub fn parse(block: &bytes::Bytes, limits: &Limits) -> DecodingResult<Self> {
        let entries = parsing::parse_block(block, limits)?
            .into_iter()
            .map(|parsing::RawHeader { name, value, raw }| {
                let value = if PARAMETRIZED.iter().any(|known| known.eq_ignore_ascii_case(&name)) {
                    HeaderValue::Params(params::parse(&value))
                } else {
                    HeaderValue::Text(encoded_word::decode(&value))
                };
                Entry {
                    name: canonical_name(&name),
                    value,
                    raw: Some(raw),
                }
            })
            .collect();

        Ok(Self {
            entries,
            changed: false,
            prepended: 0,
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    fn entry(name: &str, value: HeaderValue) -> Entry {
        Entry {
            value: value.for_header(name),
            name: canonical_name(name),
            raw: None,
        }
    }

    /// First value of the header `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.position(name).map(|index| &self.entries[index].value)
    }

    /// Every value of the header `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HeaderValue> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.name.eq_ignore_ascii_case(name))
            .map(|entry| &entry.value)
    }

    /// First value of the header `name`, as a string.
    #[must_use]
    pub fn get_value(&self, name: &str) -> Option<&str> {
        self.get(name).map(HeaderValue::as_str)
    }

    /// First value of the header `name`, if it has parameters.
    #[must_use]
    pub fn get_params(&self, name: &str) -> Option<&WithParams> {
        self.get(name).and_then(HeaderValue::as_params)
    }

    ///
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Append a header at the end of the block.
    pub fn add(&mut self, name: &str, value: impl Into<HeaderValue>) {
        self.entries.push(Self::entry(name, value.into()));
        self.changed = true;
    }

    /// Replace the first header `name` in place, removing the others,
    /// or append it if missing.
    pub fn set(&mut self, name: &str, value: impl Into<HeaderValue>) {
        let entry = Self::entry(name, value.into());

        match self.position(name) {
            Some(index) => {
                self.entries[index] = entry;
                let (limit, mut prepended) = (self.prepended, self.prepended);
                let (mut seen, mut i) = (0, 0);
                self.entries.retain(|entry| {
                    let keep = !entry.name.eq_ignore_ascii_case(name) || {
                        seen += 1;
                        seen == 1
                    };
                    if !keep && i < limit {
                        prepended -= 1;
                    }
                    i += 1;
                    keep
                });
                self.prepended = prepended;
            }
            None => self.entries.push(entry),
        }
        self.changed = true;
    }

    /// Insert a header in front of the block.
    ///
    /// A block with prepended headers only is still written with its
    /// original bytes, after the new lines.
    pub fn prepend(&mut self, name: &str, value: impl Into<HeaderValue>) {
        self.entries.insert(0, Self::entry(name, value.into()));
        self.prepended += 1;
    }

    /// Remove every header `name`, returns the number of removed entries.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        let (limit, mut prepended) = (self.prepended, self.prepended);
        let mut i = 0;
        self.entries.retain(|entry| {
            let keep = !entry.name.eq_ignore_ascii_case(name);
            if !keep && i < limit {
                prepended -= 1;
            }
            i += 1;
            keep
        });

        let removed = before - self.entries.len();
        // removing prepended entries only does not touch the original block.
        if removed > self.prepended - prepended {
            self.changed = true;
        }
        self.prepended = prepended;
        removed
    }

    /// Iterate over `(name, value)` in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), &entry.value))
    }

    /// Header names in order, duplicates included.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    ///
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Has the block been modified in any way.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.have_changed(false)
    }

    /// Has the block been modified, optionally not counting prepended headers.
    #[must_use]
    pub const fn have_changed(&self, ignore_prepends: bool) -> bool {
        self.changed || (!ignore_prepends && self.prepended != 0)
    }

    /// Number of headers prepended to the original block.
    #[must_use]
    pub const fn prepended(&self) -> usize {
        self.prepended
    }

    /// Write the whole block, without the empty line that ends it.
    pub fn write_to(&self, out: &mut Vec<u8>, limits: &Limits) {
        for entry in &self.entries {
            Self::write_entry(entry, out, limits);
        }
    }

    /// Write the prepended headers only.
    pub fn write_prepended_to(&self, out: &mut Vec<u8>, limits: &Limits) {
        for entry in &self.entries[..self.prepended] {
            Self::write_entry(entry, out, limits);
        }
    }

    fn write_entry(entry: &Entry, out: &mut Vec<u8>, limits: &Limits) {
        match &entry.raw {
            Some(raw) => {
                out.extend_from_slice(raw);
                if !raw.ends_with(b"\n") {
                    out.extend_from_slice(b"\r\n");
                }
            }
            None => {
                out.extend_from_slice(encoding::render(&entry.name, &entry.value, limits).as_bytes());
            }
        }
    }
}

impl std::fmt::Display for MimeHeaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = vec![];
        self.write_to(&mut out, &Limits::default());
        f.write_str(&String::from_utf8_lossy(&out))
    }
}
