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

use crate::headers::{params, WithParams};

/// Parsed value of a `Content-Type` header.
/// <https://www.rfc-editor.org/rfc/rfc2045#section-5>
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub struct ContentType {
    main: String,
    sub: String,
    /// parameter ordering is kept for output, keys are lowercase.
    params: Vec<(String, String)>,
}

/// Structural category of a part, drives the tree builder and the serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A leaf with a body.
    Singlepart,
    /// Boundary separated children.
    Multipart,
    /// One enclosed message, `message/rfc822` or `message/news`.
    MessageContainer,
    /// Header blocks followed by free-form text, no boundary.
    HeadersContainer(HeadersKind),
}

/// The different kinds of headers containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeadersKind {
    /// `message/delivery-status`, rfc3464.
    DeliveryStatus,
    /// `message/feedback-report`, rfc5965.
    FeedbackReport,
    /// `message/disposition-notification`, rfc8098.
    DispositionNotification,
    /// `text/rfc822-headers`, rfc6522.
    Rfc822Headers,
    /// `message/external-body`, rfc2046.
    ExternalBody,
}

impl ContentType {
    /// Create a content type without parameters.
    pub fn new(main: impl AsRef<str>, sub: impl AsRef<str>) -> Self {
        Self {
            main: main.as_ref().trim().to_ascii_lowercase(),
            sub: sub.as_ref().trim().to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    /// Add a parameter, builder style.
    #[must_use]
    pub fn with_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_param(name, value);
        self
    }

    /// `text/plain; charset=ascii`, the default of rfc2045.
    #[must_use]
    pub fn default_text() -> Self {
        Self::new("text", "plain").with_param("charset", crate::charset::ASCII)
    }

    /// Default content type of a part without `Content-Type` header.
    ///
    /// see <https://datatracker.ietf.org/doc/html/rfc2046#page-26> for digest multipart parent.
    #[must_use]
    pub fn default_for(parent: Option<&Self>) -> Self {
        match parent {
            Some(parent) if parent.main == "multipart" && parent.sub == "digest" => {
                Self::new("message", "rfc822")
            }
            _ => Self::default_text(),
        }
    }

    /// Parse the value of a `Content-Type` header, `None` if it is not a `type/subtype`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let WithParams { value, params } = params::parse(value);
        let (main, sub) = value.split_once('/')?;
        let (main, sub) = (main.trim(), sub.trim());

        let is_token = |s: &str| {
            !s.is_empty() && s.bytes().all(|b| b.is_ascii_graphic() && !params::is_tspecial(b))
        };
        if !is_token(main) || !is_token(sub) {
            return None;
        }

        Some(Self {
            main: main.to_ascii_lowercase(),
            sub: sub.to_ascii_lowercase(),
            params,
        })
    }

    /// Main type, e.g. `text`.
    #[must_use]
    pub fn main(&self) -> &str {
        &self.main
    }

    /// Sub type, e.g. `plain`.
    #[must_use]
    pub fn subtype(&self) -> &str {
        &self.sub
    }

    /// `main/sub`, without parameters.
    #[must_use]
    pub fn format_type(&self) -> String {
        format!("{}/{}", self.main, self.sub)
    }

    ///
    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Find a parameter, case insensitive.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Replace or append a parameter.
    pub fn set_param(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .params
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some((_, old)) => *old = value,
            None => self.params.push((name.to_ascii_lowercase(), value)),
        }
    }

    /// Remove a parameter, returns true if it was present.
    pub fn remove_param(&mut self, name: &str) -> bool {
        let len = self.params.len();
        self.params.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        len != self.params.len()
    }

    /// The multipart boundary, if any.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary").filter(|boundary| !boundary.is_empty())
    }

    /// The normalized charset, if any.
    #[must_use]
    pub fn charset(&self) -> Option<String> {
        self.param("charset").map(crate::charset::normalize)
    }

    ///
    pub fn set_charset(&mut self, charset: &str) {
        self.set_param("charset", crate::charset::normalize(charset));
    }

    /// Compute the structural category of this content type.
    #[must_use]
    pub fn kind(&self) -> Kind {
        match (self.main.as_str(), self.sub.as_str()) {
            ("multipart", _) => Kind::Multipart,
            ("message", "rfc822" | "news") => Kind::MessageContainer,
            ("message", "delivery-status") => Kind::HeadersContainer(HeadersKind::DeliveryStatus),
            ("message", "feedback-report") => Kind::HeadersContainer(HeadersKind::FeedbackReport),
            ("message", "disposition-notification") => {
                Kind::HeadersContainer(HeadersKind::DispositionNotification)
            }
            ("message", "external-body") => Kind::HeadersContainer(HeadersKind::ExternalBody),
            ("text", "rfc822-headers") => Kind::HeadersContainer(HeadersKind::Rfc822Headers),
            _ => Kind::Singlepart,
        }
    }

    ///
    #[must_use]
    pub fn is_singlepart(&self) -> bool {
        self.kind() == Kind::Singlepart
    }

    ///
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.kind() == Kind::Multipart
    }

    ///
    #[must_use]
    pub fn is_message_container(&self) -> bool {
        self.kind() == Kind::MessageContainer
    }

    ///
    #[must_use]
    pub fn is_headers_container(&self) -> bool {
        matches!(self.kind(), Kind::HeadersContainer(_))
    }

    ///
    #[must_use]
    pub fn is_delivery_status(&self) -> bool {
        self.kind() == Kind::HeadersContainer(HeadersKind::DeliveryStatus)
    }

    ///
    #[must_use]
    pub fn is_feedback_report(&self) -> bool {
        self.kind() == Kind::HeadersContainer(HeadersKind::FeedbackReport)
    }

    ///
    #[must_use]
    pub fn is_disposition_notification(&self) -> bool {
        self.kind() == Kind::HeadersContainer(HeadersKind::DispositionNotification)
    }

    ///
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main == "text"
    }

    ///
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.main == "message"
    }
}

impl Default for ContentType {
    fn default() -> Self {
        Self::default_text()
    }
}

impl std::str::FromStr for ContentType {
    type Err = crate::DecodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            crate::DecodingError::MalformedHeader(format!("invalid Content-Type value {s:?}"))
        })
    }
}

impl From<&ContentType> for WithParams {
    fn from(value: &ContentType) -> Self {
        Self {
            value: value.format_type(),
            params: value.params.clone(),
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        WithParams::from(self).fmt(f)
    }
}

/// Value of the `Content-Transfer-Encoding` header.
/// <https://www.rfc-editor.org/rfc/rfc2045#section-6>
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::EnumString,
    strum::Display,
    strum::AsRefStr,
    serde::Deserialize,
    serde::Serialize,
)]
#[strum(ascii_case_insensitive)]
pub enum TransferEncoding {
    ///
    #[default]
    #[strum(serialize = "7bit")]
    #[serde(rename = "7bit")]
    SevenBit,
    ///
    #[strum(serialize = "8bit")]
    #[serde(rename = "8bit")]
    EightBit,
    ///
    #[strum(serialize = "binary")]
    #[serde(rename = "binary")]
    Binary,
    ///
    #[strum(serialize = "quoted-printable")]
    #[serde(rename = "quoted-printable")]
    QuotedPrintable,
    ///
    #[strum(serialize = "base64")]
    #[serde(rename = "base64")]
    Base64,
}

impl TransferEncoding {
    const fn weight(self) -> u8 {
        match self {
            Self::SevenBit => 0,
            Self::QuotedPrintable | Self::EightBit => 1,
            Self::Base64 | Self::Binary => 2,
        }
    }

    /// Pick the encoding able to carry the most, preferring `self` on ties
    /// so that an existing encoding is never downgraded.
    #[must_use]
    pub const fn stronger(self, other: Self) -> Self {
        if self.weight() >= other.weight() {
            self
        } else {
            other
        }
    }

    /// Lenient parse of a header value, unknown encodings are treated as 7bit.
    #[must_use]
    pub fn parse_lenient(value: &str) -> Self {
        <Self as std::str::FromStr>::from_str(value.trim()).unwrap_or_else(|_| {
            tracing::debug!(value, "Unknown Content-Transfer-Encoding, reading as 7bit");
            Self::SevenBit
        })
    }
}
