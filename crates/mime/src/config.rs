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

/// Tunable ceilings used while parsing and re-encoding messages.
///
/// ```json
/// {
///     "max_ops": 500,
///     "max_header_line_length": 10000,
///     "max_body_line_length": 998,
///     "fold_line_length": 78
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    /// Maximum number of token operations the tree builder may perform
    /// before giving up on the message.
    #[serde(default = "Limits::default_max_ops")]
    pub max_ops: usize,
    /// Maximum length in bytes of a single physical header line.
    #[serde(default = "Limits::default_max_header_line_length")]
    pub max_header_line_length: usize,
    /// Above this line length, 7bit text bodies are quoted-printable encoded.
    #[serde(default = "Limits::default_max_body_line_length")]
    pub max_body_line_length: usize,
    /// Preferred length of folded header lines.
    #[serde(default = "Limits::default_fold_line_length")]
    pub fold_line_length: usize,
}

impl Limits {
    /// Hard line length limit of rfc5322, without the CRLF.
    pub const RFC5322_LINE_LENGTH: usize = 998;

    const fn default_max_ops() -> usize {
        500
    }

    const fn default_max_header_line_length() -> usize {
        10_000
    }

    const fn default_max_body_line_length() -> usize {
        Self::RFC5322_LINE_LENGTH
    }

    const fn default_fold_line_length() -> usize {
        78
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_ops: Self::default_max_ops(),
            max_header_line_length: Self::default_max_header_line_length(),
            max_body_line_length: Self::default_max_body_line_length(),
            fold_line_length: Self::default_fold_line_length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Limits;

    #[test]
    fn defaults_from_empty_object() {
        let limits = serde_json::from_str::<Limits>("{}").unwrap();
        pretty_assertions::assert_eq!(limits, Limits::default());
    }

    #[test]
    fn partial_override() {
        let limits = serde_json::from_str::<Limits>(r#"{ "max_ops": 42 }"#).unwrap();
        pretty_assertions::assert_eq!(
            limits,
            Limits {
                max_ops: 42,
                ..Limits::default()
            }
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<Limits>(r#"{ "max_parts": 42 }"#).is_err());
    }
}
