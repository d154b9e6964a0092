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

use crate::headers::encoded_word;

/// Characters that force a display name to be quoted.
const SPECIALS: &[char] = &['(', ')', '<', '>', '[', ']', ':', ';', '@', '\\', ',', '.', '"'];

/// Address with an optional display name.
/// <https://www.rfc-editor.org/rfc/rfc5322#section-3.4>
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mailbox {
    ///
    pub display_name: Option<String>,
    ///
    pub address: String,
}

impl Mailbox {
    /// Create a mailbox.
    pub fn new(display_name: Option<impl Into<String>>, address: impl Into<String>) -> Self {
        Self {
            display_name: display_name.map(Into::into),
            address: address.into(),
        }
    }

    /// The mailbox as it must be written in a header: the display name is
    /// quoted or encoded when needed.
    #[must_use]
    pub fn full_spec(&self) -> String {
        let Some(name) = self
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        else {
            return self.address.clone();
        };

        let name = if !name.is_ascii() {
            encoded_word::encode(name).join(" ")
        } else if name.contains(SPECIALS) {
            let mut quoted = String::with_capacity(name.len() + 2);
            quoted.push('"');
            for c in name.chars() {
                if c == '"' || c == '\\' {
                    quoted.push('\\');
                }
                quoted.push(c);
            }
            quoted.push('"');
            quoted
        } else {
            name.to_string()
        };

        format!("{name} <{}>", self.address)
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_spec())
    }
}

fn remove_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let (mut depth, mut quoted, mut escaped) = (0_usize, false, false);

    for c in input.chars() {
        match c {
            _ if escaped => {
                escaped = false;
                if depth == 0 {
                    out.push(c);
                }
                continue;
            }
            '\\' => escaped = true,
            '"' if depth == 0 => quoted = !quoted,
            '(' if !quoted => {
                depth += 1;
                continue;
            }
            ')' if !quoted && depth > 0 => {
                depth -= 1;
                continue;
            }
            _ => {}
        }
        if depth == 0 {
            out.push(c);
        }
    }
    out
}

fn unquote(name: &str) -> String {
    let name = name.trim();
    let Some(inner) = name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) else {
        return name.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

impl std::str::FromStr for Mailbox {
    type Err = String;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        let src = src.trim();

        if let (Some(open), Some(close)) = (src.rfind('<'), src.rfind('>')) {
            if open > close {
                return Err(format!("unbalanced angle brackets in {src:?}"));
            }
            let address = remove_comments(&src[open + 1..close]).trim().to_string();
            if address.is_empty() || address.contains(char::is_whitespace) {
                return Err(format!("invalid address in {src:?}"));
            }
            let name = unquote(&remove_comments(&src[..open]));
            return Ok(Self {
                display_name: Some(encoded_word::decode(&name)).filter(|name| !name.is_empty()),
                address,
            });
        }

        let address = remove_comments(src).trim().to_string();
        if address.is_empty()
            || address.contains(char::is_whitespace)
            || address.contains(['<', '>', '"'])
        {
            return Err(format!("invalid address {src:?}"));
        }
        Ok(Self {
            display_name: None,
            address,
        })
    }
}

/// Split an address list on the commas that are not quoted, commented
/// or between angle brackets.
///
/// Returns `None` if one of the mailboxes cannot be parsed, or if the list
/// uses the group syntax.
#[must_use]
pub fn parse_list(input: &str) -> Option<Vec<Mailbox>> {
    let mut items = vec![];
    let (mut quoted, mut escaped, mut angle, mut comment) = (false, false, false, 0_usize);
    let mut last = 0;

    for (i, c) in input.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' if comment == 0 => quoted = !quoted,
            '(' if !quoted => comment += 1,
            ')' if !quoted && comment > 0 => comment -= 1,
            '<' if !quoted && comment == 0 => angle = true,
            '>' if !quoted && comment == 0 => angle = false,
            ':' | ';' if !quoted && !angle && comment == 0 => return None,
            ',' if !quoted && !angle && comment == 0 => {
                items.push(&input[last..i]);
                last = i + 1;
            }
            _ => {}
        }
    }
    items.push(&input[last..]);

    let mailboxes = items
        .into_iter()
        .filter(|item| !item.trim().is_empty())
        .map(str::parse::<Mailbox>)
        .collect::<Result<Vec<_>, _>>()
        .ok()?;

    Some(mailboxes).filter(|mailboxes| !mailboxes.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case("john@example.com", None, "john@example.com")]
    #[case("John Doe <john@example.com>", Some("John Doe"), "john@example.com")]
    #[case("\"Doe, John\" <john@example.com>", Some("Doe, John"), "john@example.com")]
    #[case("<john@example.com>", None, "john@example.com")]
    #[case("john@example.com (John Doe)", None, "john@example.com")]
    #[case("=?utf-8?Q?Jos=C3=A9?= <jose@example.com>", Some("José"), "jose@example.com")]
    fn parse_mailbox(
        #[case] input: &str,
        #[case] display_name: Option<&str>,
        #[case] address: &str,
    ) {
        pretty_assertions::assert_eq!(
            input.parse::<Mailbox>().unwrap(),
            Mailbox::new(display_name, address)
        );
    }

    #[test]
    fn parse_invalid() {
        assert!("John Doe".parse::<Mailbox>().is_err());
        assert!("".parse::<Mailbox>().is_err());
        assert!("a >b< c".parse::<Mailbox>().is_err());
    }

    #[test]
    fn list() {
        pretty_assertions::assert_eq!(
            parse_list("\"Doe, John\" <john@example.com>, jane@example.com,, (comment, here) x@y.z"),
            Some(vec![
                Mailbox::new(Some("Doe, John"), "john@example.com"),
                Mailbox::new(None::<String>, "jane@example.com"),
                Mailbox::new(None::<String>, "x@y.z"),
            ])
        );
    }

    #[test]
    fn group_syntax_is_not_supported() {
        assert!(parse_list("undisclosed-recipients:;").is_none());
        assert!(parse_list("").is_none());
    }

    #[rstest::rstest]
    #[case(Mailbox::new(None::<String>, "a@b.c"), "a@b.c")]
    #[case(Mailbox::new(Some("K."), "kayo@example.com"), "\"K.\" <kayo@example.com>")]
    #[case(Mailbox::new(Some("Kayo"), "kayo@example.com"), "Kayo <kayo@example.com>")]
    #[case(Mailbox::new(Some("a \"b\""), "a@b.c"), "\"a \\\"b\\\"\" <a@b.c>")]
    #[case(
        Mailbox::new(Some("José Luis"), "jose@example.com"),
        "=?utf-8?Q?Jos=C3=A9_Luis?= <jose@example.com>"
    )]
    fn full_spec(#[case] mailbox: Mailbox, #[case] expected: &str) {
        pretty_assertions::assert_eq!(mailbox.full_spec(), expected);
    }
}
