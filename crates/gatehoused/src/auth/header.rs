//! Tokenizer for `Authorization: Digest ...` headers.

use std::collections::HashMap;

/// Key/value parameters of a digest `Authorization` header.
///
/// Keys are lowercased; quoted values are unquoted with backslash escapes
/// resolved.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct DigestParams {
    values: HashMap<String, String>,
}

impl DigestParams {
    /// Parses a header value. Returns `None` unless the scheme is `Digest`.
    pub(crate) fn parse(header: &str) -> Option<Self> {
        let trimmed = header.trim_start();
        let (scheme, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }
        Some(Self {
            values: tokenize(rest),
        })
    }

    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

fn tokenize(input: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let mut chars = input.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && *c != ',') {
            key.push(c);
        }
        if key.trim().is_empty() && chars.peek().is_none() {
            break;
        }
        let mut value = String::new();
        if chars.next_if_eq(&'=').is_some() {
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            if chars.next_if_eq(&'"').is_some() {
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        other => value.push(other),
                    }
                }
            } else {
                while let Some(c) = chars.next_if(|c| *c != ',') {
                    value.push(c);
                }
                value = value.trim_end().to_owned();
            }
        }
        let name = key.trim().to_ascii_lowercase();
        if !name.is_empty() {
            values.insert(name, value);
        }
    }
    values
}
