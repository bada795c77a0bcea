//! Percent-decoding and `application/x-www-form-urlencoded` bodies.

use std::collections::HashMap;

use crate::parser::error::Error;

/// A decoded url-encoded form.
///
/// Pairs that fail to decode do not spoil the rest of the form; they are
/// reported in `rejected` instead.
#[derive(Debug, Default)]
pub struct UrlEncodedForm {
    /// Successfully decoded fields. A repeated key keeps its last value.
    pub fields: HashMap<String, String>,
    /// One `MalformedEncoding` error per pair that could not be decoded.
    pub rejected: Vec<Error>,
}

impl UrlEncodedForm {
    /// Get a field value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Decode `%XX` escapes. With `plus_as_space`, `+` decodes to a space as in
/// form bodies and query strings.
pub fn percent_decode(input: &str, plus_as_space: bool) -> Result<String, Error> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = bytes.get(i + 1).and_then(|b| hex_value(*b));
                let lo = bytes.get(i + 2).and_then(|b| hex_value(*b));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                    _ => return Err(Error::MalformedEncoding(input.to_string())),
                }
                i += 3;
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| Error::MalformedEncoding(input.to_string()))
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Split `a=1&b=2` into decoded pairs, collecting failures per pair.
pub fn parse_urlencoded(input: &str) -> UrlEncodedForm {
    let mut form = UrlEncodedForm::default();
    for pair in input.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match (percent_decode(key, true), percent_decode(value, true)) {
            (Ok(key), Ok(value)) => {
                form.fields.insert(key, value);
            }
            (Err(e), _) | (_, Err(e)) => form.rejected.push(e),
        }
    }
    form
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b", false).unwrap(), "a b");
        assert_eq!(percent_decode("a+b", false).unwrap(), "a+b");
        assert_eq!(percent_decode("a+b", true).unwrap(), "a b");
        assert_eq!(percent_decode("caf%C3%A9", false).unwrap(), "café");
    }

    #[test]
    fn test_percent_decode_rejects_bad_escapes() {
        assert!(matches!(percent_decode("%zz", false), Err(Error::MalformedEncoding(_))));
        assert!(matches!(percent_decode("abc%4", false), Err(Error::MalformedEncoding(_))));
        assert!(matches!(percent_decode("%ff", false), Err(Error::MalformedEncoding(_))));
    }

    #[test]
    fn test_parse_urlencoded_keeps_good_pairs() {
        let form = parse_urlencoded("name=John+Doe&bad=%G1&city=K%C3%B6ln&flag");
        assert_eq!(form.get("name"), Some("John Doe"));
        assert_eq!(form.get("city"), Some("Köln"));
        assert_eq!(form.get("flag"), Some(""));
        assert_eq!(form.get("bad"), None);
        assert_eq!(form.rejected.len(), 1);
        assert!(matches!(form.rejected[0], Error::MalformedEncoding(_)));
    }
}
