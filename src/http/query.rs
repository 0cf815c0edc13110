//! Percent-decoded query string and form parameter handling.
//!
//! Query strings and `application/x-www-form-urlencoded` bodies feed the same
//! string map on the request; duplicate names resolve last-wins.

use std::collections::HashMap;

/// Parses `raw` (with or without the leading `?`) into `map`.
///
/// Values are percent-decoded and `+` decodes to a space, per the
/// urlencoded rules. Malformed escapes decode to the replacement character
/// rather than failing the request; the validator layer is the place that
/// rejects unexpected parameter shapes.
#[inline]
pub(crate) fn parse_into(map: &mut HashMap<String, String>, raw: &[u8]) {
    let raw = match raw.first() {
        Some(b'?') => &raw[1..],
        _ => raw,
    };

    for (name, value) in form_urlencoded::parse(raw) {
        map.insert(name.into_owned(), value.into_owned());
    }
}

#[inline]
pub(crate) fn parse(raw: &[u8]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    parse_into(&mut map, raw);
    map
}
