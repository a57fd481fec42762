//! Wide strings as used on the request surface: 16-bit code units, compared
//! case-insensitively, with backslash-separated key paths.

use std::cmp::Ordering;

/// Maximum length of a key path coming in from a request buffer, in code units.
pub const MAX_PATH: usize = 260;

/// A heap-owned wide string. Not nul-terminated; lengths are explicit.
pub type WString = Vec<u16>;

const SEP: u16 = b'\\' as u16;

fn fold(u: u16) -> u32 {
    match char::from_u32(u as u32) {
        Some(c) => c.to_lowercase().next().unwrap_or(c) as u32,
        None => u as u32,
    }
}

/// case-insensitive comparison of two wide strings
pub fn cmp_i(a: &[u16], b: &[u16]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match fold(*x).cmp(&fold(*y)) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

pub fn eq_i(a: &[u16], b: &[u16]) -> bool {
    cmp_i(a, b) == Ordering::Equal
}

/// length-bounded copy from a request buffer; stops at the first nul
pub fn bounded(raw: &[u16], max: usize) -> WString {
    let limit = raw.len().min(max);
    let end = raw[..limit].iter().position(|&c| c == 0).unwrap_or(limit);
    raw[..end].to_vec()
}

/// duplicate a request string, honoring its embedded nul terminator if any
pub fn req_dup(raw: &[u16]) -> WString {
    bounded(raw, raw.len())
}

pub fn from_str(s: &str) -> WString {
    s.encode_utf16().collect()
}

pub fn to_string_lossy(w: &[u16]) -> String {
    char::decode_utf16(w.iter().copied())
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Iterator over the components of a backslash-separated key path.
///
/// The cursor lives in the iterator, so any number of walks can be in flight
/// at once. Leading and doubled separators are skipped; a nul terminates the
/// whole path; an exhausted path yields `None`.
pub struct PathTokens<'a> {
    rest: &'a [u16],
}

impl<'a> PathTokens<'a> {
    pub fn new(path: &'a [u16]) -> Self {
        Self { rest: path }
    }
}

impl<'a> Iterator for PathTokens<'a> {
    type Item = &'a [u16];

    fn next(&mut self) -> Option<&'a [u16]> {
        let mut rest = self.rest;
        let mut skip = 0;
        while skip < rest.len() && rest[skip] == SEP {
            skip += 1;
        }
        rest = &rest[skip..];
        let mut end = 0;
        while end < rest.len() && rest[end] != SEP && rest[end] != 0 {
            end += 1;
        }
        let token = &rest[..end];
        self.rest = if end < rest.len() && rest[end] == 0 {
            &rest[..0]
        } else {
            &rest[end..]
        };
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }
}
