//! Reverses the `eval(function(p,a,c,k,e,d){...})` packer used by the
//! kwik embed pages and pulls the playlist link out of the result.

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;

use crate::error::UnpackError;

static PACKED_ARGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\}\('(.*)'\)*,*(\d+)*,*(\d+)*,*'((?:[^'\\]|\\.)*)'\.split\('\|'\)*,*(\d+)*,*(\{\})",
    )
    .expect("packed script pattern is valid")
});

static STREAM_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"http.*\.m3u8").expect("stream link pattern is valid"));

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Arguments recovered from a packed script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedScript {
    pub payload: String,
    pub radix: u32,
    pub count: usize,
    pub keys: Vec<String>,
}

impl PackedScript {
    pub fn parse(source: &str) -> Result<Self, UnpackError> {
        let caps = PACKED_ARGS
            .captures(source)
            .ok_or(UnpackError::PatternMismatch)?;
        let number = |idx: usize| -> Result<u64, UnpackError> {
            caps.get(idx)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .ok_or(UnpackError::PatternMismatch)
        };
        let radix = u32::try_from(number(2)?).map_err(|_| UnpackError::PatternMismatch)?;
        let count = usize::try_from(number(3)?).map_err(|_| UnpackError::PatternMismatch)?;
        let payload = caps
            .get(1)
            .map(|m| unescape(m.as_str()))
            .ok_or(UnpackError::PatternMismatch)?;
        let keys = caps
            .get(4)
            .map(|m| m.as_str().split('|').map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Self {
            payload,
            radix,
            count,
            keys,
        })
    }

    /// Token name to literal, one entry per token id.
    pub fn decode_table(&self) -> Result<HashMap<String, String>, UnpackError> {
        if self.radix < 2 {
            return Err(UnpackError::InvalidRadix(self.radix));
        }
        if self.count != self.keys.len() {
            return Err(UnpackError::MalformedTable {
                count: self.count,
                keys: self.keys.len(),
            });
        }

        let mut seen = HashMap::with_capacity(self.count);
        for (id, key) in self.keys.iter().enumerate() {
            let name = symbol(id as u64, self.radix);
            let literal = if key.is_empty() { name.clone() } else { key.clone() };
            seen.insert(name, literal);
        }
        Ok(seen)
    }

    pub fn unpack(&self) -> Result<String, UnpackError> {
        let seen = self.decode_table()?;
        Ok(substitute_words(&self.payload, &seen))
    }
}

/// Name of token `n` in base `radix`.
///
/// Digits above 35 map to `chr(d + 29)`, i.e. `A..Z` for bases up to 62.
pub fn symbol(n: u64, radix: u32) -> String {
    let radix = u64::from(radix.max(2));
    let mut digits = Vec::new();
    let mut rest = n;
    loop {
        digits.push(digit(rest % radix));
        rest /= radix;
        if rest == 0 {
            break;
        }
    }
    digits.iter().rev().collect()
}

fn digit(d: u64) -> char {
    if d > 35 {
        char::from_u32(d as u32 + 29).unwrap_or(char::REPLACEMENT_CHARACTER)
    } else {
        ALPHABET[d as usize] as char
    }
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Replaces every whole word found in `table`, leaving other words as they are.
fn substitute_words(payload: &str, table: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(payload.len() * 2);
    let mut word_start: Option<usize> = None;

    for (idx, ch) in payload.char_indices() {
        match (is_word_char(ch), word_start) {
            (true, None) => word_start = Some(idx),
            (false, Some(start)) => {
                push_word(&mut out, &payload[start..idx], table);
                word_start = None;
                out.push(ch);
            }
            (false, None) => out.push(ch),
            (true, Some(_)) => {}
        }
    }
    if let Some(start) = word_start {
        push_word(&mut out, &payload[start..], table);
    }
    out
}

fn push_word(out: &mut String, word: &str, table: &HashMap<String, String>) {
    match table.get(word) {
        Some(literal) => out.push_str(literal),
        None => out.push_str(word),
    }
}

/// Undoes the `\'` and `\\` escapes of the payload string literal.
fn unescape(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len());
    let mut chars = payload.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some(next @ ('\'' | '\\')) => out.push(next),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Unpacks `source` into literal script text.
pub fn unpack(source: &str) -> Result<String, UnpackError> {
    PackedScript::parse(source)?.unpack()
}

/// First playlist link in already unpacked script text.
pub fn find_stream_link(script: &str) -> Result<String, UnpackError> {
    STREAM_LINK
        .find(script)
        .map(|m| m.as_str().to_string())
        .ok_or(UnpackError::LinkNotFound)
}

/// Unpacks `source` and returns the first playlist link inside it.
pub fn extract_stream_link(source: &str) -> Result<String, UnpackError> {
    find_stream_link(&unpack(source)?)
}
