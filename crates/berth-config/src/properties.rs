//! A parser for the `.properties` line format.
//!
//! Supports the subset of the format that configuration files use in
//! practice:
//!
//! - `#` and `!` comment lines, blank lines
//! - `key=value`, `key: value` and `key value` separators
//! - backslash line continuation (leading blanks of the next line dropped)
//! - `\t`, `\n`, `\r`, `\f`, `\\` and `\uXXXX` escapes (surrogate pairs
//!   included); any other escaped character stands for itself
//!
//! Files are read as UTF-8.

use std::collections::HashMap;

use thiserror::Error;

/// A line that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct MalformedLine {
    /// 1-based line number where the logical line starts.
    pub line: usize,
    /// What is wrong with it.
    pub message: String,
}

/// Parsed properties in first-definition order.
///
/// Redefining a key replaces its value but keeps its original position, so
/// iteration order is stable across edits that only change values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl Properties {
    /// Create an empty property set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a property.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(&slot) = self.index.get(&key) {
            if let Some(entry) = self.entries.get_mut(slot) {
                entry.1 = value;
            }
        } else {
            self.index.insert(key.clone(), self.entries.len());
            self.entries.push((key, value));
        }
    }

    /// Look up a raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.index
            .get(key)
            .and_then(|&slot| self.entries.get(slot))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate `(key, value)` pairs in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Self::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

/// Parse the contents of a `.properties` file.
///
/// # Errors
///
/// Returns [`MalformedLine`] for a truncated or non-hexadecimal `\u` escape.
pub fn parse(input: &str) -> Result<Properties, MalformedLine> {
    let mut props = Properties::new();
    let mut lines = input.lines().enumerate();

    while let Some((index, raw)) = lines.next() {
        let line = index.saturating_add(1);
        let trimmed = raw.trim_start_matches(is_blank);
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            continue;
        }

        let mut logical = trimmed.to_owned();
        while ends_with_continuation(&logical) {
            logical.pop();
            match lines.next() {
                Some((_, next)) => logical.push_str(next.trim_start_matches(is_blank)),
                None => break,
            }
        }

        let (key, value) = split_entry(&logical);
        let key = unescape(key).map_err(|message| MalformedLine { line, message })?;
        let value = unescape(value).map_err(|message| MalformedLine { line, message })?;
        props.insert(key, value);
    }

    Ok(props)
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\u{c}')
}

/// An odd number of trailing backslashes continues the line.
fn ends_with_continuation(line: &str) -> bool {
    let trailing = line.chars().rev().take_while(|&c| c == '\\').count();
    !trailing.is_multiple_of(2)
}

/// Split a logical line at the first unescaped separator.
fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                let (key, rest) = line.split_at(i);
                return (key, rest[1..].trim_start_matches(is_blank));
            },
            c if is_blank(c) => {
                let (key, rest) = line.split_at(i);
                let rest = rest.trim_start_matches(is_blank);
                let rest = rest
                    .strip_prefix(['=', ':'])
                    .map_or(rest, |r| r.trim_start_matches(is_blank));
                return (key, rest);
            },
            _ => {},
        }
    }
    (line, "")
}

fn unescape(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let unit = read_utf16_unit(&mut chars)?;
                if (0xD800..=0xDBFF).contains(&unit) {
                    // High surrogate: the low half must follow as another \u escape.
                    if chars.next() != Some('\\') || chars.next() != Some('u') {
                        return Err(format!("unpaired surrogate \\u{unit:04X}"));
                    }
                    let low = read_utf16_unit(&mut chars)?;
                    let decoded = char::decode_utf16([unit, low])
                        .next()
                        .and_then(Result::ok)
                        .ok_or_else(|| format!("invalid surrogate pair \\u{unit:04X}\\u{low:04X}"))?;
                    out.push(decoded);
                } else {
                    let decoded = char::from_u32(u32::from(unit))
                        .ok_or_else(|| format!("unpaired surrogate \\u{unit:04X}"))?;
                    out.push(decoded);
                }
            },
            Some(other) => out.push(other),
            None => {},
        }
    }

    Ok(out)
}

fn read_utf16_unit(chars: &mut std::str::Chars<'_>) -> Result<u16, String> {
    let hex: String = chars.by_ref().take(4).collect();
    if hex.chars().count() != 4 {
        return Err(format!("truncated \\u escape: \\u{hex}"));
    }
    u16::from_str_radix(&hex, 16).map_err(|_| format!("invalid \\u escape: \\u{hex}"))
}
