//! Discrepancy extractors for free-text failure messages.
//!
//! Each extractor recognizes one family of message shapes and is tried in
//! order; the first one that matches decides the discrepancy.

use serde::{Deserialize, Serialize};

/// What a failure message says went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// The service answered with `actual` where the test expected `expected`.
    StatusPair { actual: u16, expected: u16 },
    /// The test indexed a key the response did not contain.
    MissingKey { key: String },
    /// Nothing structured could be pulled out of the message.
    Unrecognized,
}

/// Which side of a bare `a == b` comparison holds the produced value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActualPosition {
    /// `assert response.status_code == 200` style: produced value on the left.
    #[default]
    Left,
    Right,
}

/// A single extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    StatusPair(ActualPosition),
    MissingKey,
}

impl Extractor {
    /// The standard extractor order.
    pub fn defaults(actual_position: ActualPosition) -> Vec<Extractor> {
        vec![Extractor::StatusPair(actual_position), Extractor::MissingKey]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Extractor::StatusPair(_) => "status_pair",
            Extractor::MissingKey => "missing_key",
        }
    }

    pub fn extract(&self, message: &str) -> Option<Discrepancy> {
        match self {
            Extractor::StatusPair(position) => extract_status_pair(message, *position)
                .map(|(actual, expected)| Discrepancy::StatusPair { actual, expected }),
            Extractor::MissingKey => extract_missing_key(message).map(|key| Discrepancy::MissingKey { key }),
        }
    }
}

/// Run `extractors` in order, falling back to [`Discrepancy::Unrecognized`].
pub fn extract(extractors: &[Extractor], message: &str) -> Discrepancy {
    extractors
        .iter()
        .find_map(|extractor| {
            let found = extractor.extract(message);
            if found.is_some() {
                tracing::debug!("Extractor {} matched", extractor.name());
            }
            found
        })
        .unwrap_or(Discrepancy::Unrecognized)
}

const STATUS_RANGE: std::ops::RangeInclusive<u32> = 100..=599;

/// Words that introduce the produced value after an "expected ..." clause.
const ACTUAL_MARKERS: &[&str] = &["got", "received", "actual", "but was", "returned"];

fn extract_status_pair(message: &str, position: ActualPosition) -> Option<(u16, u16)> {
    labeled_pair(message)
        .or_else(|| left_right_pair(message, position))
        .or_else(|| equality_pair(message, position))
}

fn as_status(value: u32) -> Option<u16> {
    STATUS_RANGE.contains(&value).then_some(value as u16)
}

/// `expected 400, got 200` / `Expected status 400 but got 200`.
fn labeled_pair(message: &str) -> Option<(u16, u16)> {
    for line in message.lines() {
        let lower = line.to_ascii_lowercase();
        let Some(start) = lower.find("expected") else {
            continue;
        };
        let after = &lower[start + "expected".len()..];
        let Some((marker_at, marker_len)) = ACTUAL_MARKERS
            .iter()
            .filter_map(|m| after.find(m).map(|at| (at, m.len())))
            .min_by_key(|(at, _)| *at)
        else {
            continue;
        };
        let expected = first_int(&after[..marker_at]).and_then(as_status);
        let actual = first_int(&after[marker_at + marker_len..]).and_then(as_status);
        if let (Some(actual), Some(expected)) = (actual, expected) {
            return Some((actual, expected));
        }
    }
    None
}

/// Rust `assert_eq!` output with `left:` / `right:` lines.
fn left_right_pair(message: &str, position: ActualPosition) -> Option<(u16, u16)> {
    let side = |label: &str| {
        message.lines().find_map(|line| {
            let rest = line.trim().strip_prefix(label)?;
            let rest = rest.trim().trim_start_matches(['`', '"', '\'']);
            leading_int(rest).and_then(as_status)
        })
    };
    let left = side("left:")?;
    let right = side("right:")?;
    Some(order(left, right, position))
}

/// `assert 200 == 400` / `200 != 400`.
fn equality_pair(message: &str, position: ActualPosition) -> Option<(u16, u16)> {
    for line in message.lines() {
        for op in ["==", "!="] {
            let mut search_from = 0;
            while let Some(found) = line[search_from..].find(op) {
                let at = search_from + found;
                let left = trailing_int(&line[..at]).and_then(as_status);
                let right = leading_int(line[at + op.len()..].trim_start()).and_then(as_status);
                if let (Some(left), Some(right)) = (left, right) {
                    return Some(order(left, right, position));
                }
                search_from = at + op.len();
            }
        }
    }
    None
}

fn order(left: u16, right: u16, position: ActualPosition) -> (u16, u16) {
    match position {
        ActualPosition::Left => (left, right),
        ActualPosition::Right => (right, left),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Integer at the very start of `s`, not followed by more of a word.
fn leading_int(s: &str) -> Option<u32> {
    let digits = &s[..s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len())];
    let mut rest = s[digits.len()..].chars();
    let continues = match rest.next() {
        Some('.') => rest.next().is_some_and(|c| c.is_ascii_digit()),
        Some(c) => is_word_char(c),
        None => false,
    };
    if digits.is_empty() || continues {
        return None;
    }
    digits.parse().ok()
}

/// Integer at the very end of `s` (ignoring trailing spaces), not preceded by more of a word.
fn trailing_int(s: &str) -> Option<u32> {
    let s = s.trim_end();
    let start = s.len() - s.chars().rev().take_while(char::is_ascii_digit).count();
    let digits = &s[start..];
    let mut before = s[..start].chars().rev();
    let continues = match before.next() {
        Some('.') => before.next().is_some_and(|c| c.is_ascii_digit()),
        Some(c) => is_word_char(c),
        None => false,
    };
    if digits.is_empty() || continues {
        return None;
    }
    digits.parse().ok()
}

/// First standalone integer in `s`.
fn first_int(s: &str) -> Option<u32> {
    let mut prev_word = false;
    for (i, c) in s.char_indices() {
        if c.is_ascii_digit() && !prev_word {
            if let Some(value) = leading_int(&s[i..]) {
                return Some(value);
            }
        }
        prev_word = is_word_char(c);
    }
    None
}

/// Missing-key shapes: `KeyError: 'id'`, ``missing field `id` ``, `key 'id' not found`.
fn extract_missing_key(message: &str) -> Option<String> {
    for line in message.lines() {
        if let Some(at) = line.find("KeyError:") {
            if let Some((key, _)) = quoted_token(&line[at + "KeyError:".len()..]) {
                return Some(key);
            }
        }
        let lower = line.to_ascii_lowercase();
        if let Some(at) = lower.find("missing field") {
            if let Some((key, _)) = quoted_token(&line[at + "missing field".len()..]) {
                return Some(key);
            }
        }
        for prefix in ["no key", "key"] {
            for at in word_starts(&lower, prefix) {
                let Some((key, rest)) = quoted_token(&line[at + prefix.len()..]) else {
                    continue;
                };
                // Only the clause right after the key speaks about it.
                let clause = rest.split([',', ';']).next().unwrap_or_default();
                let rest = clause.to_ascii_lowercase();
                let absent = prefix == "no key"
                    || ["not found", "not present", "missing", "does not exist"]
                        .iter()
                        .any(|w| rest.contains(w));
                if absent {
                    return Some(key);
                }
            }
        }
    }
    None
}

/// Offsets of `word` in `haystack` that do not continue a preceding word.
fn word_starts<'a>(haystack: &'a str, word: &'a str) -> impl Iterator<Item = usize> + 'a {
    haystack
        .match_indices(word)
        .map(|(at, _)| at)
        .filter(move |&at| !haystack[..at].chars().next_back().is_some_and(is_word_char))
}

/// A quoted token at the start of `s` (after whitespace) and the text after it.
fn quoted_token(s: &str) -> Option<(String, &str)> {
    let s = s.trim_start();
    let quote = s.chars().next().filter(|c| matches!(c, '\'' | '"' | '`'))?;
    let inner = &s[quote.len_utf8()..];
    let end = inner.find(quote)?;
    let key = &inner[..end];
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), &inner[end + quote.len_utf8()..]))
}
