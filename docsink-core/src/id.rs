//! Anchor identifiers and link classification.
//!
//! [`encode_id`] turns arbitrary text (usually a section title) into a
//! fragment identifier. [`link_to_key`] produces a much lossier comparison key
//! for deduplicating links that point at the same place; the two are not
//! interchangeable and a key can never be decoded back into an id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Case handling for [`encode_id_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdCase {
    #[default]
    Preserve,
    Lower,
}

/// Characters kept as-is after the first position.
fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn is_id_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

/// Encode `raw` as an anchor id, preserving case.
///
/// Whitespace becomes `_`, other characters outside `[A-Za-z0-9-_.:]` are
/// dropped, and an `a` is prepended when the result would be empty or would
/// start with something other than a letter or underscore. Returns `None` for
/// blank input.
///
/// ```
/// use docsink_core::id::encode_id;
///
/// assert_eq!(encode_id("Title with anchor").as_deref(), Some("Title_with_anchor"));
/// assert_eq!(encode_id("1st step").as_deref(), Some("a1st_step"));
/// assert_eq!(encode_id("   "), None);
/// ```
pub fn encode_id(raw: &str) -> Option<String> {
    encode_id_with(raw, IdCase::Preserve)
}

/// Like [`encode_id`], but [`IdCase::Lower`] also folds ASCII letters to lower case.
pub fn encode_id_with(raw: &str, case: IdCase) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut id = String::with_capacity(trimmed.len() + 1);
    for c in trimmed.chars() {
        if c.is_whitespace() {
            id.push('_');
        } else if is_id_char(c) {
            match case {
                IdCase::Preserve => id.push(c),
                IdCase::Lower => id.push(c.to_ascii_lowercase()),
            }
        }
    }

    if !id.chars().next().is_some_and(is_id_start) {
        id.insert(0, 'a');
    }
    Some(id)
}

/// Whether `id` could have come out of [`encode_id`].
pub fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if is_id_start(first) => chars.all(is_id_char),
        _ => false,
    }
}

/// Reduce a link target or title to a lowercase alphanumeric key.
///
/// Lossy: `"Foo Bar"`, `"foo-bar"` and `"#FooBar"` all map to `"foobar"`.
pub fn link_to_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Lexical class of a link target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    External,
    Internal,
    Local,
}

const EXTERNAL_PREFIXES: &[&str] = &["http:/", "https:/", "ftp:/", "mailto:", "file:/"];

/// Classify a link target purely from its spelling.
pub fn classify_link(target: &str) -> LinkKind {
    if target.starts_with('#') {
        return LinkKind::Internal;
    }
    let lower = target.to_ascii_lowercase();
    if EXTERNAL_PREFIXES.iter().any(|p| lower.starts_with(p)) || lower.contains("://") {
        LinkKind::External
    } else {
        LinkKind::Local
    }
}

pub fn is_external_link(target: &str) -> bool {
    classify_link(target) == LinkKind::External
}

pub fn is_internal_link(target: &str) -> bool {
    classify_link(target) == LinkKind::Internal
}

pub fn is_local_link(target: &str) -> bool {
    classify_link(target) == LinkKind::Local
}

/// Hands out ids that are unique within one document.
///
/// The first request for a base id returns it unchanged; later requests get
/// `_1`, `_2`, ... appended.
#[derive(Debug, Default, Clone)]
pub struct UniqueIds {
    seen: HashMap<String, usize>,
}

impl UniqueIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `text` and make it unique. Blank text yields `None`.
    pub fn next_for(&mut self, text: &str) -> Option<String> {
        encode_id(text).map(|base| self.claim(base))
    }

    pub fn claim(&mut self, base: String) -> String {
        let Some(&next) = self.seen.get(&base) else {
            self.seen.insert(base.clone(), 1);
            return base;
        };
        let mut n = next;
        loop {
            let candidate = format!("{base}_{n}");
            n += 1;
            if !self.seen.contains_key(&candidate) {
                self.seen.insert(base, n);
                self.seen.insert(candidate.clone(), 1);
                return candidate;
            }
        }
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }
}
