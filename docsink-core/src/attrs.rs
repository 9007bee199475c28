use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::Justification;

/// Well-known attribute names. Sinks ignore any key they do not recognise.
pub mod keys {
    pub const ALIGN: &str = "align";
    pub const ALT: &str = "alt";
    pub const CLASS: &str = "class";
    pub const DECORATION: &str = "decoration";
    pub const ID: &str = "id";
    pub const LANG: &str = "lang";
    pub const SEMANTICS: &str = "semantics";
    pub const STYLE: &str = "style";
    pub const TITLE: &str = "title";
    pub const VALIGN: &str = "valign";
    pub const WIDTH: &str = "width";
}

/// Well-known attribute values.
pub mod values {
    pub const BOXED: &str = "boxed";
    pub const UNDERLINE: &str = "underline";
    pub const LINE_THROUGH: &str = "line-through";
    pub const SUB: &str = "sub";
    pub const SUP: &str = "sup";
    pub const BOLD: &str = "bold";
    pub const ITALIC: &str = "italic";
    pub const CODE: &str = "code";
}

/// Optional rendering hints attached to an event.
///
/// Keys are unique and iteration order is sorted, so two sets with the same
/// entries compare equal no matter how they were built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSet(BTreeMap<String, String>);

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Whether `key` is present with exactly `value`.
    pub fn has(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy every entry of `other` into `self`, overwriting on conflict.
    pub fn merge(&mut self, other: &AttributeSet) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn boxed() -> Self {
        Self::new().with(keys::DECORATION, values::BOXED)
    }

    pub fn underline() -> Self {
        Self::new().with(keys::DECORATION, values::UNDERLINE)
    }

    pub fn strikethrough() -> Self {
        Self::new().with(keys::DECORATION, values::LINE_THROUGH)
    }

    pub fn subscript() -> Self {
        Self::new().with(keys::VALIGN, values::SUB)
    }

    pub fn superscript() -> Self {
        Self::new().with(keys::VALIGN, values::SUP)
    }

    pub fn semantics(value: &str) -> Self {
        Self::new().with(keys::SEMANTICS, value)
    }

    pub fn align(justification: Justification) -> Self {
        Self::new().with(keys::ALIGN, justification.as_str())
    }

    /// The `align` hint, if it names a known justification.
    pub fn justification(&self) -> Option<Justification> {
        self.get(keys::ALIGN).and_then(Justification::parse)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("missing '=' after parameter '{key}'")]
    MissingEquals { key: String, position: usize },

    #[error("empty parameter name at position {position}")]
    EmptyKey { position: usize },
}

/// Parse a `key=value` list separated by `separator`.
///
/// A backslash escapes `=`, the separator, and itself; any other backslash
/// is kept literally. Keys are trimmed, values are not.
///
///   - `name=value|other=x\|y` with `|` gives `{name: "value", other: "x|y"}`
pub fn parse_params(input: &str, separator: char) -> Result<AttributeSet, ParamError> {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut pos = 0;
    let mut params = AttributeSet::new();

    while pos < len {
        let key_start = pos;
        let mut key = String::new();
        let mut found_equals = false;
        while pos < len {
            let c = chars[pos];
            if c == '\\' && pos + 1 < len && is_escapable(chars[pos + 1], separator) {
                key.push(chars[pos + 1]);
                pos += 2;
            } else if c == '=' {
                found_equals = true;
                pos += 1; // consume `=`
                break;
            } else if c == separator {
                break;
            } else {
                key.push(c);
                pos += 1;
            }
        }

        let key = key.trim().to_string();
        if !found_equals {
            if key.is_empty() && pos < len {
                // Stray separator, e.g. a trailing `|`.
                pos += 1;
                continue;
            }
            if key.is_empty() {
                break;
            }
            return Err(ParamError::MissingEquals {
                key,
                position: key_start,
            });
        }
        if key.is_empty() {
            return Err(ParamError::EmptyKey { position: key_start });
        }

        let mut value = String::new();
        while pos < len {
            let c = chars[pos];
            if c == '\\' && pos + 1 < len && is_escapable(chars[pos + 1], separator) {
                value.push(chars[pos + 1]);
                pos += 2;
            } else if c == separator {
                pos += 1; // consume separator
                break;
            } else {
                value.push(c);
                pos += 1;
            }
        }
        params.insert(key, value);
    }

    Ok(params)
}

fn is_escapable(c: char, separator: char) -> bool {
    c == '=' || c == '\\' || c == separator
}
