//! TWiki markup parser.
//!
//! Blocks are recognised line by line; inline text understands TWiki's
//! WikiWord auto-linking, which resolves `SomePage` to `./SomePage.html`.

use crate::error::ParseError;
use crate::event::{EventKind, Justification, Numbering};
use crate::id::is_external_link;
use crate::parser::{Emitter, ParseOptions, ParseReport, Parser, normalize_newlines};
use crate::sink::Sink;

use super::{ItemStyle, ListNesting, SectionStack};

const INDENT: usize = 3;

pub struct TwikiParser;

impl Parser for TwikiParser {
    fn id(&self) -> &'static str {
        "twiki"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["twiki"]
    }

    fn parse(
        &self,
        input: &str,
        sink: &mut dyn Sink,
        options: &ParseOptions,
    ) -> Result<ParseReport, ParseError> {
        let source = normalize_newlines(input);
        let lines: Vec<&str> = source.lines().collect();
        let mut emitter = Emitter::new(sink, options);
        let mut sections = SectionStack::default();

        emitter.kind(EventKind::StartHead)?;
        emitter.kind(EventKind::EndHead)?;
        emitter.kind(EventKind::StartBody)?;

        let mut i = 0;
        while i < lines.len() {
            if lines[i].trim().is_empty() {
                i += 1;
                continue;
            }
            emitter.set_line(i + 1);
            i = match classify(lines[i]) {
                Line::Heading(level, title) => {
                    sections.heading(&mut emitter, level, |e| inline(e, title))?;
                    i + 1
                }
                Line::Rule => {
                    emitter.kind(EventKind::HorizontalRule)?;
                    i + 1
                }
                Line::Verbatim => verbatim(&mut emitter, &lines, i)?,
                Line::Table => table(&mut emitter, &lines, i)?,
                Line::ListItem(..) => list(&mut emitter, &lines, i)?,
                Line::Definition(..) => definitions(&mut emitter, &lines, i)?,
                Line::Text => paragraph(&mut emitter, &lines, i)?,
            };
        }

        sections.close_from(&mut emitter, 1)?;
        emitter.kind(EventKind::EndBody)?;
        emitter.finish()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Heading(u8, &'a str),
    Rule,
    Verbatim,
    Table,
    ListItem(usize, ItemStyle, &'a str),
    Definition(&'a str, &'a str),
    Text,
}

fn classify(line: &str) -> Line<'_> {
    if let Some(rest) = line.strip_prefix("---") {
        let pluses = rest.chars().take_while(|&c| c == '+').count();
        if pluses > 0 {
            let title = rest[pluses..].trim();
            let title = title.strip_prefix("!!").unwrap_or(title).trim();
            return Line::Heading(pluses.min(5) as u8, title);
        }
        if rest.trim_end().chars().all(|c| c == '-') {
            return Line::Rule;
        }
    }
    let trimmed = line.trim_start();
    if trimmed.starts_with("<verbatim>") {
        return Line::Verbatim;
    }
    if trimmed.starts_with('|') {
        return Line::Table;
    }

    let spaces = line.len() - trimmed.len();
    if spaces == 0 || spaces % INDENT != 0 || !line[..spaces].bytes().all(|b| b == b' ') {
        return Line::Text;
    }
    let depth = spaces / INDENT;
    if let Some(text) = trimmed.strip_prefix("* ") {
        return Line::ListItem(depth, ItemStyle::Bullet, text);
    }
    if let Some((marker, text)) = trimmed.split_once(". ") {
        if let Some(numbering) = numbering(marker) {
            return Line::ListItem(depth, ItemStyle::Numbered(numbering), text);
        }
    }
    if let Some(rest) = trimmed.strip_prefix("$ ") {
        if let Some((term, definition)) = rest.split_once(':') {
            return Line::Definition(term.trim(), definition.trim());
        }
    }
    Line::Text
}

fn numbering(marker: &str) -> Option<Numbering> {
    match marker {
        "a" => Some(Numbering::LowerAlpha),
        "A" => Some(Numbering::UpperAlpha),
        "i" => Some(Numbering::LowerRoman),
        "I" => Some(Numbering::UpperRoman),
        m if !m.is_empty() && m.bytes().all(|b| b.is_ascii_digit()) => Some(Numbering::Decimal),
        _ => None,
    }
}

fn paragraph(emitter: &mut Emitter<'_>, lines: &[&str], start: usize) -> Result<usize, ParseError> {
    let mut text = String::new();
    let mut i = start;
    while i < lines.len() && !lines[i].trim().is_empty() {
        if i > start && classify(lines[i]) != Line::Text {
            break;
        }
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(lines[i].trim());
        i += 1;
    }
    emitter.kind(EventKind::StartParagraph)?;
    inline(emitter, &text)?;
    emitter.kind(EventKind::EndParagraph)?;
    Ok(i)
}

fn verbatim(emitter: &mut Emitter<'_>, lines: &[&str], start: usize) -> Result<usize, ParseError> {
    let mut text = String::new();
    let first = lines[start].trim_start();
    let mut i = start;
    let mut line = &first["<verbatim>".len()..];
    loop {
        if let Some(end) = line.find("</verbatim>") {
            text.push_str(&line[..end]);
            i += 1;
            break;
        }
        if i > start || !line.is_empty() {
            text.push_str(line);
            text.push('\n');
        }
        i += 1;
        match lines.get(i) {
            Some(next) => line = next,
            None => break,
        }
    }
    emitter.kind(EventKind::StartVerbatim { boxed: false })?;
    emitter.text(&text)?;
    emitter.kind(EventKind::EndVerbatim)?;
    Ok(i)
}

/// `| *Head* | cell |`; two spaces of padding on one side align the cell.
fn table(emitter: &mut Emitter<'_>, lines: &[&str], start: usize) -> Result<usize, ParseError> {
    let mut rows: Vec<Vec<&str>> = Vec::new();
    let mut i = start;
    while i < lines.len() && lines[i].trim_start().starts_with('|') {
        let row = lines[i].trim();
        let row = row.strip_prefix('|').unwrap_or(row);
        let row = row.strip_suffix('|').unwrap_or(row);
        rows.push(row.split('|').collect());
        i += 1;
    }

    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    emitter.kind(EventKind::StartTable)?;
    emitter.kind(EventKind::StartTableRows {
        justification: vec![Justification::Left; columns],
        grid: true,
    })?;
    for row in rows {
        emitter.kind(EventKind::StartTableRow)?;
        for raw in row {
            let content = raw.trim();
            let header_text = content
                .strip_prefix('*')
                .and_then(|c| c.strip_suffix('*'))
                .filter(|c| !c.is_empty());
            emitter.kind(EventKind::StartTableCell {
                header: header_text.is_some(),
                justification: cell_alignment(raw),
            })?;
            inline(emitter, header_text.unwrap_or(content).trim())?;
            emitter.kind(EventKind::EndTableCell)?;
        }
        emitter.kind(EventKind::EndTableRow)?;
    }
    emitter.kind(EventKind::EndTableRows)?;
    emitter.kind(EventKind::EndTable)?;
    Ok(i)
}

fn cell_alignment(raw: &str) -> Option<Justification> {
    let leading = raw.len() - raw.trim_start().len();
    let trailing = raw.len() - raw.trim_end().len();
    if raw.trim().is_empty() {
        return None;
    }
    match (leading >= 2, trailing >= 2) {
        (true, true) => Some(Justification::Center),
        (true, false) => Some(Justification::Right),
        _ => None,
    }
}

fn list(emitter: &mut Emitter<'_>, lines: &[&str], start: usize) -> Result<usize, ParseError> {
    let mut lists = ListNesting::default();
    let mut i = start;
    while let Some(line) = lines.get(i) {
        let Line::ListItem(depth, style, text) = classify(line) else {
            break;
        };
        lists.item(emitter, depth, style)?;
        inline(emitter, text.trim())?;
        i += 1;
    }
    lists.close_all(emitter)?;
    Ok(i)
}

/// `   $ term: definition`
fn definitions(emitter: &mut Emitter<'_>, lines: &[&str], start: usize) -> Result<usize, ParseError> {
    emitter.kind(EventKind::StartDefinitionList)?;
    let mut i = start;
    while let Some(line) = lines.get(i) {
        let Line::Definition(term, definition) = classify(line) else {
            break;
        };
        emitter.kind(EventKind::StartDefinitionListItem)?;
        emitter.kind(EventKind::StartDefinedTerm)?;
        inline(emitter, term)?;
        emitter.kind(EventKind::EndDefinedTerm)?;
        emitter.kind(EventKind::StartDefinition)?;
        inline(emitter, definition)?;
        emitter.kind(EventKind::EndDefinition)?;
        emitter.kind(EventKind::EndDefinitionListItem)?;
        i += 1;
    }
    emitter.kind(EventKind::EndDefinitionList)?;
    Ok(i)
}

// ---------------------------------------------------------------------------
// Inline markup
// ---------------------------------------------------------------------------

fn inline(emitter: &mut Emitter<'_>, text: &str) -> Result<(), ParseError> {
    for kind in scan_inline(text) {
        match kind {
            EventKind::Text(text) => emitter.text(&text)?,
            other => emitter.kind(other)?,
        }
    }
    Ok(())
}

fn scan_inline(text: &str) -> Vec<EventKind> {
    let chars: Vec<char> = text.chars().collect();
    let mut scanner = InlineScanner::default();
    scanner.scan(&chars);
    scanner.flush();
    scanner.out
}

/// Two-character markers come first so `__` is not read as `_`.
const FORMATS: [(&str, &[Span]); 5] = [
    ("__", &[Span::Bold, Span::Italic]),
    ("==", &[Span::Bold, Span::Monospaced]),
    ("*", &[Span::Bold]),
    ("_", &[Span::Italic]),
    ("=", &[Span::Monospaced]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Bold,
    Italic,
    Monospaced,
}

impl Span {
    fn start(self) -> EventKind {
        match self {
            Span::Bold => EventKind::StartBold,
            Span::Italic => EventKind::StartItalic,
            Span::Monospaced => EventKind::StartMonospaced,
        }
    }

    fn end(self) -> EventKind {
        match self {
            Span::Bold => EventKind::EndBold,
            Span::Italic => EventKind::EndItalic,
            Span::Monospaced => EventKind::EndMonospaced,
        }
    }
}

#[derive(Default)]
struct InlineScanner {
    out: Vec<EventKind>,
    buffer: String,
}

impl InlineScanner {
    fn scan(&mut self, chars: &[char]) {
        let mut i = 0;
        while i < chars.len() {
            let word_start = i == 0 || !is_word(chars[i - 1]);
            if word_start {
                if let Some(consumed) = self.markup(&chars[i..]) {
                    i += consumed;
                    continue;
                }
            }
            self.buffer.push(chars[i]);
            i += 1;
        }
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            self.out.push(EventKind::Text(std::mem::take(&mut self.buffer)));
        }
    }

    fn push(&mut self, kind: EventKind) {
        self.flush();
        self.out.push(kind);
    }

    fn link(&mut self, target: String, text: &str) {
        self.push(EventKind::StartLink(target));
        self.buffer.push_str(text);
        self.push(EventKind::EndLink);
    }

    /// Markup starting at a word boundary; returns the characters consumed.
    fn markup(&mut self, rest: &[char]) -> Option<usize> {
        match rest[0] {
            '[' if rest.get(1) == Some(&'[') => self.bracket_link(rest),
            '!' => {
                let len = wiki_word_len(&rest[1..])?;
                self.buffer.extend(&rest[1..=len]);
                Some(len + 1)
            }
            '#' => {
                let len = rest[1..].iter().take_while(|c| c.is_ascii_alphabetic()).count();
                let name: String = rest[1..=len].iter().collect();
                let capitals = name.chars().filter(char::is_ascii_uppercase).count();
                if !name.starts_with(|c: char| c.is_ascii_uppercase()) || capitals < 2 {
                    return None;
                }
                self.push(EventKind::StartAnchor(name));
                self.push(EventKind::EndAnchor);
                Some(len + 1)
            }
            c if c.is_ascii_uppercase() => match wiki_word_len(rest) {
                Some(len) => {
                    let word: String = rest[..len].iter().collect();
                    self.link(resolve_wiki_word(&word), &word);
                    Some(len)
                }
                None => self.url(rest),
            },
            c if c.is_ascii_alphanumeric() => self.url(rest),
            '*' | '_' | '=' => self.format(rest),
            _ => None,
        }
    }

    /// `[[target][text]]`, or `[[Some words]]` linking to `SomeWords`.
    fn bracket_link(&mut self, rest: &[char]) -> Option<usize> {
        let close = (2..rest.len().saturating_sub(1)).find(|&k| rest[k] == ']' && rest[k + 1] == ']')?;
        let inner: String = rest[2..close].iter().collect();
        match inner.split_once("][") {
            Some((target, text)) => self.link(target.to_string(), text),
            None if is_external_link(&inner) => self.link(inner.clone(), &inner),
            None => {
                let word: String = inner
                    .split_whitespace()
                    .map(|w| {
                        let mut chars = w.chars();
                        chars
                            .next()
                            .map(|first| first.to_uppercase().chain(chars).collect::<String>())
                            .unwrap_or_default()
                    })
                    .collect();
                self.link(resolve_wiki_word(&word), &inner);
            }
        }
        Some(close + 2)
    }

    fn url(&mut self, rest: &[char]) -> Option<usize> {
        let scheme = rest.iter().take_while(|c| c.is_ascii_alphanumeric()).count();
        let after: String = rest[scheme..].iter().take(3).collect();
        if scheme == 0 || after != "://" {
            return None;
        }
        let len = rest.iter().take_while(|c| !c.is_whitespace()).count();
        let url: String = rest[..len].iter().collect();
        self.link(url.clone(), &url);
        Some(len)
    }

    /// `*bold*`, `_italic_`, `=mono=`, `__bold italic__`, `==bold mono==`.
    fn format(&mut self, rest: &[char]) -> Option<usize> {
        for (marker, spans) in FORMATS {
            let m: Vec<char> = marker.chars().collect();
            if !rest.starts_with(&m) || rest.get(m.len()).is_none_or(|c| c.is_whitespace()) {
                continue;
            }
            let Some(close) = (m.len() + 1..rest.len()).find(|&k| {
                rest[k..].starts_with(&m)
                    && !rest[k - 1].is_whitespace()
                    && rest.get(k + m.len()).is_none_or(|&c| !is_word(c) && !m.contains(&c))
            }) else {
                continue;
            };
            for span in spans {
                self.push(span.start());
            }
            let inner = &rest[m.len()..close];
            if spans.contains(&Span::Monospaced) {
                self.buffer.extend(inner);
            } else {
                self.scan(inner);
            }
            for span in spans.iter().rev() {
                self.push(span.end());
            }
            return Some(close + m.len());
        }
        None
    }
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Length of a `WikiWord` (two or more capitalised humps, optionally with
/// a `#anchor`) at the start of `chars`.
fn wiki_word_len(chars: &[char]) -> Option<usize> {
    let mut k = 0;
    let mut humps = 0;
    while k < chars.len() && chars[k].is_ascii_uppercase() {
        let lower = chars[k + 1..]
            .iter()
            .take_while(|c| c.is_ascii_lowercase())
            .count();
        if lower == 0 {
            break;
        }
        k += 1 + lower;
        humps += 1;
    }
    if humps < 2 || chars.get(k).is_some_and(|c| c.is_alphanumeric()) {
        return None;
    }
    if chars.get(k) == Some(&'#') {
        k += 1 + chars[k + 1..].iter().take_while(|&&c| is_word(c)).count();
    }
    Some(k)
}

fn resolve_wiki_word(word: &str) -> String {
    match word.split_once('#') {
        Some((page, anchor)) => format!("./{page}.html#{anchor}"),
        None => format!("./{word}.html"),
    }
}
