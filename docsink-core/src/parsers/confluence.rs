//! Confluence wiki markup parser.

use crate::error::ParseError;
use crate::event::{EventKind, Justification, Numbering};
use crate::id::encode_id;
use crate::parser::{Emitter, ParseOptions, ParseReport, Parser, normalize_newlines};
use crate::sink::Sink;

use super::{ItemStyle, ListNesting, SectionStack};

pub struct ConfluenceParser;

impl Parser for ConfluenceParser {
    fn id(&self) -> &'static str {
        "confluence"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["confluence", "wiki"]
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
            let line = lines[i];
            if line.trim().is_empty() {
                i += 1;
                continue;
            }
            emitter.set_line(i + 1);
            i = match block_start(line) {
                Some(Block::Heading(level)) => {
                    let title = line.trim_start()[3..].trim();
                    sections.heading(&mut emitter, level, |e| inline(e, title))?;
                    i + 1
                }
                Some(Block::Figure) => figure(&mut emitter, &lines, i)?,
                Some(Block::Verbatim) => verbatim(&mut emitter, &lines, i)?,
                Some(Block::Admonition) => admonition(&mut emitter, &lines, i)?,
                Some(Block::Rule) => {
                    emitter.kind(EventKind::HorizontalRule)?;
                    i + 1
                }
                Some(Block::List) => list(&mut emitter, &lines, i)?,
                Some(Block::Table) => table(&mut emitter, &lines, i)?,
                None => paragraph(&mut emitter, &lines, i)?,
            };
        }

        sections.close_from(&mut emitter, 1)?;
        emitter.kind(EventKind::EndBody)?;
        emitter.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Heading(u8),
    Figure,
    Verbatim,
    Admonition,
    Rule,
    List,
    Table,
}

const ADMONITIONS: [&str; 4] = ["{note", "{tip", "{info", "{quote"];

fn block_start(line: &str) -> Option<Block> {
    let trimmed = line.trim_start();
    let b = trimmed.as_bytes();
    if b.len() >= 3 && b[0] == b'h' && (b'1'..=b'5').contains(&b[1]) && b[2] == b'.' {
        return Some(Block::Heading(b[1] - b'0'));
    }
    if trimmed.starts_with('!') && trimmed.rfind('!').is_some_and(|end| end > 1) {
        return Some(Block::Figure);
    }
    if trimmed.starts_with("{code") || trimmed.starts_with("{noformat}") {
        return Some(Block::Verbatim);
    }
    if ADMONITIONS.iter().any(|a| trimmed.starts_with(a)) {
        return Some(Block::Admonition);
    }
    let rule = trimmed.trim_end();
    if rule.len() >= 4 && rule.chars().all(|c| c == '-') {
        return Some(Block::Rule);
    }
    if is_list(trimmed) {
        return Some(Block::List);
    }
    if trimmed.starts_with('|') {
        return Some(Block::Table);
    }
    None
}

/// `*`, `-` or `#` markers followed by a space.
fn is_list(line: &str) -> bool {
    let rest = line.trim_start_matches(['*', '-', '#']);
    rest.len() < line.len() && rest.starts_with(' ')
}

/// Lines from `start` up to the next blank line, trimmed and joined with
/// spaces, and the index after them.
fn until_blank(lines: &[&str], start: usize) -> (String, usize) {
    let mut text = String::new();
    let mut i = start;
    while i < lines.len() && !lines[i].trim().is_empty() {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(lines[i].trim());
        i += 1;
    }
    (text, i)
}

fn paragraph(emitter: &mut Emitter<'_>, lines: &[&str], start: usize) -> Result<usize, ParseError> {
    let mut text = String::new();
    let mut i = start;
    while i < lines.len() && !lines[i].trim().is_empty() {
        if i > start
            && matches!(
                block_start(lines[i]),
                Some(Block::Heading(_) | Block::Figure | Block::List | Block::Table)
            )
        {
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

/// `!image.png|options!` with an optional caption after it.
fn figure(emitter: &mut Emitter<'_>, lines: &[&str], start: usize) -> Result<usize, ParseError> {
    let line = lines[start].trim();
    let end = line.rfind('!').unwrap_or(line.len());
    let image = &line[1..end];
    let image = image.split('|').next().unwrap_or(image);

    let rest = line[end + 1..].trim();
    let rest = rest.strip_prefix("\\\\").unwrap_or(rest);
    let (more, next) = until_blank(lines, start + 1);
    let caption = [rest, more.as_str()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    emitter.kind(EventKind::StartFigure)?;
    emitter.kind(EventKind::FigureGraphics(image.trim().to_string()))?;
    if !caption.trim().is_empty() {
        emitter.kind(EventKind::StartFigureCaption)?;
        inline(emitter, caption.trim())?;
        emitter.kind(EventKind::EndFigureCaption)?;
    }
    emitter.kind(EventKind::EndFigure)?;
    Ok(next)
}

/// `{code}` (boxed) or `{noformat}` up to the matching closing line.
fn verbatim(emitter: &mut Emitter<'_>, lines: &[&str], start: usize) -> Result<usize, ParseError> {
    let boxed = lines[start].trim_start().starts_with("{code");
    let mut text = String::new();
    let mut i = start + 1;
    while i < lines.len() {
        let line = lines[i];
        i += 1;
        let trimmed = line.trim_start();
        if trimmed.starts_with("{code}") || trimmed.starts_with("{noformat}") {
            break;
        }
        text.push_str(line);
        text.push('\n');
    }
    emitter.kind(EventKind::StartVerbatim { boxed })?;
    emitter.text(&text)?;
    emitter.kind(EventKind::EndVerbatim)?;
    Ok(i)
}

/// `{note:title=...}` .. `{note}` becomes a one-item definition list.
fn admonition(emitter: &mut Emitter<'_>, lines: &[&str], start: usize) -> Result<usize, ParseError> {
    let mut title = String::new();
    let mut i = start;
    if let Some(pos) = lines[start].find("title=") {
        let mut line = &lines[start][pos + 6..];
        loop {
            match line.find('}') {
                Some(end) => {
                    push_word(&mut title, &line[..end]);
                    break;
                }
                None => {
                    push_word(&mut title, line);
                    i += 1;
                    match lines.get(i) {
                        Some(next) => line = next,
                        None => break,
                    }
                }
            }
        }
    }

    let mut text = String::new();
    i += 1;
    while i < lines.len() {
        let line = lines[i];
        i += 1;
        if ADMONITIONS.iter().any(|a| line.trim_start().starts_with(a)) {
            break;
        }
        push_word(&mut text, line);
    }

    emitter.kind(EventKind::StartDefinitionList)?;
    emitter.kind(EventKind::StartDefinitionListItem)?;
    emitter.kind(EventKind::StartDefinedTerm)?;
    inline(emitter, &title)?;
    emitter.kind(EventKind::EndDefinedTerm)?;
    emitter.kind(EventKind::StartDefinition)?;
    inline(emitter, &text)?;
    emitter.kind(EventKind::EndDefinition)?;
    emitter.kind(EventKind::EndDefinitionListItem)?;
    emitter.kind(EventKind::EndDefinitionList)?;
    Ok(i)
}

fn push_word(buffer: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(text);
}

/// `*`/`-` bullets and `#` numbers; the marker count is the depth. Lines
/// that do not start a new item continue the previous one.
fn list(emitter: &mut Emitter<'_>, lines: &[&str], start: usize) -> Result<usize, ParseError> {
    let mut items: Vec<String> = Vec::new();
    let mut i = start;
    while i < lines.len() && !lines[i].trim().is_empty() {
        let line = lines[i].trim();
        match items.last_mut() {
            Some(last) if !is_list(line) => {
                last.push(' ');
                last.push_str(line);
            }
            _ => items.push(line.to_string()),
        }
        i += 1;
    }

    let mut lists = ListNesting::default();
    for item in &items {
        let depth = item
            .chars()
            .take_while(|c| matches!(c, '*' | '-' | '#'))
            .count();
        let style = match item[..depth].chars().last() {
            Some('#') => ItemStyle::Numbered(Numbering::Decimal),
            _ => ItemStyle::Bullet,
        };
        lists.item(emitter, depth, style)?;
        inline(emitter, item[depth..].trim())?;
    }
    lists.close_all(emitter)?;
    Ok(i)
}

/// `||head||head||` and `|cell|cell|` rows.
fn table(emitter: &mut Emitter<'_>, lines: &[&str], start: usize) -> Result<usize, ParseError> {
    let mut rows: Vec<(bool, Vec<String>)> = Vec::new();
    let mut i = start;
    while i < lines.len() && lines[i].trim_start().starts_with('|') {
        let line = lines[i].trim();
        if line.starts_with("||") {
            let cells = line
                .trim_matches('|')
                .split("||")
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
            rows.push((true, cells));
        } else {
            let line = &line[..line.rfind('|').unwrap_or(line.len())];
            rows.push((false, split_cells(line)));
        }
        i += 1;
    }

    let columns = rows.iter().map(|(_, cells)| cells.len()).max().unwrap_or(0);
    emitter.kind(EventKind::StartTable)?;
    emitter.kind(EventKind::StartTableRows {
        justification: vec![Justification::Left; columns],
        grid: true,
    })?;
    for (header, cells) in rows {
        emitter.kind(EventKind::StartTableRow)?;
        for cell in cells {
            emitter.kind(EventKind::StartTableCell {
                header,
                justification: None,
            })?;
            inline(emitter, cell.trim())?;
            emitter.kind(EventKind::EndTableCell)?;
        }
        emitter.kind(EventKind::EndTableRow)?;
    }
    emitter.kind(EventKind::EndTableRows)?;
    emitter.kind(EventKind::EndTable)?;
    Ok(i)
}

/// Split on `|`, keeping `[text|link]` together.
fn split_cells(line: &str) -> Vec<String> {
    let mut cells: Vec<String> = Vec::new();
    let mut pieces = line.split('|').filter(|p| !p.is_empty()).peekable();
    while let Some(piece) = pieces.next() {
        let opens_link = piece.contains('[') && !piece.contains(']');
        match pieces.peek() {
            Some(next) if opens_link => {
                cells.push(format!("{piece}|{next}"));
                pieces.next();
            }
            _ => cells.push(piece.to_string()),
        }
    }
    cells
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

/// `*bold*`, `_italic_`, `{{mono}}`, `[text|link]`, `{anchor:id}` and `\\`
/// line breaks. Spans still open at the end of the text are closed.
fn scan_inline(text: &str) -> Vec<EventKind> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut buffer = String::new();
    let (mut bold, mut italic, mut monospaced) = (false, false, false);

    fn flush(out: &mut Vec<EventKind>, buffer: &mut String) {
        if !buffer.is_empty() {
            out.push(EventKind::Text(std::mem::take(buffer)));
        }
    }

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let prev = i.checked_sub(1).map(|p| chars[p]);
        let opens = next.is_some_and(|n| !n.is_whitespace())
            && !prev.is_some_and(char::is_alphanumeric);

        match c {
            '*' if bold => {
                flush(&mut out, &mut buffer);
                out.push(EventKind::EndBold);
                bold = false;
            }
            '*' if opens => {
                flush(&mut out, &mut buffer);
                out.push(EventKind::StartBold);
                bold = true;
            }
            '_' if italic => {
                flush(&mut out, &mut buffer);
                out.push(EventKind::EndItalic);
                italic = false;
            }
            '_' if opens => {
                flush(&mut out, &mut buffer);
                out.push(EventKind::StartItalic);
                italic = true;
            }
            '{' if next == Some('{') => {
                flush(&mut out, &mut buffer);
                out.push(EventKind::StartMonospaced);
                monospaced = true;
                i += 2;
                continue;
            }
            '}' if monospaced && next == Some('}') => {
                flush(&mut out, &mut buffer);
                out.push(EventKind::EndMonospaced);
                monospaced = false;
                i += 2;
                continue;
            }
            '[' | '{' => {
                let close = if c == '[' { ']' } else { '}' };
                let Some(len) = chars[i + 1..].iter().position(|&ch| ch == close) else {
                    buffer.push(c);
                    i += 1;
                    continue;
                };
                let inner: String = chars[i + 1..i + 1 + len].iter().collect();
                if c == '[' {
                    flush(&mut out, &mut buffer);
                    link(&mut out, &inner);
                } else if let Some(id) = inner.strip_prefix("anchor:").and_then(encode_id) {
                    flush(&mut out, &mut buffer);
                    out.push(EventKind::StartAnchor(id));
                    out.push(EventKind::EndAnchor);
                } else {
                    buffer.push('{');
                    buffer.push_str(&inner);
                    buffer.push('}');
                }
                i += len + 2;
                continue;
            }
            '\\' if next == Some('\\') => {
                flush(&mut out, &mut buffer);
                out.push(EventKind::LineBreak);
                i += 2;
                continue;
            }
            '\\' => {
                if let Some(escaped) = next {
                    buffer.push(escaped);
                    i += 2;
                    continue;
                }
                buffer.push('\\');
            }
            _ => buffer.push(c),
        }
        i += 1;
    }

    flush(&mut out, &mut buffer);
    if monospaced {
        out.push(EventKind::EndMonospaced);
    }
    if italic {
        out.push(EventKind::EndItalic);
    }
    if bold {
        out.push(EventKind::EndBold);
    }
    out
}

/// `[text|target]`, or `[target]` shown without a leading `#`.
fn link(out: &mut Vec<EventKind>, inner: &str) {
    let (text, target) = match inner.split_once('|') {
        Some((text, target)) if !text.is_empty() => (text.trim(), target.trim()),
        _ => (inner.trim().trim_start_matches('#'), inner.trim()),
    };
    out.push(EventKind::StartLink(target.to_string()));
    if !text.is_empty() {
        out.push(EventKind::Text(text.to_string()));
    }
    out.push(EventKind::EndLink);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::EventCollector;
    use pretty_assertions::assert_eq;

    fn body(input: &str) -> Vec<EventKind> {
        let mut sink = EventCollector::new();
        ConfluenceParser
            .parse(input, &mut sink, &ParseOptions::strict())
            .unwrap();
        let events: Vec<EventKind> = sink.into_events().into_iter().map(|e| e.kind).collect();
        events[3..events.len() - 1].to_vec()
    }

    fn text(s: &str) -> EventKind {
        EventKind::Text(s.into())
    }

    #[test]
    fn headings_nest_sections() {
        use EventKind::*;
        assert_eq!(
            body("h1. Top\n\nIntro text\nmore\n\nh2. Sub\n"),
            vec![
                StartSection(1),
                StartSectionTitle(1),
                text("Top"),
                EndSectionTitle(1),
                StartParagraph,
                text("Intro text more"),
                EndParagraph,
                StartSection(2),
                StartSectionTitle(2),
                text("Sub"),
                EndSectionTitle(2),
                EndSection(2),
                EndSection(1),
            ]
        );
    }

    #[test]
    fn inline_spans_links_and_anchors() {
        use EventKind::*;
        assert_eq!(
            scan_inline("*b* _i_ {{m}} [Site|http://x.org] {anchor:top} snake_case\\\\end"),
            vec![
                StartBold,
                text("b"),
                EndBold,
                text(" "),
                StartItalic,
                text("i"),
                EndItalic,
                text(" "),
                StartMonospaced,
                text("m"),
                EndMonospaced,
                text(" "),
                StartLink("http://x.org".into()),
                text("Site"),
                EndLink,
                text(" "),
                StartAnchor("top".into()),
                EndAnchor,
                text(" snake_case"),
                LineBreak,
                text("end"),
            ]
        );
    }

    #[test]
    fn unknown_braces_stay_literal() {
        assert_eq!(scan_inline("{toc}"), vec![text("{toc}")]);
        assert_eq!(
            scan_inline("[#local]"),
            vec![
                EventKind::StartLink("#local".into()),
                text("local"),
                EventKind::EndLink
            ]
        );
    }

    #[test]
    fn nested_lists_from_markers() {
        use EventKind::*;
        assert_eq!(
            body("* one\n** one.a\n# numbered\n"),
            vec![
                StartList,
                StartListItem,
                text("one"),
                StartList,
                StartListItem,
                text("one.a"),
                EndListItem,
                EndList,
                EndListItem,
                StartListItem,
                text("numbered"),
                EndListItem,
                EndList,
            ]
        );
    }

    #[test]
    fn tables_with_header_row() {
        use EventKind::*;
        let cell = |header| StartTableCell {
            header,
            justification: None,
        };
        assert_eq!(
            body("||A||B||\n|1|[x|http://y]|\n"),
            vec![
                StartTable,
                StartTableRows {
                    justification: vec![Justification::Left; 2],
                    grid: true
                },
                StartTableRow,
                cell(true),
                text("A"),
                EndTableCell,
                cell(true),
                text("B"),
                EndTableCell,
                EndTableRow,
                StartTableRow,
                cell(false),
                text("1"),
                EndTableCell,
                cell(false),
                StartLink("http://y".into()),
                text("x"),
                EndLink,
                EndTableCell,
                EndTableRow,
                EndTableRows,
                EndTable,
            ]
        );
    }

    #[test]
    fn code_and_noformat_blocks() {
        use EventKind::*;
        assert_eq!(
            body("{code}\nlet *x* = 1;\n{code}\n\n{noformat}\nplain\n{noformat}\n"),
            vec![
                StartVerbatim { boxed: true },
                text("let *x* = 1;\n"),
                EndVerbatim,
                StartVerbatim { boxed: false },
                text("plain\n"),
                EndVerbatim,
            ]
        );
    }

    #[test]
    fn figures_rules_and_admonitions() {
        use EventKind::*;
        assert_eq!(
            body("!logo.png|width=10! The logo\n\n----\n\n{note:title=Careful}\nMind the gap.\n{note}\n"),
            vec![
                StartFigure,
                FigureGraphics("logo.png".into()),
                StartFigureCaption,
                text("The logo"),
                EndFigureCaption,
                EndFigure,
                HorizontalRule,
                StartDefinitionList,
                StartDefinitionListItem,
                StartDefinedTerm,
                text("Careful"),
                EndDefinedTerm,
                StartDefinition,
                text("Mind the gap."),
                EndDefinition,
                EndDefinitionListItem,
                EndDefinitionList,
            ]
        );
    }
}
