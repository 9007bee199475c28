//! APT ("Almost Plain Text") parser.
//!
//! APT is line oriented: the source is cut into blocks separated by blank
//! lines, each block is classified by its first character and indentation,
//! and the block text is then scanned for inline markup.

use crate::attrs::parse_params;
use crate::error::ParseError;
use crate::event::{EventKind, Justification, Numbering};
use crate::id::{encode_id, is_external_link, is_valid_id};
use crate::parser::{Emitter, ParseOptions, ParseReport, Parser, normalize_newlines};
use crate::sink::Sink;

use super::SectionStack;

const TAB_WIDTH: usize = 8;

pub struct AptParser;

impl Parser for AptParser {
    fn id(&self) -> &'static str {
        "apt"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["apt"]
    }

    fn parse(
        &self,
        input: &str,
        sink: &mut dyn Sink,
        options: &ParseOptions,
    ) -> Result<ParseReport, ParseError> {
        let source = normalize_newlines(input);
        let blocks = read_blocks(&source);
        options
            .log
            .debug(&format!("apt: {} blocks", blocks.len()));
        let traversal = Traversal {
            emitter: Emitter::new(sink, options),
            parser: self,
            source: &source,
            sections: SectionStack::default(),
            lists: Vec::new(),
        };
        traversal.run(blocks)
    }
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum BlockKind {
    Title,
    Section(u8),
    Paragraph,
    ListItem,
    NumberedListItem(Numbering),
    DefinitionListItem,
    ListBreak,
    Verbatim { boxed: bool },
    Figure,
    Table,
    HorizontalRule,
    PageBreak,
    Macro,
    Comment,
}

#[derive(Debug, Clone)]
struct Block {
    kind: BlockKind,
    indent: usize,
    /// 1-based line of the block's first line.
    line: usize,
    text: String,
}

fn is_blank(line: &str) -> bool {
    line.chars().all(|c| c == ' ' || c == '\t')
}

/// Byte offset of the first non-blank character and the indentation width.
fn leading(line: &str) -> Option<(usize, usize)> {
    let mut indent = 0;
    for (pos, c) in line.char_indices() {
        match c {
            ' ' => indent += 1,
            '\t' => indent += TAB_WIDTH,
            _ => return Some((pos, indent)),
        }
    }
    None
}

fn expand_tabs(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut column = 0;
    for c in line.chars() {
        if c == '\t' {
            let next = (column / TAB_WIDTH + 1) * TAB_WIDTH;
            out.extend(std::iter::repeat_n(' ', next - column));
            column = next;
        } else {
            out.push(c);
            column += 1;
        }
    }
    out
}

fn classify(rest: &str, indent: usize, first_block: bool) -> BlockKind {
    let b = rest.as_bytes();
    let at = |n: usize| b.get(n).copied().unwrap_or(0);
    let dashes = at(1) == b'-' && at(2) == b'-';

    match at(0) {
        b'*' if indent == 0 => {
            if dashes {
                BlockKind::Table
            } else {
                let stars = b.iter().take_while(|&&c| c == b'*').count().min(4);
                BlockKind::Section(stars as u8 + 1)
            }
        }
        b'*' => BlockKind::ListItem,
        b'[' if at(1) == b']' => BlockKind::ListBreak,
        b'[' if indent == 0 => BlockKind::Figure,
        b'[' if at(1) == b'[' => BlockKind::NumberedListItem(match at(2) {
            b'a' => Numbering::LowerAlpha,
            b'A' => Numbering::UpperAlpha,
            b'i' => Numbering::LowerRoman,
            b'I' => Numbering::UpperRoman,
            _ => Numbering::Decimal,
        }),
        b'[' => BlockKind::DefinitionListItem,
        b'-' if dashes && indent == 0 => BlockKind::Verbatim { boxed: false },
        b'-' if dashes && first_block => BlockKind::Title,
        b'+' if dashes && indent == 0 => BlockKind::Verbatim { boxed: true },
        b'=' if indent == 0 && at(1) == b'=' && at(2) == b'=' => BlockKind::HorizontalRule,
        0x0c if indent == 0 => BlockKind::PageBreak,
        b'%' if indent == 0 && at(1) == b'{' => BlockKind::Macro,
        b'~' if at(1) == b'~' => BlockKind::Comment,
        _ if indent == 0 => BlockKind::Section(1),
        _ => BlockKind::Paragraph,
    }
}

/// Cut the source into classified blocks.
///
/// Most blocks run until the next blank line or `~~` comment line. Verbatim
/// blocks run until their closing `---`/`+--` line and keep blank lines.
fn read_blocks(source: &str) -> Vec<Block> {
    let lines: Vec<&str> = source.split('\n').collect();
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let Some((start, indent)) = leading(line) else {
            i += 1;
            continue;
        };
        let rest = &line[start..];
        let kind = classify(rest, indent, blocks.is_empty());
        let number = i + 1;
        i += 1;

        let text = match &kind {
            BlockKind::Comment => rest[2..].to_string(),
            BlockKind::Verbatim { .. } => {
                let marker = if rest.starts_with('+') { '+' } else { '-' };
                let mut body = Vec::new();
                while i < lines.len() {
                    let l = lines[i];
                    i += 1;
                    if l.strip_prefix(marker).is_some_and(|r| r.starts_with("--")) {
                        break;
                    }
                    body.push(expand_tabs(l));
                }
                body.join("\n")
            }
            _ => {
                let mut text = vec![line];
                while i < lines.len()
                    && !is_blank(lines[i])
                    && !lines[i].trim_start().starts_with("~~")
                {
                    text.push(lines[i]);
                    i += 1;
                }
                text.join("\n")
            }
        };

        blocks.push(Block {
            kind,
            indent,
            line: number,
            text,
        });
    }
    blocks
}

/// Text after the leading run of `marker` characters.
fn skip_leading(text: &str, marker: char) -> &str {
    text.trim_start().trim_start_matches(marker).trim()
}

/// Split `[inside] rest`, honouring `\]` inside the brackets.
fn split_bracket(text: &str) -> Option<(String, &str)> {
    let body = text.trim_start().strip_prefix('[')?;
    let mut inside = String::new();
    let mut chars = body.char_indices();
    while let Some((pos, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, ']')) => inside.push(']'),
                Some((_, other)) => {
                    inside.push('\\');
                    inside.push(other);
                }
                None => inside.push('\\'),
            },
            ']' => return Some((inside, &body[pos + 1..])),
            _ => inside.push(c),
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Bullet,
    Numbered,
    Definition,
}

struct OpenList {
    kind: ListKind,
    indent: usize,
}

struct Traversal<'a, 'e> {
    emitter: Emitter<'e>,
    parser: &'a AptParser,
    source: &'a str,
    sections: SectionStack,
    lists: Vec<OpenList>,
}

impl Traversal<'_, '_> {
    fn run(mut self, blocks: Vec<Block>) -> Result<ParseReport, ParseError> {
        let mut blocks = blocks.into_iter().peekable();

        self.emitter.kind(EventKind::StartHead)?;
        if let Some(title) = blocks.next_if(|b| b.kind == BlockKind::Title) {
            self.emitter.set_line(title.line);
            self.title(&title.text)?;
        }
        self.emitter.kind(EventKind::EndHead)?;

        self.emitter.kind(EventKind::StartBody)?;
        for block in blocks {
            self.block(block)?;
        }
        self.close_lists_from(0)?;
        self.sections.close_from(&mut self.emitter, 1)?;
        self.emitter.kind(EventKind::EndBody)?;
        self.emitter.finish()
    }

    /// `---` separated title, author and date. One author per line.
    fn title(&mut self, text: &str) -> Result<(), ParseError> {
        let mut segments: Vec<Vec<&str>> = vec![Vec::new()];
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("--") {
                segments.push(Vec::new());
            } else if !trimmed.is_empty() {
                if let Some(last) = segments.last_mut() {
                    last.push(trimmed);
                }
            }
        }

        let mut parts = segments.into_iter().skip(1);
        if let Some(title) = parts.next().filter(|s| !s.is_empty()) {
            self.emitter.kind(EventKind::StartTitle)?;
            self.lines_with_breaks(&title)?;
            self.emitter.kind(EventKind::EndTitle)?;
        }
        if let Some(authors) = parts.next() {
            for author in authors {
                self.emitter.kind(EventKind::StartAuthor)?;
                self.inline(author)?;
                self.emitter.kind(EventKind::EndAuthor)?;
            }
        }
        if let Some(date) = parts.next().filter(|s| !s.is_empty()) {
            self.emitter.kind(EventKind::StartDate)?;
            self.lines_with_breaks(&date)?;
            self.emitter.kind(EventKind::EndDate)?;
        }
        Ok(())
    }

    fn lines_with_breaks(&mut self, lines: &[&str]) -> Result<(), ParseError> {
        for (n, line) in lines.iter().enumerate() {
            if n > 0 {
                self.emitter.kind(EventKind::LineBreak)?;
            }
            self.inline(line)?;
        }
        Ok(())
    }

    fn block(&mut self, block: Block) -> Result<(), ParseError> {
        self.emitter.set_line(block.line);
        match &block.kind {
            BlockKind::Comment => return self.emitter.comment(block.text.trim()),
            BlockKind::ListBreak => return self.list_break(),
            BlockKind::ListItem
            | BlockKind::NumberedListItem(_)
            | BlockKind::DefinitionListItem => return self.list_item(&block),
            _ => {}
        }

        // Any other block ends the lists it is not indented under.
        self.close_lists_from(block.indent)?;

        match block.kind {
            BlockKind::Section(level) => self.section(level, &block.text),
            BlockKind::Title | BlockKind::Paragraph => {
                self.emitter.kind(EventKind::StartParagraph)?;
                self.inline(block.text.trim())?;
                self.emitter.kind(EventKind::EndParagraph)
            }
            BlockKind::Verbatim { boxed } => {
                self.emitter.kind(EventKind::StartVerbatim { boxed })?;
                self.emitter.text(&block.text)?;
                self.emitter.kind(EventKind::EndVerbatim)
            }
            BlockKind::Figure => self.figure(&block.text),
            BlockKind::Table => self.table(&block.text),
            BlockKind::HorizontalRule => self.emitter.kind(EventKind::HorizontalRule),
            BlockKind::PageBreak => self.emitter.kind(EventKind::PageBreak),
            BlockKind::Macro => self.macro_block(&block.text),
            BlockKind::Comment
            | BlockKind::ListBreak
            | BlockKind::ListItem
            | BlockKind::NumberedListItem(_)
            | BlockKind::DefinitionListItem => Ok(()),
        }
    }

    fn section(&mut self, level: u8, text: &str) -> Result<(), ParseError> {
        let title = if level == 1 {
            text.trim()
        } else {
            skip_leading(text, '*')
        };
        self.sections.open(&mut self.emitter, level)?;
        self.emitter.kind(EventKind::StartSectionTitle(level))?;
        self.inline(title)?;
        self.emitter.kind(EventKind::EndSectionTitle(level))
    }

    // -----------------------------------------------------------------
    // Lists
    // -----------------------------------------------------------------

    fn list_item(&mut self, block: &Block) -> Result<(), ParseError> {
        let kind = match block.kind {
            BlockKind::ListItem => ListKind::Bullet,
            BlockKind::NumberedListItem(_) => ListKind::Numbered,
            _ => ListKind::Definition,
        };

        while let Some(top) = self.lists.last() {
            let deeper = top.indent > block.indent;
            let other_kind = top.indent == block.indent && top.kind != kind;
            if !(deeper || other_kind) {
                break;
            }
            self.close_list()?;
        }

        match self.lists.last() {
            Some(top) if top.indent == block.indent => self.close_item(kind)?,
            _ => {
                let open = match &block.kind {
                    BlockKind::ListItem => EventKind::StartList,
                    BlockKind::NumberedListItem(numbering) => {
                        EventKind::StartNumberedList(*numbering)
                    }
                    _ => EventKind::StartDefinitionList,
                };
                self.emitter.kind(open)?;
                self.lists.push(OpenList {
                    kind,
                    indent: block.indent,
                });
            }
        }

        match kind {
            ListKind::Bullet => {
                self.emitter.kind(EventKind::StartListItem)?;
                self.inline(skip_leading(&block.text, '*'))
            }
            ListKind::Numbered => {
                let text = block.text.trim_start();
                let Some(end) = text.find("]]") else {
                    return Err(self.emitter.syntax_error("missing ']]'"));
                };
                self.emitter.kind(EventKind::StartNumberedListItem)?;
                self.inline(text[end + 2..].trim())
            }
            ListKind::Definition => {
                let Some((term, definition)) = split_bracket(&block.text) else {
                    return Err(self.emitter.syntax_error("missing ']'"));
                };
                self.emitter.kind(EventKind::StartDefinitionListItem)?;
                self.emitter.kind(EventKind::StartDefinedTerm)?;
                self.inline(term.trim())?;
                self.emitter.kind(EventKind::EndDefinedTerm)?;
                self.emitter.kind(EventKind::StartDefinition)?;
                self.inline(definition.trim())
            }
        }
    }

    fn close_item(&mut self, kind: ListKind) -> Result<(), ParseError> {
        match kind {
            ListKind::Bullet => self.emitter.kind(EventKind::EndListItem),
            ListKind::Numbered => self.emitter.kind(EventKind::EndNumberedListItem),
            ListKind::Definition => {
                self.emitter.kind(EventKind::EndDefinition)?;
                self.emitter.kind(EventKind::EndDefinitionListItem)
            }
        }
    }

    fn close_list(&mut self) -> Result<(), ParseError> {
        let Some(list) = self.lists.pop() else {
            return Ok(());
        };
        self.close_item(list.kind)?;
        self.emitter.kind(match list.kind {
            ListKind::Bullet => EventKind::EndList,
            ListKind::Numbered => EventKind::EndNumberedList,
            ListKind::Definition => EventKind::EndDefinitionList,
        })
    }

    fn close_lists_from(&mut self, indent: usize) -> Result<(), ParseError> {
        while self.lists.last().is_some_and(|l| l.indent >= indent) {
            self.close_list()?;
        }
        Ok(())
    }

    /// `[]` ends the innermost list.
    fn list_break(&mut self) -> Result<(), ParseError> {
        self.close_list()
    }

    // -----------------------------------------------------------------
    // Figures, tables, macros
    // -----------------------------------------------------------------

    fn figure(&mut self, text: &str) -> Result<(), ParseError> {
        let Some((source, caption)) = split_bracket(text) else {
            return Err(self.emitter.syntax_error("missing ']'"));
        };
        self.emitter.kind(EventKind::StartFigure)?;
        self.emitter
            .kind(EventKind::FigureGraphics(source.trim().to_string()))?;
        let caption = caption.trim();
        if !caption.is_empty() {
            self.emitter.kind(EventKind::StartFigureCaption)?;
            self.inline(caption)?;
            self.emitter.kind(EventKind::EndFigureCaption)?;
        }
        self.emitter.kind(EventKind::EndFigure)
    }

    /// A table is a sequence of `*--` separator lines with cell lines between
    /// them; anything after the last separator is the caption.
    fn table(&mut self, text: &str) -> Result<(), ParseError> {
        let lines: Vec<&str> = text.lines().collect();
        let last_separator = lines
            .iter()
            .rposition(|l| l.starts_with("*--"))
            .unwrap_or(0);
        let (row_lines, caption_lines) = lines.split_at(last_separator + 1);

        self.emitter.kind(EventKind::StartTable)?;

        // Only the first separator declares the columns; later ones just end rows.
        let mut columns: Vec<Justification> = Vec::new();
        let mut cells: Vec<Cell> = Vec::new();
        let mut rows_open = false;
        let mut rows = 0;

        for line in row_lines {
            if line.starts_with("*--") {
                if columns.is_empty() {
                    columns = self.parse_justification(line)?;
                    cells = vec![Cell::default(); columns.len()];
                } else {
                    if self.table_row(&columns, &mut cells)? {
                        rows += 1;
                    }
                    cells.truncate(columns.len());
                }
                continue;
            }

            if !rows_open {
                self.emitter.kind(EventKind::StartTableRows {
                    justification: columns.clone(),
                    grid: line.starts_with('|'),
                })?;
                rows_open = true;
            }
            fill_cells(line, &mut cells);
        }

        if rows == 0 {
            return Err(self.emitter.syntax_error("no table rows"));
        }
        self.emitter.kind(EventKind::EndTableRows)?;

        let caption = caption_lines.join("\n");
        if !caption.trim().is_empty() {
            self.emitter.kind(EventKind::StartTableCaption)?;
            self.inline(caption.trim())?;
            self.emitter.kind(EventKind::EndTableCaption)?;
        }
        self.emitter.kind(EventKind::EndTable)
    }

    fn parse_justification(&self, line: &str) -> Result<Vec<Justification>, ParseError> {
        let columns: Vec<Justification> = line
            .chars()
            .skip(2)
            .filter_map(|c| match c {
                '*' => Some(Justification::Center),
                '+' => Some(Justification::Left),
                ':' => Some(Justification::Right),
                _ => None,
            })
            .collect();
        if columns.is_empty() {
            return Err(self.emitter.syntax_error("no columns specified"));
        }
        Ok(columns)
    }

    /// Emit the accumulated cells as one row. Returns false for an empty row.
    fn table_row(
        &mut self,
        justification: &[Justification],
        cells: &mut [Cell],
    ) -> Result<bool, ParseError> {
        if cells.iter().all(|c| c.text.is_empty()) {
            return Ok(false);
        }
        self.emitter.kind(EventKind::StartTableRow)?;
        for (i, cell) in cells.iter_mut().enumerate() {
            let cell = std::mem::take(cell);
            self.emitter.kind(EventKind::StartTableCell {
                header: cell.header,
                justification: justification.get(i).copied(),
            })?;
            self.inline(&cell.text)?;
            self.emitter.kind(EventKind::EndTableCell)?;
        }
        self.emitter.kind(EventKind::EndTableRow)?;
        Ok(true)
    }

    /// `%{id|key=value|...}`
    fn macro_block(&mut self, text: &str) -> Result<(), ParseError> {
        let body = text.trim();
        let Some(inner) = body.strip_prefix("%{").and_then(|s| s.strip_suffix('}')) else {
            return Err(self.emitter.syntax_error("missing '}' in macro"));
        };
        let (id, params) = inner.split_once('|').unwrap_or((inner, ""));
        let id = id.trim();
        if id.is_empty() {
            return Err(self.emitter.syntax_error("missing macro id"));
        }
        let params = parse_params(params, '|')
            .map_err(|e| self.emitter.syntax_error(format!("macro '{id}': {e}")))?;
        self.emitter
            .execute_macro(id, params, self.parser, self.source)
    }

    // -----------------------------------------------------------------
    // Inline text
    // -----------------------------------------------------------------

    fn inline(&mut self, text: &str) -> Result<(), ParseError> {
        let scanned = scan_inline(text).map_err(|msg| self.emitter.syntax_error(msg))?;
        for warning in scanned.warnings {
            self.emitter.warn(warning, "L001");
        }
        for kind in scanned.events {
            match kind {
                EventKind::Text(text) => self.emitter.text(&text)?,
                other => self.emitter.kind(other)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct Cell {
    text: String,
    header: bool,
}

/// Append one table line's cell texts to `cells`.
///
/// `|` separates cells and `\|` is a literal pipe. Two pipes in a row mark
/// the following cell as a header cell. A cell ending in `\` continues on
/// the next line after a line break; otherwise continuation lines are
/// joined with a space. Cells past the declared columns are kept so the
/// validator can report the overflow.
fn fill_cells(line: &str, cells: &mut Vec<Cell>) {
    enum Token {
        Pipe,
        Text(String),
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push('\\');
                if let Some(&next) = chars.peek() {
                    if next == '|' || next == '\\' {
                        current.push(next);
                        chars.next();
                    }
                }
            }
            '|' => {
                if !current.is_empty() {
                    tokens.push(Token::Text(std::mem::take(&mut current)));
                }
                tokens.push(Token::Pipe);
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(Token::Text(current));
    }

    let mut index = 0;
    let mut after_pipe = false;
    let mut header = false;
    for token in tokens {
        match token {
            Token::Pipe => {
                if let Some(cell) = cells.get_mut(index) {
                    cell.header = after_pipe;
                }
                header = after_pipe;
                after_pipe = !after_pipe;
            }
            Token::Text(text) => {
                after_pipe = false;
                let text = text.trim();
                if index >= cells.len() {
                    if text.is_empty() {
                        continue;
                    }
                    cells.push(Cell {
                        text: String::new(),
                        header,
                    });
                }
                let cell = &mut cells[index];
                if !text.is_empty() {
                    if cell.text.ends_with('\\') && !cell.text.ends_with("\\\\") {
                        cell.text.push('\n');
                    } else if !cell.text.is_empty() {
                        cell.text.push(' ');
                    }
                    cell.text.push_str(text);
                }
                index += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inline scanner
// ---------------------------------------------------------------------------

struct Scanned {
    events: Vec<EventKind>,
    warnings: Vec<String>,
}

fn scan_inline(text: &str) -> Result<Scanned, String> {
    InlineScanner::new(text.chars().collect()).run()
}

/// Plain text of an inline fragment, used for anchor ids and link targets.
fn plain_text(chars: &[char]) -> Result<String, String> {
    let scanned = InlineScanner::new(chars.to_vec()).run()?;
    let mut out = String::new();
    for event in scanned.events {
        match event {
            EventKind::Text(t) => out.push_str(&t),
            EventKind::NonBreakingSpace | EventKind::LineBreak => out.push(' '),
            _ => {}
        }
    }
    Ok(out)
}

/// Resolve backslash escapes only, leaving braces and markup alone.
fn unescape(chars: &[char]) -> String {
    let mut scanner = InlineScanner::new(chars.to_vec());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' {
            i = scanner.escape(i);
        } else {
            scanner.buffer.push(chars[i]);
            i += 1;
        }
    }
    scanner.flush();
    let mut out = String::new();
    for event in scanner.events {
        match event {
            EventKind::Text(t) => out.push_str(&t),
            EventKind::NonBreakingSpace | EventKind::LineBreak => out.push(' '),
            _ => {}
        }
    }
    out
}

fn is_apt_local_link(target: &str) -> bool {
    target.starts_with('/') || target.starts_with("./") || target.starts_with("../")
}

struct InlineScanner {
    chars: Vec<char>,
    buffer: String,
    events: Vec<EventKind>,
    warnings: Vec<String>,
}

impl InlineScanner {
    fn new(chars: Vec<char>) -> Self {
        Self {
            chars,
            buffer: String::new(),
            events: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn at(&self, i: usize) -> Option<char> {
        self.chars.get(i).copied()
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            self.events
                .push(EventKind::Text(std::mem::take(&mut self.buffer)));
        }
    }

    fn push(&mut self, kind: EventKind) {
        self.flush();
        self.events.push(kind);
    }

    fn run(mut self) -> Result<Scanned, String> {
        let end = self.chars.len();
        // Pending anchor/link closes: (position, marker width, event).
        let mut closes: Vec<(usize, usize, EventKind)> = Vec::new();
        let (mut italic, mut bold, mut monospaced) = (false, false, false);
        let mut i = 0;

        while i < end {
            if closes.last().is_some_and(|(at, _, _)| *at == i) {
                if let Some((_, width, kind)) = closes.pop() {
                    self.push(kind);
                    i += width;
                }
                continue;
            }

            let c = self.chars[i];
            match c {
                '\\' => i = self.escape(i),
                '{' if closes.is_empty() => {
                    if self.at(i + 1) == Some('{') {
                        let (target, text_start, close) = self.link_bounds(i)?;
                        let target = self.resolve_link(target);
                        self.push(EventKind::StartLink(target));
                        closes.push((close, 2, EventKind::EndLink));
                        i = text_start;
                    } else {
                        let close = self
                            .find_close(i + 1, 1)
                            .ok_or_else(|| "missing '}'".to_string())?;
                        match encode_id(&plain_text(&self.chars[i + 1..close])?) {
                            Some(id) => {
                                self.push(EventKind::StartAnchor(id));
                                closes.push((close, 1, EventKind::EndAnchor));
                            }
                            None => self.buffer.push('{'),
                        }
                        i += 1;
                    }
                }
                '<' if !italic && !bold && !monospaced => {
                    if self.at(i + 1) == Some('<') && self.at(i + 2) == Some('<') {
                        monospaced = true;
                        self.push(EventKind::StartMonospaced);
                        i += 3;
                    } else if self.at(i + 1) == Some('<') {
                        bold = true;
                        self.push(EventKind::StartBold);
                        i += 2;
                    } else {
                        italic = true;
                        self.push(EventKind::StartItalic);
                        i += 1;
                    }
                }
                '>' if monospaced && self.at(i + 1) == Some('>') && self.at(i + 2) == Some('>') => {
                    monospaced = false;
                    self.push(EventKind::EndMonospaced);
                    i += 3;
                }
                '>' if bold && self.at(i + 1) == Some('>') => {
                    bold = false;
                    self.push(EventKind::EndBold);
                    i += 2;
                }
                '>' if italic => {
                    italic = false;
                    self.push(EventKind::EndItalic);
                    i += 1;
                }
                c if c.is_whitespace() => {
                    self.buffer.push(' ');
                    i += 1;
                    while self.at(i).is_some_and(char::is_whitespace) {
                        i += 1;
                    }
                }
                c => {
                    self.buffer.push(c);
                    i += 1;
                }
            }
        }

        if monospaced {
            return Err("missing '>>>'".into());
        }
        if bold {
            return Err("missing '>>'".into());
        }
        if italic {
            return Err("missing '>'".into());
        }
        self.flush();
        Ok(Scanned {
            events: self.events,
            warnings: self.warnings,
        })
    }

    /// For a link starting at `i`: its target, where its text starts and
    /// where its `}}` is.
    fn link_bounds(&self, i: usize) -> Result<(String, usize, usize), String> {
        if self.at(i + 2) == Some('{') {
            let target_end = self
                .find_close(i + 3, 1)
                .ok_or_else(|| "missing '}'".to_string())?;
            let target = unescape(&self.chars[i + 3..target_end]);
            let close = self
                .find_close(target_end + 1, 2)
                .ok_or_else(|| "missing '}}'".to_string())?;
            Ok((target, target_end + 1, close))
        } else {
            let close = self
                .find_close(i + 2, 2)
                .ok_or_else(|| "missing '}}'".to_string())?;
            Ok((unescape(&self.chars[i + 2..close]), i + 2, close))
        }
    }

    /// Position of the closing `}` (or `}}`) that balances the braces
    /// opened before `start`.
    fn find_close(&self, start: usize, width: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut i = start;
        while i < self.chars.len() {
            match self.chars[i] {
                '\\' => {
                    i += 2;
                    continue;
                }
                '{' => depth += 1,
                '}' if depth > 0 => depth -= 1,
                '}' if width == 1 || self.at(i + 1) == Some('}') => return Some(i),
                _ => {}
            }
            i += 1;
        }
        None
    }

    /// Bare names are links to in-document anchors; fragments that are not
    /// valid ids are re-encoded.
    fn resolve_link(&mut self, target: String) -> String {
        let target = target.trim().to_string();
        if is_external_link(&target) {
            return target;
        }
        let mut target = if is_apt_local_link(&target) || target.starts_with('#') {
            target
        } else {
            format!("#{target}")
        };
        if let Some(hash) = target.find('#') {
            let fragment = &target[hash + 1..];
            if fragment.ends_with(".html") && !fragment.starts_with("./") {
                self.warnings.push(format!(
                    "Ambiguous link: '{fragment}'. If this is a local link, prepend \"./\"!"
                ));
            }
            if !is_valid_id(fragment) {
                let encoded = encode_id(fragment).unwrap_or_default();
                let modified = format!("{}#{}", &target[..hash], encoded);
                self.warnings.push(format!(
                    "Modified invalid link: '{fragment}' to '{modified}'"
                ));
                target = modified;
            }
        }
        target
    }

    /// Resolve the escape at `i` and return the index after it.
    fn escape(&mut self, i: usize) -> usize {
        let Some(next) = self.at(i + 1) else {
            self.buffer.push('\\');
            return i + 1;
        };
        match next {
            ' ' => {
                self.push(EventKind::NonBreakingSpace);
                i + 2
            }
            '\n' => {
                let mut j = i + 2;
                while self.at(j).is_some_and(char::is_whitespace) {
                    j += 1;
                }
                self.push(EventKind::LineBreak);
                j
            }
            '\\' | '|' | '~' | '=' | '-' | '+' | '*' | '[' | ']' | '<' | '>' | '{' | '}' => {
                self.buffer.push(next);
                i + 2
            }
            'x' => self.code_point(i, 2, 16),
            'u' => self.code_point(i, 4, 16),
            c if c.is_digit(8) => {
                let digits = (i + 1..(i + 4).min(self.chars.len()))
                    .take_while(|&j| self.chars[j].is_digit(8))
                    .count();
                let value: String = self.chars[i + 1..i + 1 + digits].iter().collect();
                let c = u32::from_str_radix(&value, 8)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or('?');
                self.buffer.push(c);
                i + 1 + digits
            }
            _ => {
                self.buffer.push('\\');
                i + 1
            }
        }
    }

    /// `\xHH` or `\uHHHH` at `i`; a backslash without enough digits is kept.
    fn code_point(&mut self, i: usize, len: usize, radix: u32) -> usize {
        let start = i + 2;
        let digits = self.chars.get(start..start + len);
        match digits {
            Some(digits) if digits.iter().all(|c| c.is_digit(radix)) => {
                let value: String = digits.iter().collect();
                let c = u32::from_str_radix(&value, radix)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or('?');
                self.buffer.push(c);
                start + len
            }
            _ => {
                self.buffer.push('\\');
                i + 1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StructuralError;
    use crate::event::Event;
    use crate::macros::MacroRegistry;
    use crate::sink::EventCollector;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn parse(input: &str) -> Vec<EventKind> {
        parse_with(input, &ParseOptions::default())
    }

    fn parse_with(input: &str, options: &ParseOptions) -> Vec<EventKind> {
        let mut sink = EventCollector::new();
        AptParser.parse(input, &mut sink, options).unwrap();
        sink.into_events().into_iter().map(|e| e.kind).collect()
    }

    fn body(events: Vec<EventKind>) -> Vec<EventKind> {
        let start = events
            .iter()
            .position(|e| *e == EventKind::StartBody)
            .unwrap();
        events[start + 1..events.len() - 1].to_vec()
    }

    fn text(s: &str) -> EventKind {
        EventKind::Text(s.into())
    }

    #[test]
    fn section_with_anchor_title() {
        use EventKind::*;
        assert_eq!(
            parse("Section Title\n\n{Title with anchor}\n"),
            vec![
                StartHead,
                EndHead,
                StartBody,
                StartSection(1),
                StartSectionTitle(1),
                text("Section Title"),
                EndSectionTitle(1),
                EndSection(1),
                StartSection(1),
                StartSectionTitle(1),
                StartAnchor("Title_with_anchor".into()),
                text("Title with anchor"),
                EndAnchor,
                EndSectionTitle(1),
                EndSection(1),
                EndBody,
            ]
        );
    }

    #[test]
    fn title_block_fills_head() {
        use EventKind::*;
        let events = parse(" -----\n The Title\n -----\n Jane Doe\n John Roe\n -----\n 2024-01-01\n -----\n\nIntro\n");
        assert_eq!(
            events[..11].to_vec(),
            vec![
                StartHead,
                StartTitle,
                text("The Title"),
                EndTitle,
                StartAuthor,
                text("Jane Doe"),
                EndAuthor,
                StartAuthor,
                text("John Roe"),
                EndAuthor,
                StartDate,
            ]
        );
    }

    #[test]
    fn nested_sections_close_in_order() {
        use EventKind::*;
        let events = body(parse("One\n\n* Two\n\n** Three\n\nFour\n"));
        let structure: Vec<EventKind> = events
            .into_iter()
            .filter(|e| matches!(e, StartSection(_) | EndSection(_)))
            .collect();
        assert_eq!(
            structure,
            vec![
                StartSection(1),
                StartSection(2),
                StartSection(3),
                EndSection(3),
                EndSection(2),
                EndSection(1),
                StartSection(1),
                EndSection(1),
            ]
        );
    }

    #[test]
    fn inline_markup() {
        use EventKind::*;
        let events = body(parse("  Some <italic>, <<bold>> and <<<mono>>> text.\n"));
        assert_eq!(
            events,
            vec![
                StartParagraph,
                text("Some "),
                StartItalic,
                text("italic"),
                EndItalic,
                text(", "),
                StartBold,
                text("bold"),
                EndBold,
                text(" and "),
                StartMonospaced,
                text("mono"),
                EndMonospaced,
                text(" text."),
                EndParagraph,
            ]
        );
    }

    #[test]
    fn links_with_balanced_braces() {
        use EventKind::*;
        let events = body(parse(
            "  See {{{http://example.org/a{b}}the site}} and {{Overview}}.\n",
        ));
        assert_eq!(
            events,
            vec![
                StartParagraph,
                text("See "),
                StartLink("http://example.org/a{b}".into()),
                text("the site"),
                EndLink,
                text(" and "),
                StartLink("#Overview".into()),
                text("Overview"),
                EndLink,
                text("."),
                EndParagraph,
            ]
        );
    }

    #[test]
    fn escapes_resolve_before_text_events() {
        use EventKind::*;
        let events = body(parse("  a\\<b\\> \\x41\\u00e9\\101 c\\ d\\\n  e\n"));
        assert_eq!(
            events,
            vec![
                StartParagraph,
                text("a<b> AéA c"),
                NonBreakingSpace,
                text("d"),
                LineBreak,
                text("e"),
                EndParagraph,
            ]
        );
    }

    #[test]
    fn unclosed_bold_is_a_syntax_error() {
        let mut sink = EventCollector::new();
        let err = AptParser
            .parse("  <<oops\n", &mut sink, &ParseOptions::default())
            .unwrap_err();
        match err {
            ParseError::Syntax { message, location } => {
                assert_eq!(message, "missing '>>'");
                assert_eq!(location.line, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nested_lists_by_indentation() {
        use EventKind::*;
        let events = body(parse(
            "  * one\n\n    [[a]] inner\n\n    [[b]] second\n\n  * two\n\n  []\n\n  after\n",
        ));
        assert_eq!(
            events,
            vec![
                StartList,
                StartListItem,
                text("one"),
                StartNumberedList(Numbering::LowerAlpha),
                StartNumberedListItem,
                text("inner"),
                EndNumberedListItem,
                StartNumberedListItem,
                text("second"),
                EndNumberedListItem,
                EndNumberedList,
                EndListItem,
                StartListItem,
                text("two"),
                EndListItem,
                EndList,
                StartParagraph,
                text("after"),
                EndParagraph,
            ]
        );
    }

    #[test]
    fn definition_list() {
        use EventKind::*;
        let events = body(parse("  [Term] The definition.\n"));
        assert_eq!(
            events,
            vec![
                StartDefinitionList,
                StartDefinitionListItem,
                StartDefinedTerm,
                text("Term"),
                EndDefinedTerm,
                StartDefinition,
                text("The definition."),
                EndDefinition,
                EndDefinitionListItem,
                EndDefinitionList,
            ]
        );
    }

    #[test]
    fn verbatim_keeps_blank_lines_and_markup() {
        use EventKind::*;
        let events = body(parse("+---\nfn main() {\n\n  <<not bold>>\n}\n+---\n"));
        assert_eq!(
            events,
            vec![
                StartVerbatim { boxed: true },
                text("fn main() {\n\n  <<not bold>>\n}"),
                EndVerbatim,
            ]
        );
    }

    #[test]
    fn table_with_headers_and_multiline_cells() {
        use EventKind::*;
        let source = "\
*--+--:
|| Name || Value |
*--+--:
| first | 1 \\
| line  | more |
*--*--+
| second | 2 |
*--+--+--+
The caption
";
        let events = body(parse(source));
        let cell = |header, j| StartTableCell {
            header,
            justification: Some(j),
        };
        assert_eq!(
            events,
            vec![
                StartTable,
                StartTableRows {
                    justification: vec![Justification::Left, Justification::Right],
                    grid: true,
                },
                StartTableRow,
                cell(true, Justification::Left),
                text("Name"),
                EndTableCell,
                cell(true, Justification::Right),
                text("Value"),
                EndTableCell,
                EndTableRow,
                StartTableRow,
                cell(false, Justification::Left),
                text("first line"),
                EndTableCell,
                cell(false, Justification::Right),
                text("1 "),
                LineBreak,
                text("more"),
                EndTableCell,
                EndTableRow,
                StartTableRow,
                cell(false, Justification::Left),
                text("second"),
                EndTableCell,
                cell(false, Justification::Right),
                text("2"),
                EndTableCell,
                EndTableRow,
                EndTableRows,
                StartTableCaption,
                text("The caption"),
                EndTableCaption,
                EndTable,
            ]
        );
    }

    #[test]
    fn overflow_cells_are_kept_and_reported() {
        let source = "*--+--+\n| a | b | c |\n*--+--+\n";
        let mut sink = EventCollector::new();
        let report = AptParser
            .parse(source, &mut sink, &ParseOptions::default())
            .unwrap();
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].code.as_deref(), Some("S003"));

        let events: Vec<EventKind> = sink.into_events().into_iter().map(|e| e.kind).collect();
        let cells = events
            .iter()
            .filter(|e| matches!(e, EventKind::StartTableCell { .. }))
            .count();
        assert_eq!(cells, 3);
        assert!(events.contains(&text("c")));
        assert!(events.contains(&EventKind::StartTableCell {
            header: false,
            justification: None,
        }));
    }

    #[test]
    fn overflow_cells_are_fatal_when_strict() {
        let mut sink = EventCollector::new();
        let err = AptParser
            .parse("*--+--+\n| a | b | c |\n*--+--+\n", &mut sink, &ParseOptions::strict())
            .unwrap_err();
        assert!(matches!(
            err,
            ParseError::Structural {
                source: StructuralError::CellOverflow { columns: 2, .. },
                ..
            }
        ));
    }

    #[test]
    fn short_rows_do_not_carry_cells_into_the_next_row() {
        use EventKind::*;
        let source = "*--+--+\n| a | b | c |\n*--+--+\n| d | e |\n*--+--+\n";
        let events = body(parse(source));
        let second_row: Vec<EventKind> = events
            .split(|e| *e == StartTableRow)
            .nth(2)
            .unwrap()
            .to_vec();
        assert_eq!(
            second_row.iter().filter(|e| matches!(e, StartTableCell { .. })).count(),
            2
        );
        assert!(!second_row.contains(&text("c")));
    }

    #[test]
    fn table_without_rows_fails() {
        let mut sink = EventCollector::new();
        let err = AptParser
            .parse("*--+\n*--+\n", &mut sink, &ParseOptions::default())
            .unwrap_err();
        assert!(matches!(err, ParseError::Syntax { ref message, .. } if message == "no table rows"));
    }

    #[test]
    fn figure_rule_and_page_break() {
        use EventKind::*;
        let events = body(parse("[images/logo.png] The logo\n\n=====\n\n\x0c\n"));
        assert_eq!(
            events,
            vec![
                StartFigure,
                FigureGraphics("images/logo.png".into()),
                StartFigureCaption,
                text("The logo"),
                EndFigureCaption,
                EndFigure,
                HorizontalRule,
                PageBreak,
            ]
        );
    }

    #[test]
    fn comments_only_when_asked() {
        let source = "~~ a note\nText\n";
        assert!(!parse(source).iter().any(|e| matches!(e, EventKind::Comment(_))));
        let with = parse_with(source, &ParseOptions::default().with_comments(true));
        assert!(with.contains(&EventKind::Comment("a note".into())));
    }

    #[test]
    fn macros_expand_through_the_registry() {
        let options = ParseOptions::default().with_macros(Arc::new(MacroRegistry::with_defaults()));
        let events = body(parse_with("%{echo|greeting=hi}\n", &options));
        assert_eq!(
            events,
            vec![
                EventKind::StartVerbatim { boxed: true },
                text("echo\n"),
                text("greeting ---> hi\n"),
                EventKind::EndVerbatim,
            ]
        );
    }

    #[test]
    fn unknown_macro_is_lenient_warning() {
        let mut sink = EventCollector::new();
        let report = AptParser
            .parse("%{missing|a=b}\n", &mut sink, &ParseOptions::default())
            .unwrap();
        assert_eq!(report.diagnostics[0].code.as_deref(), Some("M001"));
        assert!(sink.events().contains(&Event::new(EventKind::Unknown {
            name: "macro:missing".into(),
            params: vec!["a=b".into()],
        })));
    }

    #[test]
    fn unknown_macro_is_fatal_when_strict() {
        let mut sink = EventCollector::new();
        let err = AptParser
            .parse("%{missing}\n", &mut sink, &ParseOptions::strict())
            .unwrap_err();
        assert!(matches!(err, ParseError::Macro { .. }));
    }

    #[test]
    fn invalid_link_fragments_are_encoded() {
        let mut sink = EventCollector::new();
        let report = AptParser
            .parse("  {{./page.html#Some Title}}\n", &mut sink, &ParseOptions::default())
            .unwrap();
        assert!(sink
            .events()
            .contains(&Event::new(EventKind::StartLink("./page.html#Some_Title".into()))));
        assert_eq!(report.diagnostics.len(), 1);
    }
}
