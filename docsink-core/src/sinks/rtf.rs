//! Rich Text Format output.
//!
//! Body text is Times, headings and table cells Helvetica, monospaced text
//! Courier. Tables are held until they close because RTF wants every cell
//! boundary (`\cellx`) up front; the column widths come from the widest
//! cell, measured with the static glyph widths below.

use std::io::Write;
use std::sync::Arc;

use crate::attrs::keys;
use crate::error::SinkError;
use crate::event::{Event, EventKind, Justification, Numbering};
use crate::logging::{self, Log};
use crate::sink::Sink;

use super::{Decoration, Output, decorations, ignored, unused_attributes};

const HEADER: &str = "{\\rtf1\\ansi\\ansicpg1252\\deff0
{\\fonttbl{\\f0\\froman Times;}{\\f1\\fswiss Helvetica;}{\\f2\\fmodern Courier;}}
\\paperw11906\\paperh16838\\margl1440\\margr1440\\margt1440\\margb1440
";

/// Helvetica advance widths for U+0020..=U+007E, in 1/1000 em.
const HELVETICA: [u32; 95] = [
    278, 278, 355, 556, 556, 889, 667, 222, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0..?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @..O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P.._
    222, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // `..o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p..~
];

/// Every Courier glyph has the same advance.
const COURIER: u32 = 600;

/// Width assumed for characters outside the table.
const FALLBACK: u32 = 556;

/// Cell text is 10pt, 200 twips per em.
const TWIPS_PER_EM: u32 = 200;
const CELL_GAP: u32 = 108;
const MIN_COLUMN: u32 = 360;

/// Numbering by list depth when the source asked for plain decimal.
const DEPTH_NUMBERING: [Numbering; 3] = [
    Numbering::Decimal,
    Numbering::LowerAlpha,
    Numbering::LowerRoman,
];

/// Width of `text` in 1/1000 em.
pub fn text_width(text: &str, monospaced: bool) -> u32 {
    text.chars()
        .map(|c| {
            if monospaced {
                return COURIER;
            }
            match c as u32 {
                code @ 0x20..=0x7e => HELVETICA[(code - 0x20) as usize],
                _ => FALLBACK,
            }
        })
        .sum()
}

/// Escape text for RTF: control characters are backslashed and everything
/// outside ASCII becomes `\uN?` per UTF-16 unit.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '\t' => out.push_str("\\tab "),
            '\n' | '\r' => out.push(' '),
            '\u{a0}' => out.push_str("\\~"),
            c if c.is_ascii() => out.push(c),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{}?", *unit as i16));
                }
            }
        }
    }
    out
}

struct List {
    numbering: Option<Numbering>,
    count: usize,
}

struct Cell {
    header: bool,
    justification: Option<Justification>,
    width: u32,
    line: u32,
    content: String,
}

struct Table {
    justification: Vec<Justification>,
    grid: bool,
    rows: Vec<Vec<Cell>>,
    caption: Option<String>,
}

pub struct RtfSink<W> {
    out: Output<W>,
    log: Arc<dyn Log>,
    opened: bool,
    lists: Vec<List>,
    containers: usize,
    fresh: bool,
    in_paragraph: bool,
    paragraph_align: Option<&'static str>,
    spans: Vec<(usize, bool)>,
    monospaced: usize,
    anchors: Vec<String>,
    tables: Vec<Table>,
    verbatim: bool,
}

impl<W: Write> RtfSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Output::new(out),
            log: logging::noop(),
            opened: false,
            lists: Vec::new(),
            containers: 0,
            fresh: true,
            in_paragraph: false,
            paragraph_align: None,
            spans: Vec::new(),
            monospaced: 0,
            anchors: Vec::new(),
            tables: Vec::new(),
            verbatim: false,
        }
    }

    pub fn with_log(mut self, log: Arc<dyn Log>) -> Self {
        self.log = log;
        self
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn write(&mut self, s: &str) -> Result<(), SinkError> {
        Ok(self.out.write(s)?)
    }

    fn open_document(&mut self) -> Result<(), SinkError> {
        if !self.opened {
            self.opened = true;
            self.write(HEADER)?;
        }
        Ok(())
    }

    fn enter(&mut self) {
        self.containers += 1;
        self.fresh = true;
    }

    fn leave(&mut self) {
        self.containers = self.containers.saturating_sub(1);
        self.fresh = false;
    }

    fn end_paragraph(&mut self) -> Result<(), SinkError> {
        let content = self.out.release();
        self.in_paragraph = false;
        let align = self.paragraph_align.take().unwrap_or("\\ql");
        if content.trim().is_empty() {
            return Ok(());
        }
        if self.containers > 0 {
            if !self.fresh {
                self.write("\\line ")?;
            }
            self.fresh = false;
            return self.write(&content);
        }
        self.write(&format!("{{\\pard{align}\\sa120\\f0\\fs20 {content}\\par}}\n"))
    }

    fn start_item(&mut self) -> Result<(), SinkError> {
        let depth = self.lists.len();
        let marker = match self.lists.last_mut() {
            Some(list) => {
                list.count += 1;
                match list.numbering {
                    None => "\\bullet".to_string(),
                    Some(Numbering::Decimal) => {
                        let style = DEPTH_NUMBERING[(depth - 1) % DEPTH_NUMBERING.len()];
                        format!("{}.", style.format(list.count))
                    }
                    Some(numbering) => format!("{}.", numbering.format(list.count)),
                }
            }
            None => "\\bullet".to_string(),
        };
        let indent = 360 * depth.max(1);
        self.write(&format!(
            "{{\\pard\\li{indent}\\fi-360\\sa60\\f0\\fs20 {marker}\\tab "
        ))?;
        self.enter();
        Ok(())
    }

    fn start_list(&mut self, numbering: Option<Numbering>) -> Result<(), SinkError> {
        if self.containers > 0 && !self.fresh {
            self.write("\\par ")?;
        }
        self.lists.push(List { numbering, count: 0 });
        Ok(())
    }

    fn start_cell(&mut self, header: bool, justification: Option<Justification>) {
        if let Some(row) = self.tables.last_mut().and_then(|t| t.rows.last_mut()) {
            row.push(Cell {
                header,
                justification,
                width: 0,
                line: 0,
                content: String::new(),
            });
        }
        self.out.capture();
        self.enter();
    }

    fn end_cell(&mut self) {
        let content = self.out.release();
        self.leave();
        if let Some(cell) = self.current_cell() {
            cell.width = cell.width.max(cell.line);
            cell.content = content;
        }
    }

    fn current_cell(&mut self) -> Option<&mut Cell> {
        self.tables
            .last_mut()
            .and_then(|t| t.rows.last_mut())
            .and_then(|r| r.last_mut())
    }

    fn end_table(&mut self) -> Result<(), SinkError> {
        let Some(table) = self.tables.pop() else {
            return Ok(());
        };
        let columns = table.rows.iter().map(Vec::len).max().unwrap_or(0);
        let widths: Vec<u32> = (0..columns)
            .map(|n| {
                let widest = table
                    .rows
                    .iter()
                    .filter_map(|row| row.get(n))
                    .map(|cell| cell.width * TWIPS_PER_EM / 1000)
                    .max()
                    .unwrap_or(0);
                widest.max(MIN_COLUMN) + 2 * CELL_GAP
            })
            .collect();

        let border = if table.grid {
            "\\clbrdrt\\brdrs\\brdrw10\\clbrdrl\\brdrs\\brdrw10\\clbrdrb\\brdrs\\brdrw10\\clbrdrr\\brdrs\\brdrw10"
        } else {
            ""
        };
        let mut markup = String::new();
        for row in &table.rows {
            markup.push_str(&format!("\\trowd\\trgaph{CELL_GAP}\\trleft0"));
            let mut edge = 0;
            for width in widths.iter().take(row.len()) {
                edge += width;
                markup.push_str(&format!("{border}\\cellx{edge}"));
            }
            markup.push('\n');
            for (n, cell) in row.iter().enumerate() {
                let align = match cell.justification.or_else(|| table.justification.get(n).copied()) {
                    Some(Justification::Center) => "\\qc",
                    Some(Justification::Right) => "\\qr",
                    _ => "\\ql",
                };
                let bold = if cell.header { "\\b" } else { "" };
                markup.push_str(&format!(
                    "\\pard\\intbl{align}\\f1\\fs20{bold} {}\\b0\\cell\n",
                    cell.content
                ));
            }
            markup.push_str("\\row\n");
        }
        markup.push_str("\\pard\n");
        if let Some(caption) = table.caption {
            markup.push_str(&format!("{{\\pard\\qc\\sa120\\f0\\fs20\\i {caption}\\par}}\n"));
        }
        self.write(&markup)
    }

    fn end_verbatim(&mut self) -> Result<(), SinkError> {
        self.verbatim = false;
        let raw = self.out.release();
        let lines: Vec<String> = raw.trim_end_matches('\n').split('\n').map(escape).collect();
        self.write(&lines.join("\\line\n"))?;
        self.write("\\par}\n")
    }

    fn start_inline(&mut self, event: &Event) -> Result<(), SinkError> {
        let wanted = decorations(&event.attributes);
        let code = wanted.contains(&Decoration::Code);
        if code {
            self.monospaced += 1;
        }
        if wanted.is_empty() {
            self.spans.push((1, false));
            return self.write("{");
        }
        let open: String = wanted
            .iter()
            .map(|d| match d {
                Decoration::Bold => "{\\b ",
                Decoration::Italic => "{\\i ",
                Decoration::Code => "{\\f2 ",
                Decoration::Underline => "{\\ul ",
                Decoration::Strikethrough => "{\\strike ",
                Decoration::Subscript => "{\\sub ",
                Decoration::Superscript => "{\\super ",
            })
            .collect();
        self.spans.push((wanted.len(), code));
        self.write(&open)
    }

    fn end_span(&mut self) -> Result<(), SinkError> {
        let (count, code) = self.spans.pop().unwrap_or((1, false));
        if code {
            self.monospaced = self.monospaced.saturating_sub(1);
        }
        self.write(&"}".repeat(count))
    }

    fn text(&mut self, text: &str) -> Result<(), SinkError> {
        if self.verbatim {
            return self.write(text);
        }
        if !self.in_paragraph {
            self.fresh = false;
        }
        let monospaced = self.monospaced > 0;
        if let Some(cell) = self.current_cell() {
            cell.line += text_width(text, monospaced);
        }
        self.write(&escape(text))
    }

    fn line_break(&mut self) -> Result<(), SinkError> {
        if let Some(cell) = self.current_cell() {
            cell.width = cell.width.max(cell.line);
            cell.line = 0;
        }
        self.write("\\line ")
    }
}

impl<W: Write> Sink for RtfSink<W> {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        unused_attributes(self.log.as_ref(), "rtf", event, RTF_KEYS);

        use EventKind::*;
        match &event.kind {
            StartHead | StartBody => self.open_document()?,
            EndHead => {}
            EndBody => self.write("}\n")?,
            StartTitle => self.write("{\\pard\\qc\\sa240\\f1\\b\\fs36 ")?,
            StartAuthor | StartDate => self.write("{\\pard\\qc\\sa120\\f1\\fs24 ")?,
            EndTitle | EndAuthor | EndDate => self.write("\\par}\n")?,

            StartSection(_) | EndSection(_) => {}
            StartSectionTitle(level) => self.write(&format!(
                "{{\\pard\\sb240\\sa120\\keepn\\f1\\b\\fs{} ",
                heading_size(*level)
            ))?,
            EndSectionTitle(_) => self.write("\\par}\n")?,

            StartParagraph => {
                self.paragraph_align = match event.attributes.justification() {
                    Some(Justification::Center) => Some("\\qc"),
                    Some(Justification::Right) => Some("\\qr"),
                    _ => None,
                };
                self.in_paragraph = true;
                self.out.capture();
            }
            EndParagraph => self.end_paragraph()?,

            StartList => self.start_list(None)?,
            StartNumberedList(numbering) => self.start_list(Some(*numbering))?,
            EndList | EndNumberedList => {
                self.lists.pop();
            }
            StartListItem | StartNumberedListItem => self.start_item()?,
            EndListItem | EndNumberedListItem | EndDefinedTerm | EndDefinition => {
                self.leave();
                self.write("\\par}\n")?;
            }
            StartDefinitionList | EndDefinitionList => {}
            StartDefinitionListItem | EndDefinitionListItem => {}
            StartDefinedTerm => {
                self.write("{\\pard\\sa60\\f0\\fs20\\b ")?;
                self.enter();
            }
            StartDefinition => {
                self.write("{\\pard\\li720\\sa120\\f0\\fs20 ")?;
                self.enter();
            }

            StartTable => self.tables.push(Table {
                justification: Vec::new(),
                grid: false,
                rows: Vec::new(),
                caption: None,
            }),
            StartTableRows {
                justification,
                grid,
            } => {
                if let Some(table) = self.tables.last_mut() {
                    table.justification = justification.clone();
                    table.grid = *grid;
                }
            }
            EndTableRows | EndTableRow => {}
            StartTableRow => {
                if let Some(table) = self.tables.last_mut() {
                    table.rows.push(Vec::new());
                }
            }
            StartTableCell {
                header,
                justification,
            } => self.start_cell(*header, *justification),
            EndTableCell => self.end_cell(),
            StartTableCaption => self.out.capture(),
            EndTableCaption => {
                let caption = self.out.release();
                if let Some(table) = self.tables.last_mut() {
                    table.caption = Some(caption);
                }
            }
            EndTable => self.end_table()?,

            StartFigure => self.write("{\\pard\\qc\\sa120 ")?,
            EndFigure => self.write("\\par}\n")?,
            FigureGraphics(src) => self.write(&format!(
                "{{\\field{{\\*\\fldinst {{INCLUDEPICTURE \"{}\" \\\\d}}}}{{\\fldrslt {{}}}}}}",
                escape(src)
            ))?,
            StartFigureCaption => self.write("\\line {\\i ")?,
            EndFigureCaption => self.write("}")?,

            StartVerbatim { boxed } => {
                let frame = if *boxed {
                    "\\box\\brdrs\\brdrw10\\brsp40"
                } else {
                    ""
                };
                self.write(&format!("{{\\pard{frame}\\sa120\\f2\\fs18 "))?;
                self.verbatim = true;
                self.out.capture();
            }
            EndVerbatim => self.end_verbatim()?,

            StartAnchor(id) => {
                self.write(&format!("{{\\*\\bkmkstart {}}}", escape(id)))?;
                self.anchors.push(id.clone());
            }
            EndAnchor => {
                if let Some(id) = self.anchors.pop() {
                    self.write(&format!("{{\\*\\bkmkend {}}}", escape(&id)))?;
                }
            }
            StartLink(target) => {
                let instruction = match target.strip_prefix('#') {
                    Some(id) => format!("HYPERLINK \\\\l \"{}\"", escape(id)),
                    None => format!("HYPERLINK \"{}\"", escape(target)),
                };
                self.write(&format!(
                    "{{\\field{{\\*\\fldinst {{{instruction}}}}}{{\\fldrslt {{\\ul "
                ))?;
            }
            EndLink => self.write("}}}")?,
            StartBold => {
                self.spans.push((1, false));
                self.write("{\\b ")?;
            }
            StartItalic => {
                self.spans.push((1, false));
                self.write("{\\i ")?;
            }
            StartMonospaced => {
                self.spans.push((1, true));
                self.monospaced += 1;
                self.write("{\\f2 ")?;
            }
            StartInline => self.start_inline(event)?,
            EndBold | EndItalic | EndMonospaced | EndInline => self.end_span()?,

            LineBreak => self.line_break()?,
            NonBreakingSpace => self.write("\\~")?,
            HorizontalRule => self.write("{\\pard\\brdrb\\brdrs\\brdrw10\\brsp20\\par}\n")?,
            PageBreak => self.write("\\page\n")?,
            Text(text) => self.text(text)?,
            RawText(text) => self.write(text)?,
            Comment(_) => self.log.debug("rtf: comments are not written"),
            Unknown { .. } => ignored(self.log.as_ref(), "rtf", event),
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(self.out.flush()?)
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.flush()?;
        self.out.reset();
        self.opened = false;
        self.lists.clear();
        self.containers = 0;
        self.fresh = true;
        self.in_paragraph = false;
        self.paragraph_align = None;
        self.spans.clear();
        self.monospaced = 0;
        self.anchors.clear();
        self.tables.clear();
        self.verbatim = false;
        Ok(())
    }
}

const RTF_KEYS: &[&str] = &[keys::ALIGN, keys::SEMANTICS, keys::DECORATION, keys::VALIGN];

/// Heading font size in half-points.
fn heading_size(level: u8) -> u8 {
    match level {
        0 | 1 => 32,
        2 => 28,
        3 => 24,
        4 => 22,
        _ => 20,
    }
}
