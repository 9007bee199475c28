//! iText XML output, the intermediate markup a PDF renderer consumes.
//!
//! Every run of text becomes a `<chunk>` carrying the complete font state,
//! so styling is tracked here rather than by nesting elements. Tables are
//! buffered until they close because `<table>` must declare its column
//! count up front.

use std::io::Write;
use std::sync::Arc;

use crate::attrs::keys;
use crate::error::SinkError;
use crate::event::{Event, EventKind, Justification, Numbering};
use crate::logging::{self, Log};
use crate::sink::Sink;

use super::{Decoration, Output, decorations, escape_xml, ignored, unused_attributes};

const HELVETICA: &str = "Helvetica";
const COURIER: &str = "Courier";
const BODY_SIZE: f32 = 12.0;
const CHAPTER_SIZE: f32 = 24.0;

const ITEXT_KEYS: &[&str] = &[keys::ALIGN, keys::SEMANTICS, keys::DECORATION, keys::VALIGN];

fn section_size(level: u8) -> f32 {
    match level {
        1 => 22.0,
        2 => 20.0,
        3 => 18.0,
        4 => 16.0,
        _ => 14.0,
    }
}

/// Style counters, so nested or repeated spans unwind cleanly.
#[derive(Debug, Default, Clone)]
struct Font {
    bold: usize,
    italic: usize,
    mono: usize,
    underline: usize,
    strike: usize,
    link: usize,
    rise: f32,
    size: Option<f32>,
}

impl Font {
    fn apply(&mut self, decoration: Decoration, on: bool) {
        let counter = match decoration {
            Decoration::Bold => &mut self.bold,
            Decoration::Italic => &mut self.italic,
            Decoration::Code => &mut self.mono,
            Decoration::Underline => &mut self.underline,
            Decoration::Strikethrough => &mut self.strike,
            Decoration::Subscript | Decoration::Superscript => {
                let rise = if decoration == Decoration::Superscript { 3.0 } else { -3.0 };
                self.rise += if on { rise } else { -rise };
                return;
            }
        };
        if on {
            *counter += 1;
        } else {
            *counter = counter.saturating_sub(1);
        }
    }

    fn style(&self) -> String {
        let mut parts = Vec::new();
        if self.bold > 0 {
            parts.push("bold");
        }
        if self.italic > 0 {
            parts.push("italic");
        }
        if self.underline > 0 || self.link > 0 {
            parts.push("underline");
        }
        if self.strike > 0 {
            parts.push("line-through");
        }
        if parts.is_empty() {
            "normal".to_string()
        } else {
            parts.join(",")
        }
    }

    fn chunk(&self, text: &str) -> String {
        let name = if self.mono > 0 { COURIER } else { HELVETICA };
        let size = self.size.unwrap_or(BODY_SIZE);
        let mut tag = format!(
            "<chunk font=\"{name}\" size=\"{size:.1}\" style=\"{}\"",
            self.style()
        );
        if self.link > 0 {
            tag.push_str(" red=\"0\" green=\"0\" blue=\"255\"");
        }
        if self.rise != 0.0 {
            tag.push_str(&format!(" subsupscript=\"{:.1}\"", self.rise));
        }
        format!("{tag}>{}</chunk>", escape_xml(text))
    }
}

#[derive(Debug, Clone, Copy)]
enum HeadField {
    Title,
    Author,
    Date,
}

#[derive(Debug, Default)]
struct Head {
    title: String,
    authors: Vec<String>,
    date: String,
}

#[derive(Debug)]
struct TableState {
    grid: bool,
    columns: usize,
    cells_in_row: usize,
    header_cell: bool,
    justification: Vec<Justification>,
    caption: Option<String>,
}

pub struct ITextSink<W> {
    out: Output<W>,
    log: Arc<dyn Log>,
    font: Font,
    head: Head,
    field: Option<HeadField>,
    spans: Vec<Vec<Decoration>>,
    tables: Vec<TableState>,
    verbatim: bool,
}

impl<W: Write> ITextSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Output::new(out),
            log: logging::noop(),
            font: Font::default(),
            head: Head::default(),
            field: None,
            spans: Vec::new(),
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

    fn start_body(&mut self) -> Result<(), SinkError> {
        let title = escape_xml(&self.head.title);
        let author = escape_xml(&self.head.authors.join(", "));
        let date = escape_xml(&self.head.date);
        self.write("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n")?;
        self.write(&format!(
            "<itext title=\"{title}\" author=\"{author}\" creationdate=\"{date}\" \
             subject=\"{title}\" keywords=\"\" producer=\"docsink\" pagesize=\"A4\">\n"
        ))?;
        self.write("<chapter numberdepth=\"0\" depth=\"1\" indent=\"0.0\">\n")?;
        self.write(&format!(
            "<title font=\"{HELVETICA}\" size=\"{CHAPTER_SIZE:.1}\" style=\"bold\" align=\"Center\">\
             <chunk font=\"{HELVETICA}\" size=\"{CHAPTER_SIZE:.1}\" style=\"bold\" \
             localdestination=\"top\">{title}</chunk></title>\n"
        ))
    }

    fn head_text(&mut self, field: HeadField, text: &str) {
        match field {
            HeadField::Title => self.head.title.push_str(text),
            HeadField::Date => self.head.date.push_str(text),
            HeadField::Author => match self.head.authors.last_mut() {
                Some(author) => author.push_str(text),
                None => self.head.authors.push(text.to_string()),
            },
        }
    }

    fn start_list(&mut self, numbering: Option<Numbering>) -> Result<(), SinkError> {
        let tag = match numbering {
            None => "<list numbered=\"false\" symbolindent=\"15\">".to_string(),
            Some(Numbering::Decimal) => {
                "<list numbered=\"true\" lettered=\"false\" symbolindent=\"20\">".to_string()
            }
            Some(style) => {
                // Roman numerals have no native form; they fall back to letters.
                let first = match style {
                    Numbering::UpperAlpha | Numbering::UpperRoman => 'A',
                    _ => 'a',
                };
                format!("<list numbered=\"true\" lettered=\"true\" first=\"{first}\" symbolindent=\"20\">")
            }
        };
        self.write(&tag)?;
        self.write("\n")
    }

    fn start_table(&mut self) {
        self.tables.push(TableState {
            grid: false,
            columns: 0,
            cells_in_row: 0,
            header_cell: false,
            justification: Vec::new(),
            caption: None,
        });
        self.out.capture();
    }

    fn start_cell(&mut self, header: bool, justification: Option<Justification>) -> Result<(), SinkError> {
        let (align, border) = match self.tables.last_mut() {
            Some(table) => {
                table.header_cell = header;
                let column = table.cells_in_row;
                table.cells_in_row += 1;
                table.columns = table.columns.max(table.cells_in_row);
                let align = justification
                    .or_else(|| table.justification.get(column).copied())
                    .unwrap_or(if header { Justification::Center } else { Justification::Left });
                (align, if table.grid { "1" } else { "0" })
            }
            None => (Justification::Left, "0"),
        };
        let align = capitalized(align);
        if header {
            self.font.bold += 1;
            self.write(&format!(
                "<cell header=\"true\" borderwidth=\"{border}\" horizontalalign=\"{align}\">"
            ))
        } else {
            self.write(&format!(
                "<cell borderwidth=\"{border}\" horizontalalign=\"{align}\">"
            ))
        }
    }

    fn end_table(&mut self) -> Result<(), SinkError> {
        let rows = self.out.release();
        let Some(table) = self.tables.pop() else {
            return self.write(&rows);
        };
        let columns = table.columns.max(table.justification.len()).max(1);
        let border = if table.grid { "1" } else { "0" };
        self.write(&format!(
            "<table columns=\"{columns}\" width=\"100.0%\" borderwidth=\"{border}\" \
             cellpadding=\"10\" align=\"Center\">\n"
        ))?;
        self.write(&rows)?;
        self.write("</table>\n")?;
        if let Some(caption) = table.caption {
            self.write(&format!("<paragraph align=\"Center\">{caption}</paragraph>\n"))?;
        }
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<(), SinkError> {
        if let Some(field) = self.field {
            self.head_text(field, text);
            return Ok(());
        }
        if self.verbatim {
            let mut lines = text.split('\n').peekable();
            while let Some(line) = lines.next() {
                if !line.is_empty() {
                    let chunk = self.font.chunk(line);
                    self.write(&chunk)?;
                }
                if lines.peek().is_some() {
                    self.write("<newline/>\n")?;
                }
            }
            return Ok(());
        }
        let chunk = self.font.chunk(text);
        self.write(&chunk)
    }

    fn start_inline(&mut self, event: &Event) {
        let applied = decorations(&event.attributes);
        for decoration in &applied {
            self.font.apply(*decoration, true);
        }
        self.spans.push(applied);
    }

    fn end_inline(&mut self) {
        for decoration in self.spans.pop().unwrap_or_default() {
            self.font.apply(decoration, false);
        }
    }
}

fn capitalized(justification: Justification) -> &'static str {
    match justification {
        Justification::Left => "Left",
        Justification::Center => "Center",
        Justification::Right => "Right",
    }
}

impl<W: Write> Sink for ITextSink<W> {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        unused_attributes(self.log.as_ref(), "itext", event, ITEXT_KEYS);

        use EventKind::*;
        match &event.kind {
            StartHead | EndHead => {}
            StartTitle => self.field = Some(HeadField::Title),
            StartAuthor => {
                self.head.authors.push(String::new());
                self.field = Some(HeadField::Author);
            }
            StartDate => self.field = Some(HeadField::Date),
            EndTitle | EndAuthor | EndDate => self.field = None,
            StartBody => self.start_body()?,
            EndBody => self.write("</chapter>\n</itext>\n")?,

            StartSection(level) => self.write(&format!(
                "<section numberdepth=\"{level}\" depth=\"{level}\" indent=\"0.0\">\n"
            ))?,
            EndSection(_) => self.write("</section>\n")?,
            StartSectionTitle(level) => {
                let size = section_size(*level);
                self.font.size = Some(size);
                self.font.bold += 1;
                self.write(&format!(
                    "<title font=\"{HELVETICA}\" size=\"{size:.1}\" style=\"bold\">"
                ))?;
            }
            EndSectionTitle(_) => {
                self.font.size = None;
                self.font.bold = self.font.bold.saturating_sub(1);
                self.write("</title>\n")?;
            }

            StartParagraph => match event.attributes.justification() {
                Some(align) => self.write(&format!(
                    "<paragraph leading=\"18.0\" align=\"{}\">",
                    capitalized(align)
                ))?,
                None => self.write("<paragraph leading=\"18.0\">")?,
            },
            EndParagraph => self.write("</paragraph>\n")?,

            StartList => self.start_list(None)?,
            StartNumberedList(numbering) => self.start_list(Some(*numbering))?,
            EndList | EndNumberedList => self.write("</list>\n")?,
            StartListItem | StartNumberedListItem => {
                self.write("<listitem indentationleft=\"20.0\">")?
            }
            EndListItem | EndNumberedListItem => self.write("</listitem>\n")?,
            StartDefinitionList | EndDefinitionList => {}
            StartDefinitionListItem | EndDefinitionListItem => {}
            StartDefinedTerm => {
                self.font.bold += 1;
                self.write("<paragraph leading=\"18.0\">")?;
            }
            EndDefinedTerm => {
                self.font.bold = self.font.bold.saturating_sub(1);
                self.write("</paragraph>\n")?;
            }
            StartDefinition => self.write("<paragraph leading=\"18.0\" indentationleft=\"20.0\">")?,
            EndDefinition => self.write("</paragraph>\n")?,

            StartTable => self.start_table(),
            StartTableRows {
                justification,
                grid,
            } => {
                if let Some(table) = self.tables.last_mut() {
                    table.grid = *grid;
                    table.justification = justification.clone();
                }
            }
            EndTableRows => {}
            StartTableRow => {
                if let Some(table) = self.tables.last_mut() {
                    table.cells_in_row = 0;
                }
                self.write("<row>\n")?;
            }
            EndTableRow => self.write("</row>\n")?,
            StartTableCell {
                header,
                justification,
            } => self.start_cell(*header, *justification)?,
            EndTableCell => {
                if self.tables.last().is_some_and(|table| table.header_cell) {
                    self.font.bold = self.font.bold.saturating_sub(1);
                }
                self.write("</cell>\n")?;
            }
            StartTableCaption => self.out.capture(),
            EndTableCaption => {
                let caption = self.out.release();
                if let Some(table) = self.tables.last_mut() {
                    table.caption = Some(caption);
                }
            }
            EndTable => self.end_table()?,

            StartFigure | EndFigure => {}
            FigureGraphics(src) => self.write(&format!(
                "<image url=\"{}\" align=\"Middle\"/>\n",
                escape_xml(src)
            ))?,
            StartFigureCaption => self.write("<paragraph align=\"Center\">")?,
            EndFigureCaption => self.write("</paragraph>\n")?,

            StartVerbatim { boxed } => {
                self.verbatim = true;
                self.font.mono += 1;
                let border = if *boxed { "1" } else { "0" };
                self.write(&format!(
                    "<table columns=\"1\" width=\"100.0%\" borderwidth=\"{border}\" \
                     cellpadding=\"10\" align=\"Center\">\n<row>\n<cell>"
                ))?;
            }
            EndVerbatim => {
                self.verbatim = false;
                self.font.mono = self.font.mono.saturating_sub(1);
                self.write("</cell>\n</row>\n</table>\n")?;
            }

            StartAnchor(id) => self.write(&format!("<anchor name=\"{}\">", escape_xml(id)))?,
            EndAnchor => self.write("</anchor>")?,
            StartLink(target) => {
                self.font.link += 1;
                self.write(&format!("<anchor reference=\"{}\">", escape_xml(target)))?;
            }
            EndLink => {
                self.font.link = self.font.link.saturating_sub(1);
                self.write("</anchor>")?;
            }
            StartBold => self.font.bold += 1,
            EndBold => self.font.bold = self.font.bold.saturating_sub(1),
            StartItalic => self.font.italic += 1,
            EndItalic => self.font.italic = self.font.italic.saturating_sub(1),
            StartMonospaced => self.font.mono += 1,
            EndMonospaced => self.font.mono = self.font.mono.saturating_sub(1),
            StartInline => self.start_inline(event),
            EndInline => self.end_inline(),

            LineBreak if self.field.is_some() => {}
            LineBreak => self.write("<newline/>\n")?,
            NonBreakingSpace => self.text("\u{a0}")?,
            HorizontalRule => self.write("<horizontalrule/>\n")?,
            PageBreak => self.write("<newpage/>\n")?,
            Text(text) => self.text(text)?,
            RawText(text) => self.write(text)?,
            Comment(_) => self.log.debug("itext: comments are not written"),
            Unknown { .. } => ignored(self.log.as_ref(), "itext", event),
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(self.out.flush()?)
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.flush()?;
        self.out.reset();
        self.font = Font::default();
        self.head = Head::default();
        self.field = None;
        self.spans.clear();
        self.tables.clear();
        self.verbatim = false;
        Ok(())
    }
}
