//! Confluence wiki markup output.

use std::io::Write;
use std::sync::Arc;

use crate::error::SinkError;
use crate::event::{Event, EventKind};
use crate::logging::{self, Log};
use crate::sink::Sink;

use super::{Decoration, INLINE_KEYS, Output, decorations, ignored, unused_attributes};

pub struct ConfluenceSink<W> {
    out: Output<W>,
    log: Arc<dyn Log>,
    lists: Vec<char>,
    line_open: bool,
    containers: usize,
    links: Vec<String>,
    spans: Vec<Vec<&'static str>>,
    header_cell: bool,
    verbatim: Option<bool>,
}

impl<W: Write> ConfluenceSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Output::new(out),
            log: logging::noop(),
            lists: Vec::new(),
            line_open: false,
            containers: 0,
            links: Vec::new(),
            spans: Vec::new(),
            header_cell: false,
            verbatim: None,
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
        if let Some(last) = s.chars().last() {
            self.line_open = last != '\n';
        }
        Ok(self.out.write(s)?)
    }

    fn end_line(&mut self) -> Result<(), SinkError> {
        if self.line_open {
            self.write("\n")?;
        }
        Ok(())
    }

    fn end_paragraph(&mut self) -> Result<(), SinkError> {
        let content = self.out.release();
        if content.trim().is_empty() {
            return Ok(());
        }
        self.write(&content)?;
        if self.containers == 0 {
            self.write("\n\n")?;
        }
        Ok(())
    }

    fn start_list(&mut self, marker: char) -> Result<(), SinkError> {
        self.end_line()?;
        self.lists.push(marker);
        Ok(())
    }

    fn end_list(&mut self) -> Result<(), SinkError> {
        self.lists.pop();
        self.end_line()?;
        if self.lists.is_empty() {
            self.write("\n")?;
        }
        Ok(())
    }

    fn start_item(&mut self) -> Result<(), SinkError> {
        let marker: String = self.lists.iter().collect();
        self.containers += 1;
        self.write(&format!("{marker} "))
    }

    fn end_link(&mut self) -> Result<(), SinkError> {
        let label = self.out.release();
        let target = self.links.pop().unwrap_or_default();
        if label.trim().is_empty() || label == escape(&target) {
            self.write(&format!("[{target}]"))
        } else {
            self.write(&format!("[{label}|{target}]"))
        }
    }

    fn start_inline(&mut self, event: &Event) -> Result<(), SinkError> {
        let marks: Vec<(&'static str, &'static str)> = decorations(&event.attributes)
            .into_iter()
            .map(|d| match d {
                Decoration::Bold => ("*", "*"),
                Decoration::Italic => ("_", "_"),
                Decoration::Code => ("{{", "}}"),
                Decoration::Underline => ("+", "+"),
                Decoration::Strikethrough => ("-", "-"),
                Decoration::Subscript => ("~", "~"),
                Decoration::Superscript => ("^", "^"),
            })
            .collect();
        let open: String = marks.iter().map(|(open, _)| *open).collect();
        self.spans
            .push(marks.into_iter().rev().map(|(_, close)| close).collect());
        self.write(&open)
    }

    fn end_inline(&mut self) -> Result<(), SinkError> {
        let close: String = self.spans.pop().unwrap_or_default().concat();
        self.write(&close)
    }

    fn end_verbatim(&mut self) -> Result<(), SinkError> {
        let boxed = self.verbatim.take().unwrap_or(false);
        self.end_line()?;
        self.write(if boxed { "{code}\n\n" } else { "{noformat}\n\n" })
    }
}

impl<W: Write> Sink for ConfluenceSink<W> {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        unused_attributes(self.log.as_ref(), "confluence", event, INLINE_KEYS);

        use EventKind::*;
        match &event.kind {
            // Confluence pages carry their metadata outside the markup.
            StartHead => self.out.capture(),
            EndHead => {
                self.out.release();
            }
            StartTitle | EndTitle | StartAuthor | EndAuthor | StartDate | EndDate => {}
            StartBody | EndBody => {}

            StartSection(_) | EndSection(_) => {}
            StartSectionTitle(level) => self.write(&format!("h{level}. "))?,
            EndSectionTitle(_) => self.write("\n\n")?,

            StartParagraph => self.out.capture(),
            EndParagraph => self.end_paragraph()?,

            StartList => self.start_list('*')?,
            StartNumberedList(_) => self.start_list('#')?,
            EndList | EndNumberedList => self.end_list()?,
            StartListItem | StartNumberedListItem => self.start_item()?,
            EndListItem | EndNumberedListItem | EndDefinition => {
                self.containers = self.containers.saturating_sub(1);
                self.end_line()?;
            }
            StartDefinitionList | StartDefinitionListItem | EndDefinitionListItem => {}
            EndDefinitionList => self.write("\n")?,
            StartDefinedTerm => self.write("*")?,
            EndDefinedTerm => self.write("*\n")?,
            StartDefinition => self.containers += 1,

            StartTable | StartTableRows { .. } | StartTableRow => {}
            StartTableCell { header, .. } => {
                self.header_cell = *header;
                self.containers += 1;
                self.write(if *header { "||" } else { "|" })?;
            }
            EndTableCell => self.containers = self.containers.saturating_sub(1),
            EndTableRow => self.write(if self.header_cell { "||\n" } else { "|\n" })?,
            EndTableRows => self.write("\n")?,
            StartTableCaption | EndTable => {}
            EndTableCaption => self.write("\n\n")?,

            StartFigure | StartFigureCaption => {}
            FigureGraphics(src) => self.write(&format!("!{src}!"))?,
            EndFigureCaption => {}
            EndFigure => self.write("\n\n")?,

            StartVerbatim { boxed } => {
                self.end_line()?;
                self.verbatim = Some(*boxed);
                self.write(if *boxed {
                    "{code:borderStyle=solid}\n"
                } else {
                    "{noformat}\n"
                })?;
            }
            EndVerbatim => self.end_verbatim()?,

            StartAnchor(id) => self.write(&format!("{{anchor:{id}}}"))?,
            EndAnchor => {}
            StartLink(target) => {
                self.links.push(target.clone());
                self.out.capture();
            }
            EndLink => self.end_link()?,
            StartBold | EndBold => self.write("*")?,
            StartItalic | EndItalic => self.write("_")?,
            StartMonospaced => self.write("{{")?,
            EndMonospaced => self.write("}}")?,
            StartInline => self.start_inline(event)?,
            EndInline => self.end_inline()?,

            LineBreak => self.write("\\\\")?,
            NonBreakingSpace => self.write("&#160;")?,
            HorizontalRule => {
                self.end_line()?;
                self.write("----\n\n")?;
            }
            PageBreak => self.log.debug("confluence: page breaks are not written"),
            Text(text) if self.verbatim.is_some() => self.write(text)?,
            Text(text) => self.write(&escape(text))?,
            RawText(text) => self.write(text)?,
            Comment(_) => self.log.debug("confluence: comments are not written"),
            Unknown { .. } => ignored(self.log.as_ref(), "confluence", event),
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(self.out.flush()?)
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.flush()?;
        self.out.reset();
        self.lists.clear();
        self.line_open = false;
        self.containers = 0;
        self.links.clear();
        self.spans.clear();
        self.header_cell = false;
        self.verbatim = None;
        Ok(())
    }
}

/// Backslash the characters Confluence reads as markup.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '*' | '_' | '{' | '}' | '[' | ']' | '|') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
