//! Markdown parser backed by `pulldown-cmark`, with GFM tables,
//! strikethrough and task lists enabled.

use pulldown_cmark::{Alignment, CodeBlockKind, Event as MdEvent, Options, Tag};

use crate::attrs::AttributeSet;
use crate::error::ParseError;
use crate::event::{EventKind, Justification, Numbering};
use crate::parser::{Emitter, ParseOptions, ParseReport, Parser, normalize_newlines};
use crate::sink::Sink;

use super::SectionStack;

pub struct MarkdownParser;

impl Parser for MarkdownParser {
    fn id(&self) -> &'static str {
        "markdown"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["md", "markdown"]
    }

    fn parse(
        &self,
        input: &str,
        sink: &mut dyn Sink,
        options: &ParseOptions,
    ) -> Result<ParseReport, ParseError> {
        let source = normalize_newlines(input);
        let mut md_options = Options::empty();
        md_options.insert(Options::ENABLE_TABLES);
        md_options.insert(Options::ENABLE_STRIKETHROUGH);
        md_options.insert(Options::ENABLE_TASKLISTS);
        md_options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

        let mut converter = Converter {
            emitter: Emitter::new(sink, options),
            sections: SectionStack::default(),
            open: Vec::new(),
            pending: String::new(),
            in_table_head: false,
            image: None,
        };
        converter.emitter.kind(EventKind::StartHead)?;
        converter.emitter.kind(EventKind::EndHead)?;
        converter.emitter.kind(EventKind::StartBody)?;

        let mut lines = LineCounter::new(&source);
        for (event, range) in pulldown_cmark::Parser::new_ext(&source, md_options).into_offset_iter() {
            converter.emitter.set_line(lines.line_at(range.start));
            converter.event(event)?;
        }

        converter.flush_text()?;
        converter.sections.close_from(&mut converter.emitter, 1)?;
        converter.emitter.kind(EventKind::EndBody)?;
        converter.emitter.finish()
    }
}

/// Maps byte offsets to 1-based line numbers, scanning forward only.
struct LineCounter<'s> {
    source: &'s str,
    offset: usize,
    line: usize,
}

impl<'s> LineCounter<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            offset: 0,
            line: 1,
        }
    }

    fn line_at(&mut self, offset: usize) -> usize {
        if offset < self.offset {
            self.offset = 0;
            self.line = 1;
        }
        let end = offset.min(self.source.len());
        self.line += self
            .source
            .get(self.offset..end)
            .map_or(0, |s| s.matches('\n').count());
        self.offset = end;
        self.line
    }
}

/// What to do when the matching end tag arrives.
enum Scope {
    Plain,
    TableHead,
    Image,
}

struct Open {
    closes: Vec<EventKind>,
    scope: Scope,
}

struct Converter<'a> {
    emitter: Emitter<'a>,
    sections: SectionStack,
    open: Vec<Open>,
    /// Adjacent text and soft breaks, merged into one text event.
    pending: String,
    in_table_head: bool,
    image: Option<(String, String)>,
}

impl Converter<'_> {
    fn event(&mut self, event: MdEvent<'_>) -> Result<(), ParseError> {
        match event {
            MdEvent::Text(text) => {
                match &mut self.image {
                    Some((_, alt)) => alt.push_str(&text),
                    None => self.pending.push_str(&text),
                }
                Ok(())
            }
            MdEvent::SoftBreak => {
                self.pending.push('\n');
                Ok(())
            }
            MdEvent::Start(tag) => {
                self.flush_text()?;
                self.start(tag)
            }
            MdEvent::End(_) => {
                self.flush_text()?;
                self.end()
            }
            other => {
                self.flush_text()?;
                self.leaf(other)
            }
        }
    }

    fn flush_text(&mut self) -> Result<(), ParseError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.pending);
        self.emitter.text(&text)
    }

    fn push(&mut self, closes: Vec<EventKind>) {
        self.open.push(Open {
            closes,
            scope: Scope::Plain,
        });
    }

    fn start(&mut self, tag: Tag<'_>) -> Result<(), ParseError> {
        use EventKind as E;
        match tag {
            Tag::Heading { level, id, .. } => {
                let level = (level as u8).min(5);
                self.sections.open(&mut self.emitter, level)?;
                self.emitter.kind(E::StartSectionTitle(level))?;
                if let Some(id) = id {
                    self.emitter.kind(E::StartAnchor(id.to_string()))?;
                    self.emitter.kind(E::EndAnchor)?;
                }
                self.push(vec![E::EndSectionTitle(level)]);
            }
            Tag::Paragraph => {
                self.emitter.kind(E::StartParagraph)?;
                self.push(vec![E::EndParagraph]);
            }
            Tag::CodeBlock(kind) => {
                let boxed = matches!(kind, CodeBlockKind::Fenced(_));
                self.emitter.kind(E::StartVerbatim { boxed })?;
                self.push(vec![E::EndVerbatim]);
            }
            Tag::List(None) => {
                self.emitter.kind(E::StartList)?;
                self.push(vec![E::EndList]);
            }
            Tag::List(Some(_)) => {
                self.emitter.kind(E::StartNumberedList(Numbering::Decimal))?;
                self.push(vec![E::EndNumberedList]);
            }
            Tag::Item => {
                let numbered = self
                    .open
                    .last()
                    .is_some_and(|o| o.closes.first() == Some(&E::EndNumberedList));
                let (start, end) = if numbered {
                    (E::StartNumberedListItem, E::EndNumberedListItem)
                } else {
                    (E::StartListItem, E::EndListItem)
                };
                self.emitter.kind(start)?;
                self.push(vec![end]);
            }
            Tag::Table(alignments) => {
                let justification = alignments
                    .iter()
                    .map(|a| match a {
                        Alignment::Center => Justification::Center,
                        Alignment::Right => Justification::Right,
                        Alignment::Left | Alignment::None => Justification::Left,
                    })
                    .collect();
                self.emitter.kind(E::StartTable)?;
                self.emitter.kind(E::StartTableRows {
                    justification,
                    grid: true,
                })?;
                self.push(vec![E::EndTableRows, E::EndTable]);
            }
            Tag::TableHead => {
                self.emitter.kind(E::StartTableRow)?;
                self.in_table_head = true;
                self.open.push(Open {
                    closes: vec![E::EndTableRow],
                    scope: Scope::TableHead,
                });
            }
            Tag::TableRow => {
                self.emitter.kind(E::StartTableRow)?;
                self.push(vec![E::EndTableRow]);
            }
            Tag::TableCell => {
                self.emitter.kind(E::StartTableCell {
                    header: self.in_table_head,
                    justification: None,
                })?;
                self.push(vec![E::EndTableCell]);
            }
            Tag::Emphasis => {
                self.emitter.kind(E::StartItalic)?;
                self.push(vec![E::EndItalic]);
            }
            Tag::Strong => {
                self.emitter.kind(E::StartBold)?;
                self.push(vec![E::EndBold]);
            }
            Tag::Strikethrough => {
                self.emitter
                    .with_attributes(E::StartInline, AttributeSet::strikethrough())?;
                self.push(vec![E::EndInline]);
            }
            Tag::Link { dest_url, .. } => {
                self.emitter.kind(E::StartLink(dest_url.to_string()))?;
                self.push(vec![E::EndLink]);
            }
            Tag::Image { dest_url, .. } => {
                self.image = Some((dest_url.to_string(), String::new()));
                self.open.push(Open {
                    closes: Vec::new(),
                    scope: Scope::Image,
                });
            }
            other => {
                self.emitter
                    .options()
                    .log
                    .debug(&format!("markdown: passing through {other:?}"));
                self.push(Vec::new());
            }
        }
        Ok(())
    }

    fn end(&mut self) -> Result<(), ParseError> {
        let Some(open) = self.open.pop() else {
            return Ok(());
        };
        match open.scope {
            Scope::Plain => {}
            Scope::TableHead => self.in_table_head = false,
            Scope::Image => {
                if let Some((src, alt)) = self.image.take() {
                    let mut attributes = AttributeSet::new();
                    if !alt.is_empty() {
                        attributes.insert("alt", alt);
                    }
                    self.emitter
                        .with_attributes(EventKind::FigureGraphics(src), attributes)?;
                }
            }
        }
        for close in open.closes {
            self.emitter.kind(close)?;
        }
        Ok(())
    }

    fn leaf(&mut self, event: MdEvent<'_>) -> Result<(), ParseError> {
        use EventKind as E;
        match event {
            MdEvent::Code(code) => {
                self.emitter.kind(E::StartMonospaced)?;
                self.emitter.text(&code)?;
                self.emitter.kind(E::EndMonospaced)
            }
            MdEvent::HardBreak => self.emitter.kind(E::LineBreak),
            MdEvent::Rule => self.emitter.kind(E::HorizontalRule),
            MdEvent::Html(html) | MdEvent::InlineHtml(html) => {
                self.emitter.kind(E::RawText(html.to_string()))
            }
            MdEvent::TaskListMarker(done) => self.emitter.text(if done { "[x] " } else { "[ ] " }),
            other => {
                self.emitter
                    .options()
                    .log
                    .debug(&format!("markdown: ignoring {other:?}"));
                Ok(())
            }
        }
    }
}
