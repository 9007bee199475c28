//! XHTML, XHTML5 and Xdoc output.
//!
//! The three share the body markup. They differ in the document shell,
//! in how sections are written (`<div class="section">`, `<section>`, or
//! Xdoc's named `<section>`/`<subsection>`), and in source blocks.

use std::io::Write;
use std::sync::Arc;

use crate::attrs::keys;
use crate::error::SinkError;
use crate::event::{Event, EventKind, Justification, Numbering};
use crate::id::is_external_link;
use crate::logging::{self, Log};
use crate::sink::Sink;

use super::{
    Decoration, Output, decorations, escape_xml, ignored, unused_attributes,
    xml_comment,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Xhtml,
    Xhtml5,
    Xdoc,
}

impl Flavor {
    pub fn id(self) -> &'static str {
        match self {
            Flavor::Xhtml => "xhtml",
            Flavor::Xhtml5 => "xhtml5",
            Flavor::Xdoc => "xdoc",
        }
    }

    fn prologue(self) -> &'static str {
        match self {
            Flavor::Xhtml => concat!(
                "<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.0 Transitional//EN\" ",
                "\"http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd\">\n",
                "<html xmlns=\"http://www.w3.org/1999/xhtml\">\n"
            ),
            Flavor::Xhtml5 => "<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">\n",
            Flavor::Xdoc => "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<document>\n",
        }
    }

    fn epilogue(self) -> &'static str {
        match self {
            Flavor::Xdoc => "</document>\n",
            _ => "</html>\n",
        }
    }
}

/// Attributes copied onto the generated element.
const PASSTHROUGH: &[&str] = &[
    keys::CLASS,
    keys::STYLE,
    keys::ID,
    keys::TITLE,
    keys::LANG,
    keys::WIDTH,
    keys::ALIGN,
];

struct Table {
    justification: Vec<Justification>,
    grid: bool,
    cell: usize,
    header: bool,
    attributes: String,
    caption: String,
}

/// An Xdoc level 1 or 2 title, collected into the `name` attribute.
struct SectionName {
    level: u8,
    text: String,
    id: Option<String>,
}

pub struct XhtmlSink<W> {
    out: Output<W>,
    flavor: Flavor,
    log: Arc<dyn Log>,
    opened: bool,
    spans: Vec<Vec<&'static str>>,
    tables: Vec<Table>,
    verbatim: Vec<bool>,
    pending_section: Option<u8>,
    section_name: Option<SectionName>,
}

impl<W: Write> XhtmlSink<W> {
    pub fn new(out: W, flavor: Flavor) -> Self {
        Self {
            out: Output::new(out),
            flavor,
            log: logging::noop(),
            opened: false,
            spans: Vec::new(),
            tables: Vec::new(),
            verbatim: Vec::new(),
            pending_section: None,
            section_name: None,
        }
    }

    pub fn with_log(mut self, log: Arc<dyn Log>) -> Self {
        self.log = log;
        self
    }

    pub fn get_ref(&self) -> &W {
        self.out.get_ref()
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
            self.write(self.flavor.prologue())?;
        }
        Ok(())
    }

    fn html5(&self) -> bool {
        self.flavor == Flavor::Xhtml5
    }

    fn xdoc(&self) -> bool {
        self.flavor == Flavor::Xdoc
    }

    /// Start tag for `event`, carrying its pass-through attributes.
    fn start_tag(&mut self, name: &str, event: &Event) -> Result<(), SinkError> {
        let tag = format!("<{name}{}>", passthrough(event));
        self.write(&tag)
    }

    fn meta(&mut self, name: &str) -> Result<(), SinkError> {
        let content = self.out.release();
        self.write(&format!("<meta name=\"{name}\" content=\"{content}\" />\n"))
    }

    /// Events inside an Xdoc section title only feed the `name` attribute.
    fn collect_section_name(&mut self, event: &Event) -> Result<(), SinkError> {
        let Some(name) = self.section_name.as_mut() else {
            return Ok(());
        };
        match &event.kind {
            EventKind::Text(text) | EventKind::RawText(text) => name.text.push_str(text),
            EventKind::NonBreakingSpace => name.text.push(' '),
            EventKind::StartAnchor(id) if name.id.is_none() => name.id = Some(id.clone()),
            EventKind::EndSectionTitle(_) => {
                let tag = if name.level == 1 { "section" } else { "subsection" };
                let mut open = format!("<{tag} name=\"{}\"", escape_xml(name.text.trim()));
                if let Some(id) = &name.id {
                    open.push_str(&format!(" id=\"{}\"", escape_xml(id)));
                }
                open.push_str(">\n");
                self.section_name = None;
                self.write(&open)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn start_section(&mut self, level: u8) -> Result<(), SinkError> {
        match self.flavor {
            Flavor::Xhtml => self.write("<div class=\"section\">\n"),
            Flavor::Xhtml5 => self.write("<section>\n"),
            Flavor::Xdoc if level <= 2 => {
                self.pending_section = Some(level);
                Ok(())
            }
            Flavor::Xdoc => Ok(()),
        }
    }

    fn end_section(&mut self, level: u8) -> Result<(), SinkError> {
        match (self.flavor, level) {
            (Flavor::Xhtml, _) => self.write("</div>\n"),
            (Flavor::Xhtml5, _) => self.write("</section>\n"),
            (Flavor::Xdoc, 1) => self.write("</section>\n"),
            (Flavor::Xdoc, 2) => self.write("</subsection>\n"),
            (Flavor::Xdoc, _) => Ok(()),
        }
    }

    fn start_table(&mut self, event: &Event) {
        self.tables.push(Table {
            justification: Vec::new(),
            grid: false,
            cell: 0,
            header: false,
            attributes: passthrough(event),
            caption: String::new(),
        });
        self.out.capture();
    }

    /// The caption has to precede the rows, so the rows were captured.
    fn end_table(&mut self) -> Result<(), SinkError> {
        let rows = self.out.release();
        let Some(table) = self.tables.pop() else {
            return self.write("</table>\n");
        };
        let border = if table.grid { "1" } else { "0" };
        let mut markup = format!("<table border=\"{border}\"{}>\n", table.attributes);
        if !table.caption.is_empty() {
            markup.push_str(&format!("<caption>{}</caption>\n", table.caption));
        }
        markup.push_str(&rows);
        markup.push_str("</table>\n");
        self.write(&markup)
    }

    fn start_cell(&mut self, header: bool, justification: Option<Justification>) -> Result<(), SinkError> {
        let (tag, align) = match self.tables.last_mut() {
            Some(table) => {
                let align = justification.or_else(|| table.justification.get(table.cell).copied());
                table.cell += 1;
                table.header = header;
                (if header { "th" } else { "td" }, align)
            }
            None => (if header { "th" } else { "td" }, justification),
        };
        match align {
            Some(align) => self.write(&format!("<{tag} align=\"{}\">", align.as_str())),
            None => self.write(&format!("<{tag}>")),
        }
    }

    fn start_inline(&mut self, event: &Event) -> Result<(), SinkError> {
        let wanted = decorations(&event.attributes);
        let tags: Vec<&'static str> = if wanted.is_empty() {
            vec!["span"]
        } else {
            wanted.iter().map(|d| self.decoration_tag(*d)).collect()
        };
        let mut open = String::new();
        for (n, tag) in tags.iter().enumerate() {
            if n == 0 {
                open.push_str(&format!("<{tag}{}>", passthrough(event)));
            } else {
                open.push_str(&format!("<{tag}>"));
            }
        }
        self.spans.push(tags.into_iter().rev().collect());
        self.write(&open)
    }

    fn decoration_tag(&self, decoration: Decoration) -> &'static str {
        match decoration {
            Decoration::Bold if self.html5() => "strong",
            Decoration::Bold => "b",
            Decoration::Italic if self.html5() => "em",
            Decoration::Italic => "i",
            Decoration::Code => "code",
            Decoration::Underline => "u",
            Decoration::Strikethrough if self.html5() => "s",
            Decoration::Strikethrough => "del",
            Decoration::Subscript => "sub",
            Decoration::Superscript => "sup",
        }
    }

    fn end_inline(&mut self) -> Result<(), SinkError> {
        let closers = self.spans.pop().unwrap_or_default();
        let close: String = closers.iter().map(|tag| format!("</{tag}>")).collect();
        self.write(&close)
    }

    fn start_verbatim(&mut self, boxed: bool) -> Result<(), SinkError> {
        self.verbatim.push(boxed);
        match (self.flavor, boxed) {
            (Flavor::Xdoc, true) => self.write("<source>"),
            (_, true) => self.write("<div class=\"source\"><pre>"),
            (_, false) => self.write("<pre>"),
        }
    }

    fn end_verbatim(&mut self) -> Result<(), SinkError> {
        let boxed = self.verbatim.pop().unwrap_or(false);
        match (self.flavor, boxed) {
            (Flavor::Xdoc, true) => self.write("</source>\n"),
            (_, true) => self.write("</pre></div>\n"),
            (_, false) => self.write("</pre>\n"),
        }
    }
}

impl<W: Write> Sink for XhtmlSink<W> {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        if self.section_name.is_some() {
            return self.collect_section_name(event);
        }
        if let Some(level) = self.pending_section.take() {
            if event.kind == EventKind::StartSectionTitle(level) {
                self.section_name = Some(SectionName {
                    level,
                    text: String::new(),
                    id: None,
                });
                return Ok(());
            }
            let tag = if level == 1 { "<section>\n" } else { "<subsection>\n" };
            self.write(tag)?;
        }
        unused_attributes(self.log.as_ref(), self.flavor.id(), event, KNOWN);

        use EventKind::*;
        match &event.kind {
            StartHead => {
                self.open_document()?;
                self.write(if self.xdoc() { "<properties>\n" } else { "<head>\n" })?;
            }
            EndHead => self.write(if self.xdoc() { "</properties>\n" } else { "</head>\n" })?,
            StartTitle => self.write("<title>")?,
            EndTitle => self.write("</title>\n")?,
            StartAuthor | StartDate if self.xdoc() => {
                self.write(if event.kind == StartAuthor { "<author>" } else { "<date>" })?
            }
            EndAuthor if self.xdoc() => self.write("</author>\n")?,
            EndDate if self.xdoc() => self.write("</date>\n")?,
            StartAuthor | StartDate => self.out.capture(),
            EndAuthor => self.meta("author")?,
            EndDate => self.meta("date")?,
            StartBody => {
                self.open_document()?;
                self.write("<body>\n")?;
            }
            EndBody => {
                self.write("</body>\n")?;
                self.write(self.flavor.epilogue())?;
            }

            StartSection(level) => self.start_section(*level)?,
            EndSection(level) => self.end_section(*level)?,
            StartSectionTitle(level) => self.write(&format!("<h{}>", heading(*level)))?,
            EndSectionTitle(level) => self.write(&format!("</h{}>\n", heading(*level)))?,

            StartParagraph => self.start_tag("p", event)?,
            EndParagraph => self.write("</p>\n")?,

            StartList => {
                self.start_tag("ul", event)?;
                self.write("\n")?;
            }
            EndList => self.write("</ul>\n")?,
            StartListItem | StartNumberedListItem => self.start_tag("li", event)?,
            EndListItem | EndNumberedListItem => self.write("</li>\n")?,
            StartNumberedList(numbering) => self.write(&format!(
                "<ol style=\"list-style-type: {}\">\n",
                list_style(*numbering)
            ))?,
            EndNumberedList => self.write("</ol>\n")?,
            StartDefinitionList => {
                self.start_tag("dl", event)?;
                self.write("\n")?;
            }
            EndDefinitionList => self.write("</dl>\n")?,
            StartDefinitionListItem | EndDefinitionListItem => {}
            StartDefinedTerm => self.write("<dt>")?,
            EndDefinedTerm => self.write("</dt>\n")?,
            StartDefinition => self.write("<dd>")?,
            EndDefinition => self.write("</dd>\n")?,

            StartTable => self.start_table(event),
            EndTable => self.end_table()?,
            StartTableRows {
                justification,
                grid,
            } => {
                if let Some(table) = self.tables.last_mut() {
                    table.justification = justification.clone();
                    table.grid = *grid;
                }
            }
            EndTableRows => {}
            StartTableRow => {
                if let Some(table) = self.tables.last_mut() {
                    table.cell = 0;
                }
                self.write("<tr>")?;
            }
            EndTableRow => self.write("</tr>\n")?,
            StartTableCell {
                header,
                justification,
            } => self.start_cell(*header, *justification)?,
            EndTableCell => {
                let header = self.tables.last().is_some_and(|t| t.header);
                self.write(if header { "</th>" } else { "</td>" })?;
            }
            StartTableCaption => self.out.capture(),
            EndTableCaption => {
                let caption = self.out.release();
                if let Some(table) = self.tables.last_mut() {
                    table.caption = caption;
                }
            }

            StartFigure if self.html5() => self.write("<figure>")?,
            StartFigure => self.write("<div class=\"figure\">")?,
            EndFigure if self.html5() => self.write("</figure>\n")?,
            EndFigure => self.write("</div>\n")?,
            FigureGraphics(src) => {
                let alt = event.attributes.get(keys::ALT).unwrap_or(src.as_str());
                self.write(&format!(
                    "<img src=\"{}\" alt=\"{}\" />",
                    escape_xml(src),
                    escape_xml(alt)
                ))?;
            }
            StartFigureCaption if self.html5() => self.write("<figcaption>")?,
            StartFigureCaption => self.write("<p><i>")?,
            EndFigureCaption if self.html5() => self.write("</figcaption>")?,
            EndFigureCaption => self.write("</i></p>")?,

            StartVerbatim { boxed } => self.start_verbatim(*boxed)?,
            EndVerbatim => self.end_verbatim()?,

            StartAnchor(id) if self.html5() => self.write(&format!("<a id=\"{}\">", escape_xml(id)))?,
            StartAnchor(id) => {
                let id = escape_xml(id);
                self.write(&format!("<a name=\"{id}\" id=\"{id}\">"))?
            }
            EndAnchor | EndLink => self.write("</a>")?,
            StartLink(href) => {
                let class = if is_external_link(href) {
                    " class=\"externalLink\""
                } else {
                    ""
                };
                self.write(&format!("<a href=\"{}\"{class}>", escape_xml(href)))?;
            }
            StartBold => self.write(if self.html5() { "<strong>" } else { "<b>" })?,
            EndBold => self.write(if self.html5() { "</strong>" } else { "</b>" })?,
            StartItalic => self.write(if self.html5() { "<em>" } else { "<i>" })?,
            EndItalic => self.write(if self.html5() { "</em>" } else { "</i>" })?,
            StartMonospaced => self.write("<code>")?,
            EndMonospaced => self.write("</code>")?,
            StartInline => self.start_inline(event)?,
            EndInline => self.end_inline()?,

            LineBreak => self.write("<br />")?,
            NonBreakingSpace => self.write("&#160;")?,
            HorizontalRule => self.write("<hr />\n")?,
            PageBreak => self.write("<!-- PB -->\n")?,
            Text(text) => self.write(&escape_xml(text))?,
            RawText(text) => self.write(text)?,
            Comment(text) => self.write(&xml_comment(text))?,
            Unknown { .. } => ignored(self.log.as_ref(), self.flavor.id(), event),
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
        self.spans.clear();
        self.tables.clear();
        self.verbatim.clear();
        self.pending_section = None;
        self.section_name = None;
        Ok(())
    }
}

const KNOWN: &[&str] = &[
    keys::CLASS,
    keys::STYLE,
    keys::ID,
    keys::TITLE,
    keys::LANG,
    keys::WIDTH,
    keys::ALIGN,
    keys::ALT,
    keys::SEMANTICS,
    keys::DECORATION,
    keys::VALIGN,
];

fn passthrough(event: &Event) -> String {
    PASSTHROUGH
        .iter()
        .filter_map(|key| {
            event
                .attributes
                .get(key)
                .map(|value| format!(" {key}=\"{}\"", escape_xml(value)))
        })
        .collect()
}

/// Section level 1 is written as `<h2>`, leaving `<h1>` to the page title.
fn heading(level: u8) -> u8 {
    (level + 1).clamp(2, 6)
}

fn list_style(numbering: Numbering) -> &'static str {
    match numbering {
        Numbering::Decimal => "decimal",
        Numbering::LowerAlpha => "lower-alpha",
        Numbering::UpperAlpha => "upper-alpha",
        Numbering::LowerRoman => "lower-roman",
        Numbering::UpperRoman => "upper-roman",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::AttributeSet;
    use crate::sinks::testing::{document, ev, feed, styled, text};
    use pretty_assertions::assert_eq;

    fn render(flavor: Flavor, events: Vec<Event>) -> String {
        let mut sink = XhtmlSink::new(Vec::new(), flavor);
        feed(&mut sink, events);
        String::from_utf8(sink.into_inner()).unwrap()
    }

    fn section(level: u8, title: &str, body: Vec<Event>) -> Vec<Event> {
        let mut events = vec![
            ev(EventKind::StartSection(level)),
            ev(EventKind::StartSectionTitle(level)),
            text(title),
            ev(EventKind::EndSectionTitle(level)),
        ];
        events.extend(body);
        events.push(ev(EventKind::EndSection(level)));
        events
    }

    #[test]
    fn xhtml_document_shell_and_sections() {
        let body = section(
            1,
            "Intro",
            vec![
                ev(EventKind::StartParagraph),
                text("a < b"),
                ev(EventKind::EndParagraph),
                ev(EventKind::StartParagraph),
                ev(EventKind::EndParagraph),
            ],
        );
        let html = render(Flavor::Xhtml, document("Guide", body));
        assert!(html.starts_with("<!DOCTYPE html PUBLIC"));
        assert!(html.contains("<head>\n<title>Guide</title>\n</head>"));
        assert!(html.contains("<div class=\"section\">\n<h2>Intro</h2>\n<p>a &lt; b</p>\n<p></p>\n</div>"));
        assert!(html.ends_with("</body>\n</html>\n"));
    }

    #[test]
    fn xhtml5_uses_semantic_elements() {
        let body = section(
            2,
            "Deep",
            vec![
                ev(EventKind::StartParagraph),
                ev(EventKind::StartBold),
                text("b"),
                ev(EventKind::EndBold),
                styled(EventKind::StartInline, AttributeSet::strikethrough()),
                text("s"),
                ev(EventKind::EndInline),
                ev(EventKind::EndParagraph),
            ],
        );
        let html = render(Flavor::Xhtml5, document("T", body));
        assert!(html.starts_with("<!DOCTYPE html>\n"));
        assert!(html.contains("<section>\n<h3>Deep</h3>\n<p><strong>b</strong><s>s</s></p>\n</section>"));
    }

    #[test]
    fn table_caption_precedes_rows_and_cells_carry_alignment() {
        use EventKind::*;
        let body = vec![
            ev(StartTable),
            ev(StartTableRows {
                justification: vec![Justification::Center, Justification::Right],
                grid: true,
            }),
            ev(StartTableRow),
            ev(StartTableCell {
                header: true,
                justification: None,
            }),
            text("A"),
            ev(EndTableCell),
            ev(StartTableCell {
                header: false,
                justification: Some(Justification::Left),
            }),
            text("B"),
            ev(EndTableCell),
            ev(EndTableRow),
            ev(EndTableRows),
            ev(StartTableCaption),
            text("Cap"),
            ev(EndTableCaption),
            ev(EndTable),
        ];
        let html = render(Flavor::Xhtml, document("T", body));
        assert!(html.contains(concat!(
            "<table border=\"1\">\n<caption>Cap</caption>\n",
            "<tr><th align=\"center\">A</th><td align=\"left\">B</td></tr>\n</table>"
        )));
    }

    #[test]
    fn xdoc_names_sections_and_boxes_source() {
        use EventKind::*;
        let mut inner = section(3, "Third", vec![]);
        inner.splice(
            0..0,
            [
                ev(StartVerbatim { boxed: true }),
                text("x < y"),
                ev(EndVerbatim),
            ],
        );
        let mut sub = vec![
            ev(StartSection(2)),
            ev(StartSectionTitle(2)),
            ev(StartAnchor("sub".into())),
            ev(EndAnchor),
            text("Sub"),
            ev(EndSectionTitle(2)),
        ];
        sub.extend(inner);
        sub.push(ev(EndSection(2)));
        let xml = render(Flavor::Xdoc, document("Doc", section(1, "Top & Tail", sub)));
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<document>\n<properties>\n<title>Doc</title>"));
        assert!(xml.contains(concat!(
            "<section name=\"Top &amp; Tail\">\n",
            "<subsection name=\"Sub\" id=\"sub\">\n",
            "<source>x &lt; y</source>\n",
            "<h4>Third</h4>\n",
            "</subsection>\n</section>\n"
        )));
        assert!(xml.ends_with("</body>\n</document>\n"));
    }

    #[test]
    fn author_becomes_meta_in_xhtml() {
        use EventKind::*;
        let events = vec![
            ev(StartHead),
            ev(StartAuthor),
            text("Jo \"JJ\" Doe"),
            ev(EndAuthor),
            ev(EndHead),
        ];
        let html = render(Flavor::Xhtml, events);
        assert!(html.contains("<meta name=\"author\" content=\"Jo &quot;JJ&quot; Doe\" />"));
    }

    #[test]
    fn close_resets_for_reuse() {
        let events = document("T", vec![ev(EventKind::HorizontalRule)]);
        let mut sink = XhtmlSink::new(Vec::new(), Flavor::Xhtml5);
        feed(&mut sink, events.clone());
        let first = sink.get_ref().len();
        feed(&mut sink, events);
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out.len(), first * 2);
        assert_eq!(&out[..first], &out[first..]);
    }

    #[test]
    fn unknown_events_are_skipped() {
        let events = document(
            "T",
            vec![ev(EventKind::Unknown {
                name: "macro:x".into(),
                params: vec![],
            })],
        );
        let html = render(Flavor::Xhtml, events);
        assert!(!html.contains("macro"));
    }
}
