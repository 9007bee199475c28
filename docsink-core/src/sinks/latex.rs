//! LaTeX output for the `article` class.
//!
//! Head fields are held back until the body starts so they can go into the
//! preamble. Paragraphs and table rows are captured: an empty paragraph
//! writes nothing, and the `tabular` column spec needs the widest row.

use std::io::Write;
use std::sync::Arc;

use crate::error::SinkError;
use crate::event::{Event, EventKind, Justification, Numbering};
use crate::logging::{self, Log};
use crate::sink::Sink;

use super::{Decoration, INLINE_KEYS, Output, decorations, ignored, unused_attributes};

const PREAMBLE: &str = "\\documentclass[a4paper]{article}
\\usepackage[utf8]{inputenc}
\\usepackage[T1]{fontenc}
\\usepackage{fancyvrb}
\\usepackage{graphicx}
\\usepackage[normalem]{ulem}
\\usepackage{hyperref}
";

const ENUM_COUNTERS: [&str; 4] = ["enumi", "enumii", "enumiii", "enumiv"];

#[derive(Debug, Default)]
struct Head {
    title: Option<String>,
    author: Option<String>,
    date: Option<String>,
}

struct Table {
    justification: Vec<Justification>,
    grid: bool,
    cell: usize,
    widest: usize,
    header: bool,
}

pub struct LatexSink<W> {
    out: Output<W>,
    log: Arc<dyn Log>,
    head: Head,
    enumerations: usize,
    inline: Vec<usize>,
    tables: Vec<Table>,
    verbatim: bool,
}

impl<W: Write> LatexSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Output::new(out),
            log: logging::noop(),
            head: Head::default(),
            enumerations: 0,
            inline: Vec::new(),
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

    fn begin_document(&mut self) -> Result<(), SinkError> {
        let mut preamble = String::from(PREAMBLE);
        let head = std::mem::take(&mut self.head);
        if let Some(title) = &head.title {
            preamble.push_str(&format!("\\title{{{title}}}\n"));
            preamble.push_str(&format!(
                "\\author{{{}}}\n\\date{{{}}}\n",
                head.author.as_deref().unwrap_or_default(),
                head.date.as_deref().unwrap_or_default()
            ));
        }
        preamble.push_str("\\begin{document}\n\n");
        if head.title.is_some() {
            preamble.push_str("\\maketitle\n\n");
        }
        self.write(&preamble)
    }

    fn end_paragraph(&mut self) -> Result<(), SinkError> {
        let content = self.out.release();
        if content.trim().is_empty() {
            return Ok(());
        }
        self.write(&content)?;
        self.write("\n\n")
    }

    fn start_enumeration(&mut self, numbering: Numbering) -> Result<(), SinkError> {
        self.enumerations += 1;
        self.write("\\begin{enumerate}\n")?;
        let style = match numbering {
            Numbering::Decimal => return Ok(()),
            Numbering::LowerAlpha => "alph",
            Numbering::UpperAlpha => "Alph",
            Numbering::LowerRoman => "roman",
            Numbering::UpperRoman => "Roman",
        };
        let counter = ENUM_COUNTERS[(self.enumerations - 1).min(ENUM_COUNTERS.len() - 1)];
        self.write(&format!(
            "\\renewcommand{{\\the{counter}}}{{\\{style}{{{counter}}}}}\n\\renewcommand{{\\label{counter}}}{{\\the{counter}.}}\n"
        ))
    }

    fn start_cell(&mut self, header: bool) -> Result<(), SinkError> {
        let first = match self.tables.last_mut() {
            Some(table) => {
                table.cell += 1;
                table.header = header;
                table.cell == 1
            }
            None => true,
        };
        if !first {
            self.write(" & ")?;
        }
        if header {
            self.write("\\textbf{")?;
        }
        Ok(())
    }

    fn end_row(&mut self) -> Result<(), SinkError> {
        let grid = match self.tables.last_mut() {
            Some(table) => {
                table.widest = table.widest.max(table.cell);
                table.cell = 0;
                table.grid
            }
            None => false,
        };
        self.write(" \\\\\n")?;
        if grid {
            self.write("\\hline\n")?;
        }
        Ok(())
    }

    fn end_rows(&mut self) -> Result<(), SinkError> {
        let rows = self.out.release();
        let (justification, grid, widest) = match self.tables.last() {
            Some(table) => (table.justification.clone(), table.grid, table.widest),
            None => (Vec::new(), false, 0),
        };
        let columns = justification.len().max(widest).max(1);
        let letters: Vec<&str> = (0..columns)
            .map(|n| match justification.get(n) {
                Some(Justification::Center) => "c",
                Some(Justification::Right) => "r",
                _ => "l",
            })
            .collect();
        let spec = if grid {
            format!("|{}|", letters.join("|"))
        } else {
            letters.concat()
        };
        let mut tabular = format!("\\begin{{tabular}}{{{spec}}}\n");
        if grid {
            tabular.push_str("\\hline\n");
        }
        tabular.push_str(&rows);
        tabular.push_str("\\end{tabular}\n");
        self.write(&tabular)
    }

    fn end_verbatim(&mut self) -> Result<(), SinkError> {
        self.verbatim = false;
        let mut content = self.out.release();
        if !content.ends_with('\n') {
            content.push('\n');
        }
        self.write(&content)?;
        self.write("\\end{Verbatim}\n\n")
    }

    fn start_inline(&mut self, event: &Event) -> Result<(), SinkError> {
        let wanted = decorations(&event.attributes);
        if wanted.is_empty() {
            self.inline.push(1);
            return self.write("{");
        }
        let open: String = wanted
            .iter()
            .map(|d| match d {
                Decoration::Bold => "\\textbf{",
                Decoration::Italic => "\\textit{",
                Decoration::Code => "\\texttt{",
                Decoration::Underline => "\\uline{",
                Decoration::Strikethrough => "\\sout{",
                Decoration::Subscript => "\\textsubscript{",
                Decoration::Superscript => "\\textsuperscript{",
            })
            .collect();
        self.inline.push(wanted.len());
        self.write(&open)
    }

    fn text(&mut self, text: &str) -> Result<(), SinkError> {
        if self.verbatim {
            self.write(text)
        } else {
            self.write(&escape(text))
        }
    }
}

impl<W: Write> Sink for LatexSink<W> {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        unused_attributes(self.log.as_ref(), "latex", event, INLINE_KEYS);

        use EventKind::*;
        match &event.kind {
            StartHead | EndHead => {}
            StartTitle | StartAuthor | StartDate => self.out.capture(),
            EndTitle => self.head.title = Some(self.out.release()),
            EndAuthor => self.head.author = Some(self.out.release()),
            EndDate => self.head.date = Some(self.out.release()),
            StartBody => self.begin_document()?,
            EndBody => self.write("\\end{document}\n")?,

            StartSection(_) | EndSection(_) => {}
            StartSectionTitle(level) => self.write(&format!("\\{}{{", section_command(*level)))?,
            EndSectionTitle(_) => self.write("}\n\n")?,

            StartParagraph => self.out.capture(),
            EndParagraph => self.end_paragraph()?,

            StartList => self.write("\\begin{itemize}\n")?,
            EndList => self.write("\\end{itemize}\n\n")?,
            StartNumberedList(numbering) => self.start_enumeration(*numbering)?,
            EndNumberedList => {
                self.enumerations = self.enumerations.saturating_sub(1);
                self.write("\\end{enumerate}\n\n")?;
            }
            StartListItem | StartNumberedListItem => self.write("\\item ")?,
            EndListItem | EndNumberedListItem | EndDefinition => self.write("\n")?,
            StartDefinitionList => self.write("\\begin{description}\n")?,
            EndDefinitionList => self.write("\\end{description}\n\n")?,
            StartDefinitionListItem | EndDefinitionListItem | StartDefinition => {}
            StartDefinedTerm => self.write("\\item[")?,
            EndDefinedTerm => self.write("] ")?,

            StartTable => {
                self.tables.push(Table {
                    justification: Vec::new(),
                    grid: false,
                    cell: 0,
                    widest: 0,
                    header: false,
                });
                self.write("\\begin{table}[htp]\n\\centering\n")?;
            }
            EndTable => {
                self.tables.pop();
                self.write("\\end{table}\n\n")?;
            }
            StartTableRows {
                justification,
                grid,
            } => {
                if let Some(table) = self.tables.last_mut() {
                    table.justification = justification.clone();
                    table.grid = *grid;
                }
                self.out.capture();
            }
            EndTableRows => self.end_rows()?,
            StartTableRow => {}
            EndTableRow => self.end_row()?,
            StartTableCell { header, .. } => self.start_cell(*header)?,
            EndTableCell => {
                if self.tables.last().is_some_and(|t| t.header) {
                    self.write("}")?;
                }
            }
            StartTableCaption | StartFigureCaption => self.write("\\caption{")?,
            EndTableCaption | EndFigureCaption => self.write("}\n")?,

            StartFigure => self.write("\\begin{figure}[htp]\n\\centering\n")?,
            EndFigure => self.write("\\end{figure}\n\n")?,
            FigureGraphics(src) => self.write(&format!("\\includegraphics{{{src}}}\n"))?,

            StartVerbatim { boxed } => {
                self.write(if *boxed {
                    "\\begin{Verbatim}[frame=single]\n"
                } else {
                    "\\begin{Verbatim}\n"
                })?;
                self.verbatim = true;
                self.out.capture();
            }
            EndVerbatim => self.end_verbatim()?,

            StartAnchor(id) => self.write(&format!("\\hypertarget{{{}}}{{", escape_url(id)))?,
            StartLink(target) => match target.strip_prefix('#') {
                Some(id) => self.write(&format!("\\hyperlink{{{}}}{{", escape_url(id)))?,
                None => self.write(&format!("\\href{{{}}}{{", escape_url(target)))?,
            },
            StartBold => self.write("\\textbf{")?,
            StartItalic => self.write("\\textit{")?,
            StartMonospaced => self.write("\\texttt{")?,
            EndAnchor | EndLink | EndBold | EndItalic | EndMonospaced => self.write("}")?,
            StartInline => self.start_inline(event)?,
            EndInline => {
                let count = self.inline.pop().unwrap_or(1);
                self.write(&"}".repeat(count))?;
            }

            LineBreak => self.write("\\newline\n")?,
            NonBreakingSpace => self.write("~")?,
            HorizontalRule => {
                self.write("\\begin{center}\\rule{0.5\\linewidth}{0.5pt}\\end{center}\n\n")?
            }
            PageBreak => self.write("\\newpage\n\n")?,
            Text(text) => self.text(text)?,
            RawText(text) => self.write(text)?,
            Comment(text) => {
                let lines: String = text.lines().map(|line| format!("% {line}\n")).collect();
                self.write(&lines)?;
            }
            Unknown { .. } => ignored(self.log.as_ref(), "latex", event),
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(self.out.flush()?)
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.flush()?;
        self.out.reset();
        self.head = Head::default();
        self.enumerations = 0;
        self.inline.clear();
        self.tables.clear();
        self.verbatim = false;
        Ok(())
    }
}

fn section_command(level: u8) -> &'static str {
    match level {
        0 | 1 => "section",
        2 => "subsection",
        3 => "subsubsection",
        4 => "paragraph",
        _ => "subparagraph",
    }
}

/// Escape LaTeX special characters in running text.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '{' | '}' | '$' | '&' | '#' | '%' | '_' => {
                out.push('\\');
                out.push(c);
            }
            '^' => out.push_str("\\^{}"),
            '~' => out.push_str("\\~{}"),
            '<' => out.push_str("\\textless{}"),
            '>' => out.push_str("\\textgreater{}"),
            '\u{a0}' => out.push('~'),
            c => out.push(c),
        }
    }
    out
}

/// `hyperref` arguments only need `#`, `%` and braces escaped.
fn escape_url(target: &str) -> String {
    let mut out = String::with_capacity(target.len());
    for c in target.chars() {
        if matches!(c, '#' | '%' | '{' | '}') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::AttributeSet;
    use crate::sinks::testing::{SharedBuf, document, ev, feed, render_reused, styled, text};
    use pretty_assertions::assert_eq;

    fn render(events: Vec<Event>) -> String {
        let mut sink = LatexSink::new(Vec::new());
        feed(&mut sink, events);
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn specials_are_escaped() {
        assert_eq!(escape("50% of $x_1 & {y}"), "50\\% of \\$x\\_1 \\& \\{y\\}");
        assert_eq!(escape("a\\b~c"), "a\\textbackslash{}b\\~{}c");
    }

    #[test]
    fn preamble_sections_and_empty_paragraphs() {
        use EventKind::*;
        let tex = render(document(
            "A & B",
            vec![
                ev(StartSection(1)),
                ev(StartSectionTitle(1)),
                text("Intro"),
                ev(EndSectionTitle(1)),
                ev(StartParagraph),
                ev(EndParagraph),
                ev(StartParagraph),
                text("Body "),
                ev(StartBold),
                text("bold"),
                ev(EndBold),
                ev(EndParagraph),
                ev(StartSection(2)),
                ev(StartSectionTitle(2)),
                text("Sub"),
                ev(EndSectionTitle(2)),
                ev(EndSection(2)),
                ev(EndSection(1)),
            ],
        ));
        assert!(tex.starts_with("\\documentclass[a4paper]{article}\n"));
        assert!(tex.contains("\\title{A \\& B}\n\\author{}\n\\date{}\n\\begin{document}\n\n\\maketitle\n\n"));
        assert!(tex.contains("\\section{Intro}\n\nBody \\textbf{bold}\n\n\\subsection{Sub}\n\n"));
        assert!(tex.ends_with("\\end{document}\n"));
    }

    #[test]
    fn lists_with_numbering_styles() {
        use EventKind::*;
        let tex = render(document(
            "T",
            vec![
                ev(StartNumberedList(Numbering::LowerRoman)),
                ev(StartNumberedListItem),
                text("one"),
                ev(EndNumberedListItem),
                ev(EndNumberedList),
                ev(StartDefinitionList),
                ev(StartDefinitionListItem),
                ev(StartDefinedTerm),
                text("term"),
                ev(EndDefinedTerm),
                ev(StartDefinition),
                text("meaning"),
                ev(EndDefinition),
                ev(EndDefinitionListItem),
                ev(EndDefinitionList),
            ],
        ));
        assert!(tex.contains(concat!(
            "\\begin{enumerate}\n",
            "\\renewcommand{\\theenumi}{\\roman{enumi}}\n",
            "\\renewcommand{\\labelenumi}{\\theenumi.}\n",
            "\\item one\n",
            "\\end{enumerate}\n\n"
        )));
        assert!(tex.contains("\\begin{description}\n\\item[term] meaning\n\\end{description}"));
    }

    #[test]
    fn tables_build_column_spec_from_justification() {
        use EventKind::*;
        let cell = |header: bool, s: &str| {
            vec![
                ev(StartTableCell {
                    header,
                    justification: None,
                }),
                text(s),
                ev(EndTableCell),
            ]
        };
        let mut body = vec![
            ev(StartTable),
            ev(StartTableRows {
                justification: vec![Justification::Center, Justification::Right],
                grid: true,
            }),
            ev(StartTableRow),
        ];
        body.extend(cell(true, "A"));
        body.extend(cell(true, "B"));
        body.push(ev(EndTableRow));
        body.push(ev(StartTableRow));
        body.extend(cell(false, "1"));
        body.extend(cell(false, "2"));
        body.extend([
            ev(EndTableRow),
            ev(EndTableRows),
            ev(StartTableCaption),
            text("Cap"),
            ev(EndTableCaption),
            ev(EndTable),
        ]);
        let tex = render(document("T", body));
        assert!(tex.contains(concat!(
            "\\begin{table}[htp]\n\\centering\n",
            "\\begin{tabular}{|c|r|}\n\\hline\n",
            "\\textbf{A} & \\textbf{B} \\\\\n\\hline\n",
            "1 & 2 \\\\\n\\hline\n",
            "\\end{tabular}\n\\caption{Cap}\n\\end{table}\n\n"
        )));
    }

    #[test]
    fn verbatim_is_not_escaped_and_links_resolve() {
        use EventKind::*;
        let tex = render(document(
            "T",
            vec![
                ev(StartVerbatim { boxed: true }),
                text("a_b & {c}"),
                ev(EndVerbatim),
                ev(StartParagraph),
                ev(StartLink("#sec".into())),
                text("here"),
                ev(EndLink),
                ev(StartLink("http://x.org/a#b".into())),
                text("there"),
                ev(EndLink),
                styled(StartInline, AttributeSet::superscript()),
                text("2"),
                ev(EndInline),
                ev(EndParagraph),
            ],
        ));
        assert!(tex.contains("\\begin{Verbatim}[frame=single]\na_b & {c}\n\\end{Verbatim}\n\n"));
        assert!(tex.contains("\\hyperlink{sec}{here}\\href{http://x.org/a\\#b}{there}\\textsuperscript{2}"));
    }

    #[test]
    fn close_twice_then_reuse() {
        let buf = SharedBuf::default();
        let mut sink = LatexSink::new(buf.clone());
        let (first, second) = render_reused(&mut sink, &buf);
        assert!(first.contains("\\section{Overview}"), "{first}");
        assert_eq!(first, second);
    }
}
