//! Simplified DocBook parser.
//!
//! Covers the article subset: `articleinfo`/`info` metadata, nested
//! `section`/`sectN`, paragraphs, the three list kinds, CALS tables,
//! program listings, media objects and the common inline elements.

use std::sync::LazyLock;

use roxmltree::Node;

use crate::attrs::AttributeSet;
use crate::error::ParseError;
use crate::event::{EventKind, Justification, Numbering};
use crate::parser::{Emitter, ParseOptions, ParseReport, Parser};
use crate::sink::Sink;

use super::xml::{self, TagRule, TagTable, Walker, child_element, text_content};

const INFO: [&str; 3] = ["articleinfo", "info", "bookinfo"];

static DOCBOOK_TAGS: LazyLock<TagTable> = LazyLock::new(|| {
    use EventKind as E;
    use TagRule::*;

    TagTable::default()
        .with_all(&["article", "book"], Custom(article))
        .with_all(
            &["section", "sect1", "sect2", "sect3", "sect4", "sect5", "simplesect", "chapter"],
            Custom(section),
        )
        .with("title", Custom(block_title))
        .with_all(&["para", "simpara"], Wrap(E::StartParagraph))
        .with("itemizedlist", Wrap(E::StartList))
        .with("orderedlist", Custom(ordered_list))
        .with("listitem", Custom(list_item))
        .with("variablelist", Wrap(E::StartDefinitionList))
        .with("varlistentry", Wrap(E::StartDefinitionListItem))
        .with("term", Wrap(E::StartDefinedTerm))
        .with_all(&["programlisting", "screen"], Custom(boxed_listing))
        .with("literallayout", Custom(literal_layout))
        .with("emphasis", Custom(emphasis))
        .with_all(
            &[
                "literal", "code", "filename", "command", "classname", "methodname", "function",
                "varname", "option", "userinput", "computeroutput", "constant", "envar",
                "systemitem",
            ],
            Wrap(E::StartMonospaced),
        )
        .with("superscript", Styled(E::StartInline, AttributeSet::superscript()))
        .with("subscript", Styled(E::StartInline, AttributeSet::subscript()))
        .with_all(&["ulink", "link"], Custom(link))
        .with("xref", Custom(xref))
        .with("anchor", Custom(anchor))
        .with_all(&["table", "informaltable"], Custom(table))
        .with_all(&["figure", "informalfigure"], Custom(figure))
        .with_all(&["mediaobject", "inlinemediaobject"], Custom(media))
        .with("beginpage", Leaf(E::PageBreak))
        .with_all(
            &[
                "blockquote", "note", "tip", "warning", "caution", "important", "sidebar",
                "example", "informalexample", "abstract", "footnote", "phrase", "citetitle",
                "quote", "firstterm", "acronym", "formalpara",
            ],
            Transparent,
        )
        .with_all(&["remark", "indexterm", "articleinfo", "info", "bookinfo"], Skip)
});

pub struct DocBookParser;

impl Parser for DocBookParser {
    fn id(&self) -> &'static str {
        "doc-book"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["dbk", "docbook"]
    }

    fn parse(
        &self,
        input: &str,
        sink: &mut dyn Sink,
        options: &ParseOptions,
    ) -> Result<ParseReport, ParseError> {
        let text = xml::prepare(input);
        let document = xml::load(&text, options)?;
        let root = document.root_element();
        let mut walker = Walker::new(Emitter::new(sink, options), &DOCBOOK_TAGS, self, &text);
        match root.tag_name().name() {
            "article" | "book" => walker.element(root)?,
            _ => xml::fragment(&mut walker, root)?,
        }
        walker.finish()
    }
}

fn is_info(node: &Node<'_, '_>) -> bool {
    node.is_element() && INFO.contains(&node.tag_name().name())
}

fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The head comes from the info block (or a direct `<title>`), everything
/// else is body.
fn article(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let info = node.children().find(is_info);
    let title = info
        .and_then(|i| child_element(i, "title"))
        .or_else(|| child_element(node, "title"));

    w.emitter.kind(EventKind::StartHead)?;
    if let Some(title) = title {
        w.locate(title);
        w.emitter.kind(EventKind::StartTitle)?;
        w.text_with_nbsp(&clean(&text_content(title)))?;
        w.emitter.kind(EventKind::EndTitle)?;
    }
    if let Some(info) = info {
        for author in info.descendants().filter(|d| d.has_tag_name("author")) {
            w.locate(author);
            w.emitter.kind(EventKind::StartAuthor)?;
            w.text_with_nbsp(&author_name(author))?;
            w.emitter.kind(EventKind::EndAuthor)?;
        }
        let date = child_element(info, "date").or_else(|| child_element(info, "pubdate"));
        if let Some(date) = date {
            w.emitter.kind(EventKind::StartDate)?;
            w.text_with_nbsp(&clean(&text_content(date)))?;
            w.emitter.kind(EventKind::EndDate)?;
        }
    }
    w.emitter.kind(EventKind::EndHead)?;

    w.emitter.kind(EventKind::StartBody)?;
    for child in node.children() {
        if child.has_tag_name("title") || is_info(&child) {
            continue;
        }
        w.node(child)?;
    }
    w.sections.close_from(&mut w.emitter, 1)?;
    w.emitter.kind(EventKind::EndBody)
}

/// `firstname surname` when present, otherwise the whole text.
fn author_name(author: Node<'_, '_>) -> String {
    let part = |name| {
        author
            .descendants()
            .find(|d| d.has_tag_name(name))
            .map(text_content)
    };
    match (part("firstname"), part("surname")) {
        (Some(first), Some(last)) => clean(&format!("{first} {last}")),
        _ => clean(&text_content(author)),
    }
}

/// `sectN` opens level N; `section` one deeper than the enclosing section.
fn section(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let name = node.tag_name().name();
    let level = match name.strip_prefix("sect").and_then(|n| n.parse::<u8>().ok()) {
        Some(level) => level,
        None => w.emitter.validator().section_level() + 1,
    }
    .clamp(1, 5);

    w.sections.open(&mut w.emitter, level)?;
    let title = child_element(node, "title").or_else(|| {
        node.children()
            .find(is_info)
            .and_then(|i| child_element(i, "title"))
    });
    w.emitter.kind(EventKind::StartSectionTitle(level))?;
    if let Some(id) = node.attribute("id") {
        w.anchor(id)?;
    }
    if let Some(title) = title {
        w.children(title)?;
    }
    w.emitter.kind(EventKind::EndSectionTitle(level))?;

    for child in node.children() {
        if child.has_tag_name("title") || is_info(&child) {
            continue;
        }
        w.node(child)?;
    }
    w.sections.close_from(&mut w.emitter, level)
}

/// A `<title>` outside a section, figure or table reads as a bold paragraph.
fn block_title(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    w.emitter.kind(EventKind::StartParagraph)?;
    w.wrap(EventKind::StartBold, AttributeSet::new(), node)?;
    w.emitter.kind(EventKind::EndParagraph)
}

fn ordered_list(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let numbering = match node.attribute("numeration") {
        Some("loweralpha") => Numbering::LowerAlpha,
        Some("upperalpha") => Numbering::UpperAlpha,
        Some("lowerroman") => Numbering::LowerRoman,
        Some("upperroman") => Numbering::UpperRoman,
        _ => Numbering::Decimal,
    };
    w.wrap(EventKind::StartNumberedList(numbering), AttributeSet::new(), node)
}

fn list_item(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let parent = node.parent_element().map(|p| p.tag_name().name());
    let start = match parent {
        Some("orderedlist") => EventKind::StartNumberedListItem,
        Some("varlistentry") => EventKind::StartDefinition,
        _ => EventKind::StartListItem,
    };
    w.wrap(start, AttributeSet::new(), node)
}

fn boxed_listing(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    w.verbatim(node, true)
}

fn literal_layout(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    w.verbatim(node, false)
}

fn emphasis(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let start = match node.attribute("role") {
        Some("bold" | "strong") => EventKind::StartBold,
        _ => EventKind::StartItalic,
    };
    w.wrap(start, AttributeSet::new(), node)
}

/// `<ulink url>`, `<link linkend>` or `<link xlink:href>`.
fn link(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let target = node
        .attribute("url")
        .map(str::to_string)
        .or_else(|| node.attribute("linkend").map(|id| format!("#{id}")))
        .or_else(|| {
            node.attributes()
                .find(|a| a.name() == "href")
                .map(|a| a.value().to_string())
        });
    match target {
        Some(target) => w.wrap(EventKind::StartLink(target), AttributeSet::new(), node),
        None => w.children(node),
    }
}

/// `<xref linkend="id"/>` links to the id, showing the id itself.
fn xref(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let Some(id) = node.attribute("linkend") else {
        return Err(w.emitter.syntax_error("<xref> requires a 'linkend' attribute"));
    };
    w.emitter.kind(EventKind::StartLink(format!("#{id}")))?;
    w.emitter.text(id)?;
    w.emitter.kind(EventKind::EndLink)
}

fn anchor(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    match node.attribute("id") {
        Some(id) => w.anchor(id),
        None => Err(w.emitter.syntax_error("<anchor> requires an 'id' attribute")),
    }
}

/// CALS tables: `tgroup` with optional `colspec align`, rows under
/// `thead`/`tbody`, cells as `entry`. A `title` becomes the caption.
fn table(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let Some(group) = child_element(node, "tgroup") else {
        return w.children(node);
    };

    let mut rows: Vec<(bool, Node<'_, '_>)> = Vec::new();
    for part in group.children().filter(Node::is_element) {
        let header = part.has_tag_name("thead");
        match part.tag_name().name() {
            "thead" | "tbody" | "tfoot" => rows.extend(
                part.children()
                    .filter(|r| r.has_tag_name("row"))
                    .map(|r| (header, r)),
            ),
            _ => {}
        }
    }

    fn entries<'a, 'i>(row: &Node<'a, 'i>) -> Vec<Node<'a, 'i>> {
        row.children().filter(|c| c.has_tag_name("entry")).collect()
    }
    let widest = rows.iter().map(|(_, r)| entries(r).len()).max().unwrap_or(0);
    let columns = group
        .attribute("cols")
        .and_then(|c| c.parse::<usize>().ok())
        .unwrap_or(0)
        .max(widest);
    let mut justification: Vec<Justification> = group
        .children()
        .filter(|c| c.has_tag_name("colspec"))
        .map(|c| c.attribute("align").and_then(Justification::parse).unwrap_or(Justification::Left))
        .collect();
    justification.resize(columns, Justification::Left);
    let grid = node.attribute("frame").is_none_or(|f| f != "none");

    w.emitter.kind(EventKind::StartTable)?;
    w.emitter
        .kind(EventKind::StartTableRows { justification, grid })?;
    for (header, row) in rows {
        w.locate(row);
        w.emitter.kind(EventKind::StartTableRow)?;
        for entry in entries(&row) {
            w.locate(entry);
            let start = EventKind::StartTableCell {
                header,
                justification: entry.attribute("align").and_then(Justification::parse),
            };
            w.wrap(start, AttributeSet::new(), entry)?;
        }
        w.emitter.kind(EventKind::EndTableRow)?;
    }
    w.emitter.kind(EventKind::EndTableRows)?;
    if let Some(title) = child_element(node, "title") {
        w.wrap(EventKind::StartTableCaption, AttributeSet::new(), title)?;
    }
    w.emitter.kind(EventKind::EndTable)
}

fn figure(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    w.emitter.kind(EventKind::StartFigure)?;
    for child in node.children().filter(|c| !c.has_tag_name("title")) {
        w.node(child)?;
    }
    if let Some(title) = child_element(node, "title") {
        w.wrap(EventKind::StartFigureCaption, AttributeSet::new(), title)?;
    }
    w.emitter.kind(EventKind::EndFigure)
}

/// The first `imagedata fileref` below a media object.
fn media(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let image = node
        .descendants()
        .find(|d| d.has_tag_name("imagedata"))
        .and_then(|d| d.attribute("fileref"));
    match image {
        Some(src) => {
            let mut attributes = AttributeSet::new();
            if let Some(alt) = node.descendants().find(|d| d.has_tag_name("phrase")) {
                attributes.insert("alt", clean(&text_content(alt)));
            }
            w.emitter
                .with_attributes(EventKind::FigureGraphics(src.to_string()), attributes)
        }
        None => {
            w.emitter.warn("media object without imagedata ignored", "X001");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::EventCollector;
    use pretty_assertions::assert_eq;

    fn kinds(input: &str) -> Vec<EventKind> {
        let mut sink = EventCollector::new();
        DocBookParser
            .parse(input, &mut sink, &ParseOptions::strict())
            .unwrap();
        sink.into_events().into_iter().map(|e| e.kind).collect()
    }

    fn text(s: &str) -> EventKind {
        EventKind::Text(s.into())
    }

    #[test]
    fn article_head_and_nested_sections() {
        use EventKind::*;
        let input = r#"<article>
  <articleinfo>
    <title>Book of Things</title>
    <author><firstname>Ada</firstname><surname>Byron</surname></author>
    <date>2024-01-01</date>
  </articleinfo>
  <section id="first">
    <title>First</title>
    <para>Some <emphasis>words</emphasis> and <emphasis role="bold">more</emphasis>.</para>
    <section>
      <title>Inner</title>
      <para><literal>code</literal></para>
    </section>
  </section>
</article>"#;
        assert_eq!(
            kinds(input),
            vec![
                StartHead,
                StartTitle,
                text("Book of Things"),
                EndTitle,
                StartAuthor,
                text("Ada Byron"),
                EndAuthor,
                StartDate,
                text("2024-01-01"),
                EndDate,
                EndHead,
                StartBody,
                StartSection(1),
                StartSectionTitle(1),
                StartAnchor("first".into()),
                EndAnchor,
                text("First"),
                EndSectionTitle(1),
                StartParagraph,
                text("Some "),
                StartItalic,
                text("words"),
                EndItalic,
                text(" and "),
                StartBold,
                text("more"),
                EndBold,
                text("."),
                EndParagraph,
                StartSection(2),
                StartSectionTitle(2),
                text("Inner"),
                EndSectionTitle(2),
                StartParagraph,
                StartMonospaced,
                text("code"),
                EndMonospaced,
                EndParagraph,
                EndSection(2),
                EndSection(1),
                EndBody,
            ]
        );
    }

    #[test]
    fn lists_and_listings() {
        use EventKind::*;
        let input = r#"<article><orderedlist numeration="upperroman"><listitem><para>One</para></listitem></orderedlist>
<variablelist><varlistentry><term>T</term><listitem><para>D</para></listitem></varlistentry></variablelist>
<programlisting>a &amp;&amp; b</programlisting>
<para>See <xref linkend="first"/> or <ulink url="http://x.org">x</ulink>.</para></article>"#;
        assert_eq!(
            kinds(input)[3..].to_vec(),
            vec![
                StartNumberedList(Numbering::UpperRoman),
                StartNumberedListItem,
                StartParagraph,
                text("One"),
                EndParagraph,
                EndNumberedListItem,
                EndNumberedList,
                StartDefinitionList,
                StartDefinitionListItem,
                StartDefinedTerm,
                text("T"),
                EndDefinedTerm,
                StartDefinition,
                StartParagraph,
                text("D"),
                EndParagraph,
                EndDefinition,
                EndDefinitionListItem,
                EndDefinitionList,
                StartVerbatim { boxed: true },
                text("a && b"),
                EndVerbatim,
                StartParagraph,
                text("See "),
                StartLink("#first".into()),
                text("first"),
                EndLink,
                text(" or "),
                StartLink("http://x.org".into()),
                text("x"),
                EndLink,
                text("."),
                EndParagraph,
                EndBody,
            ]
        );
    }

    #[test]
    fn cals_tables() {
        use EventKind::*;
        let input = r#"<informaltable frame="none"><tgroup cols="2">
<colspec align="center"/><colspec/>
<thead><row><entry>H1</entry><entry>H2</entry></row></thead>
<tbody><row><entry>a</entry><entry align="right">b</entry></row></tbody>
</tgroup></informaltable>"#;
        let body = kinds(input)[3..].to_vec();
        assert_eq!(
            body[..2].to_vec(),
            vec![
                StartTable,
                StartTableRows {
                    justification: vec![Justification::Center, Justification::Left],
                    grid: false
                },
            ]
        );
        assert!(body.contains(&StartTableCell {
            header: true,
            justification: None
        }));
        assert!(body.contains(&StartTableCell {
            header: false,
            justification: Some(Justification::Right)
        }));
        assert_eq!(body.iter().filter(|k| **k == StartTableRow).count(), 2);
    }

    #[test]
    fn xref_without_linkend_is_fatal() {
        let mut sink = EventCollector::new();
        let err = DocBookParser
            .parse("<article><para><xref/></para></article>", &mut sink, &ParseOptions::default())
            .unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }
}
