//! Xdoc parser: `<document>` with `<properties>` metadata and a body of
//! `<section>`/`<subsection>` elements holding XHTML content.

use std::sync::LazyLock;

use roxmltree::Node;

use crate::attrs::AttributeSet;
use crate::error::ParseError;
use crate::event::EventKind;
use crate::parser::{Emitter, ParseOptions, ParseReport, Parser};
use crate::sink::Sink;

use super::xml::{self, TagRule, TagTable, Walker, child_element, text_content};

pub(crate) static XDOC_TAGS: LazyLock<TagTable> = LazyLock::new(|| {
    use TagRule::*;
    xml::html_tags()
        .with("document", Custom(document))
        .with("section", Custom(section))
        .with("subsection", Custom(subsection))
        .with("source", Custom(source))
        .with("macro", Custom(macro_element))
        .with("properties", Skip)
});

pub struct XdocParser;

impl Parser for XdocParser {
    fn id(&self) -> &'static str {
        "xdoc"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xdoc", "xml"]
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
        let mut walker = Walker::new(Emitter::new(sink, options), &XDOC_TAGS, self, &text);
        match root.tag_name().name() {
            "document" | "html" => walker.element(root)?,
            _ => xml::fragment(&mut walker, root)?,
        }
        walker.finish()
    }
}

fn document(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    w.emitter.kind(EventKind::StartHead)?;
    if let Some(properties) = child_element(node, "properties") {
        for child in properties.children().filter(Node::is_element) {
            w.locate(child);
            let (start, end) = match child.tag_name().name() {
                "title" => (EventKind::StartTitle, EventKind::EndTitle),
                "author" => (EventKind::StartAuthor, EventKind::EndAuthor),
                "date" => (EventKind::StartDate, EventKind::EndDate),
                _ => continue,
            };
            w.emitter.kind(start)?;
            w.text_with_nbsp(text_content(child).trim())?;
            w.emitter.kind(end)?;
        }
    }
    w.emitter.kind(EventKind::EndHead)?;

    w.emitter.kind(EventKind::StartBody)?;
    if let Some(body) = child_element(node, "body") {
        w.children(body)?;
    }
    w.sections.close_from(&mut w.emitter, 1)?;
    w.emitter.kind(EventKind::EndBody)
}

fn section(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    named_section(w, node, 1)
}

fn subsection(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    named_section(w, node, 2)
}

fn source(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    w.verbatim(node, true)
}

/// A section titled by its `name` attribute. Headings inside open deeper
/// levels, all closed with the element.
fn named_section(w: &mut Walker<'_>, node: Node<'_, '_>, level: u8) -> Result<(), ParseError> {
    w.sections.open(&mut w.emitter, level)?;
    w.emitter.kind(EventKind::StartSectionTitle(level))?;
    if let Some(id) = node.attribute("id") {
        w.anchor(id)?;
    }
    w.text_with_nbsp(node.attribute("name").unwrap_or_default())?;
    w.emitter.kind(EventKind::EndSectionTitle(level))?;
    w.children(node)?;
    w.sections.close_from(&mut w.emitter, level)
}

/// `<macro name="id"><param name="k" value="v"/></macro>`
fn macro_element(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let Some(name) = node.attribute("name").filter(|n| !n.is_empty()) else {
        return Err(w
            .emitter
            .syntax_error("The 'name' attribute for the 'macro' tag is required"));
    };
    let mut parameters = AttributeSet::new();
    for param in node
        .children()
        .filter(|c| c.is_element() && c.tag_name().name() == "param")
    {
        w.locate(param);
        match (param.attribute("name"), param.attribute("value")) {
            (Some(key), Some(value)) if !key.is_empty() => {
                parameters.insert(key, value);
            }
            _ => {
                return Err(w.emitter.syntax_error(
                    "'name' and 'value' attributes are required for the 'param' tag",
                ));
            }
        }
    }
    w.locate(node);
    w.execute_macro(name, parameters)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::macros::MacroRegistry;
    use crate::sink::EventCollector;
    use pretty_assertions::assert_eq;

    fn kinds(input: &str, options: &ParseOptions) -> Vec<EventKind> {
        let mut sink = EventCollector::new();
        XdocParser.parse(input, &mut sink, options).unwrap();
        sink.into_events().into_iter().map(|e| e.kind).collect()
    }

    fn text(s: &str) -> EventKind {
        EventKind::Text(s.into())
    }

    #[test]
    fn document_sections_and_subsections() {
        use EventKind::*;
        let input = r#"<?xml version="1.0"?>
<document>
  <properties>
    <title>Manual</title>
    <author email="a@b.org">Ann</author>
  </properties>
  <body>
    <section name="Overview">
      <p>Text</p>
      <subsection name="Detail" id="detail">
        <h4>Deep</h4>
        <source>x &lt; y</source>
      </subsection>
    </section>
    <section name="Next"/>
  </body>
</document>"#;
        assert_eq!(
            kinds(input, &ParseOptions::strict()),
            vec![
                StartHead,
                StartTitle,
                text("Manual"),
                EndTitle,
                StartAuthor,
                text("Ann"),
                EndAuthor,
                EndHead,
                StartBody,
                StartSection(1),
                StartSectionTitle(1),
                text("Overview"),
                EndSectionTitle(1),
                StartParagraph,
                text("Text"),
                EndParagraph,
                StartSection(2),
                StartSectionTitle(2),
                StartAnchor("detail".into()),
                EndAnchor,
                text("Detail"),
                EndSectionTitle(2),
                StartSection(3),
                StartSectionTitle(3),
                text("Deep"),
                EndSectionTitle(3),
                StartVerbatim { boxed: true },
                text("x < y"),
                EndVerbatim,
                EndSection(3),
                EndSection(2),
                EndSection(1),
                StartSection(1),
                StartSectionTitle(1),
                text("Next"),
                EndSectionTitle(1),
                EndSection(1),
                EndBody,
            ]
        );
    }

    #[test]
    fn macros_run_through_the_registry() {
        use EventKind::*;
        let options = ParseOptions::strict().with_macros(Arc::new(MacroRegistry::with_defaults()));
        let input = r#"<document><body><macro name="echo"><param name="k" value="v"/></macro></body></document>"#;
        assert_eq!(
            kinds(input, &options)[3..].to_vec(),
            vec![
                StartVerbatim { boxed: true },
                text("echo\n"),
                text("k ---> v\n"),
                EndVerbatim,
                EndBody,
            ]
        );
    }

    #[test]
    fn macro_without_name_is_fatal() {
        let mut sink = EventCollector::new();
        let err = XdocParser
            .parse(
                "<document><body><macro/></body></document>",
                &mut sink,
                &ParseOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn unknown_macro_degrades_in_lenient_mode() {
        let mut sink = EventCollector::new();
        let report = XdocParser
            .parse(
                r#"<document><body><macro name="nope"/></body></document>"#,
                &mut sink,
                &ParseOptions::default(),
            )
            .unwrap();
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].code.as_deref(), Some("M001"));
    }
}
