//! XHTML and XHTML5 parsers.

use std::sync::LazyLock;

use crate::error::ParseError;
use crate::event::EventKind;
use crate::parser::{Emitter, ParseOptions, ParseReport, Parser};
use crate::sink::Sink;

use super::xml::{self, TagRule, TagTable, Walker};

static XHTML_TAGS: LazyLock<TagTable> = LazyLock::new(xml::html_tags);

static XHTML5_TAGS: LazyLock<TagTable> = LazyLock::new(|| {
    use TagRule::*;
    xml::html_tags()
        .with_all(
            &["section", "article", "aside", "nav", "header", "footer", "main", "time", "mark"],
            Transparent,
        )
        .with("figure", Wrap(EventKind::StartFigure))
        .with("figcaption", Wrap(EventKind::StartFigureCaption))
});

fn parse_html(
    parser: &dyn Parser,
    tags: &'static TagTable,
    input: &str,
    sink: &mut dyn Sink,
    options: &ParseOptions,
) -> Result<ParseReport, ParseError> {
    let text = xml::prepare(input);
    let document = xml::load(&text, options)?;
    let root = document.root_element();
    let mut walker = Walker::new(Emitter::new(sink, options), tags, parser, &text);
    if root.tag_name().name() == "html" {
        walker.element(root)?;
    } else {
        xml::fragment(&mut walker, root)?;
    }
    walker.finish()
}

pub struct XhtmlParser;

impl Parser for XhtmlParser {
    fn id(&self) -> &'static str {
        "xhtml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xhtml", "html", "htm"]
    }

    fn parse(
        &self,
        input: &str,
        sink: &mut dyn Sink,
        options: &ParseOptions,
    ) -> Result<ParseReport, ParseError> {
        parse_html(self, &XHTML_TAGS, input, sink, options)
    }
}

pub struct Xhtml5Parser;

impl Parser for Xhtml5Parser {
    fn id(&self) -> &'static str {
        "xhtml5"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xhtml5", "html5"]
    }

    fn parse(
        &self,
        input: &str,
        sink: &mut dyn Sink,
        options: &ParseOptions,
    ) -> Result<ParseReport, ParseError> {
        parse_html(self, &XHTML5_TAGS, input, sink, options)
    }
}
