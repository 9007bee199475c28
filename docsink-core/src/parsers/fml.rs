//! FAQ markup: `<faqs>` holding `<part>`s of `<faq id>` entries.
//!
//! The output is an index of linked questions per part followed by the
//! answers as definition lists, each answer ending in a `[top]` link back to
//! the index unless `toplink="false"`.

use roxmltree::Node;

use crate::attrs::{AttributeSet, keys};
use crate::error::ParseError;
use crate::event::{EventKind, Numbering};
use crate::parser::{Emitter, ParseOptions, ParseReport, Parser};
use crate::sink::Sink;

use super::xdoc::XDOC_TAGS;
use super::xml::{self, Walker, child_element, text_content};

const TOP: &str = "top";
const DEFAULT_TITLE: &str = "Frequently Asked Questions";

pub struct FmlParser;

impl Parser for FmlParser {
    fn id(&self) -> &'static str {
        "fml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["fml"]
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
        walker.locate(root);
        if root.tag_name().name() != "faqs" {
            return Err(walker.emitter.syntax_error(format!(
                "Expected <faqs> as the root element, found <{}>",
                root.tag_name().name()
            )));
        }
        let faqs = Faqs::read(&mut walker, root)?;
        faqs.emit(&mut walker)?;
        walker.finish()
    }
}

struct Faq<'a, 'i> {
    id: String,
    question: Node<'a, 'i>,
    answer: Node<'a, 'i>,
}

struct Part<'a, 'i> {
    id: Option<String>,
    title: Option<String>,
    faqs: Vec<Faq<'a, 'i>>,
}

struct Faqs<'a, 'i> {
    title: String,
    toplink: bool,
    parts: Vec<Part<'a, 'i>>,
}

impl<'a, 'i> Faqs<'a, 'i> {
    /// Collect and check the whole document before emitting anything, so a
    /// malformed entry fails the parse without a half-written index.
    fn read(w: &mut Walker<'_>, root: Node<'a, 'i>) -> Result<Self, ParseError> {
        let mut parts = Vec::new();
        for part in root.children().filter(|c| c.has_tag_name("part")) {
            w.locate(part);
            let id = match part.attribute("id") {
                Some(id) => w.valid_id(id),
                None => None,
            };
            let title = child_element(part, "title").map(|t| clean(&text_content(t)));
            let mut faqs = Vec::new();
            for faq in part.children().filter(|c| c.has_tag_name("faq")) {
                faqs.push(read_faq(w, faq)?);
            }
            parts.push(Part { id, title, faqs });
        }
        Ok(Self {
            title: root
                .attribute("title")
                .map(clean)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            toplink: root.attribute("toplink") != Some("false"),
            parts,
        })
    }

    fn emit(&self, w: &mut Walker<'_>) -> Result<(), ParseError> {
        w.emitter.kind(EventKind::StartHead)?;
        w.emitter.kind(EventKind::StartTitle)?;
        w.text_with_nbsp(&self.title)?;
        w.emitter.kind(EventKind::EndTitle)?;
        w.emitter.kind(EventKind::EndHead)?;
        w.emitter.kind(EventKind::StartBody)?;

        w.sections.open(&mut w.emitter, 1)?;
        w.emitter.kind(EventKind::StartSectionTitle(1))?;
        w.anchor(TOP)?;
        w.text_with_nbsp(&self.title)?;
        w.emitter.kind(EventKind::EndSectionTitle(1))?;
        for part in &self.parts {
            self.index(w, part)?;
        }
        w.sections.close_from(&mut w.emitter, 1)?;

        for part in &self.parts {
            self.answers(w, part)?;
        }
        w.emitter.kind(EventKind::EndBody)
    }

    /// The part title in bold, then the questions as a numbered list of
    /// links to their answers.
    fn index(&self, w: &mut Walker<'_>, part: &Part<'_, '_>) -> Result<(), ParseError> {
        if let Some(title) = &part.title {
            w.emitter.kind(EventKind::StartParagraph)?;
            w.emitter.kind(EventKind::StartBold)?;
            w.text_with_nbsp(title)?;
            w.emitter.kind(EventKind::EndBold)?;
            w.emitter.kind(EventKind::EndParagraph)?;
        }
        if part.faqs.is_empty() {
            return Ok(());
        }
        w.emitter
            .kind(EventKind::StartNumberedList(Numbering::Decimal))?;
        for faq in &part.faqs {
            w.locate(faq.question);
            w.emitter.kind(EventKind::StartNumberedListItem)?;
            w.emitter.kind(EventKind::StartLink(format!("#{}", faq.id)))?;
            w.children(faq.question)?;
            w.emitter.kind(EventKind::EndLink)?;
            w.emitter.kind(EventKind::EndNumberedListItem)?;
        }
        w.emitter.kind(EventKind::EndNumberedList)
    }

    fn answers(&self, w: &mut Walker<'_>, part: &Part<'_, '_>) -> Result<(), ParseError> {
        if let Some(title) = &part.title {
            w.sections.open(&mut w.emitter, 1)?;
            w.emitter.kind(EventKind::StartSectionTitle(1))?;
            if let Some(id) = &part.id {
                w.anchor(id)?;
            }
            w.text_with_nbsp(title)?;
            w.emitter.kind(EventKind::EndSectionTitle(1))?;
        }

        if !part.faqs.is_empty() {
            w.emitter.kind(EventKind::StartDefinitionList)?;
            for (n, faq) in part.faqs.iter().enumerate() {
                w.emitter.kind(EventKind::StartDefinitionListItem)?;
                w.locate(faq.question);
                w.emitter.kind(EventKind::StartDefinedTerm)?;
                w.anchor(&faq.id)?;
                w.children(faq.question)?;
                w.emitter.kind(EventKind::EndDefinedTerm)?;

                w.locate(faq.answer);
                w.emitter.kind(EventKind::StartDefinition)?;
                w.children(faq.answer)?;
                if self.toplink {
                    top_link(&mut w.emitter)?;
                }
                if n + 1 < part.faqs.len() {
                    w.emitter.kind(EventKind::HorizontalRule)?;
                }
                w.emitter.kind(EventKind::EndDefinition)?;
                w.emitter.kind(EventKind::EndDefinitionListItem)?;
            }
            w.emitter.kind(EventKind::EndDefinitionList)?;
        }

        w.sections.close_from(&mut w.emitter, 1)
    }
}

fn read_faq<'a, 'i>(w: &mut Walker<'_>, faq: Node<'a, 'i>) -> Result<Faq<'a, 'i>, ParseError> {
    w.locate(faq);
    let Some(raw) = faq.attribute("id") else {
        return Err(w.emitter.syntax_error("Missing 'id' attribute for <faq>"));
    };
    let Some(id) = w.valid_id(raw) else {
        return Err(w.emitter.syntax_error("Empty 'id' attribute for <faq>"));
    };
    let Some(question) = child_element(faq, "question") else {
        return Err(w
            .emitter
            .syntax_error(format!("<faq id=\"{raw}\"> has no <question>")));
    };
    let Some(answer) = child_element(faq, "answer") else {
        return Err(w
            .emitter
            .syntax_error(format!("<faq id=\"{raw}\"> has no <answer>")));
    };
    Ok(Faq {
        id,
        question,
        answer,
    })
}

fn top_link(emitter: &mut Emitter<'_>) -> Result<(), ParseError> {
    emitter.with_attributes(
        EventKind::StartParagraph,
        AttributeSet::new().with(keys::ALIGN, "right"),
    )?;
    emitter.kind(EventKind::StartLink(format!("#{TOP}")))?;
    emitter.text("[top]")?;
    emitter.kind(EventKind::EndLink)?;
    emitter.kind(EventKind::EndParagraph)
}

fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
