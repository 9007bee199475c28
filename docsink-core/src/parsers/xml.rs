//! Shared machinery for the XML source formats.
//!
//! Documents are loaded with `roxmltree` and walked depth-first. Each format
//! supplies a [`TagTable`] mapping element names to a [`TagRule`]; the
//! [`Walker`] looks every element up once and either wraps its children in a
//! start/end pair, emits a single event, or hands the node to a
//! format-specific handler.

use std::borrow::Cow;
use std::collections::HashMap;

use roxmltree::{Document, Node, NodeType, ParsingOptions};

use crate::attrs::{AttributeSet, keys};
use crate::error::{Location, ParseError};
use crate::event::{EventKind, Justification, Numbering};
use crate::id::{encode_id, is_valid_id};
use crate::parser::{Emitter, ParseOptions, ParseReport, Parser, normalize_newlines};
use crate::validate::FrameKind;

use super::SectionStack;

pub(crate) type Handler = fn(&mut Walker<'_>, Node<'_, '_>) -> Result<(), ParseError>;

/// How one element name maps onto events.
#[derive(Clone)]
pub(crate) enum TagRule {
    /// The start event, the children, then the matching end event.
    Wrap(EventKind),
    /// As `Wrap`, with fixed attributes on the start event.
    Styled(EventKind, AttributeSet),
    /// A single event; the children are ignored.
    Leaf(EventKind),
    /// Only the children.
    Transparent,
    /// Neither the element nor its children.
    Skip,
    Custom(Handler),
}

#[derive(Clone, Default)]
pub(crate) struct TagTable {
    rules: HashMap<&'static str, TagRule>,
}

impl TagTable {
    pub(crate) fn with(mut self, tag: &'static str, rule: TagRule) -> Self {
        self.rules.insert(tag, rule);
        self
    }

    pub(crate) fn with_all(mut self, tags: &[&'static str], rule: TagRule) -> Self {
        for tag in tags {
            self.rules.insert(tag, rule.clone());
        }
        self
    }

    pub(crate) fn get(&self, tag: &str) -> Option<&TagRule> {
        self.rules.get(tag)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// HTML entities XHTML sources use without declaring them.
const HTML_ENTITIES: &[(&str, u32)] = &[
    ("nbsp", 160),
    ("iexcl", 161),
    ("cent", 162),
    ("pound", 163),
    ("yen", 165),
    ("sect", 167),
    ("copy", 169),
    ("laquo", 171),
    ("reg", 174),
    ("deg", 176),
    ("plusmn", 177),
    ("para", 182),
    ("middot", 183),
    ("raquo", 187),
    ("frac12", 189),
    ("iquest", 191),
    ("Auml", 196),
    ("Ouml", 214),
    ("times", 215),
    ("Uuml", 220),
    ("szlig", 223),
    ("agrave", 224),
    ("aacute", 225),
    ("auml", 228),
    ("ccedil", 231),
    ("egrave", 232),
    ("eacute", 233),
    ("ouml", 246),
    ("divide", 247),
    ("uuml", 252),
    ("ndash", 8211),
    ("mdash", 8212),
    ("lsquo", 8216),
    ("rsquo", 8217),
    ("ldquo", 8220),
    ("rdquo", 8221),
    ("bull", 8226),
    ("hellip", 8230),
    ("euro", 8364),
    ("trade", 8482),
    ("larr", 8592),
    ("rarr", 8594),
];

/// Normalize newlines and rewrite known HTML named entities as numeric
/// character references, which every XML parser understands.
pub(crate) fn prepare(input: &str) -> Cow<'_, str> {
    let input = normalize_newlines(input);
    if !input.contains('&') {
        return input;
    }

    let mut out = String::with_capacity(input.len());
    let mut rest: &str = &input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let name_len = after
            .bytes()
            .take_while(u8::is_ascii_alphanumeric)
            .count();
        let code = HTML_ENTITIES
            .iter()
            .find(|(name, _)| *name == &after[..name_len])
            .map(|&(_, code)| code);
        match code {
            Some(code) if after[name_len..].starts_with(';') => {
                out.push_str(&format!("&#{code};"));
                rest = &after[name_len + 1..];
            }
            _ => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Parse prepared text, mapping malformed XML to a syntax error with its
/// position.
pub(crate) fn load<'i>(text: &'i str, options: &ParseOptions) -> Result<Document<'i>, ParseError> {
    let parsing = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(text, parsing).map_err(|e| {
        let pos = e.pos();
        ParseError::syntax(
            e.to_string(),
            Location {
                source_id: options.source_id.clone(),
                line: pos.row as usize,
                column: pos.col as usize,
            },
        )
    })
}

pub(crate) fn child_element<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
}

/// All text below `node`, in document order.
pub(crate) fn text_content(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// Presentation attributes carried over from the source element.
pub(crate) fn passthrough(node: Node<'_, '_>) -> AttributeSet {
    [keys::CLASS, keys::STYLE, keys::WIDTH, keys::TITLE, keys::LANG]
        .into_iter()
        .filter_map(|key| node.attribute(key).map(|value| (key, value)))
        .collect()
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

pub(crate) struct Walker<'e> {
    pub(crate) emitter: Emitter<'e>,
    pub(crate) sections: SectionStack,
    tags: &'static TagTable,
    parser: &'e dyn Parser,
    source: &'e str,
    verbatim: usize,
}

impl<'e> Walker<'e> {
    pub(crate) fn new(
        emitter: Emitter<'e>,
        tags: &'static TagTable,
        parser: &'e dyn Parser,
        source: &'e str,
    ) -> Self {
        Self {
            emitter,
            sections: SectionStack::default(),
            tags,
            parser,
            source,
            verbatim: 0,
        }
    }

    /// Close remaining sections and finish the emitter.
    pub(crate) fn finish(mut self) -> Result<ParseReport, ParseError> {
        self.sections.close_from(&mut self.emitter, 1)?;
        self.emitter.finish()
    }

    /// Report subsequent events at `node`'s source position.
    pub(crate) fn locate(&mut self, node: Node<'_, '_>) {
        let pos = node.document().text_pos_at(node.range().start);
        self.emitter.set_position(pos.row as usize, pos.col as usize);
    }

    pub(crate) fn children(&mut self, node: Node<'_, '_>) -> Result<(), ParseError> {
        node.children().try_for_each(|child| self.node(child))
    }

    pub(crate) fn node(&mut self, node: Node<'_, '_>) -> Result<(), ParseError> {
        match node.node_type() {
            NodeType::Element => self.element(node),
            NodeType::Text => self.text_node(node),
            NodeType::Comment => {
                let text = node.text().unwrap_or_default();
                self.emitter.comment(text)
            }
            NodeType::Root | NodeType::PI => Ok(()),
        }
    }

    pub(crate) fn element(&mut self, node: Node<'_, '_>) -> Result<(), ParseError> {
        self.locate(node);
        let name = node.tag_name().name();
        let tags = self.tags;
        match tags.get(name) {
            Some(TagRule::Wrap(start)) => self.wrap(start.clone(), passthrough(node), node),
            Some(TagRule::Styled(start, fixed)) => {
                let mut attributes = passthrough(node);
                attributes.merge(fixed);
                self.wrap(start.clone(), attributes, node)
            }
            Some(TagRule::Leaf(kind)) => self.emitter.with_attributes(kind.clone(), passthrough(node)),
            Some(TagRule::Transparent) => self.children(node),
            Some(TagRule::Skip) => Ok(()),
            Some(TagRule::Custom(handler)) => handler(self, node),
            None => {
                let params = node
                    .attributes()
                    .map(|a| format!("{}={}", a.name(), a.value()))
                    .collect();
                self.emitter.unknown(name, params, AttributeSet::new())?;
                self.children(node)
            }
        }
    }

    /// Emit `start`, the children of `node`, then the matching end event.
    pub(crate) fn wrap(
        &mut self,
        start: EventKind,
        attributes: AttributeSet,
        node: Node<'_, '_>,
    ) -> Result<(), ParseError> {
        let end = start.closing();
        self.emitter.with_attributes(start, attributes)?;
        self.children(node)?;
        match end {
            Some(end) => self.emitter.kind(end),
            None => Ok(()),
        }
    }

    /// A verbatim block holding the text of `node` exactly as written.
    pub(crate) fn verbatim(&mut self, node: Node<'_, '_>, boxed: bool) -> Result<(), ParseError> {
        self.emitter.kind(EventKind::StartVerbatim { boxed })?;
        self.verbatim += 1;
        let mut first = true;
        for child in node.children() {
            if child.is_text() && first {
                let text = child.text().unwrap_or_default();
                self.emitter.text(text.strip_prefix('\n').unwrap_or(text))?;
            } else {
                self.node(child)?;
            }
            first = false;
        }
        self.verbatim -= 1;
        self.emitter.kind(EventKind::EndVerbatim)
    }

    /// Open a section from a heading element and use its children as title.
    pub(crate) fn heading(&mut self, node: Node<'_, '_>, level: u8) -> Result<(), ParseError> {
        self.sections.open(&mut self.emitter, level)?;
        self.emitter.kind(EventKind::StartSectionTitle(level))?;
        if let Some(id) = node.attribute("id") {
            self.anchor(id)?;
        }
        self.children(node)?;
        self.emitter.kind(EventKind::EndSectionTitle(level))
    }

    /// An empty anchor, re-encoding ids that are not valid fragments.
    pub(crate) fn anchor(&mut self, id: &str) -> Result<(), ParseError> {
        let Some(id) = self.valid_id(id) else {
            return Ok(());
        };
        self.emitter.kind(EventKind::StartAnchor(id))?;
        self.emitter.kind(EventKind::EndAnchor)
    }

    pub(crate) fn valid_id(&mut self, id: &str) -> Option<String> {
        if is_valid_id(id) {
            return Some(id.to_string());
        }
        let encoded = encode_id(id)?;
        self.emitter
            .warn(format!("Modified invalid anchor '{id}' to '{encoded}'"), "L001");
        Some(encoded)
    }

    pub(crate) fn execute_macro(&mut self, name: &str, parameters: AttributeSet) -> Result<(), ParseError> {
        self.emitter
            .execute_macro(name, parameters, self.parser, self.source)
    }

    fn text_node(&mut self, node: Node<'_, '_>) -> Result<(), ParseError> {
        let raw = node.text().unwrap_or_default();
        if self.verbatim > 0 {
            return self.emitter.text(raw);
        }

        let mut text = collapse_whitespace(raw);
        if node.prev_sibling().is_none() {
            text = text.trim_start().to_string();
        }
        if node.next_sibling().is_none() {
            text = text.trim_end().to_string();
        }
        if text.trim().is_empty() && (text.is_empty() || self.in_block_context()) {
            return Ok(());
        }
        self.text_with_nbsp(&text)
    }

    /// Text where U+00A0 becomes a non-breaking-space event.
    pub(crate) fn text_with_nbsp(&mut self, text: &str) -> Result<(), ParseError> {
        let mut pieces = text.split('\u{a0}');
        if let Some(first) = pieces.next() {
            self.emitter.text(first)?;
        }
        for piece in pieces {
            self.emitter.kind(EventKind::NonBreakingSpace)?;
            self.emitter.text(piece)?;
        }
        Ok(())
    }

    fn in_block_context(&self) -> bool {
        let validator = self.emitter.validator();
        !validator.accepts_text()
            || matches!(
                validator.top_kind(),
                None | Some(
                    FrameKind::Body
                        | FrameKind::Section(_)
                        | FrameKind::ListItem
                        | FrameKind::NumberedListItem
                        | FrameKind::Definition
                        | FrameKind::TableCell
                )
            )
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() && c != '\u{a0}' {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// XHTML element set, shared by xhtml, xhtml5, xdoc and fml content
// ---------------------------------------------------------------------------

pub(crate) fn html_tags() -> TagTable {
    use EventKind as E;
    use TagRule::*;

    TagTable::default()
        .with("html", Custom(html))
        .with_all(&["h1", "h2", "h3", "h4", "h5", "h6"], Custom(html_heading))
        .with("p", Wrap(E::StartParagraph))
        .with("ul", Wrap(E::StartList))
        .with("ol", Custom(ordered_list))
        .with("li", Custom(list_item))
        .with("dl", Custom(definition_list))
        .with("table", Custom(table))
        .with_all(&["td", "th"], Custom(table_cell))
        .with("tr", Wrap(E::StartTableRow))
        .with("pre", Custom(pre))
        .with("div", Custom(div))
        .with("a", Custom(anchor_or_link))
        .with("img", Custom(image))
        .with_all(&["b", "strong"], Wrap(E::StartBold))
        .with_all(&["i", "em", "cite", "dfn", "var"], Wrap(E::StartItalic))
        .with_all(&["code", "tt", "kbd", "samp"], Wrap(E::StartMonospaced))
        .with("u", Styled(E::StartInline, AttributeSet::underline()))
        .with_all(&["s", "strike", "del"], Styled(E::StartInline, AttributeSet::strikethrough()))
        .with("sub", Styled(E::StartInline, AttributeSet::subscript()))
        .with("sup", Styled(E::StartInline, AttributeSet::superscript()))
        .with("br", Leaf(E::LineBreak))
        .with("hr", Leaf(E::HorizontalRule))
        .with_all(
            &[
                "body", "span", "font", "abbr", "acronym", "small", "big", "label", "blockquote",
                "address", "center", "thead", "tbody", "tfoot",
            ],
            Transparent,
        )
        .with_all(&["head", "script", "style", "noscript", "caption", "colgroup", "col"], Skip)
}

/// `<html>`: head metadata, then the body.
fn html(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    w.emitter.kind(EventKind::StartHead)?;
    if let Some(head) = child_element(node, "head") {
        head_metadata(w, head)?;
    }
    w.emitter.kind(EventKind::EndHead)?;

    w.emitter.kind(EventKind::StartBody)?;
    match child_element(node, "body") {
        Some(body) => w.children(body)?,
        None => w.children(node)?,
    }
    w.sections.close_from(&mut w.emitter, 1)?;
    w.emitter.kind(EventKind::EndBody)
}

/// `<title>` and `<meta name="author|date">` inside `<head>`.
fn head_metadata(w: &mut Walker<'_>, head: Node<'_, '_>) -> Result<(), ParseError> {
    for child in head.children().filter(Node::is_element) {
        w.locate(child);
        let (start, end, text) = match child.tag_name().name() {
            "title" => (EventKind::StartTitle, EventKind::EndTitle, text_content(child)),
            "meta" => match (child.attribute("name"), child.attribute("content")) {
                (Some("author"), Some(content)) => {
                    (EventKind::StartAuthor, EventKind::EndAuthor, content.to_string())
                }
                (Some("date" | "dc.date"), Some(content)) => {
                    (EventKind::StartDate, EventKind::EndDate, content.to_string())
                }
                _ => continue,
            },
            _ => continue,
        };
        w.emitter.kind(start)?;
        w.text_with_nbsp(collapse_whitespace(&text).trim())?;
        w.emitter.kind(end)?;
    }
    Ok(())
}

/// `<h1>`/`<h2>` open level 1, down to `<h6>` for level 5.
fn html_heading(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let digit = node.tag_name().name().as_bytes()[1] - b'0';
    w.heading(node, digit.saturating_sub(1).clamp(1, 5))
}

fn ordered_list(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let numbering = list_numbering(node.attribute("type"), node.attribute("style"));
    w.wrap(EventKind::StartNumberedList(numbering), passthrough(node), node)
}

fn list_numbering(kind: Option<&str>, style: Option<&str>) -> Numbering {
    match kind {
        Some("a") => return Numbering::LowerAlpha,
        Some("A") => return Numbering::UpperAlpha,
        Some("i") => return Numbering::LowerRoman,
        Some("I") => return Numbering::UpperRoman,
        _ => {}
    }
    let style = style.unwrap_or_default();
    [
        ("lower-alpha", Numbering::LowerAlpha),
        ("upper-alpha", Numbering::UpperAlpha),
        ("lower-roman", Numbering::LowerRoman),
        ("upper-roman", Numbering::UpperRoman),
    ]
    .into_iter()
    .find(|(name, _)| style.contains(name))
    .map_or(Numbering::Decimal, |(_, numbering)| numbering)
}

/// `<li>` is a numbered item under `<ol>`, a plain item anywhere else.
fn list_item(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let numbered = node
        .parent_element()
        .is_some_and(|p| p.tag_name().name() == "ol");
    let start = if numbered {
        EventKind::StartNumberedListItem
    } else {
        EventKind::StartListItem
    };
    w.wrap(start, passthrough(node), node)
}

/// `<dl>`: each `<dt>`..`<dd>` run becomes one definition-list item.
fn definition_list(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    w.emitter
        .with_attributes(EventKind::StartDefinitionList, passthrough(node))?;
    let mut item_open = false;
    for child in node.children().filter(Node::is_element) {
        w.locate(child);
        match child.tag_name().name() {
            "dt" => {
                if item_open {
                    w.emitter.kind(EventKind::EndDefinitionListItem)?;
                }
                w.emitter.kind(EventKind::StartDefinitionListItem)?;
                w.wrap(EventKind::StartDefinedTerm, AttributeSet::new(), child)?;
                item_open = true;
            }
            "dd" => {
                if !item_open {
                    w.emitter.kind(EventKind::StartDefinitionListItem)?;
                }
                w.wrap(EventKind::StartDefinition, AttributeSet::new(), child)?;
                w.emitter.kind(EventKind::EndDefinitionListItem)?;
                item_open = false;
            }
            _ => w.element(child)?,
        }
    }
    if item_open {
        w.emitter.kind(EventKind::EndDefinitionListItem)?;
    }
    w.emitter.kind(EventKind::EndDefinitionList)
}

/// `<table>`: the widest row fixes the column count and the first row's
/// `align` attributes the justification. A `<caption>` follows the rows.
fn table(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let mut rows = Vec::new();
    for child in node.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter(|r| r.is_element() && r.tag_name().name() == "tr"),
            ),
            _ => {}
        }
    }
    fn cells<'a, 'i>(row: &Node<'a, 'i>) -> Vec<Node<'a, 'i>> {
        row.children()
            .filter(|c| c.is_element() && matches!(c.tag_name().name(), "td" | "th"))
            .collect()
    }
    let columns = rows.iter().map(|r| cells(r).len()).max().unwrap_or(0);
    let mut justification: Vec<Justification> = rows
        .first()
        .map(|r| {
            cells(r)
                .iter()
                .map(|c| c.attribute("align").and_then(Justification::parse).unwrap_or(Justification::Left))
                .collect()
        })
        .unwrap_or_default();
    justification.resize(columns, Justification::Left);
    let grid = node.attribute("border").is_some_and(|b| b != "0");

    w.emitter.with_attributes(EventKind::StartTable, passthrough(node))?;
    w.emitter
        .kind(EventKind::StartTableRows { justification, grid })?;
    for row in rows {
        w.element(row)?;
    }
    w.emitter.kind(EventKind::EndTableRows)?;
    if let Some(caption) = child_element(node, "caption") {
        w.locate(caption);
        w.wrap(EventKind::StartTableCaption, AttributeSet::new(), caption)?;
    }
    w.emitter.kind(EventKind::EndTable)
}

fn table_cell(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let start = EventKind::StartTableCell {
        header: node.tag_name().name() == "th",
        justification: node.attribute("align").and_then(Justification::parse),
    };
    w.wrap(start, passthrough(node), node)
}

fn pre(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    w.verbatim(node, false)
}

/// `<div class="source"><pre>` is a boxed verbatim block; other divs are
/// transparent.
fn div(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let source = node
        .attribute("class")
        .is_some_and(|c| c.split_whitespace().any(|c| c == "source"));
    match child_element(node, "pre") {
        Some(pre) if source => {
            w.locate(pre);
            w.verbatim(pre, true)
        }
        _ => w.children(node),
    }
}

/// `<a href>` is a link, `<a name>` or `<a id>` an anchor.
fn anchor_or_link(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    if let Some(href) = node.attribute("href") {
        return w.wrap(EventKind::StartLink(href.to_string()), passthrough(node), node);
    }
    let name = node.attribute("name").or_else(|| node.attribute("id"));
    match name.and_then(|n| w.valid_id(n)) {
        Some(id) => w.wrap(EventKind::StartAnchor(id), passthrough(node), node),
        None => w.children(node),
    }
}

fn image(w: &mut Walker<'_>, node: Node<'_, '_>) -> Result<(), ParseError> {
    let Some(src) = node.attribute("src") else {
        w.emitter.warn("<img> without src ignored", "X001");
        return Ok(());
    };
    let mut attributes = passthrough(node);
    if let Some(alt) = node.attribute("alt") {
        attributes.insert(keys::ALT, alt);
    }
    w.emitter
        .with_attributes(EventKind::FigureGraphics(src.to_string()), attributes)
}

/// Emit an empty head and wrap a non-`<html>` root in a body.
pub(crate) fn fragment(w: &mut Walker<'_>, root: Node<'_, '_>) -> Result<(), ParseError> {
    w.emitter.kind(EventKind::StartHead)?;
    w.emitter.kind(EventKind::EndHead)?;
    w.emitter.kind(EventKind::StartBody)?;
    w.element(root)?;
    w.sections.close_from(&mut w.emitter, 1)?;
    w.emitter.kind(EventKind::EndBody)
}
