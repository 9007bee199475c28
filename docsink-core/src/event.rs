//! The document event vocabulary shared by every parser and sink.
//!
//! A document never exists as a tree here: parsers emit a flat sequence of
//! [`Event`]s, the validator checks their nesting, and sinks serialize them
//! as they arrive.

use serde::{Deserialize, Serialize};

use crate::attrs::AttributeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Justification {
    Left,
    Center,
    Right,
}

impl Justification {
    pub fn as_str(self) -> &'static str {
        match self {
            Justification::Left => "left",
            Justification::Center => "center",
            Justification::Right => "right",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Some(Justification::Left),
            "center" | "centre" => Some(Justification::Center),
            "right" => Some(Justification::Right),
            _ => None,
        }
    }
}

/// Numbering style of an ordered list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Numbering {
    #[default]
    Decimal,
    LowerAlpha,
    UpperAlpha,
    LowerRoman,
    UpperRoman,
}

impl Numbering {
    /// Format a 1-based item number in this style.
    pub fn format(self, n: usize) -> String {
        match self {
            Numbering::Decimal => n.to_string(),
            Numbering::LowerAlpha => alpha(n),
            Numbering::UpperAlpha => alpha(n).to_ascii_uppercase(),
            Numbering::LowerRoman => roman(n),
            Numbering::UpperRoman => roman(n).to_ascii_uppercase(),
        }
    }
}

fn alpha(mut n: usize) -> String {
    let mut out = Vec::new();
    while n > 0 {
        n -= 1;
        out.push(b'a' + (n % 26) as u8);
        n /= 26;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

fn roman(mut n: usize) -> String {
    const TABLE: &[(usize, &str)] = &[
        (1000, "m"),
        (900, "cm"),
        (500, "d"),
        (400, "cd"),
        (100, "c"),
        (90, "xc"),
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];
    let mut out = String::new();
    for &(value, digits) in TABLE {
        while n >= value {
            out.push_str(digits);
            n -= value;
        }
    }
    out
}

/// What happened, without the optional rendering hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    StartHead,
    EndHead,
    StartTitle,
    EndTitle,
    StartAuthor,
    EndAuthor,
    StartDate,
    EndDate,
    StartBody,
    EndBody,

    StartSection(u8),
    EndSection(u8),
    StartSectionTitle(u8),
    EndSectionTitle(u8),

    StartParagraph,
    EndParagraph,

    StartList,
    EndList,
    StartListItem,
    EndListItem,
    StartNumberedList(Numbering),
    EndNumberedList,
    StartNumberedListItem,
    EndNumberedListItem,
    StartDefinitionList,
    EndDefinitionList,
    StartDefinitionListItem,
    EndDefinitionListItem,
    StartDefinedTerm,
    EndDefinedTerm,
    StartDefinition,
    EndDefinition,

    StartTable,
    EndTable,
    /// Opens the row group. `justification` is positional per column; an
    /// empty vector means the column count is not fixed.
    StartTableRows {
        justification: Vec<Justification>,
        grid: bool,
    },
    EndTableRows,
    StartTableRow,
    EndTableRow,
    StartTableCell {
        header: bool,
        justification: Option<Justification>,
    },
    EndTableCell,
    StartTableCaption,
    EndTableCaption,

    StartFigure,
    EndFigure,
    FigureGraphics(String),
    StartFigureCaption,
    EndFigureCaption,

    StartVerbatim {
        boxed: bool,
    },
    EndVerbatim,

    StartAnchor(String),
    EndAnchor,
    StartLink(String),
    EndLink,
    StartBold,
    EndBold,
    StartItalic,
    EndItalic,
    StartMonospaced,
    EndMonospaced,
    /// Generic inline span whose meaning lives entirely in the attributes.
    StartInline,
    EndInline,

    LineBreak,
    NonBreakingSpace,
    HorizontalRule,
    PageBreak,
    Text(String),
    /// Text the sink must write without escaping.
    RawText(String),
    Comment(String),
    /// A construct the parser recognised but could not classify.
    Unknown {
        name: String,
        params: Vec<String>,
    },
}

/// One document event plus its optional attribute overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "AttributeSet::is_empty")]
    pub attributes: AttributeSet,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            attributes: AttributeSet::new(),
        }
    }

    pub fn with_attributes(kind: EventKind, attributes: AttributeSet) -> Self {
        Self { kind, attributes }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(EventKind::Text(content.into()))
    }

    /// Stable construct name used in diagnostics.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_start(&self) -> bool {
        self.kind.is_start()
    }

    pub fn is_end(&self) -> bool {
        self.kind.is_end()
    }
}

impl From<EventKind> for Event {
    fn from(kind: EventKind) -> Self {
        Event::new(kind)
    }
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        use EventKind::*;
        match self {
            StartHead | EndHead => "head",
            StartTitle | EndTitle => "title",
            StartAuthor | EndAuthor => "author",
            StartDate | EndDate => "date",
            StartBody | EndBody => "body",
            StartSection(_) | EndSection(_) => "section",
            StartSectionTitle(_) | EndSectionTitle(_) => "section-title",
            StartParagraph | EndParagraph => "paragraph",
            StartList | EndList => "list",
            StartListItem | EndListItem => "list-item",
            StartNumberedList(_) | EndNumberedList => "numbered-list",
            StartNumberedListItem | EndNumberedListItem => "numbered-list-item",
            StartDefinitionList | EndDefinitionList => "definition-list",
            StartDefinitionListItem | EndDefinitionListItem => "definition-list-item",
            StartDefinedTerm | EndDefinedTerm => "defined-term",
            StartDefinition | EndDefinition => "definition",
            StartTable | EndTable => "table",
            StartTableRows { .. } | EndTableRows => "table-rows",
            StartTableRow | EndTableRow => "table-row",
            StartTableCell { .. } | EndTableCell => "table-cell",
            StartTableCaption | EndTableCaption => "table-caption",
            StartFigure | EndFigure => "figure",
            FigureGraphics(_) => "figure-graphics",
            StartFigureCaption | EndFigureCaption => "figure-caption",
            StartVerbatim { .. } | EndVerbatim => "verbatim",
            StartAnchor(_) | EndAnchor => "anchor",
            StartLink(_) | EndLink => "link",
            StartBold | EndBold => "bold",
            StartItalic | EndItalic => "italic",
            StartMonospaced | EndMonospaced => "monospaced",
            StartInline | EndInline => "inline",
            LineBreak => "line-break",
            NonBreakingSpace => "non-breaking-space",
            HorizontalRule => "horizontal-rule",
            PageBreak => "page-break",
            Text(_) => "text",
            RawText(_) => "raw-text",
            Comment(_) => "comment",
            Unknown { .. } => "unknown",
        }
    }

    pub fn is_start(&self) -> bool {
        use EventKind::*;
        matches!(
            self,
            StartHead
                | StartTitle
                | StartAuthor
                | StartDate
                | StartBody
                | StartSection(_)
                | StartSectionTitle(_)
                | StartParagraph
                | StartList
                | StartListItem
                | StartNumberedList(_)
                | StartNumberedListItem
                | StartDefinitionList
                | StartDefinitionListItem
                | StartDefinedTerm
                | StartDefinition
                | StartTable
                | StartTableRows { .. }
                | StartTableRow
                | StartTableCell { .. }
                | StartTableCaption
                | StartFigure
                | StartFigureCaption
                | StartVerbatim { .. }
                | StartAnchor(_)
                | StartLink(_)
                | StartBold
                | StartItalic
                | StartMonospaced
                | StartInline
        )
    }

    pub fn is_end(&self) -> bool {
        use EventKind::*;
        matches!(
            self,
            EndHead
                | EndTitle
                | EndAuthor
                | EndDate
                | EndBody
                | EndSection(_)
                | EndSectionTitle(_)
                | EndParagraph
                | EndList
                | EndListItem
                | EndNumberedList
                | EndNumberedListItem
                | EndDefinitionList
                | EndDefinitionListItem
                | EndDefinedTerm
                | EndDefinition
                | EndTable
                | EndTableRows
                | EndTableRow
                | EndTableCell
                | EndTableCaption
                | EndFigure
                | EndFigureCaption
                | EndVerbatim
                | EndAnchor
                | EndLink
                | EndBold
                | EndItalic
                | EndMonospaced
                | EndInline
        )
    }

    /// The end event that closes this start event.
    pub fn closing(&self) -> Option<EventKind> {
        use EventKind::*;
        let end = match self {
            StartHead => EndHead,
            StartTitle => EndTitle,
            StartAuthor => EndAuthor,
            StartDate => EndDate,
            StartBody => EndBody,
            StartSection(level) => EndSection(*level),
            StartSectionTitle(level) => EndSectionTitle(*level),
            StartParagraph => EndParagraph,
            StartList => EndList,
            StartListItem => EndListItem,
            StartNumberedList(_) => EndNumberedList,
            StartNumberedListItem => EndNumberedListItem,
            StartDefinitionList => EndDefinitionList,
            StartDefinitionListItem => EndDefinitionListItem,
            StartDefinedTerm => EndDefinedTerm,
            StartDefinition => EndDefinition,
            StartTable => EndTable,
            StartTableRows { .. } => EndTableRows,
            StartTableRow => EndTableRow,
            StartTableCell { .. } => EndTableCell,
            StartTableCaption => EndTableCaption,
            StartFigure => EndFigure,
            StartFigureCaption => EndFigureCaption,
            StartVerbatim { .. } => EndVerbatim,
            StartAnchor(_) => EndAnchor,
            StartLink(_) => EndLink,
            StartBold => EndBold,
            StartItalic => EndItalic,
            StartMonospaced => EndMonospaced,
            StartInline => EndInline,
            _ => return None,
        };
        Some(end)
    }
}
