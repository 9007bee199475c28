//! Structural validation of event streams.
//!
//! The [`Validator`] keeps a stack of open frames and checks every event
//! against it. In strict mode the first violation is returned as a
//! [`StructuralError`]. In lenient mode the validator repairs the stream
//! instead (auto-closing frames, re-opening interleaved inline spans, dropping
//! stray closes) and records a warning [`Diagnostic`] for each repair.
//!
//! Parsers and sinks also query the stack ("am I inside a table cell?")
//! rather than tracking their own parent element.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Diagnostic, FrameStack, SinkError, StructuralError};
use crate::event::{Event, EventKind, Justification};
use crate::id::is_valid_id;
use crate::sink::Sink;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Reject invalid nesting.
    Strict,
    /// Repair invalid nesting and keep going.
    #[default]
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanKind {
    Bold,
    Italic,
    Monospaced,
    Inline,
}

/// The structural kind of an open frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Head,
    Title,
    Author,
    Date,
    Body,
    Section(u8),
    SectionTitle(u8),
    Paragraph,
    List,
    ListItem,
    NumberedList,
    NumberedListItem,
    DefinitionList,
    DefinitionListItem,
    DefinedTerm,
    Definition,
    Table,
    TableRows,
    TableRow,
    TableCell,
    TableCaption,
    Figure,
    FigureCaption,
    Verbatim,
    Anchor,
    Link,
    Span(SpanKind),
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::Head => "head",
            FrameKind::Title => "title",
            FrameKind::Author => "author",
            FrameKind::Date => "date",
            FrameKind::Body => "body",
            FrameKind::Section(level) => return write!(f, "section({level})"),
            FrameKind::SectionTitle(level) => return write!(f, "section-title({level})"),
            FrameKind::Paragraph => "paragraph",
            FrameKind::List => "list",
            FrameKind::ListItem => "list-item",
            FrameKind::NumberedList => "numbered-list",
            FrameKind::NumberedListItem => "numbered-list-item",
            FrameKind::DefinitionList => "definition-list",
            FrameKind::DefinitionListItem => "definition-list-item",
            FrameKind::DefinedTerm => "defined-term",
            FrameKind::Definition => "definition",
            FrameKind::Table => "table",
            FrameKind::TableRows => "table-rows",
            FrameKind::TableRow => "table-row",
            FrameKind::TableCell => "table-cell",
            FrameKind::TableCaption => "table-caption",
            FrameKind::Figure => "figure",
            FrameKind::FigureCaption => "figure-caption",
            FrameKind::Verbatim => "verbatim",
            FrameKind::Anchor => "anchor",
            FrameKind::Link => "link",
            FrameKind::Span(SpanKind::Bold) => "bold",
            FrameKind::Span(SpanKind::Italic) => "italic",
            FrameKind::Span(SpanKind::Monospaced) => "monospaced",
            FrameKind::Span(SpanKind::Inline) => "inline",
        };
        f.write_str(name)
    }
}

enum Role {
    Start(FrameKind),
    End(FrameKind),
    Leaf,
}

fn role(kind: &EventKind) -> Role {
    use EventKind as E;
    use FrameKind as F;
    match kind {
        E::StartHead => Role::Start(F::Head),
        E::EndHead => Role::End(F::Head),
        E::StartTitle => Role::Start(F::Title),
        E::EndTitle => Role::End(F::Title),
        E::StartAuthor => Role::Start(F::Author),
        E::EndAuthor => Role::End(F::Author),
        E::StartDate => Role::Start(F::Date),
        E::EndDate => Role::End(F::Date),
        E::StartBody => Role::Start(F::Body),
        E::EndBody => Role::End(F::Body),
        E::StartSection(l) => Role::Start(F::Section(*l)),
        E::EndSection(l) => Role::End(F::Section(*l)),
        E::StartSectionTitle(l) => Role::Start(F::SectionTitle(*l)),
        E::EndSectionTitle(l) => Role::End(F::SectionTitle(*l)),
        E::StartParagraph => Role::Start(F::Paragraph),
        E::EndParagraph => Role::End(F::Paragraph),
        E::StartList => Role::Start(F::List),
        E::EndList => Role::End(F::List),
        E::StartListItem => Role::Start(F::ListItem),
        E::EndListItem => Role::End(F::ListItem),
        E::StartNumberedList(_) => Role::Start(F::NumberedList),
        E::EndNumberedList => Role::End(F::NumberedList),
        E::StartNumberedListItem => Role::Start(F::NumberedListItem),
        E::EndNumberedListItem => Role::End(F::NumberedListItem),
        E::StartDefinitionList => Role::Start(F::DefinitionList),
        E::EndDefinitionList => Role::End(F::DefinitionList),
        E::StartDefinitionListItem => Role::Start(F::DefinitionListItem),
        E::EndDefinitionListItem => Role::End(F::DefinitionListItem),
        E::StartDefinedTerm => Role::Start(F::DefinedTerm),
        E::EndDefinedTerm => Role::End(F::DefinedTerm),
        E::StartDefinition => Role::Start(F::Definition),
        E::EndDefinition => Role::End(F::Definition),
        E::StartTable => Role::Start(F::Table),
        E::EndTable => Role::End(F::Table),
        E::StartTableRows { .. } => Role::Start(F::TableRows),
        E::EndTableRows => Role::End(F::TableRows),
        E::StartTableRow => Role::Start(F::TableRow),
        E::EndTableRow => Role::End(F::TableRow),
        E::StartTableCell { .. } => Role::Start(F::TableCell),
        E::EndTableCell => Role::End(F::TableCell),
        E::StartTableCaption => Role::Start(F::TableCaption),
        E::EndTableCaption => Role::End(F::TableCaption),
        E::StartFigure => Role::Start(F::Figure),
        E::EndFigure => Role::End(F::Figure),
        E::StartFigureCaption => Role::Start(F::FigureCaption),
        E::EndFigureCaption => Role::End(F::FigureCaption),
        E::StartVerbatim { .. } => Role::Start(F::Verbatim),
        E::EndVerbatim => Role::End(F::Verbatim),
        E::StartAnchor(_) => Role::Start(F::Anchor),
        E::EndAnchor => Role::End(F::Anchor),
        E::StartLink(_) => Role::Start(F::Link),
        E::EndLink => Role::End(F::Link),
        E::StartBold => Role::Start(F::Span(SpanKind::Bold)),
        E::EndBold => Role::End(F::Span(SpanKind::Bold)),
        E::StartItalic => Role::Start(F::Span(SpanKind::Italic)),
        E::EndItalic => Role::End(F::Span(SpanKind::Italic)),
        E::StartMonospaced => Role::Start(F::Span(SpanKind::Monospaced)),
        E::EndMonospaced => Role::End(F::Span(SpanKind::Monospaced)),
        E::StartInline => Role::Start(F::Span(SpanKind::Inline)),
        E::EndInline => Role::End(F::Span(SpanKind::Inline)),
        E::FigureGraphics(_)
        | E::LineBreak
        | E::NonBreakingSpace
        | E::HorizontalRule
        | E::PageBreak
        | E::Text(_)
        | E::RawText(_)
        | E::Comment(_)
        | E::Unknown { .. } => Role::Leaf,
    }
}

/// Frames whose content may include block constructs.
fn accepts_block(parent: Option<FrameKind>) -> bool {
    matches!(
        parent,
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

/// Frames whose content may include text and inline spans.
fn accepts_inline(parent: Option<FrameKind>) -> bool {
    !matches!(
        parent,
        Some(
            FrameKind::Head
                | FrameKind::List
                | FrameKind::NumberedList
                | FrameKind::DefinitionList
                | FrameKind::DefinitionListItem
                | FrameKind::Table
                | FrameKind::TableRows
                | FrameKind::TableRow
                | FrameKind::Figure
        )
    )
}

/// Whether a frame of kind `child` may open directly inside `parent`.
fn start_allowed(child: FrameKind, parent: Option<FrameKind>) -> bool {
    use FrameKind as F;
    match child {
        F::Head | F::Body => parent.is_none(),
        F::Title | F::Author | F::Date => parent == Some(F::Head),
        F::Section(level) => match parent {
            None | Some(F::Body) => true,
            Some(F::Section(open)) => open < level,
            _ => false,
        },
        F::SectionTitle(level) => parent == Some(F::Section(level)),
        F::Paragraph
        | F::List
        | F::NumberedList
        | F::DefinitionList
        | F::Table
        | F::Figure
        | F::Verbatim => accepts_block(parent),
        F::ListItem => parent == Some(F::List),
        F::NumberedListItem => parent == Some(F::NumberedList),
        F::DefinitionListItem => parent == Some(F::DefinitionList),
        F::DefinedTerm | F::Definition => parent == Some(F::DefinitionListItem),
        F::TableRows | F::TableCaption => parent == Some(F::Table),
        F::TableRow => parent == Some(F::TableRows),
        F::TableCell => parent == Some(F::TableRow),
        F::FigureCaption => parent == Some(F::Figure),
        F::Anchor | F::Link | F::Span(_) => accepts_inline(parent),
    }
}

fn leaf_allowed(kind: &EventKind, parent: Option<FrameKind>) -> bool {
    match kind {
        EventKind::Comment(_) | EventKind::Unknown { .. } => true,
        EventKind::HorizontalRule | EventKind::PageBreak => accepts_block(parent),
        EventKind::RawText(_) => accepts_block(parent) || accepts_inline(parent),
        EventKind::FigureGraphics(_) => {
            parent == Some(FrameKind::Figure) || accepts_inline(parent)
        }
        _ => accepts_inline(parent),
    }
}

/// One open structural context.
#[derive(Debug, Clone)]
pub struct Frame {
    kind: FrameKind,
    opening: Event,
    cells: usize,
    justification: Vec<Justification>,
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// The event that opened this frame, attributes included.
    pub fn opening(&self) -> &Event {
        &self.opening
    }

    fn closing_event(&self) -> Event {
        // Every frame is opened by a start event, so `closing` is always Some.
        let kind = self.opening.kind.closing().unwrap_or(EventKind::EndInline);
        Event::new(kind)
    }
}

/// What the caller should forward after a lenient check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the event unchanged.
    Accept,
    /// Forward these events instead; the original is included in order.
    Repair(Vec<Event>),
    /// Forward nothing.
    Drop,
}

/// Stack-based tracker of legal event nesting.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    mode: ValidationMode,
    stack: Vec<Frame>,
    head_seen: bool,
    body_seen: bool,
    anchors: HashSet<String>,
    diagnostics: Vec<Diagnostic>,
    line: Option<usize>,
}

impl Validator {
    pub fn new(mode: ValidationMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn strict() -> Self {
        Self::new(ValidationMode::Strict)
    }

    pub fn lenient() -> Self {
        Self::new(ValidationMode::Lenient)
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Source line attached to diagnostics recorded from now on.
    pub fn set_line(&mut self, line: usize) {
        self.line = Some(line);
    }

    /// Check `event` and update the stack. Returns `Ok(())` when the event
    /// is legal or was repaired.
    pub fn on_event(&mut self, event: &Event) -> Result<(), StructuralError> {
        self.check(event).map(|_| ())
    }

    /// Check `event`, update the stack, and say what to forward.
    ///
    /// Strict mode only ever returns [`Verdict::Accept`] or an error.
    pub fn check(&mut self, event: &Event) -> Result<Verdict, StructuralError> {
        match role(&event.kind) {
            Role::Start(kind) => self.check_start(event, kind),
            Role::End(kind) => self.check_end(event, kind),
            Role::Leaf => self.check_leaf(event),
        }
    }

    /// End of stream. Strict mode fails if frames remain open; lenient mode
    /// returns the events that close them.
    pub fn finish(&mut self) -> Result<Vec<Event>, StructuralError> {
        if self.stack.is_empty() {
            return Ok(Vec::new());
        }
        let err = StructuralError::Unclosed {
            stack: self.stack_snapshot(),
        };
        if self.mode == ValidationMode::Strict {
            return Err(err);
        }
        self.warn(&err);
        let closes: Vec<Event> = self.stack.iter().rev().map(Frame::closing_event).collect();
        self.stack.clear();
        Ok(closes)
    }

    /// Forget everything so the validator can check another document.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.head_seen = false;
        self.body_seen = false;
        self.anchors.clear();
        self.diagnostics.clear();
        self.line = None;
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_balanced(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn top(&self) -> Option<&Frame> {
        self.stack.last()
    }

    pub fn top_kind(&self) -> Option<FrameKind> {
        self.stack.last().map(|f| f.kind)
    }

    pub fn inside(&self, kind: FrameKind) -> bool {
        self.stack.iter().any(|f| f.kind == kind)
    }

    pub fn in_head(&self) -> bool {
        self.inside(FrameKind::Head)
    }

    /// Level of the innermost open section, 0 when none is open.
    pub fn section_level(&self) -> u8 {
        self.stack
            .iter()
            .rev()
            .find_map(|f| match f.kind {
                FrameKind::Section(level) => Some(level),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Number of open list frames of any flavor.
    pub fn list_depth(&self) -> usize {
        self.stack
            .iter()
            .filter(|f| {
                matches!(
                    f.kind,
                    FrameKind::List | FrameKind::NumberedList | FrameKind::DefinitionList
                )
            })
            .count()
    }

    /// Zero-based index of the current cell within the innermost open row.
    pub fn cell_index(&self) -> Option<usize> {
        self.stack
            .iter()
            .rev()
            .find(|f| f.kind == FrameKind::TableRow)
            .and_then(|row| row.cells.checked_sub(1))
    }

    /// Justification cached for column `index` of the innermost table.
    pub fn column_justification(&self, index: usize) -> Option<Justification> {
        self.stack
            .iter()
            .rev()
            .find(|f| f.kind == FrameKind::Table)
            .and_then(|table| table.justification.get(index).copied())
    }

    /// Whether a text event would be legal right now.
    pub fn accepts_text(&self) -> bool {
        accepts_inline(self.top_kind())
    }

    pub fn stack_snapshot(&self) -> FrameStack {
        FrameStack(self.stack.iter().map(|f| f.kind.to_string()).collect())
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    // -----------------------------------------------------------------
    // Checks
    // -----------------------------------------------------------------

    fn check_start(&mut self, event: &Event, kind: FrameKind) -> Result<Verdict, StructuralError> {
        let phase_clash = match kind {
            FrameKind::Head => self.head_seen || self.body_seen,
            FrameKind::Body => self.body_seen,
            _ => false,
        };
        if phase_clash {
            self.violation(StructuralError::MisplacedEvent {
                event: event.name().to_string(),
                stack: self.stack_snapshot(),
            })?;
            return Ok(Verdict::Drop);
        }

        if let EventKind::StartAnchor(id) = &event.kind {
            self.check_anchor(id)?;
        }

        let mut verdict = Verdict::Accept;
        if !start_allowed(kind, self.top_kind()) {
            verdict = self.misplaced_start(event, kind)?;
        }

        match kind {
            FrameKind::Head => self.head_seen = true,
            FrameKind::Body => self.body_seen = true,
            _ => {}
        }
        self.push(event);

        if kind == FrameKind::TableCell {
            self.count_cell()?;
        }
        Ok(verdict)
    }

    fn misplaced_start(
        &mut self,
        event: &Event,
        kind: FrameKind,
    ) -> Result<Verdict, StructuralError> {
        let err = match (kind, self.top_kind()) {
            (FrameKind::Section(level), Some(FrameKind::Section(open))) => {
                StructuralError::SectionNesting {
                    level,
                    open,
                    stack: self.stack_snapshot(),
                }
            }
            _ => StructuralError::MisplacedEvent {
                event: event.name().to_string(),
                stack: self.stack_snapshot(),
            },
        };
        self.violation(err)?;

        // Lenient: close frames until the start becomes legal, if it can.
        let target = self
            .stack
            .iter()
            .rposition(|f| start_allowed(kind, Some(f.kind)))
            .map(|pos| pos + 1)
            .or_else(|| start_allowed(kind, None).then_some(0));

        match target {
            Some(keep) => {
                let mut repaired = self.close_to(keep);
                repaired.push(event.clone());
                Ok(Verdict::Repair(repaired))
            }
            // Nothing to close that would help; accept it where it is.
            None => Ok(Verdict::Accept),
        }
    }

    fn check_end(&mut self, event: &Event, kind: FrameKind) -> Result<Verdict, StructuralError> {
        if self.top_kind() == Some(kind) {
            self.stack.pop();
            return Ok(Verdict::Accept);
        }

        let expected = self
            .top_kind()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "nothing".to_string());
        self.violation(StructuralError::UnbalancedClose {
            expected,
            found: kind.to_string(),
            stack: self.stack_snapshot(),
        })?;

        let Some(pos) = self.stack.iter().rposition(|f| f.kind == kind) else {
            return Ok(Verdict::Drop);
        };

        let above: Vec<Frame> = self.stack[pos + 1..].to_vec();
        let reopen = matches!(kind, FrameKind::Span(_))
            && above.iter().all(|f| matches!(f.kind, FrameKind::Span(_)));

        let mut repaired = self.close_to(pos + 1);
        self.stack.pop();
        repaired.push(event.clone());
        if reopen {
            for frame in above {
                repaired.push(frame.opening.clone());
                self.stack.push(frame);
            }
        }
        Ok(Verdict::Repair(repaired))
    }

    fn check_leaf(&mut self, event: &Event) -> Result<Verdict, StructuralError> {
        if !leaf_allowed(&event.kind, self.top_kind()) {
            self.violation(StructuralError::MisplacedEvent {
                event: event.name().to_string(),
                stack: self.stack_snapshot(),
            })?;
        }
        Ok(Verdict::Accept)
    }

    fn check_anchor(&mut self, id: &str) -> Result<(), StructuralError> {
        if !is_valid_id(id) {
            self.violation(StructuralError::InvalidAnchor {
                id: id.to_string(),
                stack: self.stack_snapshot(),
            })?;
        }
        if !self.anchors.insert(id.to_string()) {
            self.violation(StructuralError::DuplicateAnchor {
                id: id.to_string(),
                stack: self.stack_snapshot(),
            })?;
        }
        Ok(())
    }

    /// Count a freshly pushed cell against the table's declared columns.
    fn count_cell(&mut self) -> Result<(), StructuralError> {
        let Some(row) = self
            .stack
            .iter_mut()
            .rev()
            .find(|f| f.kind == FrameKind::TableRow)
        else {
            return Ok(());
        };
        row.cells += 1;
        let cells = row.cells;

        let columns = self
            .stack
            .iter()
            .rev()
            .find(|f| f.kind == FrameKind::Table)
            .map(|t| t.justification.len())
            .unwrap_or(0);
        if columns > 0 && cells > columns {
            self.violation(StructuralError::CellOverflow {
                columns,
                stack: self.stack_snapshot(),
            })?;
        }
        Ok(())
    }

    fn push(&mut self, event: &Event) {
        let Role::Start(kind) = role(&event.kind) else {
            return;
        };
        if let EventKind::StartTableRows { justification, .. } = &event.kind {
            if let Some(table) = self
                .stack
                .iter_mut()
                .rev()
                .find(|f| f.kind == FrameKind::Table)
            {
                if table.justification.is_empty() {
                    table.justification = justification.clone();
                }
            }
        }
        self.stack.push(Frame {
            kind,
            opening: event.clone(),
            cells: 0,
            justification: Vec::new(),
        });
    }

    /// Pop frames until `keep` remain, returning their closing events.
    fn close_to(&mut self, keep: usize) -> Vec<Event> {
        let mut closes = Vec::new();
        while self.stack.len() > keep {
            if let Some(frame) = self.stack.pop() {
                closes.push(frame.closing_event());
            }
        }
        closes
    }

    /// Strict: fail. Lenient: record a warning and carry on.
    fn violation(&mut self, err: StructuralError) -> Result<(), StructuralError> {
        match self.mode {
            ValidationMode::Strict => Err(err),
            ValidationMode::Lenient => {
                self.warn(&err);
                Ok(())
            }
        }
    }

    fn warn(&mut self, err: &StructuralError) {
        self.diagnostics
            .push(Diagnostic::warning(err.to_string(), self.line, err.code()));
    }
}

/// A sink wrapper that gates every event through a [`Validator`].
///
/// In lenient mode the inner sink sees the repaired stream; in strict mode
/// the first violation is returned as [`SinkError::Structural`].
pub struct ValidatingSink<S> {
    inner: S,
    validator: Validator,
}

impl<S: Sink> ValidatingSink<S> {
    pub fn new(inner: S, mode: ValidationMode) -> Self {
        Self {
            inner,
            validator: Validator::new(mode),
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Sink> Sink for ValidatingSink<S> {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        match self.validator.check(event)? {
            Verdict::Accept => self.inner.on_event(event),
            Verdict::Repair(events) => events.iter().try_for_each(|e| self.inner.on_event(e)),
            Verdict::Drop => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<(), SinkError> {
        let closes = self.validator.finish();
        // Reset first so the wrapper is reusable even after a failure.
        let diagnostics = self.validator.take_diagnostics();
        self.validator.reset();
        self.validator.diagnostics = diagnostics;
        let forwarded = closes
            .map_err(SinkError::from)
            .and_then(|closes| closes.iter().try_for_each(|e| self.inner.on_event(e)));
        // The inner sink is closed even when the stream was rejected.
        let closed = self.inner.close();
        forwarded.and(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Numbering;
    use pretty_assertions::assert_eq;

    fn ev(kind: EventKind) -> Event {
        Event::new(kind)
    }

    fn feed(validator: &mut Validator, kinds: Vec<EventKind>) -> Result<Vec<Event>, StructuralError> {
        let mut out = Vec::new();
        for kind in kinds {
            let event = ev(kind);
            match validator.check(&event)? {
                Verdict::Accept => out.push(event),
                Verdict::Repair(events) => out.extend(events),
                Verdict::Drop => {}
            }
        }
        out.extend(validator.finish()?);
        Ok(out)
    }

    fn table_with_columns(n: usize) -> Vec<EventKind> {
        vec![
            EventKind::StartTable,
            EventKind::StartTableRows {
                justification: vec![Justification::Center; n],
                grid: false,
            },
            EventKind::StartTableRow,
        ]
    }

    fn cell() -> EventKind {
        EventKind::StartTableCell {
            header: false,
            justification: None,
        }
    }

    #[test]
    fn balanced_document_leaves_empty_stack() {
        let mut v = Validator::strict();
        let out = feed(
            &mut v,
            vec![
                EventKind::StartHead,
                EventKind::StartTitle,
                EventKind::Text("T".into()),
                EventKind::EndTitle,
                EventKind::EndHead,
                EventKind::StartBody,
                EventKind::StartSection(1),
                EventKind::StartSectionTitle(1),
                EventKind::Text("S".into()),
                EventKind::EndSectionTitle(1),
                EventKind::StartParagraph,
                EventKind::StartBold,
                EventKind::Text("b".into()),
                EventKind::EndBold,
                EventKind::EndParagraph,
                EventKind::EndSection(1),
                EventKind::EndBody,
            ],
        )
        .unwrap();
        assert_eq!(out.len(), 17);
        assert!(v.is_balanced());
        assert!(v.diagnostics().is_empty());
    }

    #[test]
    fn strict_rejects_unbalanced_section_close() {
        let mut v = Validator::strict();
        let err = feed(
            &mut v,
            vec![
                EventKind::StartSection(1),
                EventKind::StartSection(2),
                EventKind::EndSection(1),
            ],
        )
        .unwrap_err();
        assert_eq!(
            err,
            StructuralError::UnbalancedClose {
                expected: "section(2)".into(),
                found: "section(1)".into(),
                stack: FrameStack(vec!["section(1)".into(), "section(2)".into()]),
            }
        );
    }

    #[test]
    fn strict_reports_unclosed_at_finish() {
        let mut v = Validator::strict();
        let err = feed(
            &mut v,
            vec![
                EventKind::StartSection(1),
                EventKind::StartSection(2),
                EventKind::EndSection(2),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, StructuralError::Unclosed { .. }));
    }

    #[test]
    fn skipped_section_levels_are_accepted() {
        for mode in [ValidationMode::Strict, ValidationMode::Lenient] {
            let mut v = Validator::new(mode);
            let out = feed(
                &mut v,
                vec![
                    EventKind::StartSection(1),
                    EventKind::StartSection(3),
                    EventKind::EndSection(3),
                    EventKind::EndSection(1),
                ],
            )
            .unwrap();
            assert_eq!(out.len(), 4);
            assert!(v.diagnostics().is_empty());
        }
    }

    #[test]
    fn lenient_auto_closes_sections_of_same_or_deeper_level() {
        let mut v = Validator::lenient();
        let out = feed(
            &mut v,
            vec![
                EventKind::StartSection(1),
                EventKind::StartSection(2),
                EventKind::StartParagraph,
                EventKind::StartSection(2),
                EventKind::EndSection(2),
                EventKind::EndSection(1),
            ],
        )
        .unwrap();
        let kinds: Vec<EventKind> = out.into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::StartSection(1),
                EventKind::StartSection(2),
                EventKind::StartParagraph,
                EventKind::EndParagraph,
                EventKind::EndSection(2),
                EventKind::StartSection(2),
                EventKind::EndSection(2),
                EventKind::EndSection(1),
            ]
        );
        assert_eq!(v.diagnostics().len(), 1);
    }

    #[test]
    fn strict_rejects_section_inside_same_level() {
        let mut v = Validator::strict();
        v.on_event(&ev(EventKind::StartSection(2))).unwrap();
        let err = v.on_event(&ev(EventKind::StartSection(2))).unwrap_err();
        assert!(matches!(
            err,
            StructuralError::SectionNesting { level: 2, open: 2, .. }
        ));
    }

    #[test]
    fn cell_overflow_is_detected() {
        let mut v = Validator::strict();
        let mut kinds = table_with_columns(3);
        for _ in 0..3 {
            kinds.push(cell());
            kinds.push(EventKind::EndTableCell);
        }
        for kind in kinds {
            v.on_event(&ev(kind)).unwrap();
        }
        assert_eq!(v.column_justification(2), Some(Justification::Center));
        let err = v.on_event(&ev(cell())).unwrap_err();
        assert!(matches!(err, StructuralError::CellOverflow { columns: 3, .. }));
    }

    #[test]
    fn cell_count_resets_per_row() {
        let mut v = Validator::strict();
        let mut kinds = table_with_columns(2);
        kinds.extend([cell(), EventKind::EndTableCell, cell(), EventKind::EndTableCell]);
        kinds.extend([EventKind::EndTableRow, EventKind::StartTableRow]);
        kinds.extend([cell(), EventKind::EndTableCell, cell()]);
        for kind in kinds {
            v.on_event(&ev(kind)).unwrap();
        }
        assert_eq!(v.cell_index(), Some(1));
    }

    #[test]
    fn no_justification_means_unbounded_cells() {
        let mut v = Validator::strict();
        let mut kinds = table_with_columns(0);
        for _ in 0..6 {
            kinds.push(cell());
            kinds.push(EventKind::EndTableCell);
        }
        for kind in kinds {
            v.on_event(&ev(kind)).unwrap();
        }
    }

    #[test]
    fn lenient_cell_overflow_is_a_warning() {
        let mut v = Validator::lenient();
        let mut kinds = table_with_columns(1);
        kinds.extend([cell(), EventKind::EndTableCell, cell()]);
        for kind in kinds {
            v.on_event(&ev(kind)).unwrap();
        }
        assert_eq!(v.diagnostics()[0].code.as_deref(), Some("S003"));
    }

    #[test]
    fn table_cell_outside_row_is_misplaced() {
        let mut v = Validator::strict();
        v.on_event(&ev(EventKind::StartTable)).unwrap();
        let err = v.on_event(&ev(cell())).unwrap_err();
        assert_eq!(
            err,
            StructuralError::MisplacedEvent {
                event: "table-cell".into(),
                stack: FrameStack(vec!["table".into()]),
            }
        );
    }

    #[test]
    fn strict_rejects_interleaved_spans() {
        let mut v = Validator::strict();
        let err = feed(
            &mut v,
            vec![
                EventKind::StartParagraph,
                EventKind::StartBold,
                EventKind::StartItalic,
                EventKind::EndBold,
            ],
        )
        .unwrap_err();
        assert!(matches!(err, StructuralError::UnbalancedClose { .. }));
    }

    #[test]
    fn lenient_reopens_interleaved_spans() {
        let mut v = Validator::lenient();
        let out = feed(
            &mut v,
            vec![
                EventKind::StartParagraph,
                EventKind::StartBold,
                EventKind::Text("a".into()),
                EventKind::StartItalic,
                EventKind::Text("b".into()),
                EventKind::EndBold,
                EventKind::Text("c".into()),
                EventKind::EndItalic,
                EventKind::EndParagraph,
            ],
        )
        .unwrap();
        let kinds: Vec<EventKind> = out.into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::StartParagraph,
                EventKind::StartBold,
                EventKind::Text("a".into()),
                EventKind::StartItalic,
                EventKind::Text("b".into()),
                EventKind::EndItalic,
                EventKind::EndBold,
                EventKind::StartItalic,
                EventKind::Text("c".into()),
                EventKind::EndItalic,
                EventKind::EndParagraph,
            ]
        );
        assert!(v.is_balanced());
    }

    #[test]
    fn lenient_drops_stray_close() {
        let mut v = Validator::lenient();
        let out = feed(
            &mut v,
            vec![
                EventKind::StartParagraph,
                EventKind::EndList,
                EventKind::EndParagraph,
            ],
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(v.diagnostics().len(), 1);
    }

    #[test]
    fn lenient_closes_paragraph_before_list() {
        let mut v = Validator::lenient();
        let out = feed(
            &mut v,
            vec![
                EventKind::StartBody,
                EventKind::StartParagraph,
                EventKind::StartNumberedList(Numbering::Decimal),
                EventKind::EndNumberedList,
                EventKind::EndParagraph,
                EventKind::EndBody,
            ],
        )
        .unwrap();
        let kinds: Vec<EventKind> = out.into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::StartBody,
                EventKind::StartParagraph,
                EventKind::EndParagraph,
                EventKind::StartNumberedList(Numbering::Decimal),
                EventKind::EndNumberedList,
                EventKind::EndBody,
            ]
        );
    }

    #[test]
    fn lenient_finish_closes_remaining_frames() {
        let mut v = Validator::lenient();
        let out = feed(
            &mut v,
            vec![EventKind::StartBody, EventKind::StartSection(1), EventKind::StartParagraph],
        )
        .unwrap();
        let tail: Vec<EventKind> = out[3..].iter().map(|e| e.kind.clone()).collect();
        assert_eq!(
            tail,
            vec![EventKind::EndParagraph, EventKind::EndSection(1), EventKind::EndBody]
        );
        assert_eq!(v.diagnostics()[0].code.as_deref(), Some("S007"));
    }

    #[test]
    fn head_after_body_is_misplaced() {
        let mut v = Validator::strict();
        v.on_event(&ev(EventKind::StartBody)).unwrap();
        v.on_event(&ev(EventKind::EndBody)).unwrap();
        assert!(v.on_event(&ev(EventKind::StartHead)).is_err());

        let mut v = Validator::lenient();
        v.on_event(&ev(EventKind::StartBody)).unwrap();
        assert_eq!(v.check(&ev(EventKind::StartBody)).unwrap(), Verdict::Drop);
    }

    #[test]
    fn anchors_must_be_valid_and_unique() {
        let mut v = Validator::strict();
        v.on_event(&ev(EventKind::StartAnchor("intro".into()))).unwrap();
        v.on_event(&ev(EventKind::EndAnchor)).unwrap();
        assert!(matches!(
            v.on_event(&ev(EventKind::StartAnchor("intro".into()))),
            Err(StructuralError::DuplicateAnchor { .. })
        ));

        let mut v = Validator::strict();
        assert!(matches!(
            v.on_event(&ev(EventKind::StartAnchor("1 bad".into()))),
            Err(StructuralError::InvalidAnchor { .. })
        ));
    }

    #[test]
    fn queries_reflect_stack() {
        let mut v = Validator::strict();
        for kind in [
            EventKind::StartBody,
            EventKind::StartSection(2),
            EventKind::StartList,
            EventKind::StartListItem,
            EventKind::StartDefinitionList,
        ] {
            v.on_event(&ev(kind)).unwrap();
        }
        assert_eq!(v.section_level(), 2);
        assert_eq!(v.list_depth(), 2);
        assert!(v.inside(FrameKind::ListItem));
        assert!(!v.accepts_text());
        assert_eq!(
            v.stack_snapshot().to_string(),
            "body > section(2) > list > list-item > definition-list"
        );
    }

    #[test]
    fn validating_sink_forwards_repairs() {
        use crate::sink::EventCollector;

        let mut sink = ValidatingSink::new(EventCollector::new(), ValidationMode::Lenient);
        sink.on_event(&ev(EventKind::StartParagraph)).unwrap();
        sink.on_event(&ev(EventKind::StartBold)).unwrap();
        sink.close().unwrap();
        let kinds: Vec<EventKind> = sink.inner().events().iter().map(|e| e.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::StartParagraph,
                EventKind::StartBold,
                EventKind::EndBold,
                EventKind::EndParagraph,
            ]
        );
        assert_eq!(sink.validator().diagnostics().len(), 1);
    }

    #[test]
    fn strict_close_still_closes_the_inner_sink() {
        #[derive(Default)]
        struct Closes(usize);

        impl Sink for Closes {
            fn on_event(&mut self, _event: &Event) -> Result<(), SinkError> {
                Ok(())
            }

            fn close(&mut self) -> Result<(), SinkError> {
                self.0 += 1;
                Ok(())
            }
        }

        let mut sink = ValidatingSink::new(Closes::default(), ValidationMode::Strict);
        sink.on_event(&ev(EventKind::StartParagraph)).unwrap();
        let err = sink.close().unwrap_err();
        assert!(matches!(
            err,
            SinkError::Structural(StructuralError::Unclosed { .. })
        ));
        assert_eq!(sink.inner().0, 1);

        // Reusable afterwards
        sink.on_event(&ev(EventKind::StartParagraph)).unwrap();
        sink.on_event(&ev(EventKind::EndParagraph)).unwrap();
        sink.close().unwrap();
        assert_eq!(sink.inner().0, 2);
    }
}
