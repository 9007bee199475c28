//! Source-format parsers.
//!
//! Line-oriented wiki formats (`apt`, `confluence`, `twiki`) are hand-written
//! scanners. The XML formats share the element walker in [`xml`], and
//! Markdown goes through `pulldown-cmark`.

pub mod apt;
pub mod confluence;
pub mod docbook;
pub mod fml;
pub mod markdown;
pub mod twiki;
pub mod xdoc;
pub mod xhtml;
pub mod xml;

use crate::error::ParseError;
use crate::event::{EventKind, Numbering};
use crate::parser::Emitter;

/// Sections opened by heading lines, closed when a heading of the same or a
/// higher level arrives.
#[derive(Debug, Default)]
pub(crate) struct SectionStack {
    open: Vec<u8>,
}

impl SectionStack {
    pub(crate) fn open(&mut self, emitter: &mut Emitter<'_>, level: u8) -> Result<(), ParseError> {
        self.close_from(emitter, level)?;
        self.open.push(level);
        emitter.kind(EventKind::StartSection(level))
    }

    /// Close every open section of level `level` or deeper.
    pub(crate) fn close_from(&mut self, emitter: &mut Emitter<'_>, level: u8) -> Result<(), ParseError> {
        while let Some(&open) = self.open.last() {
            if open < level {
                break;
            }
            self.open.pop();
            emitter.kind(EventKind::EndSection(open))?;
        }
        Ok(())
    }

    /// Emit a complete section heading: start, title, title end.
    pub(crate) fn heading(
        &mut self,
        emitter: &mut Emitter<'_>,
        level: u8,
        title: impl FnOnce(&mut Emitter<'_>) -> Result<(), ParseError>,
    ) -> Result<(), ParseError> {
        self.open(emitter, level)?;
        emitter.kind(EventKind::StartSectionTitle(level))?;
        title(emitter)?;
        emitter.kind(EventKind::EndSectionTitle(level))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemStyle {
    Bullet,
    Numbered(Numbering),
}

/// Builds nested lists from a flat run of `(depth, style)` items, the way
/// wiki formats write them (`**` or six leading spaces for depth 2).
///
/// Every open list always has one open item; a deeper item nests inside
/// it. Skipped depths get an empty filler item.
#[derive(Debug, Default)]
pub(crate) struct ListNesting {
    open: Vec<ItemStyle>,
}

impl ListNesting {
    /// Start an item at `depth` (1-based). The caller emits its content.
    pub(crate) fn item(
        &mut self,
        emitter: &mut Emitter<'_>,
        depth: usize,
        style: ItemStyle,
    ) -> Result<(), ParseError> {
        let depth = depth.max(1);
        while self.open.len() > depth {
            self.close_one(emitter)?;
        }
        if self.open.len() == depth {
            if let Some(&top) = self.open.last() {
                end_item(emitter, top)?;
            }
        } else {
            while self.open.len() < depth {
                emitter.kind(match style {
                    ItemStyle::Bullet => EventKind::StartList,
                    ItemStyle::Numbered(numbering) => EventKind::StartNumberedList(numbering),
                })?;
                self.open.push(style);
                if self.open.len() < depth {
                    start_item(emitter, style)?;
                }
            }
        }
        match self.open.last() {
            Some(&top) => start_item(emitter, top),
            None => Ok(()),
        }
    }

    pub(crate) fn close_all(&mut self, emitter: &mut Emitter<'_>) -> Result<(), ParseError> {
        while !self.open.is_empty() {
            self.close_one(emitter)?;
        }
        Ok(())
    }

    fn close_one(&mut self, emitter: &mut Emitter<'_>) -> Result<(), ParseError> {
        if let Some(style) = self.open.pop() {
            end_item(emitter, style)?;
            emitter.kind(match style {
                ItemStyle::Bullet => EventKind::EndList,
                ItemStyle::Numbered(_) => EventKind::EndNumberedList,
            })?;
        }
        Ok(())
    }
}

fn start_item(emitter: &mut Emitter<'_>, style: ItemStyle) -> Result<(), ParseError> {
    emitter.kind(match style {
        ItemStyle::Bullet => EventKind::StartListItem,
        ItemStyle::Numbered(_) => EventKind::StartNumberedListItem,
    })
}

fn end_item(emitter: &mut Emitter<'_>, style: ItemStyle) -> Result<(), ParseError> {
    emitter.kind(match style {
        ItemStyle::Bullet => EventKind::EndListItem,
        ItemStyle::Numbered(_) => EventKind::EndNumberedListItem,
    })
}
