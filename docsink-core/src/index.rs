//! Section index built from an event stream.

use serde::Serialize;

use crate::error::SinkError;
use crate::event::{Event, EventKind};
use crate::id::UniqueIds;
use crate::sink::Sink;

/// One section in the document outline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub level: u8,
    pub children: Vec<IndexEntry>,
}

impl IndexEntry {
    pub fn root() -> Self {
        Self::default()
    }

    /// Depth-first walk of this entry's descendants.
    pub fn walk(&self) -> Vec<&IndexEntry> {
        let mut out = Vec::new();
        for child in &self.children {
            out.push(child);
            out.extend(child.walk());
        }
        out
    }
}

/// Builds an [`IndexEntry`] tree from section events.
///
/// An entry's id is the first anchor inside its title, or else a unique
/// encoding of the title text.
#[derive(Debug, Default)]
pub struct IndexingSink {
    root: IndexEntry,
    open: Vec<IndexEntry>,
    in_title: bool,
    title_anchor: Option<String>,
    ids: UniqueIds,
}

impl IndexingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> &IndexEntry {
        &self.root
    }

    pub fn into_index(mut self) -> IndexEntry {
        self.close_all();
        self.root
    }

    fn close_all(&mut self) {
        while let Some(entry) = self.open.pop() {
            self.attach(entry);
        }
    }

    fn attach(&mut self, entry: IndexEntry) {
        match self.open.last_mut() {
            Some(parent) => parent.children.push(entry),
            None => self.root.children.push(entry),
        }
    }
}

impl Sink for IndexingSink {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        match &event.kind {
            EventKind::StartSection(level) => self.open.push(IndexEntry {
                level: *level,
                ..IndexEntry::default()
            }),
            EventKind::EndSection(_) => {
                if let Some(entry) = self.open.pop() {
                    self.attach(entry);
                }
            }
            EventKind::StartSectionTitle(_) => {
                self.in_title = true;
                self.title_anchor = None;
            }
            EventKind::EndSectionTitle(_) => {
                self.in_title = false;
                let anchor = self.title_anchor.take();
                if let Some(entry) = self.open.last_mut() {
                    let title = entry.title.trim().to_string();
                    entry.id = match anchor {
                        Some(id) => id,
                        None => self.ids.next_for(&title).unwrap_or_default(),
                    };
                    entry.title = title;
                }
            }
            EventKind::StartAnchor(id) if self.in_title && self.title_anchor.is_none() => {
                self.title_anchor = Some(id.clone());
            }
            EventKind::Text(text) | EventKind::RawText(text) if self.in_title => {
                if let Some(entry) = self.open.last_mut() {
                    entry.title.push_str(text);
                }
            }
            EventKind::NonBreakingSpace | EventKind::LineBreak if self.in_title => {
                if let Some(entry) = self.open.last_mut() {
                    entry.title.push(' ');
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.close_all();
        Ok(())
    }
}

/// Inserts an anchor at the start of every section title that lacks one.
pub struct SectionAnchorSink<S> {
    inner: S,
    buffer: Option<Vec<Event>>,
    ids: UniqueIds,
}

impl<S: Sink> SectionAnchorSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: None,
            ids: UniqueIds::new(),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn release(&mut self, events: Vec<Event>) -> Result<(), SinkError> {
        let has_anchor = events
            .iter()
            .any(|e| matches!(e.kind, EventKind::StartAnchor(_)));
        let title: String = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();

        let (open, rest) = events.split_at(1.min(events.len()));
        let (body, close) = rest.split_at(rest.len().saturating_sub(1));
        for e in open {
            self.inner.on_event(e)?;
        }
        let id = if has_anchor {
            None
        } else {
            self.ids.next_for(&title)
        };
        match id {
            Some(id) => {
                self.inner.on_event(&Event::new(EventKind::StartAnchor(id)))?;
                for e in body {
                    self.inner.on_event(e)?;
                }
                self.inner.on_event(&Event::new(EventKind::EndAnchor))?;
            }
            None => {
                for e in body {
                    self.inner.on_event(e)?;
                }
            }
        }
        for e in close {
            self.inner.on_event(e)?;
        }
        Ok(())
    }
}

impl<S: Sink> Sink for SectionAnchorSink<S> {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        let Some(buffer) = self.buffer.as_mut() else {
            if matches!(event.kind, EventKind::StartSectionTitle(_)) {
                self.buffer = Some(vec![event.clone()]);
                return Ok(());
            }
            return self.inner.on_event(event);
        };
        buffer.push(event.clone());
        if matches!(event.kind, EventKind::EndSectionTitle(_)) {
            let events = self.buffer.take().unwrap_or_default();
            return self.release(events);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(events) = self.buffer.take() {
            for e in &events {
                self.inner.on_event(e)?;
            }
        }
        self.ids.reset();
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::EventCollector;
    use pretty_assertions::assert_eq;

    fn section(sink: &mut dyn Sink, level: u8, title: &str, nested: impl FnOnce(&mut dyn Sink)) {
        sink.on_event(&Event::new(EventKind::StartSection(level))).unwrap();
        sink.on_event(&Event::new(EventKind::StartSectionTitle(level))).unwrap();
        sink.on_event(&Event::text(title)).unwrap();
        sink.on_event(&Event::new(EventKind::EndSectionTitle(level))).unwrap();
        nested(sink);
        sink.on_event(&Event::new(EventKind::EndSection(level))).unwrap();
    }

    #[test]
    fn builds_nested_outline() {
        let mut sink = IndexingSink::new();
        section(&mut sink, 1, "Intro", |s| {
            section(s, 2, "Setup", |_| {});
            section(s, 2, "Setup", |_| {});
        });
        section(&mut sink, 1, "Usage", |_| {});
        let index = sink.into_index();

        assert_eq!(index.children.len(), 2);
        assert_eq!(index.children[0].title, "Intro");
        let ids: Vec<&str> = index.children[0]
            .children
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["Setup", "Setup_1"]);
        assert_eq!(index.walk().len(), 4);
    }

    #[test]
    fn title_anchor_wins_over_generated_id() {
        let mut sink = IndexingSink::new();
        for kind in [
            EventKind::StartSection(1),
            EventKind::StartSectionTitle(1),
            EventKind::StartAnchor("custom".into()),
            EventKind::Text("Some Title".into()),
            EventKind::EndAnchor,
            EventKind::EndSectionTitle(1),
            EventKind::EndSection(1),
        ] {
            sink.on_event(&Event::new(kind)).unwrap();
        }
        assert_eq!(sink.index().children[0].id, "custom");
    }

    #[test]
    fn section_anchor_sink_wraps_titles() {
        let mut sink = SectionAnchorSink::new(EventCollector::new());
        section(&mut sink, 1, "Getting Started", |_| {});
        let kinds: Vec<EventKind> = sink.into_inner().into_events().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::StartSection(1),
                EventKind::StartSectionTitle(1),
                EventKind::StartAnchor("Getting_Started".into()),
                EventKind::Text("Getting Started".into()),
                EventKind::EndAnchor,
                EventKind::EndSectionTitle(1),
                EventKind::EndSection(1),
            ]
        );
    }
}
