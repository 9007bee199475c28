//! JSON-lines dump of the raw event stream.

use std::io::{BufRead, Write};

use crate::error::SinkError;
use crate::event::Event;
use crate::sink::Sink;

/// Writes each event as one JSON object per line.
pub struct EventsSink<W> {
    out: W,
}

impl<W: Write> EventsSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Sink for EventsSink<W> {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.out, event)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(self.out.flush()?)
    }
}

/// Feed a previously dumped stream back into `sink`. Blank lines are skipped.
pub fn replay(input: impl BufRead, sink: &mut dyn Sink) -> Result<(), SinkError> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(&line)?;
        sink.on_event(&event)?;
    }
    sink.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::AttributeSet;
    use crate::event::EventKind;
    use crate::sink::EventCollector;
    use crate::sinks::testing::{SharedBuf, ev, feed, render_reused, styled, text};
    use pretty_assertions::assert_eq;

    #[test]
    fn one_object_per_line() {
        let mut sink = EventsSink::new(Vec::new());
        feed(
            &mut sink,
            [
                ev(EventKind::StartParagraph),
                text("hi"),
                ev(EventKind::EndParagraph),
            ],
        );
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            out,
            "{\"event\":\"start_paragraph\"}\n\
             {\"event\":\"text\",\"data\":\"hi\"}\n\
             {\"event\":\"end_paragraph\"}\n"
        );
    }

    #[test]
    fn dump_replays_into_the_same_events() {
        let events = vec![
            ev(EventKind::StartSection(1)),
            styled(EventKind::StartInline, AttributeSet::underline()),
            text("u"),
            ev(EventKind::EndInline),
            ev(EventKind::EndSection(1)),
        ];
        let mut sink = EventsSink::new(Vec::new());
        feed(&mut sink, events.clone());
        let dump = sink.into_inner();

        let mut collector = EventCollector::new();
        replay(&dump[..], &mut collector).unwrap();
        assert_eq!(collector.into_events(), events);
    }

    #[test]
    fn malformed_lines_are_serialize_errors() {
        let mut collector = EventCollector::new();
        let err = replay(&b"{\"event\":\"nope\"}\n"[..], &mut collector).unwrap_err();
        assert!(matches!(err, SinkError::Serialize(_)), "{err:?}");
    }

    #[test]
    fn close_twice_then_reuse() {
        let buf = SharedBuf::default();
        let mut sink = EventsSink::new(buf.clone());
        let (first, second) = render_reused(&mut sink, &buf);
        assert!(first.contains("\"start_section_title\""), "{first}");
        assert_eq!(first, second);
    }
}
