//! The consumer side of the event protocol.

use crate::error::SinkError;
use crate::event::Event;

/// Consumes document events, usually by serializing them somewhere.
///
/// `flush` and `close` may be called any number of times. `close` resets the
/// sink's rendering state so the same instance can take another document,
/// but never closes a writer it was handed.
pub trait Sink {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.flush()
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        (**self).on_event(event)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<(), SinkError> {
        (**self).close()
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        (**self).on_event(event)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<(), SinkError> {
        (**self).close()
    }
}

/// Accepts and discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl Sink for NullSink {
    fn on_event(&mut self, _event: &Event) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Records every event it receives, in order.
#[derive(Debug, Default, Clone)]
pub struct EventCollector {
    events: Vec<Event>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn take(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}

impl Sink for EventCollector {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        self.events.push(event.clone());
        Ok(())
    }
}

/// What a [`Pipeline`] does when one of its sinks fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Keep feeding the remaining sinks and report every failure afterwards.
    #[default]
    Continue,
    /// Stop at the first failing sink.
    Halt,
}

/// Broadcasts each event to an ordered list of sinks.
///
/// With [`FailurePolicy::Continue`] a sink that fails is dropped from the
/// broadcast for the rest of the document and the others keep receiving
/// events. The recorded failures are returned together as
/// [`SinkError::Pipeline`] from [`Sink::close`]. With [`FailurePolicy::Halt`]
/// the first failure is returned at once.
pub struct Pipeline<'a> {
    sinks: Vec<Box<dyn Sink + 'a>>,
    policy: FailurePolicy,
    failures: Vec<(usize, SinkError)>,
}

impl<'a> Pipeline<'a> {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            sinks: Vec::new(),
            policy,
            failures: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: impl Sink + 'a) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn Sink + 'a>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Failures recorded so far under [`FailurePolicy::Continue`], by sink index.
    pub fn failures(&self) -> &[(usize, SinkError)] {
        &self.failures
    }

    fn has_failed(&self, index: usize) -> bool {
        self.failures.iter().any(|(i, _)| *i == index)
    }

    fn broadcast(
        &mut self,
        mut f: impl FnMut(&mut dyn Sink) -> Result<(), SinkError>,
    ) -> Result<(), SinkError> {
        for index in 0..self.sinks.len() {
            if self.has_failed(index) {
                continue;
            }
            if let Err(e) = f(self.sinks[index].as_mut()) {
                if self.policy == FailurePolicy::Halt {
                    return Err(SinkError::Pipeline {
                        failures: vec![(index, e)],
                    });
                }
                self.failures.push((index, e));
            }
        }
        Ok(())
    }
}

impl Sink for Pipeline<'_> {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        self.broadcast(|sink| sink.on_event(event))
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.broadcast(|sink| sink.flush())
    }

    /// Closes every sink, failed ones included, so each is reset for reuse.
    fn close(&mut self) -> Result<(), SinkError> {
        let mut failures = std::mem::take(&mut self.failures);
        for (index, sink) in self.sinks.iter_mut().enumerate() {
            if let Err(e) = sink.close() {
                if self.policy == FailurePolicy::Halt {
                    return Err(SinkError::Pipeline {
                        failures: vec![(index, e)],
                    });
                }
                failures.push((index, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            failures.sort_by_key(|(index, _)| *index);
            Err(SinkError::Pipeline { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use pretty_assertions::assert_eq;

    struct FailingSink {
        seen: usize,
    }

    impl Sink for FailingSink {
        fn on_event(&mut self, _event: &Event) -> Result<(), SinkError> {
            self.seen += 1;
            Err(SinkError::Io(std::io::Error::other("broken pipe")))
        }
    }

    #[test]
    fn collector_records_in_order() {
        let mut sink = EventCollector::new();
        sink.on_event(&Event::text("a")).unwrap();
        sink.on_event(&Event::new(EventKind::LineBreak)).unwrap();
        assert_eq!(
            sink.take(),
            vec![Event::text("a"), Event::new(EventKind::LineBreak)]
        );
        assert!(sink.events().is_empty());
    }

    #[test]
    fn pipeline_feeds_every_sink_in_order() {
        let mut first = EventCollector::new();
        let mut second = EventCollector::new();
        {
            let mut pipeline = Pipeline::new(FailurePolicy::Continue)
                .with_sink(&mut first)
                .with_sink(&mut second);
            pipeline.on_event(&Event::text("one")).unwrap();
            pipeline.on_event(&Event::text("two")).unwrap();
            pipeline.close().unwrap();
        }
        assert_eq!(first.events(), second.events());
        assert_eq!(first.events().len(), 2);
    }

    #[test]
    fn pipeline_continue_isolates_failures() {
        let mut good = EventCollector::new();
        let mut bad = FailingSink { seen: 0 };
        {
            let mut pipeline = Pipeline::new(FailurePolicy::Continue)
                .with_sink(&mut bad)
                .with_sink(&mut good);
            pipeline.on_event(&Event::text("x")).unwrap();
            pipeline.on_event(&Event::text("y")).unwrap();
            assert_eq!(pipeline.failures().len(), 1);
            assert_eq!(pipeline.failures()[0].0, 0);

            match pipeline.close().unwrap_err() {
                SinkError::Pipeline { failures } => assert_eq!(failures.len(), 1),
                other => panic!("unexpected error {other:?}"),
            }
            // Failures were reported once; the pipeline is clean again
            pipeline.close().unwrap();
        }
        assert_eq!(good.events().len(), 2);
        // A failed sink is not offered the rest of the document
        assert_eq!(bad.seen, 1);
    }

    #[test]
    fn parser_keeps_feeding_healthy_sinks_after_a_failure() {
        use crate::parser::{ParseOptions, ParserRegistry};

        let mut good = EventCollector::new();
        let mut bad = FailingSink { seen: 0 };
        let registry = ParserRegistry::with_defaults();
        let parser = registry.get_parser("apt").unwrap();
        {
            let mut pipeline = Pipeline::new(FailurePolicy::Continue)
                .with_sink(&mut bad)
                .with_sink(&mut good);
            let report = parser.parse(
                "  First paragraph.\n\n  Second paragraph.\n",
                &mut pipeline,
                &ParseOptions::default(),
            );
            assert!(report.is_ok(), "{report:?}");
            assert!(pipeline.close().is_err());
        }
        let text: String = good
            .events()
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert!(text.contains("First paragraph."), "{text}");
        assert!(text.contains("Second paragraph."), "{text}");
        assert!(matches!(good.events().last().map(|e| &e.kind), Some(EventKind::EndBody)));
        assert_eq!(bad.seen, 1);
    }

    #[test]
    fn pipeline_halt_stops_at_first_failure() {
        let mut good = EventCollector::new();
        let mut bad = FailingSink { seen: 0 };
        {
            let mut pipeline = Pipeline::new(FailurePolicy::Halt)
                .with_sink(&mut bad)
                .with_sink(&mut good);
            assert!(pipeline.on_event(&Event::text("x")).is_err());
        }
        assert!(good.events().is_empty());
    }

    #[test]
    fn null_sink_close_is_idempotent() {
        let mut sink = NullSink;
        sink.close().unwrap();
        sink.close().unwrap();
    }
}
