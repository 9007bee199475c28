//! Output-format sinks.
//!
//! Every sink streams to a caller-supplied [`Write`]. Constructs a target
//! format has to see whole (a LaTeX paragraph that may turn out empty, an
//! RTF table whose column widths depend on every cell) are captured in
//! memory by [`Output`] and written when they close.

pub mod confluence;
pub mod events;
pub mod itext;
pub mod latex;
pub mod rtf;
pub mod xhtml;

use std::io::{self, Write};
use std::sync::Arc;

use crate::attrs::{AttributeSet, keys, values};
use crate::error::SinkNotFoundError;
use crate::event::{Event, EventKind};
use crate::logging::Log;
use crate::sink::Sink;

pub use confluence::ConfluenceSink;
pub use events::EventsSink;
pub use itext::ITextSink;
pub use latex::LatexSink;
pub use rtf::RtfSink;
pub use xhtml::{Flavor, XhtmlSink};

/// Registered sink ids, sorted.
pub const SINK_IDS: &[&str] = &[
    "confluence",
    "events",
    "itext",
    "latex",
    "rtf",
    "xdoc",
    "xhtml",
    "xhtml5",
];

pub fn ids() -> Vec<String> {
    SINK_IDS.iter().map(|id| id.to_string()).collect()
}

/// Create the sink registered as `id`, logging through `log`.
pub fn create_with_log<'w, W: Write + 'w>(
    id: &str,
    writer: W,
    log: Arc<dyn Log>,
) -> Result<Box<dyn Sink + 'w>, SinkNotFoundError> {
    let sink: Box<dyn Sink + 'w> = match id {
        "xhtml" => Box::new(XhtmlSink::new(writer, Flavor::Xhtml).with_log(log)),
        "xhtml5" => Box::new(XhtmlSink::new(writer, Flavor::Xhtml5).with_log(log)),
        "xdoc" => Box::new(XhtmlSink::new(writer, Flavor::Xdoc).with_log(log)),
        "latex" => Box::new(LatexSink::new(writer).with_log(log)),
        "rtf" => Box::new(RtfSink::new(writer).with_log(log)),
        "confluence" => Box::new(ConfluenceSink::new(writer).with_log(log)),
        "itext" => Box::new(ITextSink::new(writer).with_log(log)),
        "events" => Box::new(EventsSink::new(writer)),
        other => return Err(SinkNotFoundError(other.to_string())),
    };
    Ok(sink)
}

/// Create the sink registered as `id` with a no-op logger.
pub fn create<'w, W: Write + 'w>(id: &str, writer: W) -> Result<Box<dyn Sink + 'w>, SinkNotFoundError> {
    create_with_log(id, writer, crate::logging::noop())
}

/// File extension for documents produced by sink `id`.
pub fn extension(id: &str) -> Option<&'static str> {
    Some(match id {
        "xhtml" | "xhtml5" => "html",
        "xdoc" => "xml",
        "latex" => "tex",
        "rtf" => "rtf",
        "confluence" => "confluence",
        "itext" => "itext.xml",
        "events" => "jsonl",
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

/// A writer with a stack of in-memory captures. Writes land in the
/// innermost open capture, or go straight through when none is open.
pub(crate) struct Output<W> {
    out: W,
    captures: Vec<String>,
}

impl<W: Write> Output<W> {
    pub(crate) fn new(out: W) -> Self {
        Self {
            out,
            captures: Vec::new(),
        }
    }

    pub(crate) fn write(&mut self, s: &str) -> io::Result<()> {
        match self.captures.last_mut() {
            Some(capture) => {
                capture.push_str(s);
                Ok(())
            }
            None => self.out.write_all(s.as_bytes()),
        }
    }

    pub(crate) fn capture(&mut self) {
        self.captures.push(String::new());
    }

    /// Close the innermost capture and return what it collected.
    pub(crate) fn release(&mut self) -> String {
        self.captures.pop().unwrap_or_default()
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Drop unfinished captures, keeping the writer.
    pub(crate) fn reset(&mut self) {
        self.captures.clear();
    }

    pub(crate) fn get_ref(&self) -> &W {
        &self.out
    }

    pub(crate) fn into_inner(self) -> W {
        self.out
    }
}

/// Log an event the sink has no rendering for.
pub(crate) fn ignored(log: &dyn Log, sink: &str, event: &Event) {
    match &event.kind {
        EventKind::Unknown { name, params } => log.warn(
            &format!("{sink}: ignoring unknown construct '{name}' ({})", params.join(", ")),
            None,
        ),
        other => log.debug(&format!("{sink}: no rendering for '{}'", other.name())),
    }
}

/// Log attribute keys on `event` that are not in `known`.
pub(crate) fn unused_attributes(log: &dyn Log, sink: &str, event: &Event, known: &[&str]) {
    for (key, _) in event.attributes.iter() {
        if !known.contains(&key) {
            log.debug(&format!(
                "{sink}: ignoring attribute '{key}' on '{}'",
                event.name()
            ));
        }
    }
}

/// A presentational effect requested by a generic inline span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decoration {
    Bold,
    Italic,
    Code,
    Underline,
    Strikethrough,
    Subscript,
    Superscript,
}

/// Attribute keys [`decorations`] understands.
pub(crate) const INLINE_KEYS: &[&str] = &[keys::SEMANTICS, keys::DECORATION, keys::VALIGN];

/// The effects asked for by the attributes of a `StartInline` event, in a
/// fixed order.
pub(crate) fn decorations(attributes: &AttributeSet) -> Vec<Decoration> {
    let mut out = Vec::new();
    match attributes.get(keys::SEMANTICS) {
        Some(values::BOLD | "strong") => out.push(Decoration::Bold),
        Some(values::ITALIC | "emphasis") => out.push(Decoration::Italic),
        Some(values::CODE | "monospaced") => out.push(Decoration::Code),
        _ => {}
    }
    match attributes.get(keys::DECORATION) {
        Some(values::UNDERLINE) => out.push(Decoration::Underline),
        Some(values::LINE_THROUGH) => out.push(Decoration::Strikethrough),
        _ => {}
    }
    match attributes.get(keys::VALIGN) {
        Some(values::SUB) => out.push(Decoration::Subscript),
        Some(values::SUP) => out.push(Decoration::Superscript),
        _ => {}
    }
    out
}

/// Escape text for XML content and attribute values.
pub(crate) fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// Comment text with `--` broken up, which XML forbids inside comments.
pub(crate) fn xml_comment(text: &str) -> String {
    let mut body = text.replace("--", "- -");
    if body.ends_with('-') {
        body.push(' ');
    }
    format!("<!--{body}-->")
}


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_registered_id_creates_a_sink() {
        for id in SINK_IDS {
            let mut out = Vec::new();
            assert!(create(id, &mut out).is_ok(), "{id}");
            assert!(extension(id).is_some(), "{id}");
        }
    }

    #[test]
    fn unknown_sink_id_is_an_error() {
        let err = create("pdf", Vec::new()).err().unwrap();
        assert_eq!(err, SinkNotFoundError("pdf".into()));
    }

    #[test]
    fn output_writes_to_innermost_capture() {
        let mut output = Output::new(Vec::new());
        output.write("a").unwrap();
        output.capture();
        output.write("b").unwrap();
        output.capture();
        output.write("c").unwrap();
        assert_eq!(output.release(), "c");
        let outer = output.release();
        assert_eq!(outer, "b");
        output.write(&outer).unwrap();
        assert_eq!(output.release(), "");
        assert_eq!(output.into_inner(), b"ab");
    }

    #[test]
    fn inline_attributes_decode_to_decorations() {
        let attributes = AttributeSet::underline().with(keys::VALIGN, values::SUP);
        assert_eq!(
            decorations(&attributes),
            vec![Decoration::Underline, Decoration::Superscript]
        );
        assert_eq!(
            decorations(&AttributeSet::semantics("bold")),
            vec![Decoration::Bold]
        );
        assert!(decorations(&AttributeSet::boxed()).is_empty());
    }

    #[test]
    fn comments_never_contain_double_dash() {
        assert_eq!(xml_comment("a -- b-"), "<!--a - - b- -->");
        assert_eq!(escape_xml("<a href=\"x\">&"), "&lt;a href=&quot;x&quot;&gt;&amp;");
    }
}
