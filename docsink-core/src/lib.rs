//! `docsink-core`: documentation markup parsers and sinks joined by a shared
//! event stream.
//!
//! A parser turns source markup (APT, XDoc, DocBook, FML, Confluence, TWiki,
//! XHTML, Markdown) into a forward-only sequence of [`Event`]s. Every event
//! passes through a [`Validator`] that enforces nesting before it reaches a
//! [`Sink`], which renders it (XHTML, LaTeX, RTF, Confluence, iText XML) or
//! just records it.
//!
//! # Quick start
//!
//! ```
//! use docsink_core::{ParseOptions, convert};
//!
//! let source = "# Guide\n\nHello **world**.\n";
//! let mut html = Vec::new();
//! convert("markdown", source, "xhtml", &mut html, &ParseOptions::default()).unwrap();
//! assert!(String::from_utf8(html).unwrap().contains("<b>world</b>"));
//! ```

pub mod attrs;
pub mod error;
pub mod event;
pub mod id;
pub mod index;
pub mod logging;
pub mod macros;
pub mod parser;
pub mod parsers;
pub mod sink;
pub mod sinks;
pub mod validate;

use std::io::Write;

pub use attrs::AttributeSet;
pub use error::*;
pub use event::{Event, EventKind, Justification, Numbering};
pub use logging::{FacadeLog, Log};
pub use macros::{Macro, MacroRegistry, MacroRequest};
pub use parser::{ParseOptions, ParseReport, Parser, ParserRegistry};
pub use sink::{EventCollector, FailurePolicy, NullSink, Pipeline, Sink};
pub use validate::{ValidatingSink, ValidationMode, Validator};

/// Parse `input` with the parser registered as `from` and render it with
/// the sink registered as `to` into `writer`.
///
/// The sink is closed afterwards, so `writer` holds a complete document.
pub fn convert<W: Write>(
    from: &str,
    input: &str,
    to: &str,
    writer: W,
    options: &ParseOptions,
) -> Result<ParseReport, ConvertError> {
    let registry = ParserRegistry::with_defaults();
    let parser = registry.get_parser(from)?;
    let mut sink = sinks::create_with_log(to, writer, options.log.clone())?;
    let report = parser.parse(input, &mut sink, options)?;
    sink.close()?;
    Ok(report)
}
