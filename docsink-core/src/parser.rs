//! The producer side of the event protocol.
//!
//! Every format adapter implements [`Parser`] and routes its events through an
//! [`Emitter`], which validates them before they reach the caller's sink.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use crate::attrs::AttributeSet;
use crate::error::{Diagnostic, Location, MacroError, ParseError, ParserNotFoundError, StructuralError};
use crate::event::{Event, EventKind};
use crate::logging::{Log, NoopLog};
use crate::macros::{MacroRegistry, MacroRequest};
use crate::sink::{EventCollector, Sink};
use crate::validate::{ValidationMode, Validator, Verdict};

/// Settings for one parse.
#[derive(Clone)]
pub struct ParseOptions {
    pub mode: ValidationMode,
    /// Name used in error locations, usually the file path.
    pub source_id: Option<String>,
    /// Forward source comments as `Comment` events.
    pub emit_comments: bool,
    pub macros: Option<Arc<MacroRegistry>>,
    /// Directory macros resolve relative paths against.
    pub basedir: PathBuf,
    /// Set when re-parsing on behalf of a macro; macros are skipped.
    pub second_parsing: bool,
    pub log: Arc<dyn Log>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            mode: ValidationMode::Lenient,
            source_id: None,
            emit_comments: false,
            macros: None,
            basedir: PathBuf::from("."),
            second_parsing: false,
            log: Arc::new(NoopLog),
        }
    }
}

impl ParseOptions {
    pub fn strict() -> Self {
        Self {
            mode: ValidationMode::Strict,
            ..Self::default()
        }
    }

    pub fn with_source_id(mut self, id: impl Into<String>) -> Self {
        self.source_id = Some(id.into());
        self
    }

    pub fn with_macros(mut self, macros: Arc<MacroRegistry>) -> Self {
        self.macros = Some(macros);
        self
    }

    pub fn with_basedir(mut self, basedir: impl Into<PathBuf>) -> Self {
        self.basedir = basedir.into();
        self
    }

    pub fn with_log(mut self, log: Arc<dyn Log>) -> Self {
        self.log = log;
        self
    }

    pub fn with_comments(mut self, emit: bool) -> Self {
        self.emit_comments = emit;
        self
    }
}

/// What a successful parse reports besides the events themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseReport {
    pub diagnostics: Vec<Diagnostic>,
}

/// A source-format adapter.
///
/// A parse is a single forward pass: the events reach `sink` in document
/// order and the input is not consulted again afterwards.
pub trait Parser: Send + Sync {
    /// Registry id, e.g. `"apt"`.
    fn id(&self) -> &'static str;

    /// File extensions this format is usually stored under.
    fn extensions(&self) -> &'static [&'static str] {
        &[]
    }

    fn parse(
        &self,
        input: &str,
        sink: &mut dyn Sink,
        options: &ParseOptions,
    ) -> Result<ParseReport, ParseError>;

    fn parse_reader(
        &self,
        reader: &mut dyn Read,
        sink: &mut dyn Sink,
        options: &ParseOptions,
    ) -> Result<ParseReport, ParseError> {
        let mut input = String::new();
        reader.read_to_string(&mut input)?;
        self.parse(&input, sink, options)
    }
}

/// Normalize CRLF and lone CR line endings to LF.
pub fn normalize_newlines(input: &str) -> Cow<'_, str> {
    if input.contains('\r') {
        Cow::Owned(input.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(input)
    }
}

/// Validating bridge between a parser and the caller's sink.
pub struct Emitter<'a> {
    sink: &'a mut dyn Sink,
    validator: Validator,
    options: &'a ParseOptions,
    line: usize,
    column: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Emitter<'a> {
    pub fn new(sink: &'a mut dyn Sink, options: &'a ParseOptions) -> Self {
        Self {
            sink,
            validator: Validator::new(options.mode),
            options,
            line: 1,
            column: 1,
            diagnostics: Vec::new(),
        }
    }

    pub fn options(&self) -> &ParseOptions {
        self.options
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn mode(&self) -> ValidationMode {
        self.options.mode
    }

    /// Position reported for the events that follow.
    pub fn set_position(&mut self, line: usize, column: usize) {
        self.line = line;
        self.column = column;
    }

    pub fn set_line(&mut self, line: usize) {
        self.set_position(line, 1);
    }

    pub fn location(&self) -> Location {
        Location {
            source_id: self.options.source_id.clone(),
            line: self.line,
            column: self.column,
        }
    }

    pub fn syntax_error(&self, message: impl Into<String>) -> ParseError {
        ParseError::syntax(message, self.location())
    }

    /// Validate `event` and forward whatever the validator lets through.
    pub fn emit(&mut self, event: Event) -> Result<(), ParseError> {
        self.validator.set_line(self.line);
        let before = self.validator.diagnostics().len();
        let verdict = match self.validator.check(&event) {
            Ok(verdict) => verdict,
            Err(source) => return Err(self.structural(source)),
        };
        for diag in &self.validator.diagnostics()[before..] {
            self.options.log.warn(&diag.message, None);
        }
        match verdict {
            Verdict::Accept => self.forward(&event),
            Verdict::Repair(events) => events.iter().try_for_each(|e| self.forward(e)),
            Verdict::Drop => Ok(()),
        }
    }

    pub fn kind(&mut self, kind: EventKind) -> Result<(), ParseError> {
        self.emit(Event::new(kind))
    }

    pub fn with_attributes(&mut self, kind: EventKind, attributes: AttributeSet) -> Result<(), ParseError> {
        self.emit(Event::with_attributes(kind, attributes))
    }

    /// Emit a text event, skipping empty strings.
    pub fn text(&mut self, text: &str) -> Result<(), ParseError> {
        if text.is_empty() {
            return Ok(());
        }
        self.emit(Event::text(text))
    }

    pub fn comment(&mut self, text: &str) -> Result<(), ParseError> {
        if !self.options.emit_comments {
            return Ok(());
        }
        self.emit(Event::new(EventKind::Comment(text.to_string())))
    }

    /// Record a non-fatal problem with the source.
    pub fn warn(&mut self, message: impl Into<String>, code: &str) {
        let message = message.into();
        self.options.log.warn(&message, None);
        self.diagnostics
            .push(Diagnostic::warning(message, Some(self.line), code));
    }

    /// Emit a construct the parser could not map, logging it.
    pub fn unknown(&mut self, name: &str, params: Vec<String>, attributes: AttributeSet) -> Result<(), ParseError> {
        self.options
            .log
            .debug(&format!("Unrecognised construct '{name}' at line {}", self.line));
        self.with_attributes(
            EventKind::Unknown {
                name: name.to_string(),
                params,
            },
            attributes,
        )
    }

    /// Run macro `id` and forward its events through the validator.
    ///
    /// Skipped entirely on a second parse. An unknown macro is fatal in strict
    /// mode; in lenient mode it becomes a warning and an `Unknown` event.
    pub fn execute_macro(
        &mut self,
        id: &str,
        parameters: AttributeSet,
        parser: &dyn Parser,
        source: &str,
    ) -> Result<(), ParseError> {
        if self.options.second_parsing {
            return Ok(());
        }

        let request = MacroRequest {
            parameters: parameters.clone(),
            basedir: self.options.basedir.clone(),
            source_content: source,
            parser: Some(parser),
        };
        let mut collected = EventCollector::new();
        let result = match &self.options.macros {
            Some(registry) => registry.execute_macro(id, &request, &mut collected),
            None => Err(MacroError::NotFound(id.to_string())),
        };

        match result {
            Ok(()) => {
                for event in collected.into_events() {
                    self.emit(event)?;
                }
                Ok(())
            }
            Err(MacroError::NotFound(name)) if self.mode() == ValidationMode::Lenient => {
                self.warn(format!("Unknown macro '{name}' ignored"), "M001");
                let params = parameters.iter().map(|(k, v)| format!("{k}={v}")).collect();
                self.unknown(&format!("macro:{name}"), params, AttributeSet::new())
            }
            Err(source) => Err(ParseError::Macro {
                source,
                location: self.location(),
            }),
        }
    }

    /// Close anything left open, flush the sink and collect diagnostics.
    pub fn finish(mut self) -> Result<ParseReport, ParseError> {
        let closes = match self.validator.finish() {
            Ok(closes) => closes,
            Err(source) => return Err(self.structural(source)),
        };
        for event in &closes {
            self.forward(event)?;
        }
        if let Err(source) = self.sink.flush() {
            return Err(ParseError::Sink {
                source,
                location: self.location(),
            });
        }
        let mut diagnostics = self.validator.take_diagnostics();
        diagnostics.append(&mut self.diagnostics);
        diagnostics.sort_by_key(|d| d.line);
        Ok(ParseReport { diagnostics })
    }

    fn forward(&mut self, event: &Event) -> Result<(), ParseError> {
        if let EventKind::Unknown { name, .. } = &event.kind {
            self.options
                .log
                .debug(&format!("Forwarding unknown construct '{name}'"));
        }
        self.sink.on_event(event).map_err(|source| ParseError::Sink {
            source,
            location: self.location(),
        })
    }

    fn structural(&self, source: StructuralError) -> ParseError {
        self.options.log.error(&source.to_string(), None);
        ParseError::Structural {
            source,
            location: self.location(),
        }
    }
}

/// Registry of source-format parsers, keyed by id.
pub struct ParserRegistry {
    parsers: HashMap<String, Box<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        ParserRegistry {
            parsers: HashMap::new(),
        }
    }

    /// Register a parser, replacing any previous one with the same id.
    pub fn register<P: Parser + 'static>(&mut self, parser: P) {
        self.parsers.insert(parser.id().to_string(), Box::new(parser));
    }

    pub fn get_parser(&self, id: &str) -> Result<&dyn Parser, ParserNotFoundError> {
        self.parsers
            .get(id)
            .map(|p| p.as_ref())
            .ok_or_else(|| ParserNotFoundError(id.to_string()))
    }

    pub fn has(&self, id: &str) -> bool {
        self.parsers.contains_key(id)
    }

    /// All registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.parsers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Find a parser by file extension (without the dot, case-insensitive).
    pub fn for_extension(&self, extension: &str) -> Option<&dyn Parser> {
        let extension = extension.to_ascii_lowercase();
        self.ids()
            .iter()
            .filter_map(|id| self.parsers.get(id))
            .find(|p| p.extensions().contains(&extension.as_str()))
            .map(|p| p.as_ref())
    }

    pub fn with_defaults() -> Self {
        use crate::parsers;

        let mut registry = Self::new();
        registry.register(parsers::apt::AptParser);
        registry.register(parsers::confluence::ConfluenceParser);
        registry.register(parsers::docbook::DocBookParser);
        registry.register(parsers::fml::FmlParser);
        registry.register(parsers::markdown::MarkdownParser);
        registry.register(parsers::twiki::TwikiParser);
        registry.register(parsers::xdoc::XdocParser);
        registry.register(parsers::xhtml::XhtmlParser);
        registry.register(parsers::xhtml::Xhtml5Parser);
        registry
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct EchoParser;

    impl Parser for EchoParser {
        fn id(&self) -> &'static str {
            "echo"
        }

        fn parse(
            &self,
            input: &str,
            sink: &mut dyn Sink,
            options: &ParseOptions,
        ) -> Result<ParseReport, ParseError> {
            let mut emitter = Emitter::new(sink, options);
            emitter.kind(EventKind::StartParagraph)?;
            emitter.text(input)?;
            emitter.finish()
        }
    }

    #[test]
    fn registry_defaults_cover_all_formats() {
        let registry = ParserRegistry::with_defaults();
        assert_eq!(
            registry.ids(),
            vec![
                "apt",
                "confluence",
                "doc-book",
                "fml",
                "markdown",
                "twiki",
                "xdoc",
                "xhtml",
                "xhtml5"
            ]
        );
    }

    #[test]
    fn unknown_parser_id_fails() {
        let registry = ParserRegistry::with_defaults();
        assert_eq!(
            registry.get_parser("xwiki").err(),
            Some(ParserNotFoundError("xwiki".into()))
        );
    }

    #[test]
    fn extension_lookup() {
        let registry = ParserRegistry::with_defaults();
        assert_eq!(registry.for_extension("APT").map(|p| p.id()), Some("apt"));
        assert_eq!(registry.for_extension("fml").map(|p| p.id()), Some("fml"));
        assert!(registry.for_extension("docx").is_none());
    }

    #[test]
    fn emitter_closes_open_frames_in_lenient_mode() {
        let mut registry = ParserRegistry::new();
        registry.register(EchoParser);
        let mut sink = EventCollector::new();
        let report = registry
            .get_parser("echo")
            .unwrap()
            .parse("hi", &mut sink, &ParseOptions::default())
            .unwrap();
        assert_eq!(
            sink.into_events(),
            vec![
                Event::new(EventKind::StartParagraph),
                Event::text("hi"),
                Event::new(EventKind::EndParagraph),
            ]
        );
        assert_eq!(report.diagnostics.len(), 1);
    }

    #[test]
    fn emitter_fails_unclosed_in_strict_mode() {
        let mut sink = EventCollector::new();
        let err = EchoParser
            .parse("hi", &mut sink, &ParseOptions::strict().with_source_id("a.txt"))
            .unwrap_err();
        assert!(matches!(err, ParseError::Structural { .. }));
        assert_eq!(err.location().and_then(|l| l.source_id.clone()), Some("a.txt".into()));
    }

    #[test]
    fn parse_reader_reads_everything() {
        let mut sink = EventCollector::new();
        let mut input: &[u8] = b"from reader";
        EchoParser
            .parse_reader(&mut input, &mut sink, &ParseOptions::default())
            .unwrap();
        assert_eq!(sink.events()[1], Event::text("from reader"));
    }

    #[test]
    fn newlines_are_normalized() {
        assert_eq!(normalize_newlines("a\r\nb\rc"), "a\nb\nc");
        assert!(matches!(normalize_newlines("plain"), Cow::Borrowed(_)));
    }
}
