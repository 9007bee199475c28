//! Pluggable macro expansion.
//!
//! A macro receives string parameters and writes events into a sink. Parsers
//! collect those events and forward them through their own validator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::attrs::AttributeSet;
use crate::error::MacroError;
use crate::event::{Event, EventKind};
use crate::index::{IndexEntry, IndexingSink};
use crate::parser::{ParseOptions, Parser};
use crate::sink::Sink;

/// Everything a macro may look at.
pub struct MacroRequest<'a> {
    pub parameters: AttributeSet,
    /// Directory relative file parameters are resolved against.
    pub basedir: PathBuf,
    /// Full text of the document being parsed.
    pub source_content: &'a str,
    /// The parser that invoked the macro, for macros that re-parse.
    pub parser: Option<&'a dyn Parser>,
}

impl MacroRequest<'_> {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name)
    }

    fn required(&self, id: &str, name: &str) -> Result<&str, MacroError> {
        self.parameter(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| MacroError::execution(id, format!("missing required parameter '{name}'")))
    }
}

pub trait Macro: Send + Sync {
    fn id(&self) -> &'static str;

    fn execute(&self, sink: &mut dyn Sink, request: &MacroRequest<'_>) -> Result<(), MacroError>;
}

fn emit(sink: &mut dyn Sink, id: &str, kind: EventKind) -> Result<(), MacroError> {
    sink.on_event(&Event::new(kind))
        .map_err(|e| MacroError::caused_by(id, "sink rejected event", e))
}

/// Registry of macros, keyed by id.
pub struct MacroRegistry {
    macros: HashMap<String, Box<dyn Macro>>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self {
            macros: HashMap::new(),
        }
    }

    pub fn register<M: Macro + 'static>(&mut self, m: M) {
        self.macros.insert(m.id().to_string(), Box::new(m));
    }

    pub fn has(&self, id: &str) -> bool {
        self.macros.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.macros.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn execute_macro(
        &self,
        id: &str,
        request: &MacroRequest<'_>,
        sink: &mut dyn Sink,
    ) -> Result<(), MacroError> {
        let m = self
            .macros
            .get(id)
            .ok_or_else(|| MacroError::NotFound(id.to_string()))?;
        m.execute(sink, request)
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(EchoMacro);
        registry.register(SnippetMacro);
        registry.register(TocMacro);
        registry
    }
}

impl Default for MacroRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ---------------------------------------------------------------------------
// echo
// ---------------------------------------------------------------------------

/// Writes its parameters into a boxed verbatim block. Useful for debugging.
pub struct EchoMacro;

impl Macro for EchoMacro {
    fn id(&self) -> &'static str {
        "echo"
    }

    fn execute(&self, sink: &mut dyn Sink, request: &MacroRequest<'_>) -> Result<(), MacroError> {
        emit(sink, self.id(), EventKind::StartVerbatim { boxed: true })?;
        emit(sink, self.id(), EventKind::Text("echo\n".into()))?;
        for (key, value) in request.parameters.iter() {
            emit(sink, self.id(), EventKind::Text(format!("{key} ---> {value}\n")))?;
        }
        emit(sink, self.id(), EventKind::EndVerbatim)
    }
}

// ---------------------------------------------------------------------------
// snippet
// ---------------------------------------------------------------------------

/// Includes a region of a file as verbatim text.
///
/// Parameters: `file` (relative to the base directory), optional `id`
/// naming a region delimited by lines containing `START SNIPPET: id` and
/// `END SNIPPET: id`, optional `verbatim=false` to emit plain text.
pub struct SnippetMacro;

impl Macro for SnippetMacro {
    fn id(&self) -> &'static str {
        "snippet"
    }

    fn execute(&self, sink: &mut dyn Sink, request: &MacroRequest<'_>) -> Result<(), MacroError> {
        let file = match request.parameter("file") {
            Some(f) if !f.is_empty() => f.to_string(),
            _ => {
                let url = request.required(self.id(), "url")?;
                url.strip_prefix("file://")
                    .or_else(|| url.strip_prefix("file:"))
                    .ok_or_else(|| {
                        MacroError::execution(self.id(), format!("only file URLs are supported: {url}"))
                    })?
                    .to_string()
            }
        };
        let path = resolve(&request.basedir, &file);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            MacroError::caused_by(self.id(), format!("cannot read '{}'", path.display()), e)
        })?;

        let snippet = match request.parameter("id").filter(|id| !id.is_empty()) {
            Some(id) => extract_snippet(&content, id).map_err(|message| {
                MacroError::execution(self.id(), format!("{message} in '{}'", path.display()))
            })?,
            None => strip_common_indent(content.lines().collect()),
        };

        let verbatim = request.parameter("verbatim") != Some("false");
        if verbatim {
            emit(sink, self.id(), EventKind::StartVerbatim { boxed: true })?;
            emit(sink, self.id(), EventKind::Text(snippet))?;
            emit(sink, self.id(), EventKind::EndVerbatim)
        } else {
            emit(sink, self.id(), EventKind::RawText(snippet))
        }
    }
}

fn resolve(basedir: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        basedir.join(path)
    }
}

/// Whether `line` is a `START`/`END` demarcator for snippet `id`.
///
/// The words `SNIPPET` and `what` match case-insensitively and in any order;
/// the id must appear as a whole word.
fn is_demarcator(line: &str, id: &str, what: &str) -> bool {
    let words: Vec<&str> = line
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-' || c == '.'))
        .filter(|w| !w.is_empty())
        .collect();
    words.iter().any(|w| w.eq_ignore_ascii_case("snippet"))
        && words.iter().any(|w| w.eq_ignore_ascii_case(what))
        && words.contains(&id)
}

fn extract_snippet(content: &str, id: &str) -> Result<String, String> {
    let mut lines = Vec::new();
    let mut capture = false;
    let mut found_start = false;
    for line in content.lines() {
        if is_demarcator(line, id, "start") {
            capture = true;
            found_start = true;
        } else if is_demarcator(line, id, "end") {
            if !found_start {
                break;
            }
            return Ok(strip_common_indent(lines));
        } else if capture {
            lines.push(line);
        }
    }
    if found_start {
        Err(format!("failed to find END of snippet '{id}'"))
    } else {
        Err(format!("failed to find START of snippet '{id}'"))
    }
}

fn strip_common_indent(lines: Vec<&str>) -> String {
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start_matches(' ').len())
        .min()
        .unwrap_or(0);
    let mut out = String::new();
    for line in lines {
        out.push_str(line.get(indent..).unwrap_or_else(|| line.trim_start()));
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// toc
// ---------------------------------------------------------------------------

/// Table of contents built by re-parsing the current document.
///
/// Parameters: `section` (1-based top-level section to restrict to, 0 for
/// all), and when a section is given, `fromDepth`/`toDepth` bounds.
pub struct TocMacro;

struct TocDepths {
    from: u32,
    to: u32,
}

impl Macro for TocMacro {
    fn id(&self) -> &'static str {
        "toc"
    }

    fn execute(&self, sink: &mut dyn Sink, request: &MacroRequest<'_>) -> Result<(), MacroError> {
        let parser = request
            .parser
            .ok_or_else(|| MacroError::execution(self.id(), "no parser available to index the document"))?;

        let section = int_param(request, self.id(), "section", 0)?;
        let depths = if section != 0 {
            TocDepths {
                from: int_param(request, self.id(), "fromDepth", 0)?,
                to: int_param(request, self.id(), "toDepth", 5)?,
            }
        } else {
            TocDepths { from: 0, to: 5 }
        };

        let mut indexer = IndexingSink::new();
        let options = ParseOptions {
            second_parsing: true,
            ..ParseOptions::default()
        };
        parser
            .parse(request.source_content, &mut indexer, &options)
            .map_err(|e| MacroError::caused_by(self.id(), "failed to index document", e))?;
        let index = indexer.into_index();
        if index.children.is_empty() {
            return Ok(());
        }

        let wrap = depths.from < section || section == 0;
        if wrap {
            emit(sink, self.id(), EventKind::StartList)?;
        }
        for (i, entry) in index.children.iter().enumerate() {
            let n = i as u32 + 1;
            if n == section || section == 0 {
                self.write_entry(sink, entry, 1, &depths)?;
            }
        }
        if wrap {
            emit(sink, self.id(), EventKind::EndList)?;
        }
        Ok(())
    }
}

impl TocMacro {
    fn write_entry(
        &self,
        sink: &mut dyn Sink,
        entry: &IndexEntry,
        depth: u32,
        depths: &TocDepths,
    ) -> Result<(), MacroError> {
        let listed = depths.from < depth;
        if listed {
            emit(sink, self.id(), EventKind::StartListItem)?;
            emit(sink, self.id(), EventKind::StartLink(format!("#{}", entry.id)))?;
            emit(sink, self.id(), EventKind::Text(entry.title.clone()))?;
            emit(sink, self.id(), EventKind::EndLink)?;
        }
        if depths.to >= depth && !entry.children.is_empty() {
            let wrap = depths.from < depth + 1;
            if wrap {
                emit(sink, self.id(), EventKind::StartList)?;
            }
            for child in &entry.children {
                self.write_entry(sink, child, depth + 1, depths)?;
            }
            if wrap {
                emit(sink, self.id(), EventKind::EndList)?;
            }
        }
        if listed {
            emit(sink, self.id(), EventKind::EndListItem)?;
        }
        Ok(())
    }
}

fn int_param(request: &MacroRequest<'_>, id: &str, name: &str, default: u32) -> Result<u32, MacroError> {
    let Some(value) = request.parameter(name).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    match value.trim().parse::<i64>() {
        Ok(n) if n < 0 => Err(MacroError::execution(
            id,
            format!("the {name}={n} should be positive"),
        )),
        Ok(n) => Ok(u32::try_from(n).unwrap_or(u32::MAX)),
        Err(_) => Ok(default),
    }
}
