//! Single-document conversion shared by `convert`, `events` and `build`.

use anyhow::{Context, Result};
use docsink_core::index::SectionAnchorSink;
use docsink_core::logging::FacadeLog;
use docsink_core::{
    Diagnostic, MacroRegistry, NullSink, ParseError, ParseOptions, ParseReport, ParserRegistry,
    Severity, Sink, sinks,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::config::DocsinkConfig;

/// Per-run switches resolved from the command line and docsink.json.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOpts {
    pub strict: bool,
    pub section_anchors: bool,
}

impl RunOpts {
    pub fn new(cli_strict: bool, config: &DocsinkConfig) -> Self {
        Self {
            strict: cli_strict || config.strict,
            section_anchors: config.section_anchors,
        }
    }
}

/// Parse options for the document at `path`.
pub fn parse_options(path: &Path, opts: RunOpts) -> ParseOptions {
    let base = if opts.strict {
        ParseOptions::strict()
    } else {
        ParseOptions::default()
    };
    let basedir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.with_source_id(path.display().to_string())
        .with_basedir(basedir)
        .with_macros(Arc::new(MacroRegistry::with_defaults()))
        .with_log(Arc::new(FacadeLog::new("docsink")))
}

/// Pick the parser for `path`: explicit id first, then docsink.json, then
/// the registered extensions.
pub fn resolve_parser(
    path: &Path,
    from: Option<&str>,
    config: &DocsinkConfig,
    registry: &ParserRegistry,
) -> Result<String> {
    if let Some(id) = from {
        return Ok(id.to_string());
    }
    config.parser_for(path, registry).with_context(|| {
        format!(
            "Cannot tell the format of '{}'; pass --from",
            path.display()
        )
    })
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read '{}'", path.display()))
}

/// Convert the file at `path` with parser `from` into sink `to`, writing to
/// `writer`.
pub fn render_file<W: Write>(
    path: &Path,
    from: &str,
    to: &str,
    writer: W,
    opts: RunOpts,
) -> Result<ParseReport> {
    let registry = ParserRegistry::with_defaults();
    let parser = registry.get_parser(from)?;
    let input = read_source(path)?;
    let options = parse_options(path, opts);

    let sink = sinks::create_with_log(to, writer, options.log.clone())?;
    let mut sink: Box<dyn Sink + '_> = if opts.section_anchors {
        Box::new(SectionAnchorSink::new(sink))
    } else {
        sink
    };

    let report = parser
        .parse(&input, &mut sink, &options)
        .with_context(|| format!("Failed to convert '{}'", path.display()))?;
    sink.close()
        .with_context(|| format!("Failed to finish '{}'", path.display()))?;
    Ok(report)
}

/// Parse `path` without rendering and collect everything worth reporting.
///
/// A fatal parse error comes back as a single error diagnostic rather than
/// an `Err`, so one bad file does not hide the findings of the next.
pub fn check_file(path: &Path, from: &str, opts: RunOpts) -> Result<Vec<Diagnostic>> {
    let registry = ParserRegistry::with_defaults();
    let parser = registry.get_parser(from)?;
    let input = read_source(path)?;
    let options = parse_options(path, opts);

    match parser.parse(&input, &mut NullSink, &options) {
        Ok(report) => Ok(report.diagnostics),
        Err(err) => Ok(vec![error_diagnostic(&err)]),
    }
}

fn error_diagnostic(err: &ParseError) -> Diagnostic {
    let (message, code) = match err {
        ParseError::Syntax { message, .. } => (message.clone(), "E001"),
        ParseError::Structural { source, .. } => (source.to_string(), "E002"),
        ParseError::Macro { source, .. } => (source.to_string(), "E003"),
        ParseError::Sink { source, .. } => (source.to_string(), "E004"),
        ParseError::Io(e) => (e.to_string(), "E005"),
    };
    Diagnostic {
        severity: Severity::Error,
        message,
        line: err.location().map(|l| l.line),
        code: Some(code.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn temp_file(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("docsink-convert-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_resolve_parser() {
        let registry = ParserRegistry::with_defaults();
        let config = DocsinkConfig::default();
        let path = Path::new("guide.md");
        assert_eq!(resolve_parser(path, None, &config, &registry).unwrap(), "markdown");
        assert_eq!(resolve_parser(path, Some("apt"), &config, &registry).unwrap(), "apt");
        let err = resolve_parser(Path::new("guide.bin"), None, &config, &registry).unwrap_err();
        assert!(err.to_string().contains("pass --from"));
    }

    #[test]
    fn test_render_with_section_anchors() {
        let path = temp_file("anchors.md", "# Getting Started\n\nText.\n");
        let mut out = Vec::new();
        let opts = RunOpts {
            strict: true,
            section_anchors: true,
        };
        render_file(&path, "markdown", "xhtml", &mut out, opts).unwrap();
        let html = String::from_utf8(out).unwrap();
        assert!(html.contains("Getting_Started"), "{html}");
    }

    #[test]
    fn test_check_reports_fatal_errors_as_diagnostics() {
        let path = temp_file("broken.xml", "<document><body><section name=\"A\">");
        let diagnostics = check_file(&path, "xdoc", RunOpts::default()).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(diagnostics[0].code.as_deref(), Some("E001"));
    }

    #[test]
    fn test_basedir_defaults_to_dot() {
        let options = parse_options(Path::new("README.apt"), RunOpts::default());
        assert_eq!(options.basedir, PathBuf::from("."));
        assert_eq!(options.source_id.as_deref(), Some("README.apt"));
        assert!(options.macros.is_some());
    }
}
