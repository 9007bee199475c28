use std::fmt;

use serde::{Deserialize, Serialize};

/// Where in a source document something happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source_id {
            Some(id) => write!(f, "{}:{}:{}", id, self.line, self.column),
            None => write!(f, "line {}, column {}", self.line, self.column),
        }
    }
}

/// A frozen copy of the validator's frame stack, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStack(pub Vec<String>);

impl fmt::Display for FrameStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<top level>")
        } else {
            f.write_str(&self.0.join(" > "))
        }
    }
}

/// Fatal errors that abort parsing of the current document.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{location}: {message}")]
    Syntax { message: String, location: Location },

    #[error("{location}: {source}")]
    Structural {
        #[source]
        source: StructuralError,
        location: Location,
    },

    #[error("{location}: {source}")]
    Macro {
        #[source]
        source: MacroError,
        location: Location,
    },

    #[error("{location}: {source}")]
    Sink {
        #[source]
        source: SinkError,
        location: Location,
    },

    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    pub fn syntax(message: impl Into<String>, location: Location) -> Self {
        ParseError::Syntax {
            message: message.into(),
            location,
        }
    }

    /// The source location, when the failure happened inside the document.
    pub fn location(&self) -> Option<&Location> {
        match self {
            ParseError::Syntax { location, .. }
            | ParseError::Structural { location, .. }
            | ParseError::Macro { location, .. }
            | ParseError::Sink { location, .. } => Some(location),
            ParseError::Io(_) => None,
        }
    }
}

/// Nesting violations detected by the validator.
///
/// Every variant carries the frame stack as it was when the offending event
/// arrived, so a report can say where in the document structure it happened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralError {
    #[error("Unbalanced close: expected end of {expected}, found end of {found} (open: {stack})")]
    UnbalancedClose {
        expected: String,
        found: String,
        stack: FrameStack,
    },

    #[error("Misplaced event '{event}' inside {stack}")]
    MisplacedEvent { event: String, stack: FrameStack },

    #[error("Table row has more cells than its {columns} declared columns (open: {stack})")]
    CellOverflow { columns: usize, stack: FrameStack },

    #[error("Section level {level} opened while section level {open} is still open (open: {stack})")]
    SectionNesting {
        level: u8,
        open: u8,
        stack: FrameStack,
    },

    #[error("Duplicate anchor '{id}' (open: {stack})")]
    DuplicateAnchor { id: String, stack: FrameStack },

    #[error("Invalid anchor id '{id}' (open: {stack})")]
    InvalidAnchor { id: String, stack: FrameStack },

    #[error("Document ended with unclosed {stack}")]
    Unclosed { stack: FrameStack },
}

impl StructuralError {
    /// Stable diagnostic code for reports.
    pub fn code(&self) -> &'static str {
        match self {
            StructuralError::UnbalancedClose { .. } => "S001",
            StructuralError::MisplacedEvent { .. } => "S002",
            StructuralError::CellOverflow { .. } => "S003",
            StructuralError::SectionNesting { .. } => "S004",
            StructuralError::DuplicateAnchor { .. } => "S005",
            StructuralError::InvalidAnchor { .. } => "S006",
            StructuralError::Unclosed { .. } => "S007",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No parser registered for format '{0}'")]
pub struct ParserNotFoundError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No sink registered for format '{0}'")]
pub struct SinkNotFoundError(pub String);

/// Failures at the macro invocation boundary.
#[derive(Debug, thiserror::Error)]
pub enum MacroError {
    #[error("No macro registered with id '{0}'")]
    NotFound(String),

    #[error("Macro '{id}' failed: {message}")]
    Execution {
        id: String,
        message: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl MacroError {
    pub fn execution(id: &str, message: impl Into<String>) -> Self {
        MacroError::Execution {
            id: id.to_string(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn caused_by(
        id: &str,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        MacroError::Execution {
            id: id.to_string(),
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }
}

/// Failures while a sink consumes events.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    /// One or more sinks in a fan-out failed; the others still received the event.
    #[error("{} sink(s) in the pipeline failed: {}", failures.len(), describe_failures(failures))]
    Pipeline { failures: Vec<(usize, SinkError)> },
}

fn describe_failures(failures: &[(usize, SinkError)]) -> String {
    failures
        .iter()
        .map(|(index, e)| format!("#{index}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Everything [`crate::convert`] can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error(transparent)]
    ParserNotFound(#[from] ParserNotFoundError),

    #[error(transparent)]
    SinkNotFound(#[from] SinkNotFoundError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// A diagnostic message produced during parsing.
///
/// Diagnostics are non-fatal: in lenient mode the validator repairs the
/// stream and records what it did here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>, line: Option<usize>, code: &str) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            line,
            code: Some(code.to_string()),
        }
    }
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn location_display_with_source() {
        let loc = Location {
            source_id: Some("guide.apt".into()),
            line: 12,
            column: 3,
        };
        assert_eq!(loc.to_string(), "guide.apt:12:3");
    }

    #[test]
    fn structural_error_mentions_stack() {
        let err = StructuralError::MisplacedEvent {
            event: "table-cell".into(),
            stack: FrameStack(vec!["body".into(), "table".into()]),
        };
        assert_eq!(
            err.to_string(),
            "Misplaced event 'table-cell' inside body > table"
        );
        assert_eq!(err.code(), "S002");
    }

    #[test]
    fn pipeline_error_lists_failures() {
        let err = SinkError::Pipeline {
            failures: vec![(
                1,
                SinkError::Io(std::io::Error::other("disk full")),
            )],
        };
        assert_eq!(
            err.to_string(),
            "1 sink(s) in the pipeline failed: #1: Failed to write output: disk full"
        );
    }

    #[test]
    fn diagnostic_serializes_without_empty_fields() {
        let diag = Diagnostic {
            severity: Severity::Warning,
            message: "auto-closed paragraph".into(),
            line: None,
            code: None,
        };
        let json = serde_json::to_string(&diag).unwrap();
        assert_eq!(json, r#"{"severity":"warning","message":"auto-closed paragraph"}"#);
    }
}
