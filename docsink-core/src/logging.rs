//! The leveled logging boundary injected into parsers and sinks.
//!
//! Components hold an `Arc<dyn Log>` and default to [`NoopLog`], so a caller
//! that never configures logging gets silence instead of a crash.

use std::error::Error;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

pub trait Log: Send + Sync {
    fn log(&self, level: Level, message: &str, cause: Option<&dyn Error>);

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message, None);
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message, None);
    }

    fn warn(&self, message: &str, cause: Option<&dyn Error>) {
        self.log(Level::Warn, message, cause);
    }

    fn error(&self, message: &str, cause: Option<&dyn Error>) {
        self.log(Level::Error, message, cause);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLog;

impl Log for NoopLog {
    fn log(&self, _level: Level, _message: &str, _cause: Option<&dyn Error>) {}
}

/// Forwards to the `log` crate facade under a fixed target.
#[derive(Debug, Clone)]
pub struct FacadeLog {
    target: String,
}

impl FacadeLog {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl Default for FacadeLog {
    fn default() -> Self {
        Self::new("docsink")
    }
}

impl Log for FacadeLog {
    fn log(&self, level: Level, message: &str, cause: Option<&dyn Error>) {
        let level = match level {
            Level::Debug => log::Level::Debug,
            Level::Info => log::Level::Info,
            Level::Warn => log::Level::Warn,
            Level::Error => log::Level::Error,
        };
        match cause {
            Some(cause) => log::log!(target: self.target.as_str(), level, "{message}: {cause}"),
            None => log::log!(target: self.target.as_str(), level, "{message}"),
        }
    }
}

pub fn noop() -> Arc<dyn Log> {
    Arc::new(NoopLog)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records messages so tests can assert on what was logged.
    #[derive(Default)]
    pub struct RecordingLog {
        pub entries: Mutex<Vec<(Level, String)>>,
    }

    impl RecordingLog {
        pub fn messages(&self, level: Level) -> Vec<String> {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, _)| *l == level)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    impl Log for RecordingLog {
        fn log(&self, level: Level, message: &str, _cause: Option<&dyn Error>) {
            self.entries.lock().unwrap().push((level, message.to_string()));
        }
    }
}
