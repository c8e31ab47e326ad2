use log::Level;
use std::cell::RefCell;
use std::fmt::{self, Display};

pub const TARGET: &str = "find_duplicate_contacts";

/// Structured log sink handed to every component that reports progress.
pub trait EventLog {
    fn log(&self, level: Level, message: &str, fields: &[(&str, &dyn Display)]);

    fn error(&self, message: &str, fields: &[(&str, &dyn Display)]) {
        self.log(Level::Error, message, fields);
    }

    fn warn(&self, message: &str, fields: &[(&str, &dyn Display)]) {
        self.log(Level::Warn, message, fields);
    }

    fn info(&self, message: &str, fields: &[(&str, &dyn Display)]) {
        self.log(Level::Info, message, fields);
    }

    fn debug(&self, message: &str, fields: &[(&str, &dyn Display)]) {
        self.log(Level::Debug, message, fields);
    }
}

/// Forwards events to the `log` facade as `message key=value ...`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacade;

impl EventLog for LogFacade {
    fn log(&self, level: Level, message: &str, fields: &[(&str, &dyn Display)]) {
        log::log!(target: TARGET, level, "{}", FormattedEvent { message, fields });
    }
}

struct FormattedEvent<'a> {
    message: &'a str,
    fields: &'a [(&'a str, &'a dyn Display)],
}

impl Display for FormattedEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for (key, value) in self.fields {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl LogEvent {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Records events in memory. Used by tests to assert on what a run reported.
#[derive(Debug, Default)]
pub struct MemoryLog {
    events: RefCell<Vec<LogEvent>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.borrow().clone()
    }

    /// Events whose message equals `message`, oldest first.
    pub fn find(&self, message: &str) -> Vec<LogEvent> {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.message == message)
            .cloned()
            .collect()
    }
}

impl EventLog for MemoryLog {
    fn log(&self, level: Level, message: &str, fields: &[(&str, &dyn Display)]) {
        self.events.borrow_mut().push(LogEvent {
            level,
            message: message.to_string(),
            fields: fields
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        });
    }
}
