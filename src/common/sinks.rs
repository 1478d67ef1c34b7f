use std::error::Error;
use std::fmt;

/// Severity passed to a [`NotificationSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(label)
    }
}

/// Destination for pipeline errors that are not shown to the user.
pub trait ErrorSink: Send {
    fn report(&self, error: &dyn Error);
}

/// User-facing notifications, e.g. a toast or banner.
pub trait NotificationSink: Send {
    fn notify(&self, title: &str, message: &str, severity: Severity);
}

/// Routes both sinks to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, error: &dyn Error) {
        log::error!("Chat pipeline error: {error}");
    }
}

impl NotificationSink for LogSink {
    fn notify(&self, title: &str, message: &str, severity: Severity) {
        match severity {
            Severity::Info => log::info!("{title}: {message}"),
            Severity::Warning => log::warn!("{title}: {message}"),
            Severity::Error => log::error!("{title}: {message}"),
        }
    }
}
