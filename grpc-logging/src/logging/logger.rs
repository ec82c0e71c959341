//! Logger capability
//!
//! The interceptor chain only ever talks to a [`Logger`]. Which backend sits
//! behind it, and how records get rendered or shipped, is up to the caller.

use std::sync::{Arc, Mutex, MutexGuard};

use super::fields::{keys, Fields};
use super::severity::Severity;
use crate::error::Result;

/// Minimal structured logging interface
///
/// Implementations must accept any field map and must not reorder or reject
/// fields. Emission is treated as best-effort: an `Err` is dropped by the
/// chain and never fails the RPC.
pub trait Logger: Send + Sync + 'static {
    /// Emit one record
    fn log(&self, severity: Severity, fields: &Fields, message: &str) -> Result<()>;

    /// Whether records at `severity` would be kept
    ///
    /// The chain uses this to skip rendering payloads nobody will see.
    fn enabled(&self, _severity: Severity) -> bool {
        true
    }
}

impl<L: Logger + ?Sized> Logger for Arc<L> {
    fn log(&self, severity: Severity, fields: &Fields, message: &str) -> Result<()> {
        (**self).log(severity, fields, message)
    }

    fn enabled(&self, severity: Severity) -> bool {
        (**self).enabled(severity)
    }
}

impl<L: Logger + ?Sized> Logger for Box<L> {
    fn log(&self, severity: Severity, fields: &Fields, message: &str) -> Result<()> {
        (**self).log(severity, fields, message)
    }

    fn enabled(&self, severity: Severity) -> bool {
        (**self).enabled(severity)
    }
}

/// Logger that forwards records to `tracing`
///
/// Method and code are recorded as first-class event fields so subscribers can
/// filter on them; the complete map is attached as a JSON `fields` value.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TracingLogger {
    /// Create a tracing-backed logger
    pub fn new() -> Self {
        Self
    }
}

// `tracing` callsites need a constant level, hence one arm per severity.
macro_rules! emit_at {
    ($level:expr, $fields:expr, $json:expr, $message:expr) => {
        tracing::event!(
            $level,
            grpc.method = $fields.get_str(keys::METHOD),
            grpc.code = $fields.get_str(keys::CODE),
            fields = %$json,
            "{}",
            $message
        )
    };
}

impl Logger for TracingLogger {
    fn log(&self, severity: Severity, fields: &Fields, message: &str) -> Result<()> {
        let json = serde_json::to_string(fields)?;

        match severity {
            Severity::Debug => emit_at!(tracing::Level::DEBUG, fields, json, message),
            Severity::Info => emit_at!(tracing::Level::INFO, fields, json, message),
            Severity::Warn => emit_at!(tracing::Level::WARN, fields, json, message),
            Severity::Error => emit_at!(tracing::Level::ERROR, fields, json, message),
        }

        Ok(())
    }

    fn enabled(&self, severity: Severity) -> bool {
        match severity {
            Severity::Debug => tracing::enabled!(tracing::Level::DEBUG),
            Severity::Info => tracing::enabled!(tracing::Level::INFO),
            Severity::Warn => tracing::enabled!(tracing::Level::WARN),
            Severity::Error => tracing::enabled!(tracing::Level::ERROR),
        }
    }
}

/// Logger that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NopLogger;

impl Logger for NopLogger {
    fn log(&self, _severity: Severity, _fields: &Fields, _message: &str) -> Result<()> {
        Ok(())
    }

    fn enabled(&self, _severity: Severity) -> bool {
        false
    }
}

/// A record captured by [`MemoryLogger`]
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Severity the record was emitted at
    pub severity: Severity,
    /// Fields attached to the record
    pub fields: Fields,
    /// Record message
    pub message: String,
}

impl LogRecord {
    /// Whether this is a payload record rather than a call summary
    pub fn is_payload(&self) -> bool {
        self.fields.contains_key(keys::PAYLOAD)
    }
}

/// Logger that keeps records in memory
///
/// Handy for asserting on what an option set actually produces.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    min_severity: Option<Severity>,
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogger {
    /// Create a logger capturing every severity
    pub fn new() -> Self {
        Self::default()
    }

    /// Only keep records at `severity` or above
    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    /// Snapshot of captured records, in emission order
    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().clone()
    }

    /// Captured payload records
    pub fn payloads(&self) -> Vec<LogRecord> {
        self.lock().iter().filter(|r| r.is_payload()).cloned().collect()
    }

    /// Captured call summary records
    pub fn summaries(&self) -> Vec<LogRecord> {
        self.lock().iter().filter(|r| !r.is_payload()).cloned().collect()
    }

    /// Remove and return all captured records
    pub fn take(&self) -> Vec<LogRecord> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of captured records
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been captured
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogRecord>> {
        // a panic elsewhere must not take the captured records with it
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Logger for MemoryLogger {
    fn log(&self, severity: Severity, fields: &Fields, message: &str) -> Result<()> {
        if self.enabled(severity) {
            self.lock().push(LogRecord {
                severity,
                fields: fields.clone(),
                message: message.to_string(),
            });
        }
        Ok(())
    }

    fn enabled(&self, severity: Severity) -> bool {
        self.min_severity.is_none_or(|min| severity >= min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_logger_captures_in_order() {
        let logger = MemoryLogger::new();
        logger.log(Severity::Info, &Fields::new().with("n", 1), "first").unwrap();
        logger.log(Severity::Error, &Fields::new().with("n", 2), "second").unwrap();

        let records = logger.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "first");
        assert_eq!(records[1].severity, Severity::Error);
    }

    #[test]
    fn test_memory_logger_min_severity() {
        let logger = MemoryLogger::new().with_min_severity(Severity::Warn);
        logger.log(Severity::Info, &Fields::new(), "dropped").unwrap();
        logger.log(Severity::Warn, &Fields::new(), "kept").unwrap();

        assert_eq!(logger.len(), 1);
        assert!(!logger.enabled(Severity::Debug));
        assert!(logger.enabled(Severity::Error));
    }

    #[test]
    fn test_payload_and_summary_split() {
        let logger = MemoryLogger::new();
        logger
            .log(Severity::Info, &Fields::new().with(keys::PAYLOAD, "request"), "payload")
            .unwrap();
        logger.log(Severity::Info, &Fields::new(), "summary").unwrap();

        assert_eq!(logger.payloads().len(), 1);
        assert_eq!(logger.summaries().len(), 1);
        assert_eq!(logger.take().len(), 2);
        assert!(logger.is_empty());
    }

    #[test]
    fn test_tracing_logger_without_subscriber() {
        let logger = TracingLogger::new();
        let fields = Fields::new()
            .with(keys::METHOD, "/pkg.Service/Method")
            .with(keys::CODE, "OK");
        assert!(logger.log(Severity::Info, &fields, "finished unary call").is_ok());
    }

    #[test]
    fn test_arc_logger_delegates() {
        let inner = Arc::new(MemoryLogger::new());
        let shared: Arc<dyn Logger> = inner.clone();
        shared.log(Severity::Debug, &Fields::new(), "via arc").unwrap();
        assert_eq!(inner.len(), 1);
    }
}
