//! Interceptor options
//!
//! Options form a closed set of variants applied in order over a default
//! configuration. For each kind the last option supplied wins; kinds that are
//! never supplied keep their defaults:
//!
//! | kind            | default                                   |
//! |-----------------|-------------------------------------------|
//! | decider         | log every call                            |
//! | levels          | [`default_code_to_level`]                 |
//! | duration field  | [`duration_to_time_millis`] (`grpc.time_ms`) |
//! | payload decider | none, payload logging off                 |
//! | payload limit   | none, payloads logged in full             |

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tonic::{Code, Status};

use super::context::CallContext;
use super::fields::{keys, Fields};
use super::logger::Logger;
use super::severity::Severity;
use crate::error::{Error, Result};

/// Decides whether a finished call gets a summary record
///
/// Receives the full method name and the terminal error, `None` on success.
pub type Decider = Arc<dyn Fn(&str, Option<&Status>) -> bool + Send + Sync>;

/// Maps a terminal status code to a severity
pub type CodeToLevel = Arc<dyn Fn(Code) -> Severity + Send + Sync>;

/// Turns the elapsed call time into fields
pub type DurationToFields = Arc<dyn Fn(Duration) -> Fields + Send + Sync>;

/// Decides whether one request or response message is logged
///
/// Called once per message; the message is handed over as `&dyn Any` so
/// deciders can downcast to the concrete type they care about.
pub type PayloadDecider = Arc<dyn Fn(&CallContext, &str, &dyn Any) -> bool + Send + Sync>;

/// One configuration value for the logging interceptors
#[derive(Clone)]
pub enum LoggingOption {
    /// Replace the decider
    Decider(Decider),
    /// Replace the code-to-severity mapping
    Levels(CodeToLevel),
    /// Replace the duration field producer
    DurationField(DurationToFields),
    /// Enable payload logging with this decider
    PayloadDecider(PayloadDecider),
    /// Replace the logger passed at construction
    Logger(Arc<dyn Logger>),
    /// Cap rendered payload content at this many bytes
    PayloadMaxBytes(usize),
}

impl fmt::Debug for LoggingOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decider(_) => f.write_str("Decider(..)"),
            Self::Levels(_) => f.write_str("Levels(..)"),
            Self::DurationField(_) => f.write_str("DurationField(..)"),
            Self::PayloadDecider(_) => f.write_str("PayloadDecider(..)"),
            Self::Logger(_) => f.write_str("Logger(..)"),
            Self::PayloadMaxBytes(n) => f.debug_tuple("PayloadMaxBytes").field(n).finish(),
        }
    }
}

/// Customize which calls produce a summary record
///
/// ```
/// use grpc_logging::logging::with_decider;
///
/// // skip successful health checks, log everything else
/// let opt = with_decider(|method, err| {
///     !(err.is_none() && method == "/grpc.health.v1.Health/Check")
/// });
/// # let _ = opt;
/// ```
pub fn with_decider<F>(decider: F) -> LoggingOption
where
    F: Fn(&str, Option<&Status>) -> bool + Send + Sync + 'static,
{
    LoggingOption::Decider(Arc::new(decider))
}

/// Customize the status code to severity mapping
pub fn with_levels<F>(levels: F) -> LoggingOption
where
    F: Fn(Code) -> Severity + Send + Sync + 'static,
{
    LoggingOption::Levels(Arc::new(levels))
}

/// Customize the elapsed-time fields
pub fn with_duration_field<F>(producer: F) -> LoggingOption
where
    F: Fn(Duration) -> Fields + Send + Sync + 'static,
{
    LoggingOption::DurationField(Arc::new(producer))
}

/// Enable payload logging for the messages `decider` accepts
pub fn with_payload_decider<F>(decider: F) -> LoggingOption
where
    F: Fn(&CallContext, &str, &dyn Any) -> bool + Send + Sync + 'static,
{
    LoggingOption::PayloadDecider(Arc::new(decider))
}

/// Use a different logger than the one passed at construction
pub fn with_logger(logger: impl Logger) -> LoggingOption {
    LoggingOption::Logger(Arc::new(logger))
}

/// Truncate rendered payloads longer than `max_bytes`
pub fn with_payload_max_bytes(max_bytes: usize) -> LoggingOption {
    LoggingOption::PayloadMaxBytes(max_bytes)
}

/// Resolved, immutable interceptor configuration
#[derive(Clone)]
pub struct Options {
    pub(crate) logger: Arc<dyn Logger>,
    decider: Decider,
    levels: CodeToLevel,
    duration: DurationToFields,
    pub(crate) payload_decider: Option<PayloadDecider>,
    pub(crate) payload_max_bytes: Option<usize>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("payload_logging", &self.payload_decider.is_some())
            .field("payload_max_bytes", &self.payload_max_bytes)
            .finish_non_exhaustive()
    }
}

impl Options {
    /// Apply `options` in order over the defaults
    ///
    /// Fails on malformed options so misconfiguration shows up at startup,
    /// never while serving a call.
    pub fn resolve(
        logger: Arc<dyn Logger>,
        options: impl IntoIterator<Item = LoggingOption>,
    ) -> Result<Self> {
        let mut resolved = Self {
            logger,
            decider: Arc::new(default_decider),
            levels: Arc::new(default_code_to_level),
            duration: Arc::new(duration_to_time_millis),
            payload_decider: None,
            payload_max_bytes: None,
        };

        for option in options {
            match option {
                LoggingOption::Decider(decider) => resolved.decider = decider,
                LoggingOption::Levels(levels) => resolved.levels = levels,
                LoggingOption::DurationField(duration) => resolved.duration = duration,
                LoggingOption::PayloadDecider(decider) => resolved.payload_decider = Some(decider),
                LoggingOption::Logger(logger) => resolved.logger = logger,
                LoggingOption::PayloadMaxBytes(0) => {
                    return Err(Error::InvalidOption(
                        "payload size limit must be at least one byte".to_string(),
                    ));
                }
                LoggingOption::PayloadMaxBytes(max) => resolved.payload_max_bytes = Some(max),
            }
        }

        Ok(resolved)
    }

    /// Consult the decider
    pub fn should_log(&self, full_method: &str, error: Option<&Status>) -> bool {
        (self.decider)(full_method, error)
    }

    /// Consult the code-to-level mapping
    pub fn level_for(&self, code: Code) -> Severity {
        (self.levels)(code)
    }

    /// Consult the duration field producer
    pub fn duration_fields(&self, elapsed: Duration) -> Fields {
        (self.duration)(elapsed)
    }

    /// Whether payload logging is configured
    pub fn payload_logging(&self) -> bool {
        self.payload_decider.is_some()
    }
}

/// Log every call
pub fn default_decider(_full_method: &str, _error: Option<&Status>) -> bool {
    true
}

/// Default server-side mapping
///
/// Success is `Info`. Outcomes usually caused by the client, or transient
/// ones, are `Warn`. Server faults and anything unrecognised are `Error`.
pub fn default_code_to_level(code: Code) -> Severity {
    #[allow(unreachable_patterns)]
    match code {
        Code::Ok => Severity::Info,
        Code::Cancelled
        | Code::InvalidArgument
        | Code::NotFound
        | Code::AlreadyExists
        | Code::PermissionDenied
        | Code::Unauthenticated
        | Code::DeadlineExceeded
        | Code::ResourceExhausted
        | Code::FailedPrecondition
        | Code::Aborted
        | Code::OutOfRange
        | Code::Unavailable => Severity::Warn,
        Code::Unknown | Code::Unimplemented | Code::Internal | Code::DataLoss => Severity::Error,
        _ => Severity::Error,
    }
}

/// Canonical upper-case name of a status code, as written to `grpc.code`
pub fn code_name(code: Code) -> &'static str {
    #[allow(unreachable_patterns)]
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "CANCELLED",
        Code::Unknown => "UNKNOWN",
        Code::InvalidArgument => "INVALID_ARGUMENT",
        Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
        Code::NotFound => "NOT_FOUND",
        Code::AlreadyExists => "ALREADY_EXISTS",
        Code::PermissionDenied => "PERMISSION_DENIED",
        Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
        Code::FailedPrecondition => "FAILED_PRECONDITION",
        Code::Aborted => "ABORTED",
        Code::OutOfRange => "OUT_OF_RANGE",
        Code::Unimplemented => "UNIMPLEMENTED",
        Code::Internal => "INTERNAL",
        Code::Unavailable => "UNAVAILABLE",
        Code::DataLoss => "DATA_LOSS",
        Code::Unauthenticated => "UNAUTHENTICATED",
        _ => "UNKNOWN",
    }
}

/// Unit used for the elapsed-time field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    /// Fractional milliseconds, microsecond precision
    #[default]
    Millis,
    /// Fractional seconds, microsecond precision
    Seconds,
}

impl DurationUnit {
    /// Express `elapsed` in this unit
    pub fn value(&self, elapsed: Duration) -> f64 {
        let micros = elapsed.as_micros() as f64;
        match self {
            Self::Millis => micros / 1_000.0,
            Self::Seconds => micros / 1_000_000.0,
        }
    }
}

/// Single field `grpc.time_ms` holding elapsed milliseconds
pub fn duration_to_time_millis(elapsed: Duration) -> Fields {
    Fields::new().with(keys::TIME_MS, DurationUnit::Millis.value(elapsed))
}

/// Single field `grpc.time_s` holding elapsed seconds
pub fn duration_to_seconds(elapsed: Duration) -> Fields {
    Fields::new().with(keys::TIME_S, DurationUnit::Seconds.value(elapsed))
}

/// Producer writing elapsed time under a custom name and unit
pub fn duration_field(name: impl Into<String>, unit: DurationUnit) -> DurationToFields {
    let name = name.into();
    Arc::new(move |elapsed| Fields::new().with(name.clone(), unit.value(elapsed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::logger::NopLogger;

    const ALL_CODES: [Code; 17] = [
        Code::Ok,
        Code::Cancelled,
        Code::Unknown,
        Code::InvalidArgument,
        Code::DeadlineExceeded,
        Code::NotFound,
        Code::AlreadyExists,
        Code::PermissionDenied,
        Code::ResourceExhausted,
        Code::FailedPrecondition,
        Code::Aborted,
        Code::OutOfRange,
        Code::Unimplemented,
        Code::Internal,
        Code::Unavailable,
        Code::DataLoss,
        Code::Unauthenticated,
    ];

    fn resolve(options: Vec<LoggingOption>) -> Result<Options> {
        Options::resolve(Arc::new(NopLogger), options)
    }

    #[test]
    fn test_defaults() {
        let options = resolve(vec![]).unwrap();
        assert!(options.should_log("/pkg.Service/Method", None));
        assert!(options.should_log("/pkg.Service/Method", Some(&Status::internal("boom"))));
        assert_eq!(options.level_for(Code::Ok), Severity::Info);
        assert!(!options.payload_logging());
        assert!(options.duration_fields(Duration::from_millis(5)).contains_key(keys::TIME_MS));
    }

    #[test]
    fn test_success_is_least_severe() {
        let ok = default_code_to_level(Code::Ok);
        for code in ALL_CODES.into_iter().filter(|c| *c != Code::Ok) {
            assert!(ok < default_code_to_level(code), "{code:?} not above success");
        }
    }

    #[test]
    fn test_unmapped_integer_code_falls_back_to_error() {
        assert_eq!(default_code_to_level(Code::from_i32(99)), Severity::Error);
        assert_eq!(code_name(Code::from_i32(99)), "UNKNOWN");
    }

    #[test]
    fn test_last_option_wins() {
        let options = resolve(vec![
            with_levels(|_| Severity::Debug),
            with_decider(|_, _| false),
            with_levels(|_| Severity::Warn),
        ])
        .unwrap();
        assert_eq!(options.level_for(Code::Ok), Severity::Warn);
        assert!(!options.should_log("/pkg.Service/Method", None));
    }

    #[test]
    fn test_zero_payload_limit_rejected() {
        let err = resolve(vec![with_payload_max_bytes(0)]).unwrap_err();
        assert!(matches!(err, Error::InvalidOption(_)));
        assert_eq!(resolve(vec![with_payload_max_bytes(64)]).unwrap().payload_max_bytes, Some(64));
    }

    #[test]
    fn test_decision_functions_are_pure() {
        let options = resolve(vec![with_decider(|method, err| {
            !(err.is_none() && method == "/blah.foo.healthcheck/Check")
        })])
        .unwrap();
        let status = Status::not_found("gone");
        for _ in 0..3 {
            assert!(!options.should_log("/blah.foo.healthcheck/Check", None));
            assert!(options.should_log("/blah.foo.healthcheck/Check", Some(&status)));
            assert_eq!(options.level_for(Code::NotFound), Severity::Warn);
            assert_eq!(
                options.duration_fields(Duration::from_micros(1500)),
                options.duration_fields(Duration::from_micros(1500))
            );
        }
    }

    #[test]
    fn test_duration_units() {
        let elapsed = Duration::from_micros(1_234_567);
        assert_eq!(
            duration_to_time_millis(elapsed).get(keys::TIME_MS).and_then(|v| v.as_f64()),
            Some(1234.567)
        );
        assert_eq!(
            duration_to_seconds(elapsed).get(keys::TIME_S).and_then(|v| v.as_f64()),
            Some(1.234567)
        );
        let custom = duration_field("latency", DurationUnit::Seconds);
        assert!(custom(elapsed).contains_key("latency"));
    }

    #[test]
    fn test_code_names() {
        assert_eq!(code_name(Code::Ok), "OK");
        assert_eq!(code_name(Code::NotFound), "NOT_FOUND");
        assert_eq!(code_name(Code::Unauthenticated), "UNAUTHENTICATED");
    }
}
