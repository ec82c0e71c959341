//! Structured logging interceptors for tonic servers
//!
//! Every handler invocation produces at most one summary record carrying the
//! method, the terminal status code, the mapped severity and the elapsed time,
//! plus the tags attached upstream by the tagging stage. Optional payload
//! records carry individual request and response messages.
//!
//! What gets logged, and how loudly, is driven by a handful of functions
//! supplied as [`LoggingOption`]s:
//!
//! - **Decider**: whether a finished call is logged at all
//! - **Levels**: status code to [`Severity`]
//! - **Duration field**: elapsed time to extra fields
//! - **Payload decider**: whether an individual message is logged
//!
//! ## Example
//!
//! ```
//! use grpc_logging::grpc::ExtensionTags;
//! use grpc_logging::logging::{self, with_decider, NopLogger};
//!
//! let (unary, stream) = logging::interceptors(
//!     ExtensionTags,
//!     NopLogger,
//!     [with_decider(|method, error| {
//!         !(method == "/blah.foo.healthcheck/Check" && error.is_none())
//!     })],
//! )?;
//! # let _ = (unary, stream);
//! # Ok::<(), grpc_logging::Error>(())
//! ```

mod chain;
mod context;
mod fields;
mod logger;
mod options;
mod payload;
mod severity;
mod stream;
mod unary;

use std::sync::Arc;

use crate::error::Result;
use crate::grpc::tags::TagReader;

pub use context::{split_full_method, CallContext, MethodType};
pub use fields::{keys, Fields};
pub use logger::{LogRecord, Logger, MemoryLogger, NopLogger, TracingLogger};
pub use options::{
    code_name, default_code_to_level, default_decider, duration_field, duration_to_seconds,
    duration_to_time_millis, with_decider, with_duration_field, with_levels, with_logger,
    with_payload_decider, with_payload_max_bytes, CodeToLevel, Decider, DurationToFields,
    DurationUnit, LoggingOption, Options, PayloadDecider,
};
pub use payload::Direction;
pub use severity::Severity;
pub use stream::{ObservedStream, StreamServerInterceptor};
pub use unary::UnaryServerInterceptor;

use chain::Chain;

/// Build the unary and stream interceptors
///
/// `tags` is how the chain reads the fields attached by the tagging stage;
/// pass [`NoTags`](crate::grpc::NoTags) when there is none. Options are
/// applied in order over the defaults, later ones replacing earlier ones of
/// the same kind. Both interceptors share one immutable configuration.
pub fn interceptors(
    tags: impl TagReader,
    logger: impl Logger,
    options: impl IntoIterator<Item = LoggingOption>,
) -> Result<(UnaryServerInterceptor, StreamServerInterceptor)> {
    let interceptors = LoggingInterceptors::new(tags, logger, options)?;
    Ok((interceptors.unary, interceptors.stream))
}

/// Unary and stream interceptors sharing one configuration
#[derive(Debug, Clone)]
pub struct LoggingInterceptors {
    unary: UnaryServerInterceptor,
    stream: StreamServerInterceptor,
}

impl LoggingInterceptors {
    /// See [`interceptors`]
    pub fn new(
        tags: impl TagReader,
        logger: impl Logger,
        options: impl IntoIterator<Item = LoggingOption>,
    ) -> Result<Self> {
        let options = Options::resolve(Arc::new(logger), options)?;
        let chain = Arc::new(Chain::new(tags, options));

        tracing::debug!(options = ?chain.options(), "gRPC logging interceptors ready");

        Ok(Self {
            unary: UnaryServerInterceptor::new(Arc::clone(&chain)),
            stream: StreamServerInterceptor::new(chain),
        })
    }

    /// Interceptor for unary methods
    pub fn unary(&self) -> &UnaryServerInterceptor {
        &self.unary
    }

    /// Interceptor for streaming methods
    pub fn stream(&self) -> &StreamServerInterceptor {
        &self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::tags::NoTags;
    use crate::Error;
    use tonic::{Request, Response, Status};

    #[test]
    fn test_invalid_option_rejected_at_construction() {
        let err = interceptors(NoTags, NopLogger, [with_payload_max_bytes(0)]).unwrap_err();
        assert!(matches!(err, Error::InvalidOption(_)));
    }

    #[tokio::test]
    async fn test_interceptors_share_configuration() {
        let logger = Arc::new(MemoryLogger::new());
        let built = LoggingInterceptors::new(
            NoTags,
            logger.clone(),
            [with_levels(|_| Severity::Warn)],
        )
        .unwrap();

        built
            .unary()
            .intercept("/pkg.Svc/A", Request::new(1u8), |req| async move {
                Ok::<_, Status>(Response::new(req.into_inner()))
            })
            .await
            .unwrap();
        let response = built
            .stream()
            .server_streaming("/pkg.Svc/B", Request::new(1u8), |_req| async {
                Ok::<_, Status>(Response::new(futures::stream::empty::<std::result::Result<u8, Status>>()))
            })
            .await
            .unwrap();
        drop(response);

        let records = logger.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.severity == Severity::Warn));
    }

    #[test]
    fn test_logger_option_replaces_constructor_logger() {
        let first = Arc::new(MemoryLogger::new());
        let second = Arc::new(MemoryLogger::new());
        let options = Options::resolve(first.clone(), [with_logger(second.clone())]).unwrap();

        options
            .logger
            .log(Severity::Info, &Fields::new(), "hello")
            .unwrap();

        assert!(first.is_empty());
        assert_eq!(second.len(), 1);
    }
}
