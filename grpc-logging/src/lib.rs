//! # grpc-logging
//!
//! Structured request logging for tonic gRPC servers.
//!
//! ## Features
//!
//! - **Summary records**: one record per call with method, status code, severity and elapsed time
//! - **Deciders**: per-method, per-outcome control over what gets logged
//! - **Payload logging**: opt-in, per-message request and response records
//! - **Streaming**: client, server and bidirectional streams logged as one call
//! - **Tagging**: request id, peer, deadline and selected metadata inherited by every record
//! - **Pluggable backends**: anything implementing [`Logger`](logging::Logger), `tracing` by default
//!
//! ## Example
//!
//! ```rust,no_run
//! use grpc_logging::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Load configuration
//!     let config = Config::load()?;
//!
//!     // Initialize tracing
//!     init_tracing(&config)?;
//!
//!     // Build interceptors; caller options override the configured ones
//!     let mut options = config.logging.options();
//!     options.push(with_levels(|code| match code {
//!         Code::NotFound => Severity::Debug,
//!         other => default_code_to_level(other),
//!     }));
//!     let (unary, stream) = interceptors(ExtensionTags, TracingLogger::new(), options)?;
//!
//!     // Tagging runs ahead of logging
//!     let tagging = TaggingLayer::new(&config.tags)?;
//!     # let _ = (unary, stream, tagging);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod grpc;
pub mod logging;
pub mod observability;

pub use error::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Config, LoggingConfig, ServiceConfig, TagsConfig};
    pub use crate::error::{Error, Result};
    pub use crate::observability::init_tracing;

    pub use crate::grpc::{
        Code, ExtensionTags, NoTags, Request, Response, Status, TagReader, Tags,
        TaggingInterceptor, TaggingLayer,
    };

    pub use crate::logging::{
        default_code_to_level, default_decider, interceptors, with_decider,
        with_duration_field, with_levels, with_logger, with_payload_decider,
        with_payload_max_bytes, CallContext, Fields, Logger, LoggingInterceptors, LoggingOption,
        MethodType, NopLogger, Severity, StreamServerInterceptor, TracingLogger,
        UnaryServerInterceptor,
    };
}
