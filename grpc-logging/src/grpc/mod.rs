//! gRPC request tagging
//!
//! The tagging stage runs before the logging interceptors and records
//! per-request fields (request id, peer, deadline, selected metadata) that
//! every log record for the call inherits.
//!
//! ## Example
//!
//! ```ignore
//! use grpc_logging::config::TagsConfig;
//! use grpc_logging::grpc::{ExtensionTags, TaggingLayer};
//! use grpc_logging::logging::{self, TracingLogger};
//! use tonic::transport::Server;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (unary, stream) = logging::interceptors(ExtensionTags, TracingLogger::new(), [])?;
//! let service = HealthcheckServer::new(Healthcheck { unary, stream });
//!
//! Server::builder()
//!     .layer(TaggingLayer::new(&TagsConfig::default())?)
//!     .add_service(service)
//!     .serve(addr)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod tags;

pub use tags::{
    parse_grpc_timeout, tag_keys, ExtensionTags, NoTags, TagReader, Tags, TaggingInterceptor,
    TaggingLayer, TaggingService,
};

// Re-export tonic types for convenience
pub use tonic::{Code, Request, Response, Status};
