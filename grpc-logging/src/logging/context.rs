//! Per-call context handed to handlers and payload deciders

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::fields::{keys, Fields};

/// Shape of an RPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodType {
    /// Single request, single response
    Unary,
    /// Request stream, single response
    ClientStream,
    /// Single request, response stream
    ServerStream,
    /// Streams in both directions
    BidiStream,
}

impl MethodType {
    /// Value written to `grpc.method_type`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unary => "unary",
            Self::ClientStream => "client_stream",
            Self::ServerStream => "server_stream",
            Self::BidiStream => "bidi_stream",
        }
    }

    /// Whether messages flow as a stream in at least one direction
    pub fn is_streaming(&self) -> bool {
        !matches!(self, Self::Unary)
    }
}

impl fmt::Display for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split `/package.Service/Method` into `("package.Service", "Method")`
///
/// Anything that doesn't look like a gRPC path yields `"unknown"` for the
/// missing part.
pub fn split_full_method(full_method: &str) -> (&str, &str) {
    let trimmed = full_method.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((service, method)) if !service.is_empty() && !method.is_empty() => (service, method),
        Some((service, _)) if !service.is_empty() => (service, "unknown"),
        _ if !trimmed.is_empty() && !trimmed.contains('/') => (trimmed, "unknown"),
        _ => ("unknown", "unknown"),
    }
}

/// Read-only view of one in-flight RPC
///
/// Inserted into the request extensions before the handler runs, so handlers
/// can reach it with `request.extensions().get::<CallContext>()`. Cloning is
/// cheap; all clones describe the same call.
#[derive(Clone)]
pub struct CallContext {
    inner: Arc<Inner>,
}

struct Inner {
    full_method: String,
    method_type: MethodType,
    started: Instant,
    started_at: DateTime<Utc>,
    tags: Fields,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl CallContext {
    pub(crate) fn new(
        full_method: impl Into<String>,
        method_type: MethodType,
        tags: Fields,
        timeout: Option<Duration>,
    ) -> Self {
        let started = Instant::now();
        Self {
            inner: Arc::new(Inner {
                full_method: full_method.into(),
                method_type,
                started,
                started_at: Utc::now(),
                tags,
                deadline: timeout.and_then(|t| started.checked_add(t)),
                cancellation: CancellationToken::new(),
            }),
        }
    }

    /// Full method name, e.g. `/pkg.Service/Method`
    pub fn full_method(&self) -> &str {
        &self.inner.full_method
    }

    /// Service part of the method name
    pub fn service(&self) -> &str {
        split_full_method(&self.inner.full_method).0
    }

    /// Method part of the method name
    pub fn method(&self) -> &str {
        split_full_method(&self.inner.full_method).1
    }

    /// Shape of the RPC
    pub fn method_type(&self) -> MethodType {
        self.inner.method_type
    }

    /// Fields inherited from the tagging stage
    pub fn tags(&self) -> &Fields {
        &self.inner.tags
    }

    /// Wall-clock time the interceptor was entered
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Time since the interceptor was entered
    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Deadline derived from the client's `grpc-timeout`, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Token cancelled once the call is over, normally or not
    ///
    /// Work spawned on behalf of the call can select on
    /// [`CancellationToken::cancelled`] to stop when the client goes away.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    /// Whether the call is already over
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Method fields added to every record of this call
    pub(crate) fn method_fields(&self) -> Fields {
        let (service, method) = split_full_method(&self.inner.full_method);
        Fields::new()
            .with(keys::METHOD, self.inner.full_method.as_str())
            .with(keys::SERVICE, service)
            .with(keys::METHOD_NAME, method)
            .with(keys::METHOD_TYPE, self.inner.method_type.as_str())
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("full_method", &self.inner.full_method)
            .field("method_type", &self.inner.method_type)
            .field("started_at", &self.inner.started_at)
            .field("tags", &self.inner.tags)
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}
