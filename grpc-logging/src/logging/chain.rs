//! Call lifecycle shared by the unary and stream interceptors
//!
//! A [`Chain`] holds the immutable configuration built once at construction.
//! Each invocation gets its own [`CallRecord`], owned by that invocation's
//! execution path (streams share it with their wrappers through an `Arc`).
//! The record emits at most one summary, guarded by an atomic flag.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tonic::metadata::MetadataMap;
use tonic::{Code, Status};

use super::context::{CallContext, MethodType};
use super::fields::{keys, Fields};
use super::options::{code_name, Options};
use super::payload::{self, Direction};
use super::severity::Severity;
use crate::grpc::tags::{parse_grpc_timeout, TagReader};

/// Immutable configuration shared by every call
pub(crate) struct Chain {
    options: Options,
    tags: Box<dyn TagReader>,
}

impl Chain {
    pub(crate) fn new(tags: impl TagReader, options: Options) -> Self {
        Self {
            options,
            tags: Box::new(tags),
        }
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }

    /// Enter a call: capture the start time and the inherited tags
    pub(crate) fn begin(
        self: &Arc<Self>,
        full_method: &str,
        method_type: MethodType,
        metadata: &MetadataMap,
        extensions: &tonic::Extensions,
    ) -> Arc<CallRecord> {
        let timeout = metadata
            .get("grpc-timeout")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout);

        Arc::new(CallRecord {
            chain: Arc::clone(self),
            context: CallContext::new(full_method, method_type, self.tags.read(extensions), timeout),
            finished: AtomicBool::new(false),
        })
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("options", &self.options).finish_non_exhaustive()
    }
}

/// State of one in-flight call
pub(crate) struct CallRecord {
    chain: Arc<Chain>,
    context: CallContext,
    finished: AtomicBool,
}

impl CallRecord {
    pub(crate) fn context(&self) -> &CallContext {
        &self.context
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Offer one message to the payload decider, logging it if accepted
    pub(crate) fn offer_payload<T>(&self, direction: Direction, message: &T)
    where
        T: fmt::Debug + Any,
    {
        let options = self.chain.options();
        let Some(decider) = options.payload_decider.as_ref() else {
            return;
        };

        if !decider(&self.context, self.context.full_method(), message as &dyn Any) {
            return;
        }
        if !options.logger.enabled(Severity::Info) {
            return;
        }

        let mut fields = self.context.tags().clone();
        fields.extend(&self.context.method_fields());
        fields.extend(&payload::payload_fields(direction, message, options.payload_max_bytes));

        self.emit(Severity::Info, &fields, direction.message());
    }

    /// Terminate the call with `outcome` (`None` on success)
    ///
    /// Only the first call has any effect. Decision functions run after the
    /// flag is set, so a panicking decider is not consulted a second time
    /// while the stack unwinds. The context token stays live until the
    /// [`CompletionGuard`] goes away, so trailing payload records still see an
    /// uncancelled call.
    pub(crate) fn finish(&self, outcome: Option<&Status>) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }

        let options = self.chain.options();
        let full_method = self.context.full_method();

        if !options.should_log(full_method, outcome) {
            return;
        }

        let code = outcome.map_or(Code::Ok, Status::code);
        let severity = options.level_for(code);

        let mut fields = self.context.tags().clone();
        fields.extend(&options.duration_fields(self.context.elapsed()));
        fields.extend(&self.context.method_fields());
        fields.insert(keys::CODE, code_name(code));
        fields.insert(keys::SEVERITY, severity.as_str());
        match outcome {
            Some(status) => fields.insert(keys::ERROR, status.message()),
            None => {
                fields.remove(keys::ERROR);
            }
        }

        let message = if self.context.method_type().is_streaming() {
            format!("finished streaming call with code {}", code_name(code))
        } else {
            format!("finished unary call with code {}", code_name(code))
        };

        self.emit(severity, &fields, &message);
    }

    /// Terminate a call that never reached normal completion
    ///
    /// Runs from `Drop`, possibly while unwinding, so it must never panic.
    fn abandon(&self) {
        if self.is_finished() {
            return;
        }

        let status = if std::thread::panicking() {
            Status::internal("handler panicked")
        } else {
            Status::cancelled("call dropped before completion")
        };

        if panic::catch_unwind(AssertUnwindSafe(|| self.finish(Some(&status)))).is_err() {
            tracing::trace!(
                method = self.context.full_method(),
                "completion logging panicked for abandoned call"
            );
        }
    }

    fn emit(&self, severity: Severity, fields: &Fields, message: &str) {
        if let Err(err) = self.chain.options().logger.log(severity, fields, message) {
            tracing::trace!(error = %err, "dropped gRPC log record");
        }
    }
}

impl fmt::Debug for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRecord")
            .field("context", &self.context)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Ends the call: finishes it as abandoned if dropped before
/// [`CallRecord::finish`], then cancels the context token
///
/// Covers handler panics (unwinding drops the interceptor future) and
/// cancellation (the transport drops the future on disconnect or deadline).
#[derive(Debug)]
pub(crate) struct CompletionGuard(Arc<CallRecord>);

impl CompletionGuard {
    pub(crate) fn new(record: Arc<CallRecord>) -> Self {
        Self(record)
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.abandon();
        self.0.context.cancellation().cancel();
    }
}
