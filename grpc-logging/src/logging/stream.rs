//! Streaming server interceptor
//!
//! The summary for a streaming call covers the whole stream. For shapes with
//! a response stream, the call ends when that stream ends, fails or is
//! dropped, which may be long after the handler returned.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{FutureExt, Stream};
use tonic::{Request, Response, Status};

use super::chain::{CallRecord, Chain, CompletionGuard};
use super::context::MethodType;
use super::payload::Direction;

/// Stream wrapper offering every message to the payload decider
///
/// Inbound wrappers (client messages) only observe, and stop logging once
/// the call has finished. Outbound wrappers (server messages) also terminate
/// the call when the stream ends, yields an error, or is dropped early.
pub struct ObservedStream<S> {
    inner: Pin<Box<S>>,
    record: Arc<CallRecord>,
    direction: Direction,
    guard: Option<CompletionGuard>,
    done: bool,
}

impl<S> ObservedStream<S> {
    fn inbound(inner: S, record: Arc<CallRecord>) -> Self {
        Self {
            inner: Box::pin(inner),
            record,
            direction: Direction::Request,
            guard: None,
            done: false,
        }
    }

    fn outbound(inner: S, record: Arc<CallRecord>, guard: CompletionGuard) -> Self {
        Self {
            inner: Box::pin(inner),
            record,
            direction: Direction::Response,
            guard: Some(guard),
            done: false,
        }
    }

    fn terminates_call(&self) -> bool {
        self.guard.is_some()
    }

    /// Finish the call and release the guard, cancelling the context token
    fn complete(&mut self, outcome: Option<&Status>) {
        self.done = true;
        self.record.finish(outcome);
        self.guard.take();
    }
}

impl<S, T> Stream for ObservedStream<S>
where
    S: Stream<Item = Result<T, Status>>,
    T: fmt::Debug + Any,
{
    type Item = Result<T, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        let polled = if this.terminates_call() {
            match panic::catch_unwind(AssertUnwindSafe(|| this.inner.as_mut().poll_next(cx))) {
                Ok(polled) => polled,
                Err(fault) => {
                    this.complete(Some(&Status::internal("response stream panicked")));
                    panic::resume_unwind(fault);
                }
            }
        } else {
            this.inner.as_mut().poll_next(cx)
        };

        match polled {
            Poll::Ready(Some(Ok(message))) => {
                // messages read after the summary belong to no call
                if !this.record.is_finished() {
                    this.record.offer_payload(this.direction, &message);
                }
                Poll::Ready(Some(Ok(message)))
            }
            Poll::Ready(Some(Err(status))) => {
                if this.terminates_call() {
                    this.complete(Some(&status));
                }
                Poll::Ready(Some(Err(status)))
            }
            Poll::Ready(None) => {
                if this.terminates_call() {
                    this.complete(None);
                } else {
                    this.done = true;
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> fmt::Debug for ObservedStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedStream")
            .field("direction", &self.direction)
            .field("method", &self.record.context().full_method())
            .field("done", &self.done)
            .finish()
    }
}

/// Logging interceptor for streaming RPCs
///
/// One entry point per streaming shape. Each wraps the handler the same way
/// the unary interceptor does, but payload records are emitted per message
/// and the single summary record covers the whole stream.
#[derive(Debug, Clone)]
pub struct StreamServerInterceptor {
    chain: Arc<Chain>,
}

impl StreamServerInterceptor {
    pub(crate) fn new(chain: Arc<Chain>) -> Self {
        Self { chain }
    }

    fn enter<M>(&self, full_method: &str, method_type: MethodType, request: &Request<M>) -> Arc<CallRecord> {
        self.chain
            .begin(full_method, method_type, request.metadata(), request.extensions())
    }

    /// Client streaming: many requests, one response
    ///
    /// The call ends when the handler returns.
    pub async fn client_streaming<S, Req, Resp, H, Fut>(
        &self,
        full_method: &str,
        request: Request<S>,
        handler: H,
    ) -> Result<Response<Resp>, Status>
    where
        S: Stream<Item = Result<Req, Status>>,
        Req: fmt::Debug + Any,
        Resp: fmt::Debug + Any,
        H: FnOnce(Request<ObservedStream<S>>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        let record = self.enter(full_method, MethodType::ClientStream, &request);
        let guard = CompletionGuard::new(Arc::clone(&record));

        let result = run_handler(&record, handler(observe_inbound(&record, request))).await;

        match &result {
            Ok(response) => {
                record.finish(None);
                record.offer_payload(Direction::Response, response.get_ref());
            }
            Err(status) => record.finish(Some(status)),
        }
        drop(guard);

        result
    }

    /// Server streaming: one request, many responses
    ///
    /// The call ends with the returned response stream.
    pub async fn server_streaming<Req, Resp, RS, H, Fut>(
        &self,
        full_method: &str,
        mut request: Request<Req>,
        handler: H,
    ) -> Result<Response<ObservedStream<RS>>, Status>
    where
        Req: fmt::Debug + Any,
        RS: Stream<Item = Result<Resp, Status>>,
        Resp: fmt::Debug + Any,
        H: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<RS>, Status>>,
    {
        let record = self.enter(full_method, MethodType::ServerStream, &request);
        let guard = CompletionGuard::new(Arc::clone(&record));

        request.extensions_mut().insert(record.context().clone());
        record.offer_payload(Direction::Request, request.get_ref());

        let result = run_handler(&record, handler(request)).await;
        observe_outbound(record, guard, result)
    }

    /// Bidirectional streaming
    ///
    /// Messages are observed in both directions; the call ends with the
    /// returned response stream.
    pub async fn bidi_streaming<S, Req, Resp, RS, H, Fut>(
        &self,
        full_method: &str,
        request: Request<S>,
        handler: H,
    ) -> Result<Response<ObservedStream<RS>>, Status>
    where
        S: Stream<Item = Result<Req, Status>>,
        Req: fmt::Debug + Any,
        RS: Stream<Item = Result<Resp, Status>>,
        Resp: fmt::Debug + Any,
        H: FnOnce(Request<ObservedStream<S>>) -> Fut,
        Fut: Future<Output = Result<Response<RS>, Status>>,
    {
        let record = self.enter(full_method, MethodType::BidiStream, &request);
        let guard = CompletionGuard::new(Arc::clone(&record));

        let result = run_handler(&record, handler(observe_inbound(&record, request))).await;
        observe_outbound(record, guard, result)
    }
}

/// Await the handler, finishing the call as `Internal` if it panics
async fn run_handler<F, T>(record: &CallRecord, handler: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(result) => result,
        Err(fault) => {
            record.finish(Some(&Status::internal("handler panicked")));
            panic::resume_unwind(fault);
        }
    }
}

fn observe_inbound<S>(record: &Arc<CallRecord>, request: Request<S>) -> Request<ObservedStream<S>> {
    let (metadata, mut extensions, stream) = request.into_parts();
    extensions.insert(record.context().clone());
    Request::from_parts(
        metadata,
        extensions,
        ObservedStream::inbound(stream, Arc::clone(record)),
    )
}

fn observe_outbound<RS>(
    record: Arc<CallRecord>,
    guard: CompletionGuard,
    result: Result<Response<RS>, Status>,
) -> Result<Response<ObservedStream<RS>>, Status> {
    match result {
        Ok(response) => {
            let (metadata, stream, extensions) = response.into_parts();
            Ok(Response::from_parts(
                metadata,
                ObservedStream::outbound(stream, record, guard),
                extensions,
            ))
        }
        Err(status) => {
            record.finish(Some(&status));
            drop(guard);
            Err(status)
        }
    }
}
