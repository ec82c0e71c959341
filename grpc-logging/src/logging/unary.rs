//! Unary server interceptor

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tonic::{Request, Response, Status};

use super::chain::{Chain, CompletionGuard};
use super::context::MethodType;
use super::payload::Direction;

/// Logging interceptor for unary RPCs
///
/// Call [`intercept`](Self::intercept) from the generated service method,
/// passing the real handler as a closure:
///
/// ```ignore
/// async fn check(&self, req: Request<CheckRequest>) -> Result<Response<CheckResponse>, Status> {
///     self.unary
///         .intercept("/blah.foo.healthcheck/Check", req, |req| self.do_check(req))
///         .await
/// }
/// ```
#[derive(Debug, Clone)]
pub struct UnaryServerInterceptor {
    chain: Arc<Chain>,
}

impl UnaryServerInterceptor {
    pub(crate) fn new(chain: Arc<Chain>) -> Self {
        Self { chain }
    }

    /// Run `handler` for one unary call, logging around it
    ///
    /// The handler's result is returned untouched. The request payload is
    /// offered to the payload decider before the handler runs; the summary and
    /// the response payload follow once it returns. A [`CallContext`] is
    /// available to the handler through the request extensions.
    ///
    /// [`CallContext`]: super::CallContext
    pub async fn intercept<Req, Resp, H, Fut>(
        &self,
        full_method: &str,
        mut request: Request<Req>,
        handler: H,
    ) -> Result<Response<Resp>, Status>
    where
        Req: fmt::Debug + Any,
        Resp: fmt::Debug + Any,
        H: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        let record = self.chain.begin(
            full_method,
            MethodType::Unary,
            request.metadata(),
            request.extensions(),
        );
        let guard = CompletionGuard::new(Arc::clone(&record));

        request.extensions_mut().insert(record.context().clone());
        record.offer_payload(Direction::Request, request.get_ref());

        let result = match AssertUnwindSafe(handler(request)).catch_unwind().await {
            Ok(result) => result,
            Err(fault) => {
                record.finish(Some(&Status::internal("handler panicked")));
                panic::resume_unwind(fault);
            }
        };

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
}
