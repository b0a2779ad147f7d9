//! Panic recovery at the interceptor boundary.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tonic::Status;

use super::{Call, Interceptor, Next, Reply};

/// Converts a panic anywhere below it into `Internal`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverPanics;

impl Interceptor for RecoverPanics {
    fn intercept<'a>(&'a self, call: Call, next: Next<'a>) -> BoxFuture<'a, Result<Reply, Status>> {
        let method = call.info.full_method.clone();
        Box::pin(async move {
            let guarded = AssertUnwindSafe(async move { next.run(call).await });
            match guarded.catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let backtrace = Backtrace::force_capture();
                    tracing::error!(
                        method = %method,
                        panic = %panic_message(&*panic),
                        backtrace = %backtrace,
                        "Recovered from panic in request handling"
                    );
                    Err(Status::internal("internal error"))
                }
            }
        })
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
