//! Ordered interceptor chain run before every HTTP-originated backend call.
//!
//! # Data Flow
//! ```text
//! Call { info, metadata, payload }
//!     → RecoverPanics (always outermost)
//!     → configured interceptors, in order
//!     → Invoke (the pooled upstream call)
//!     → Reply
//! ```
//!
//! Credential checks and request signing live outside the gateway and plug
//! in here. `CallInfo::auth_required` comes from the [`AccessPolicy`].

pub mod recover;

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use prost_reflect::DynamicMessage;
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::descriptor::StreamShape;

pub use recover::RecoverPanics;

/// Static facts about the method being called.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub full_method: String,
    pub shape: StreamShape,
    pub auth_required: bool,
}

pub enum Payload {
    Unary(DynamicMessage),
    Stream(BoxStream<'static, DynamicMessage>),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Unary(m) => f.debug_tuple("Unary").field(m).finish(),
            Payload::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// One backend call as seen by interceptors.
#[derive(Debug)]
pub struct Call {
    pub info: Arc<CallInfo>,
    pub metadata: MetadataMap,
    pub payload: Payload,
}

pub type ReplyStream = BoxStream<'static, Result<DynamicMessage, Status>>;

pub enum Reply {
    Unary(tonic::Response<DynamicMessage>),
    Stream(tonic::Response<ReplyStream>),
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Unary(r) => f.debug_tuple("Unary").field(r.get_ref()).finish(),
            Reply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

pub trait Interceptor: Send + Sync {
    fn intercept<'a>(&'a self, call: Call, next: Next<'a>) -> BoxFuture<'a, Result<Reply, Status>>;
}

/// The terminal step of a chain.
pub trait Invoke: Send + Sync {
    fn invoke(&self, call: Call) -> BoxFuture<'_, Result<Reply, Status>>;
}

/// The rest of the chain after the current interceptor.
pub struct Next<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    invoker: &'a dyn Invoke,
}

impl<'a> Next<'a> {
    pub fn run(self, call: Call) -> BoxFuture<'a, Result<Reply, Status>> {
        match self.interceptors.split_first() {
            Some((first, rest)) => first.intercept(
                call,
                Next {
                    interceptors: rest,
                    invoker: self.invoker,
                },
            ),
            None => self.invoker.invoke(call),
        }
    }
}

#[derive(Clone)]
pub struct InterceptorChain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        let mut all: Vec<Arc<dyn Interceptor>> = Vec::with_capacity(interceptors.len() + 1);
        all.push(Arc::new(RecoverPanics));
        all.extend(interceptors);
        Self {
            interceptors: all.into(),
        }
    }

    pub async fn run(&self, call: Call, invoker: &dyn Invoke) -> Result<Reply, Status> {
        Next {
            interceptors: &self.interceptors,
            invoker,
        }
        .run(call)
        .await
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

/// Route-table auth lookup, owned by an external collaborator.
pub trait AccessPolicy: Send + Sync {
    fn auth_required(&self, full_method: &str) -> bool;
}

/// No method requires auth.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAccess;

impl AccessPolicy for OpenAccess {
    fn auth_required(&self, _full_method: &str) -> bool {
        false
    }
}

impl<F> AccessPolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn auth_required(&self, full_method: &str) -> bool {
        self(full_method)
    }
}
