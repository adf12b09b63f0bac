//! Middleware pipeline wrapped around every routed request.
//!
//! Each middleware receives the [`Context`] and a [`Next`] cursor. It can
//! pass the request through, short-circuit with its own [`Response`], or
//! decorate the downstream response. The chain always ends in the handler
//! the router selected (or the router's `404` fallback).
//!
//! The service installs a single layer, [`LoggerMiddleware`], which writes
//! one access-log line per request.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;

use crate::{Response, context::Context, router::Handler};

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Wraps a [`Middleware`] implementation as a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Cursor into the remaining middleware chain for one request.
///
/// `run` consumes the cursor, so a middleware can forward a request at most
/// once.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    index: usize,
    endpoint: Handler,
}

impl Next {
    /// Positions a cursor at the start of `middlewares`, ending in `endpoint`.
    pub fn new(middlewares: Arc<[MiddlewareHandler]>, endpoint: Handler) -> Self {
        Self {
            middlewares,
            index: 0,
            endpoint,
        }
    }

    /// Invokes the next middleware, or the endpoint once the chain is exhausted.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => (self.endpoint)(ctx).await,
        }
    }
}

/// The trait implemented by every middleware layer.
///
/// Implementations are shared across Tokio tasks, so they must be
/// `Send + Sync` and return a `Send` future.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Access log: one `info` event per request with method, path, status, and
/// elapsed time. Never short-circuits.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_owned();

            let response = next.run(ctx).await;

            tracing::info!(
                %method,
                %path,
                status = response.status().as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "request handled"
            );

            response
        })
    }
}
