//! Request routing: map `GET` paths to handler functions.
//!
//! Two pattern styles are supported:
//!
//! | Pattern         | Example match        | Captured params                  |
//! |-----------------|----------------------|----------------------------------|
//! | `/`             | `/`                  | *(none)*                         |
//! | `/:lat/:long`   | `/12.9716/77.5946`   | `lat → "12.9716"`, `long → "77.5946"` |
//!
//! Trailing slashes are normalized on both patterns and incoming paths.
//! Routes are matched in registration order; the first match wins. Every
//! request, matched or not, runs through the router's middleware chain.

use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, PathParams};
use crate::middleware::{Middleware, MiddlewareHandler, Next, from_middleware};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async handler stored by the router.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Implemented for every `Fn(Context) -> impl Future<Output = Response>`
/// that is `Send + Sync + 'static`.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Parameterized { segments: Vec<Segment> },
}

fn trim_trailing_slash(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => path,
    }
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if !pattern.contains(':') {
            return Pattern::Exact(pattern.to_owned());
        }

        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Parameter(name.to_owned()),
                None => Segment::Static(s.to_owned()),
            })
            .collect();
        Pattern::Parameterized { segments }
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (seg, value) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) if s != value => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => params.insert(name.clone(), value.to_owned()),
                    }
                }
                Some(params)
            }
        }
    }
}

fn not_found(_ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
    Box::pin(async { Response::new(StatusCode::NotFound) })
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

impl Route {
    fn matches(&self, method: &Method, path: &str) -> Option<PathParams> {
        if &self.method == method {
            self.pattern.matches(path)
        } else {
            None
        }
    }
}

/// HTTP request router.
///
/// # Examples
///
/// ```rust,no_run
/// use geopin::{Router, Response, StatusCode};
/// use geopin::context::Context;
///
/// let mut router = Router::new();
/// router.get("/:lat/:long", |ctx: Context| async move {
///     let lat = ctx.param("lat").to_owned();
///     Response::text(StatusCode::Ok, lat)
/// });
/// ```
pub struct Router {
    routes: Vec<Route>,
    middlewares: Vec<MiddlewareHandler>,
    not_found: Handler,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            middlewares: Vec::new(),
            not_found: Arc::new(not_found),
        }
    }

    /// Registers a handler for `GET` requests matching `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method: Method::Get,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    /// Appends a middleware layer. Layers run in the order they were added,
    /// outermost first.
    pub fn layer<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(from_middleware(Arc::new(middleware)));
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Freezes the router into a cheaply cloneable dispatcher.
    pub fn into_service(self) -> RouterService {
        RouterService {
            inner: Arc::new(Frozen {
                routes: self.routes,
                middlewares: Arc::from(self.middlewares),
                not_found: self.not_found,
            }),
        }
    }
}

struct Frozen {
    routes: Vec<Route>,
    middlewares: Arc<[MiddlewareHandler]>,
    not_found: Handler,
}

/// A finished [`Router`], shared by every connection task.
#[derive(Clone)]
pub struct RouterService {
    inner: Arc<Frozen>,
}

impl RouterService {
    /// Dispatches `request` through the middleware chain to the first
    /// matching route, or to the `404` fallback.
    pub async fn route(&self, request: Request) -> Response {
        let matched = self
            .inner
            .routes
            .iter()
            .find_map(|route| route.matches(request.method(), request.path()).map(|p| (route, p)));

        let (endpoint, ctx) = match matched {
            Some((route, params)) => (route.handler.clone(), Context::with_params(request, params)),
            None => (self.inner.not_found.clone(), Context::new(request)),
        };

        Next::new(self.inner.middlewares.clone(), endpoint).run(ctx).await
    }
}
