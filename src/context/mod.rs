//! Per-request context handed to route handlers and middleware.

use std::collections::HashMap;

use crate::Request;

/// Named path captures from the matched route, e.g. `lat` and `long` for
/// `/:lat/:long`.
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }
}

/// A request paired with the path parameters its route captured.
#[derive(Debug)]
pub struct Context {
    request: Request,
    params: PathParams,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns a captured parameter, or `""` when the route did not capture it.
    pub fn param(&self, key: &str) -> &str {
        self.params.get(key).unwrap_or_default()
    }
}
