//! Exact-path routing.
//!
//! One endpoint per path, registered before the server starts and immutable
//! afterwards. Matching is case-sensitive; a method mismatch against the
//! stored endpoint yields 405 with an `Allow` header.

use crate::{http::request::Request, http::response::Response, http::types::Method, validator::Validator};
use std::collections::HashMap;

/// Outcome a handler reports when it cannot produce a response.
///
/// The message is logged on the worker thread and never leaks to the client;
/// the wire sees the canonical 500 body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(pub String);

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HandlerError {}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

/// Request handler contract.
///
/// Implemented for any `Fn(&Request, &mut Response) -> Result<(), HandlerError>`;
/// trait objects and hand-written types work the same way.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, req: &Request, resp: &mut Response) -> Result<(), HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Request, &mut Response) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, req: &Request, resp: &mut Response) -> Result<(), HandlerError> {
        self(req, resp)
    }
}

/// Everything the dispatch pipeline needs to serve one path.
pub struct Endpoint {
    pub(crate) method: Method,
    pub(crate) validator: Validator,
    pub(crate) handler: Box<dyn Handler>,
    pub(crate) is_secure: bool,
}

impl Endpoint {
    pub fn new(method: Method, handler: impl Handler) -> Self {
        Self {
            method,
            validator: Validator::new(),
            handler: Box::new(handler),
            is_secure: false,
        }
    }

    /// Requires a valid bearer token before the validator and handler run.
    pub fn secure(mut self) -> Self {
        self.is_secure = true;
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("method", &self.method)
            .field("is_secure", &self.is_secure)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("path `{0}` is already registered")]
    Duplicate(String),
    #[error("path `{0}` must start with a single `/`")]
    InvalidPath(String),
}

#[derive(Debug, Default)]
pub struct Router {
    routes: HashMap<String, Endpoint>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: &str, endpoint: Endpoint) -> Result<(), RouterError> {
        if !path.starts_with('/') || path.starts_with("//") {
            return Err(RouterError::InvalidPath(path.to_string()));
        }
        if self.routes.contains_key(path) {
            return Err(RouterError::Duplicate(path.to_string()));
        }

        self.routes.insert(path.to_string(), endpoint);
        Ok(())
    }

    #[inline]
    pub fn find(&self, path: &str) -> Option<&Endpoint> {
        self.routes.get(path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
