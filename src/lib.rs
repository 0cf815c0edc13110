//! anvil_api - High-throughput epoll-based HTTP/1.1 application server
//!
//! A single-process application server built around a small pool of I/O
//! workers (one edge-triggered event loop and one port-reuse listening
//! socket each) coupled to bounded worker-thread pools that run handler
//! logic off the I/O threads.
//!
//! # Architecture
//!
//! - **I/O workers**: `IO_THREADS` event loops, each owning its connection
//!   table. Accepts are load-balanced by the kernel across the workers'
//!   listening sockets.
//! - **Worker pools**: handler code runs on dedicated threads, fed through a
//!   bounded task queue; responses come back over a bounded response queue
//!   owned by the dispatching I/O worker.
//! - **Back-pressure**: a full task queue sheds load as HTTP 503 instead of
//!   queueing without bound.
//! - **Graceful drain**: on SIGINT/SIGTERM the loops stop accepting, finish
//!   every in-flight request, flush the responses, and join.
//!
//! On the side of the hot path: an incremental HTTP/1.1 parser with
//! multipart support, exact-path routing with per-endpoint validation, an
//! HS256 token service, a CORS origin gate and atomic metrics with JSON and
//! Prometheus expositions.
//!
//! # Quick Start
//!
//! ```no_run
//! use anvil_api::{Config, Endpoint, Method, Request, Response, Router, Server, StatusCode};
//!
//! fn main() -> Result<(), anvil_api::ServerError> {
//!     let mut router = Router::new();
//!     router.register(
//!         "/hello",
//!         Endpoint::new(Method::Get, |_: &Request, resp: &mut Response| {
//!             resp.status(StatusCode::Ok).body(r#"{"hello":"world"}"#);
//!             Ok(())
//!         }),
//!     )?;
//!
//!     Server::builder()
//!         .config(Config::from_env()?)
//!         .router(router)
//!         .build()
//!         .run()
//! }
//! ```
//!
//! Configuration comes from the environment (`PORT`, `IO_THREADS`,
//! `POOL_SIZE`, `QUEUE_CAPACITY`, `MAX_REQUEST_SIZE`, `CORS_ORIGINS`,
//! `JWT_SECRET`, `JWT_TIMEOUT_SECONDS`, `API_KEY`); see [`Config`] for
//! defaults. The built-in endpoints `/ping`, `/metrics`, `/metricsp` and
//! `/version` are always registered.
pub(crate) mod http {
    pub(crate) mod multipart;
    pub(crate) mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod io_worker;
    pub(crate) mod server_impl;
    pub(crate) mod worker_pool;
}
pub mod config;
pub mod cors;
pub(crate) mod errors;
pub mod jwt;
pub mod metrics;
pub(crate) mod queue;
pub mod router;
pub mod validator;

pub use crate::{
    config::{Config, ConfigError},
    cors::CorsPolicy,
    errors::ServerError,
    http::{
        multipart::Part,
        request::Request,
        response::Response,
        types::{HeaderMap, Method, StatusCode},
    },
    jwt::{Claims, JwtError, JwtService},
    metrics::{Metrics, MetricsSnapshot},
    router::{Endpoint, Handler, HandlerError, Router, RouterError},
    server::server_impl::{Server, ServerBuilder, ServerHandle},
    validator::{ParamKind, ParamValue, Rule, Validator},
};
