//! HTTP response building and wire serialization.
//!
//! A [`Response`] is mutable while the handler owns it; `seal` freezes it
//! into the wire image the event loop drains with a send cursor. Every
//! response carries `Content-Length` and `Connection: close` (the server
//! trades keep-alive for freedom from pipelining hazards; a front proxy is
//! expected to pool connections).

use crate::http::types::{Method, StatusCode};
use serde::Serialize;

#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    allow_origin: Option<String>,
    keep_alive: bool,
    wire: Vec<u8>,
    cursor: usize,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    #[inline]
    pub fn new() -> Self {
        Self {
            status: StatusCode::Ok,
            headers: Vec::new(),
            body: Vec::new(),
            allow_origin: None,
            keep_alive: false,
            wire: Vec::new(),
            cursor: 0,
        }
    }

    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    #[inline]
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Adds a header. `content-length` and `connection` are managed by the
    /// server and must not be set here.
    #[inline]
    pub fn header(&mut self, name: &str, value: &str) -> &mut Self {
        debug_assert!(
            !name.eq_ignore_ascii_case("content-length")
                && !name.eq_ignore_ascii_case("connection"),
            "header `{name}` is managed by the server"
        );

        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    #[inline]
    pub fn body(&mut self, data: impl Into<Vec<u8>>) -> &mut Self {
        self.body = data.into();
        self
    }

    /// Serializes `value` as the JSON body.
    #[inline]
    pub fn json<T: Serialize>(&mut self, value: &T) -> &mut Self {
        self.body = serde_json::to_vec(value).unwrap_or_default();
        self
    }

    /// Opts this response into keep-alive. Off by default; exists for the
    /// connection-reset path and its tests.
    #[inline]
    pub fn keep_alive(&mut self, keep: bool) -> &mut Self {
        self.keep_alive = keep;
        self
    }

    #[inline]
    pub(crate) fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[inline]
    pub(crate) fn allow_origin(&mut self, origin: &str) {
        self.allow_origin = Some(origin.to_string());
    }
}

// Canonical shapes

impl Response {
    /// `{"error": message}` with the given status.
    pub(crate) fn error(status: StatusCode, message: &str) -> Self {
        let mut resp = Self::new();
        resp.status(status)
            .json(&serde_json::json!({ "error": message }));
        resp
    }

    /// 204 preflight answer scoped to the endpoint matched for the request
    /// path. Unmatched paths advertise only `OPTIONS`.
    pub(crate) fn preflight(method: Option<Method>) -> Self {
        let allow = match method {
            Some(Method::Options) | None => "OPTIONS".to_string(),
            Some(method) => format!("{}, OPTIONS", method.as_str()),
        };

        let mut resp = Self::new();
        resp.status(StatusCode::NoContent)
            .header("access-control-allow-methods", &allow)
            .header(
                "access-control-allow-headers",
                "Content-Type, Authorization, X-Request-ID",
            )
            .header("access-control-max-age", "86400");
        resp
    }

    /// Wraps an already-serialized wire image (the canned error path).
    pub(crate) fn raw(wire: &[u8]) -> Self {
        let mut resp = Self::new();
        resp.wire = wire.to_vec();
        resp
    }
}

// Wire image + send cursor

impl Response {
    /// Freezes status, headers and body into the byte image the event loop
    /// writes. Idempotent for the canned path where the image is preset.
    pub(crate) fn seal(&mut self) {
        if !self.wire.is_empty() {
            return;
        }

        let mut wire = Vec::with_capacity(128 + self.body.len());
        wire.extend_from_slice(self.status.status_line().as_bytes());

        wire.extend_from_slice(match self.keep_alive {
            true => b"connection: keep-alive\r\n",
            false => b"connection: close\r\n",
        });
        wire.extend_from_slice(format!("content-length: {}\r\n", self.body.len()).as_bytes());

        if !self.headers.iter().any(|(n, _)| n == "content-type") {
            wire.extend_from_slice(b"content-type: application/json\r\n");
        }

        if let Some(origin) = &self.allow_origin {
            wire.extend_from_slice(
                format!("access-control-allow-origin: {origin}\r\nvary: Origin\r\n").as_bytes(),
            );
        }

        for (name, value) in &self.headers {
            wire.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }

        wire.extend_from_slice(b"\r\n");
        wire.extend_from_slice(&self.body);

        self.wire = wire;
    }

    /// Bytes not yet written.
    #[inline(always)]
    pub(crate) fn remaining(&self) -> &[u8] {
        &self.wire[self.cursor..]
    }

    #[inline(always)]
    pub(crate) fn advance_cursor(&mut self, n: usize) {
        self.cursor += n;
        debug_assert!(self.cursor <= self.wire.len());
    }

    #[inline(always)]
    pub(crate) fn is_done(&self) -> bool {
        self.cursor == self.wire.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(resp: &mut Response) -> (String, Vec<u8>) {
        resp.seal();
        let wire = resp.remaining().to_vec();
        let pos = wire.windows(4).position(|w| w == b"\r\n\r\n").unwrap();

        (
            String::from_utf8(wire[..pos].to_vec()).unwrap(),
            wire[pos + 4..].to_vec(),
        )
    }

    #[test]
    fn serialize_shape() {
        let mut resp = Response::new();
        resp.status(StatusCode::Ok).body(r#"{"status":"OK"}"#);

        let (head, body) = split(&mut resp);

        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("connection: close"));
        assert!(head.contains("content-length: 15"));
        assert!(head.contains("content-type: application/json"));
        assert_eq!(body, br#"{"status":"OK"}"#);
    }

    #[test]
    fn explicit_content_type_wins() {
        let mut resp = Response::new();
        resp.status(StatusCode::Ok)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body("x 1");

        let (head, _) = split(&mut resp);

        assert!(head.contains("content-type: text/plain; version=0.0.4"));
        assert_eq!(head.matches("content-type").count(), 1);
    }

    #[test]
    fn cors_echo() {
        let mut resp = Response::new();
        resp.status(StatusCode::Ok).body("{}");
        resp.allow_origin("https://app.example.com");

        let (head, _) = split(&mut resp);

        assert!(head.contains("access-control-allow-origin: https://app.example.com"));
        assert!(head.contains("vary: Origin"));
    }

    #[test]
    fn preflight_shape() {
        let mut resp = Response::preflight(Some(Method::Post));
        let (head, body) = split(&mut resp);

        assert!(head.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(head.contains("access-control-allow-methods: POST, OPTIONS"));
        assert!(head.contains("access-control-allow-headers: Content-Type, Authorization, X-Request-ID"));
        assert!(head.contains("content-length: 0"));
        assert!(body.is_empty());
    }

    // unmatched paths do not advertise methods they cannot serve
    #[test]
    fn preflight_without_a_matched_endpoint() {
        let mut resp = Response::preflight(None);
        let (head, _) = split(&mut resp);
        assert!(head.contains("access-control-allow-methods: OPTIONS\r\n"));

        let mut resp = Response::preflight(Some(Method::Options));
        let (head, _) = split(&mut resp);
        assert!(head.contains("access-control-allow-methods: OPTIONS\r\n"));
    }

    #[test]
    fn error_shape() {
        let mut resp = Response::error(StatusCode::Unauthorized, "Invalid or missing token");
        let (head, body) = split(&mut resp);

        assert!(head.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert_eq!(body, br#"{"error":"Invalid or missing token"}"#);
    }

    #[test]
    fn keep_alive_override() {
        let mut resp = Response::new();
        resp.status(StatusCode::Ok).keep_alive(true).body("{}");

        let (head, _) = split(&mut resp);
        assert!(head.contains("connection: keep-alive"));
    }

    #[test]
    fn send_cursor() {
        let mut resp = Response::new();
        resp.status(StatusCode::Ok).body("abcdef");
        resp.seal();

        let total = resp.remaining().len();
        assert!(!resp.is_done());

        resp.advance_cursor(10);
        assert_eq!(resp.remaining().len(), total - 10);

        resp.advance_cursor(total - 10);
        assert!(resp.is_done());
        assert!(resp.remaining().is_empty());
    }

    #[test]
    fn raw_is_presealed() {
        let mut resp = Response::raw(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
        resp.seal();

        assert_eq!(
            resp.remaining(),
            b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n"
        );
    }

    // parse(serialize(r)) = r for the shapes the builder produces
    #[test]
    fn round_trip_through_parser() {
        let mut resp = Response::new();
        resp.status(StatusCode::Created)
            .header("x-entity-id", "42")
            .body(r#"{"id":42}"#);
        resp.seal();

        let raw = resp.remaining();
        let head = std::str::from_utf8(raw).unwrap().split("\r\n\r\n").next().unwrap();

        let mut status = head.lines().next().unwrap().splitn(3, ' ');
        assert_eq!(status.next(), Some("HTTP/1.1"));
        assert_eq!(status.next(), Some("201"));

        let headers: Vec<(&str, &str)> = head
            .lines()
            .skip(1)
            .map(|l| l.split_once(": ").unwrap())
            .collect();

        assert!(headers.contains(&("x-entity-id", "42")));
        assert!(headers.contains(&("content-length", "9")));
    }
}
