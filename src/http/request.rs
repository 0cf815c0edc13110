//! Incremental HTTP/1.1 request parsing.
//!
//! The parser owns a growing buffer with a hard cap; the event loop reads
//! directly into [`RequestParser::buffer`] and reports progress with
//! [`RequestParser::advance`]. [`RequestParser::eof`] is cheap to call after
//! every read; [`RequestParser::finalize`] runs once per request and produces
//! an owned [`Request`] that can cross the dispatch boundary.

use crate::{
    errors::ErrorKind,
    http::{
        multipart::{self, Part},
        query,
        types::{slice_to_usize, HeaderMap, Method},
    },
};
use memchr::memmem;
use std::{collections::HashMap, net::IpAddr};

/// Request line + header section cap.
pub(crate) const MAX_HEADER_BYTES: usize = 32 * 1024;
/// Request-target cap.
pub(crate) const MAX_URI_BYTES: usize = 8 * 1024;

const INITIAL_BUFFER: usize = 4 * 1024;

/// A fully parsed request. Immutable once constructed; one request cycle.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    params: HashMap<String, String>,
    headers: HeaderMap,
    body: Vec<u8>,
    parts: Vec<Part>,
    peer: IpAddr,
    request_id: String,
}

impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameter or urlencoded form field, last occurrence wins.
    #[inline]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    #[inline(always)]
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Case-insensitive header lookup.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[inline(always)]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Multipart parts, in wire order. Empty unless the request carried
    /// `multipart/form-data`.
    #[inline(always)]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    #[inline(always)]
    pub const fn peer(&self) -> IpAddr {
        self.peer
    }

    /// Correlation id: inbound `X-Request-ID`, or a generated UUIDv4.
    #[inline(always)]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Token from an `Authorization: Bearer <token>` header.
    #[inline]
    pub fn bearer_token(&self) -> Option<&str> {
        let token = self.headers.get("authorization")?.strip_prefix("Bearer ")?;
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    }

    #[inline]
    pub fn origin(&self) -> Option<&str> {
        self.headers.get("origin")
    }
}

//

#[derive(Debug)]
pub(crate) struct RequestParser {
    buf: Vec<u8>,
    len: usize,
    max: usize,
    scanned: usize,
    head_end: Option<usize>,
    content_length: usize,
}

impl RequestParser {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            buf: vec![0; INITIAL_BUFFER.min(max)],
            len: 0,
            max,
            scanned: 0,
            head_end: None,
            content_length: 0,
        }
    }

    /// Re-arms the parser for the next request on the same connection.
    pub(crate) fn reset(&mut self) {
        self.len = 0;
        self.scanned = 0;
        self.head_end = None;
        self.content_length = 0;

        if self.buf.len() > INITIAL_BUFFER {
            self.buf = vec![0; INITIAL_BUFFER.min(self.max)];
        }
    }

    /// Writable span in the free region, growing the buffer up to the cap.
    ///
    /// An empty span means the cap is reached and the request must be
    /// rejected.
    pub(crate) fn buffer(&mut self) -> &mut [u8] {
        if self.len == self.buf.len() && self.buf.len() < self.max {
            let grown = (self.buf.len() * 2).min(self.max);
            self.buf.resize(grown, 0);
        }

        &mut self.buf[self.len..]
    }

    /// The caller read `n` bytes into the span returned by [`Self::buffer`].
    #[inline(always)]
    pub(crate) fn advance(&mut self, n: usize) {
        self.len += n;
        debug_assert!(self.len <= self.buf.len());
    }

    /// True when request line, headers and the `Content-Length` body are all
    /// buffered. Errors as soon as a violated limit is provable.
    pub(crate) fn eof(&mut self) -> Result<bool, ErrorKind> {
        let head_end = match self.head_end {
            Some(end) => end,
            None => {
                // resume the terminator search with overlap for a split CRLFCRLF
                let from = self.scanned.saturating_sub(3);

                match memmem::find(&self.buf[from..self.len], b"\r\n\r\n") {
                    Some(pos) => {
                        let head_end = from + pos + 4;
                        if head_end > MAX_HEADER_BYTES {
                            return Err(ErrorKind::HeaderSectionTooLarge);
                        }

                        self.content_length = self.scan_head(head_end)?;
                        self.head_end = Some(head_end);
                        head_end
                    }
                    None => {
                        self.scanned = self.len;
                        if self.len > MAX_HEADER_BYTES {
                            return Err(ErrorKind::HeaderSectionTooLarge);
                        }
                        return Ok(false);
                    }
                }
            }
        };

        let needed = head_end + self.content_length;
        if needed > self.max {
            return Err(ErrorKind::BodyTooLarge);
        }

        Ok(self.len >= needed)
    }

    /// Consumes the buffered bytes into an owned [`Request`].
    pub(crate) fn finalize(&mut self, peer: IpAddr) -> Result<Request, ErrorKind> {
        let head_end = self.head_end.ok_or(ErrorKind::InvalidRequestLine)?;
        let head = simdutf8::basic::from_utf8(&self.buf[..head_end - 4])
            .map_err(|_| ErrorKind::InvalidEncoding)?;

        let mut lines = head.split("\r\n");
        let request_line = lines.next().ok_or(ErrorKind::InvalidRequestLine)?;
        let (method, path, raw_query) = parse_request_line(request_line)?;

        let mut params = HashMap::new();
        if let Some(raw) = raw_query {
            query::parse_into(&mut params, raw.as_bytes());
        }

        let mut headers = HeaderMap::new();
        for line in lines {
            let (name, value) = line.split_once(':').ok_or(ErrorKind::InvalidHeader)?;
            if name.is_empty() || name.contains(' ') {
                return Err(ErrorKind::InvalidHeader);
            }
            headers.insert(name, value.trim());
        }

        let body = self.buf[head_end..head_end + self.content_length].to_vec();

        let mut parts = Vec::new();
        match headers.get("content-type") {
            Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => {
                query::parse_into(&mut params, &body);
            }
            Some(ct) if ct.starts_with("multipart/form-data") => {
                let boundary = multipart::boundary_from(ct).ok_or(ErrorKind::MissingBoundary)?;
                parts = multipart::parse(&body, &boundary)?;
            }
            _ => {}
        }

        let request_id = headers
            .get("x-request-id")
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Request {
            method,
            path: path.to_string(),
            params,
            headers,
            body,
            parts,
            peer,
            request_id,
        })
    }

    // Validates the request line and pulls out the body-framing headers.
    // The full header parse happens in finalize; this pass only needs what
    // eof() depends on.
    fn scan_head(&self, head_end: usize) -> Result<usize, ErrorKind> {
        let head = simdutf8::basic::from_utf8(&self.buf[..head_end - 4])
            .map_err(|_| ErrorKind::InvalidEncoding)?;

        let mut lines = head.split("\r\n");
        parse_request_line(lines.next().ok_or(ErrorKind::InvalidRequestLine)?)?;

        let mut content_length = None;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                return Err(ErrorKind::InvalidHeader);
            };

            if name.eq_ignore_ascii_case("content-length") {
                if content_length.is_some() {
                    return Err(ErrorKind::DuplicateContentLength);
                }
                content_length = Some(
                    slice_to_usize(value.trim().as_bytes())
                        .ok_or(ErrorKind::InvalidContentLength)?,
                );
            } else if name.eq_ignore_ascii_case("transfer-encoding")
                && value.to_ascii_lowercase().contains("chunked")
            {
                return Err(ErrorKind::ChunkedUnsupported);
            }
        }

        Ok(content_length.unwrap_or(0))
    }
}

fn parse_request_line(line: &str) -> Result<(Method, &str, Option<&str>), ErrorKind> {
    let mut tokens = line.split(' ');

    let method = tokens.next().ok_or(ErrorKind::InvalidRequestLine)?;
    let target = tokens.next().ok_or(ErrorKind::InvalidRequestLine)?;
    let version = tokens.next().ok_or(ErrorKind::InvalidRequestLine)?;
    if tokens.next().is_some() {
        return Err(ErrorKind::InvalidRequestLine);
    }

    let method = Method::from_bytes(method.as_bytes()).ok_or(ErrorKind::InvalidMethod)?;

    if !matches!(version, "HTTP/1.1" | "HTTP/1.0") {
        return Err(ErrorKind::InvalidVersion);
    }

    if target.len() > MAX_URI_BYTES {
        return Err(ErrorKind::UriTooLong);
    }
    if !target.starts_with('/') {
        return Err(ErrorKind::InvalidRequestLine);
    }

    Ok(match target.split_once('?') {
        Some((path, raw_query)) => (method, path, Some(raw_query)),
        None => (method, target, None),
    })
}

#[cfg(test)]
pub(crate) fn parse_bytes(raw: &[u8]) -> Result<Request, ErrorKind> {
    let mut parser = RequestParser::new(5 * 1024 * 1024);

    let mut fed = 0;
    while fed < raw.len() {
        let span = parser.buffer();
        assert!(!span.is_empty());

        let n = span.len().min(raw.len() - fed);
        span[..n].copy_from_slice(&raw[fed..fed + n]);
        parser.advance(n);
        fed += n;
    }

    assert!(parser.eof()?, "incomplete request in test input");
    parser.finalize([127, 0, 0, 1].into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_request() {
        let req = parse_bytes(
            b"POST /orders?sort=date HTTP/1.1\r\n\
              Host: 127.0.0.1\r\n\
              Content-Type: application/json\r\n\
              Content-Length: 17\r\n\r\n\
              {\"data\": \"value\"}",
        )
        .unwrap();

        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.path(), "/orders");
        assert_eq!(req.param("sort"), Some("date"));
        assert_eq!(req.header("HOST"), Some("127.0.0.1"));
        assert_eq!(req.body(), b"{\"data\": \"value\"}");
        assert!(req.parts().is_empty());
    }

    #[test]
    fn parse_invalid_request() {
        #[rustfmt::skip]
        let cases: [(&[u8], ErrorKind); 10] = [
            (b"FETCH / HTTP/1.1\r\n\r\n",            ErrorKind::InvalidMethod),
            (b"GET / HTTP/2.0\r\n\r\n",              ErrorKind::InvalidVersion),
            (b"GET /\r\n\r\n",                       ErrorKind::InvalidRequestLine),
            (b"GET / HTTP/1.1 extra\r\n\r\n",        ErrorKind::InvalidRequestLine),
            (b"GET relative HTTP/1.1\r\n\r\n",       ErrorKind::InvalidRequestLine),
            (b"GET / HTTP/1.1\r\nNoColonHere\r\n\r\n", ErrorKind::InvalidHeader),
            (
                b"POST / HTTP/1.1\r\nContent-Length: 2\r\nContent-Length: 2\r\n\r\nok",
                ErrorKind::DuplicateContentLength,
            ),
            (
                b"POST / HTTP/1.1\r\nContent-Length: nope\r\n\r\n",
                ErrorKind::InvalidContentLength,
            ),
            (
                b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n",
                ErrorKind::ChunkedUnsupported,
            ),
            (
                b"POST / HTTP/1.1\r\nTransfer-Encoding: GZIP, Chunked\r\n\r\n",
                ErrorKind::ChunkedUnsupported,
            ),
        ];

        for (raw, expected) in cases {
            assert_eq!(parse_bytes(raw).unwrap_err(), expected, "input: {raw:?}");
        }
    }

    #[test]
    fn incremental_feed() {
        let raw = b"GET /ping HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut parser = RequestParser::new(1024);

        for (i, &byte) in raw.iter().enumerate() {
            let complete = parser.eof().unwrap();
            assert!(!complete, "complete after only {i} bytes");

            parser.buffer()[0] = byte;
            parser.advance(1);
        }

        assert!(parser.eof().unwrap());
        let req = parser.finalize([10, 0, 0, 7].into()).unwrap();
        assert_eq!(req.path(), "/ping");
        assert_eq!(req.peer(), IpAddr::from([10, 0, 0, 7]));
    }

    #[test]
    fn body_waits_for_content_length() {
        let mut parser = RequestParser::new(1024);
        let head = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nab";

        parser.buffer()[..head.len()].copy_from_slice(head);
        parser.advance(head.len());
        assert!(!parser.eof().unwrap());

        parser.buffer()[..3].copy_from_slice(b"cde");
        parser.advance(3);
        assert!(parser.eof().unwrap());

        let req = parser.finalize([127, 0, 0, 1].into()).unwrap();
        assert_eq!(req.body(), b"abcde");
    }

    #[test]
    fn header_section_cap() {
        let mut parser = RequestParser::new(5 * 1024 * 1024);
        let raw = format!(
            "GET / HTTP/1.1\r\nX-Filler: {}\r\n\r\n",
            "f".repeat(MAX_HEADER_BYTES)
        );

        let mut fed = 0;
        let raw = raw.as_bytes();
        let err = loop {
            let span = parser.buffer();
            let n = span.len().min(raw.len() - fed);
            span[..n].copy_from_slice(&raw[fed..fed + n]);
            parser.advance(n);
            fed += n;

            if let Err(e) = parser.eof() {
                break e;
            }
        };

        assert_eq!(err, ErrorKind::HeaderSectionTooLarge);
    }

    #[test]
    fn uri_cap() {
        let raw = format!("GET /{} HTTP/1.1\r\n\r\n", "u".repeat(MAX_URI_BYTES));
        assert_eq!(parse_bytes(raw.as_bytes()).unwrap_err(), ErrorKind::UriTooLong);
    }

    #[test]
    fn body_cap() {
        let mut parser = RequestParser::new(256);
        let head = b"POST /up HTTP/1.1\r\nContent-Length: 10000\r\n\r\n";

        parser.buffer()[..head.len()].copy_from_slice(head);
        parser.advance(head.len());

        assert_eq!(parser.eof().unwrap_err(), ErrorKind::BodyTooLarge);
    }

    #[test]
    fn buffer_cap_yields_empty_span() {
        let mut parser = RequestParser::new(64);

        let span = parser.buffer();
        let n = span.len();
        parser.advance(n);

        assert_eq!(parser.buffer().len(), 0);
    }

    #[test]
    fn urlencoded_body_merges_into_params() {
        let req = parse_bytes(
            b"POST /login?source=web HTTP/1.1\r\n\
              Content-Type: application/x-www-form-urlencoded\r\n\
              Content-Length: 35\r\n\r\n\
              username=mcordova&password=basic%41",
        )
        .unwrap();

        assert_eq!(req.param("source"), Some("web"));
        assert_eq!(req.param("username"), Some("mcordova"));
        assert_eq!(req.param("password"), Some("basicA"));
    }

    #[test]
    fn multipart_body_produces_parts() {
        let body = b"--BND\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"n.txt\"\r\n\r\n\
            payload\r\n\
            --BND--";
        let raw = format!(
            "POST /upload HTTP/1.1\r\n\
             Content-Type: multipart/form-data; boundary=BND\r\n\
             Content-Length: {}\r\n\r\n",
            body.len()
        );

        let mut full = raw.into_bytes();
        full.extend_from_slice(body);
        let req = parse_bytes(&full).unwrap();

        assert_eq!(req.parts().len(), 1);
        assert_eq!(req.parts()[0].name, "file");
        assert_eq!(req.parts()[0].filename.as_deref(), Some("n.txt"));
        assert_eq!(req.parts()[0].data, b"payload");
    }

    #[test]
    fn multipart_without_boundary_param() {
        let err = parse_bytes(
            b"POST /upload HTTP/1.1\r\n\
              Content-Type: multipart/form-data\r\n\
              Content-Length: 4\r\n\r\n\
              data",
        )
        .unwrap_err();

        assert_eq!(err, ErrorKind::MissingBoundary);
    }

    #[test]
    fn correlation_id() {
        let req = parse_bytes(b"GET / HTTP/1.1\r\nX-Request-ID: trace-77\r\n\r\n").unwrap();
        assert_eq!(req.request_id(), "trace-77");

        let req = parse_bytes(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.request_id().len(), 36);
    }

    #[test]
    fn bearer_token() {
        #[rustfmt::skip]
        let cases = [
            ("Authorization: Bearer abc.def.ghi\r\n", Some("abc.def.ghi")),
            ("Authorization: Bearer   spaced \r\n",   Some("spaced")),
            ("Authorization: Basic abc\r\n",          None),
            ("Authorization: Bearer \r\n",            None),
            ("\r\n",                                  None),
        ];

        for (header, expected) in cases {
            let raw = format!("GET / HTTP/1.1\r\n{header}\r\n");
            // an empty line mid-head terminates it early; strip for the bare case
            let raw = raw.replace("\r\n\r\n\r\n", "\r\n\r\n");

            let req = parse_bytes(raw.as_bytes()).unwrap();
            assert_eq!(req.bearer_token(), expected);
        }
    }

    #[test]
    fn reset_rearms() {
        let mut parser = RequestParser::new(1024);
        let raw = b"GET /a HTTP/1.1\r\n\r\n";

        parser.buffer()[..raw.len()].copy_from_slice(raw);
        parser.advance(raw.len());
        assert!(parser.eof().unwrap());
        parser.finalize([127, 0, 0, 1].into()).unwrap();

        parser.reset();
        assert!(!parser.eof().unwrap());

        let raw = b"GET /b HTTP/1.1\r\n\r\n";
        parser.buffer()[..raw.len()].copy_from_slice(raw);
        parser.advance(raw.len());
        assert!(parser.eof().unwrap());
        assert_eq!(parser.finalize([127, 0, 0, 1].into()).unwrap().path(), "/b");
    }
}
