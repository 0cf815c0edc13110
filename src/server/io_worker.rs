//! The event loop.
//!
//! One I/O worker owns one listening socket (bound with address and port
//! reuse so its siblings share the port), one poll set, one connection
//! table, one worker pool and one response queue. All registrations are
//! edge-triggered: accept, read and write paths loop until `WouldBlock`.
//!
//! Per-connection life cycle: READING while the parser accumulates bytes;
//! DISPATCHED (no poll interest at all) between handing the request to the
//! pool and taking its response off the response queue; WRITING while the
//! send cursor advances; then CLOSED, or back to READING when a response
//! opted into keep-alive.

use crate::{
    cors::CorsPolicy,
    errors::ErrorKind,
    http::{
        request::{Request, RequestParser},
        response::Response,
        types::{Method, StatusCode},
    },
    jwt::JwtService,
    metrics::Metrics,
    queue::Bounded,
    router::Router,
    server::worker_pool::{Task, WorkerPool},
};
use mio::{
    event::Event,
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Token, Waker,
};
use std::{
    collections::HashMap,
    io::{self, Read, Write},
    net::IpAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::{debug, error, info_span, trace, warn};

const LISTENER: Token = Token(usize::MAX - 1);
const WAKER: Token = Token(usize::MAX);

const POLL_TIMEOUT: Duration = Duration::from_millis(5);
const DRAIN_POLL_TIMEOUT: Duration = Duration::from_millis(10);
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Read-only state shared by every I/O worker and worker thread.
pub(crate) struct Shared {
    pub(crate) router: Router,
    pub(crate) cors: CorsPolicy,
    pub(crate) jwt: JwtService,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) api_key: Option<String>,
    pub(crate) pod_name: String,
    pub(crate) read_timeout: Duration,
    pub(crate) max_request_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Reading,
    Dispatched,
    Writing,
}

struct Conn {
    stream: TcpStream,
    peer: IpAddr,
    parser: RequestParser,
    state: ConnState,
    pending: Option<Response>,
    last_activity: Instant,
}

enum ReadOutcome {
    NeedMore,
    Complete,
    PeerClosed,
    Failed(ErrorKind),
    Broken,
}

enum WriteOutcome {
    Again,
    Done { keep_alive: bool },
    Broken,
}

pub(crate) struct IoWorker {
    id: usize,
    poll: Poll,
    listener: TcpListener,
    conns: HashMap<Token, Conn>,
    next_token: usize,
    pool: WorkerPool,
    responses: Arc<Bounded<(Token, Response)>>,
    waker: Arc<Waker>,
    in_flight: Arc<AtomicUsize>,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
}

impl IoWorker {
    pub(crate) fn new(
        id: usize,
        mut listener: TcpListener,
        pool: WorkerPool,
        response_capacity: usize,
        shared: Arc<Shared>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<(Self, Arc<Waker>)> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        let worker = Self {
            id,
            poll,
            listener,
            conns: HashMap::new(),
            next_token: 0,
            pool,
            responses: Arc::new(Bounded::new(response_capacity)),
            waker: Arc::clone(&waker),
            in_flight: Arc::new(AtomicUsize::new(0)),
            shared,
            shutdown,
        };

        Ok((worker, waker))
    }

    pub(crate) fn run(mut self) {
        debug!(worker = self.id, "event loop running");
        let mut events = Events::with_capacity(1024);
        let mut last_sweep = Instant::now();

        loop {
            match self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(worker = self.id, error = %e, "poll failed");
                    break;
                }
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_ready(),
                    WAKER => {}
                    token => self.conn_ready(token, event),
                }
            }

            self.drain_responses();

            if last_sweep.elapsed() >= SWEEP_INTERVAL {
                self.sweep();
                last_sweep = Instant::now();
            }

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
        }

        self.drain();
        self.pool.stop();
        debug!(worker = self.id, "event loop stopped");
    }

    // Accept

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    let _ = stream.set_nodelay(true);
                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, token, Interest::READABLE)
                    {
                        warn!(worker = self.id, error = %e, "register failed");
                        continue;
                    }

                    self.conns.insert(
                        token,
                        Conn {
                            stream,
                            peer: addr.ip(),
                            parser: RequestParser::new(self.shared.max_request_size),
                            state: ConnState::Reading,
                            pending: None,
                            last_activity: Instant::now(),
                        },
                    );
                    self.shared.metrics.connection_opened();
                    trace!(worker = self.id, peer = %addr, "accepted");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(worker = self.id, error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    // Per-connection events

    fn conn_ready(&mut self, token: Token, event: &Event) {
        if event.is_error() || event.is_read_closed() {
            self.close(token);
            return;
        }

        let state = match self.conns.get(&token) {
            Some(conn) => conn.state,
            None => return,
        };

        match state {
            ConnState::Reading if event.is_readable() => self.read_ready(token),
            ConnState::Writing if event.is_writable() => self.write_ready(token),
            // DISPATCHED connections hold no poll interest; anything else is
            // a stale event for a state that no longer wants it
            _ => {}
        }
    }

    fn read_ready(&mut self, token: Token) {
        let outcome = match self.conns.get_mut(&token) {
            Some(conn) => {
                conn.last_activity = Instant::now();
                Self::fill_parser(conn)
            }
            None => return,
        };

        match outcome {
            ReadOutcome::NeedMore => {}
            ReadOutcome::Complete => self.on_request(token),
            ReadOutcome::PeerClosed | ReadOutcome::Broken => self.close(token),
            ReadOutcome::Failed(kind) => self.reject(token, kind),
        }
    }

    fn fill_parser(conn: &mut Conn) -> ReadOutcome {
        loop {
            let span = conn.parser.buffer();
            if span.is_empty() {
                return ReadOutcome::Failed(ErrorKind::BodyTooLarge);
            }

            match conn.stream.read(span) {
                Ok(0) => return ReadOutcome::PeerClosed,
                Ok(n) => conn.parser.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return ReadOutcome::Broken,
            }
        }

        match conn.parser.eof() {
            Ok(true) => ReadOutcome::Complete,
            Ok(false) => ReadOutcome::NeedMore,
            Err(kind) => ReadOutcome::Failed(kind),
        }
    }

    /// A full request is buffered: park the connection and route it.
    fn on_request(&mut self, token: Token) {
        let request = {
            let Some(conn) = self.conns.get_mut(&token) else {
                return;
            };

            match conn.parser.finalize(conn.peer) {
                Ok(request) => {
                    conn.state = ConnState::Dispatched;
                    request
                }
                Err(kind) => return self.reject(token, kind),
            }
        };

        self.shared.metrics.request_seen();

        // parked: no poll interest until a response is attached
        if let Some(conn) = self.conns.get_mut(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }

        if !self.shared.cors.permits(request.origin()) {
            debug!(origin = ?request.origin(), "origin refused");
            return self.attach(
                token,
                Response::error(StatusCode::Forbidden, "CORS origin not allowed"),
            );
        }

        if request.method() == Method::Options {
            // scoped to the endpoint this path actually serves; built-in and
            // unknown paths advertise only OPTIONS
            let allowed = self
                .shared
                .router
                .find(request.path())
                .map(|endpoint| endpoint.method);

            let mut resp = Response::preflight(allowed);
            if let Some(origin) = request.origin() {
                resp.allow_origin(origin);
            }
            return self.attach(token, resp);
        }

        if let Some(mut resp) = self.internal(&request) {
            if let Some(origin) = request.origin() {
                resp.allow_origin(origin);
            }
            return self.attach(token, resp);
        }

        if self.shared.router.find(request.path()).is_none() {
            let mut resp = Response::error(StatusCode::NotFound, "Not Found");
            if let Some(origin) = request.origin() {
                resp.allow_origin(origin);
            }
            return self.attach(token, resp);
        }

        self.dispatch(token, request);
    }

    /// Built-in endpoints served without a worker-pool round trip.
    fn internal(&self, req: &Request) -> Option<Response> {
        let resp = match req.path() {
            "/ping" => {
                let mut resp = Response::new();
                resp.status(StatusCode::Ok).body(r#"{"status":"OK"}"#);
                resp
            }
            "/metrics" => self.guarded(req, || {
                let mut resp = Response::new();
                resp.status(StatusCode::Ok).body(self.shared.metrics.to_json());
                resp
            }),
            "/metricsp" => self.guarded(req, || {
                let mut resp = Response::new();
                resp.status(StatusCode::Ok)
                    .header("content-type", "text/plain; version=0.0.4")
                    .body(self.shared.metrics.to_prometheus());
                resp
            }),
            "/version" => self.guarded(req, || {
                let mut resp = Response::new();
                resp.status(StatusCode::Ok).json(&serde_json::json!({
                    "pod_name": self.shared.pod_name,
                    "version": env!("CARGO_PKG_VERSION"),
                }));
                resp
            }),
            _ => return None,
        };

        Some(resp)
    }

    fn guarded(&self, req: &Request, build: impl FnOnce() -> Response) -> Response {
        match &self.shared.api_key {
            Some(key) if req.bearer_token() != Some(key.as_str()) => {
                Response::error(StatusCode::Unauthorized, "Invalid or missing token")
            }
            _ => build(),
        }
    }

    // Dispatch protocol

    fn dispatch(&mut self, token: Token, request: Request) {
        let request = Arc::new(request);

        self.shared.metrics.task_queued();
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let task: Task = {
            let shared = Arc::clone(&self.shared);
            let responses = Arc::clone(&self.responses);
            let waker = Arc::clone(&self.waker);
            let in_flight = Arc::clone(&self.in_flight);
            let request = Arc::clone(&request);

            Box::new(move || {
                let resp = execute(&shared, &request);
                if responses.push((token, resp)).is_err() {
                    // nobody will ever pop this request; keep the drain
                    // accounting truthful and let the sweep reap the fd
                    warn!(id = %request.request_id(), "response queue refused, dropping");
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                let _ = waker.wake();
            })
        };

        if self.pool.push_task(task).is_err() {
            self.shared.metrics.task_refused();
            debug!(worker = self.id, "task queue full, shedding");

            let resp = Response::raw(ErrorKind::Overloaded.as_http());
            if self.responses.push((token, resp)).is_err() {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.close(token);
            }
        }
    }

    fn drain_responses(&mut self) {
        let mut batch = Vec::new();
        self.responses.drain_into(&mut batch);

        for (token, resp) in batch {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.conns.contains_key(&token) {
                self.attach(token, resp);
            } else {
                trace!(worker = self.id, "response for a closed connection dropped");
            }
        }
    }

    // Write path

    /// Seals `resp` onto the connection and arms the write side. Also used
    /// for responses synthesized on the I/O thread itself.
    fn attach(&mut self, token: Token, mut resp: Response) {
        {
            let Some(conn) = self.conns.get_mut(&token) else {
                return;
            };

            resp.seal();
            conn.pending = Some(resp);
            conn.state = ConnState::Writing;
            conn.last_activity = Instant::now();

            let registry = self.poll.registry();
            let _ = registry.deregister(&mut conn.stream);
            if registry
                .register(&mut conn.stream, token, Interest::WRITABLE)
                .is_err()
            {
                return self.close(token);
            }
        }

        // the socket is almost always writable right now; skip one poll round
        self.write_ready(token);
    }

    fn write_ready(&mut self, token: Token) {
        let outcome = match self.conns.get_mut(&token) {
            Some(conn) => {
                conn.last_activity = Instant::now();
                match Self::flush_pending(conn) {
                    Some(outcome) => outcome,
                    None => return,
                }
            }
            None => return,
        };

        match outcome {
            WriteOutcome::Again => {}
            WriteOutcome::Broken => self.close(token),
            WriteOutcome::Done { keep_alive: false } => self.close(token),
            WriteOutcome::Done { keep_alive: true } => self.rearm_for_read(token),
        }
    }

    fn flush_pending(conn: &mut Conn) -> Option<WriteOutcome> {
        let resp = conn.pending.as_mut()?;

        loop {
            let remaining = resp.remaining();
            if remaining.is_empty() {
                return Some(WriteOutcome::Done {
                    keep_alive: resp.is_keep_alive(),
                });
            }

            match conn.stream.write(remaining) {
                Ok(0) => return Some(WriteOutcome::Broken),
                Ok(n) => resp.advance_cursor(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Some(WriteOutcome::Again)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Some(WriteOutcome::Broken),
            }
        }
    }

    /// WRITING → READING reset. Responses carry `Connection: close`, so this
    /// path only runs when one explicitly opted into keep-alive.
    fn rearm_for_read(&mut self, token: Token) {
        let Some(conn) = self.conns.get_mut(&token) else {
            return;
        };

        conn.pending = None;
        conn.parser.reset();
        conn.state = ConnState::Reading;
        conn.last_activity = Instant::now();

        let registry = self.poll.registry();
        let _ = registry.deregister(&mut conn.stream);
        if registry
            .register(&mut conn.stream, token, Interest::READABLE)
            .is_err()
        {
            self.close(token);
        }
    }

    // Cleanup

    fn reject(&mut self, token: Token, kind: ErrorKind) {
        debug!(worker = self.id, %kind, "rejecting request");

        if let Some(conn) = self.conns.get_mut(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }
        self.attach(token, Response::raw(kind.as_http()));
    }

    fn close(&mut self, token: Token) {
        if let Some(mut conn) = self.conns.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            self.shared.metrics.connection_closed();
        }
    }

    /// Once per second: reap connections idle past the read timeout.
    fn sweep(&mut self) {
        let timeout = self.shared.read_timeout;
        let expired: Vec<Token> = self
            .conns
            .iter()
            .filter(|(_, conn)| conn.last_activity.elapsed() > timeout)
            .map(|(token, _)| *token)
            .collect();

        for token in expired {
            debug!(worker = self.id, "closing idle connection");
            self.close(token);
        }
    }

    /// Post-shutdown: stop accepting, keep flushing until every in-flight
    /// request has left through the response queue and its bytes are on the
    /// wire (or its peer went away and the sweep reaped it).
    fn drain(&mut self) {
        debug!(worker = self.id, "draining");
        let _ = self.poll.registry().deregister(&mut self.listener);

        let mut events = Events::with_capacity(256);
        let mut last_sweep = Instant::now();

        while self.in_flight.load(Ordering::SeqCst) != 0
            || self.responses.len() != 0
            || self.has_pending_writes()
        {
            match self.poll.poll(&mut events, Some(DRAIN_POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }

            for event in events.iter() {
                let token = event.token();
                if token == LISTENER || token == WAKER {
                    continue;
                }

                if event.is_error() || event.is_read_closed() {
                    self.close(token);
                } else if event.is_writable() {
                    self.write_ready(token);
                }
            }

            self.drain_responses();

            if last_sweep.elapsed() >= SWEEP_INTERVAL {
                self.sweep();
                last_sweep = Instant::now();
            }
        }

        let leftover: Vec<Token> = self.conns.keys().copied().collect();
        for token in leftover {
            self.close(token);
        }
    }

    fn has_pending_writes(&self) -> bool {
        self.conns
            .values()
            .any(|conn| conn.pending.as_ref().is_some_and(|resp| !resp.is_done()))
    }
}

// Worker-thread half of the dispatch protocol.

/// Runs the full per-request pipeline and produces a sealed response.
///
/// Lives on a worker thread; everything it touches in `shared` is read-only.
pub(crate) fn execute(shared: &Shared, req: &Request) -> Response {
    let span = info_span!("request", id = %req.request_id(), path = %req.path());
    let _guard = span.enter();

    shared.metrics.task_started();
    let started = Instant::now();

    let mut resp = pipeline(shared, req);

    if let Some(origin) = req.origin() {
        if shared.cors.permits(Some(origin)) {
            resp.allow_origin(origin);
        }
    }
    resp.seal();

    shared.metrics.task_finished(started.elapsed());
    resp
}

/// Method check → secure check → validator → handler, first failure wins.
fn pipeline(shared: &Shared, req: &Request) -> Response {
    let Some(endpoint) = shared.router.find(req.path()) else {
        return Response::error(StatusCode::NotFound, "Not Found");
    };

    if endpoint.method != req.method() {
        let mut resp = Response::error(StatusCode::MethodNotAllowed, "Method Not Allowed");
        resp.header("allow", endpoint.method.as_str());
        return resp;
    }

    if endpoint.is_secure {
        let verified = req
            .bearer_token()
            .ok_or(crate::jwt::JwtError::BadFormat)
            .and_then(|token| shared.jwt.verify(token));

        if let Err(e) = verified {
            debug!(error = %e, "token refused");
            return Response::error(StatusCode::Unauthorized, "Invalid or missing token");
        }
    }

    if let Err(message) = endpoint.validator.validate(req) {
        return Response::error(StatusCode::BadRequest, message);
    }

    let mut resp = Response::new();
    match endpoint.handler.handle(req, &mut resp) {
        Ok(()) => resp,
        Err(e) => {
            error!(error = %e, "handler failed");
            Response::error(StatusCode::InternalServerError, "Internal Server Error")
        }
    }
}
