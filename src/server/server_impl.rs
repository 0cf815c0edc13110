//! Server façade.
//!
//! Builds the shared read-only state, binds `K` listening sockets to the
//! same port (kernel-balanced via port reuse), spawns one I/O worker thread
//! per socket and hands back a [`ServerHandle`]. [`Server::run`] additionally
//! parks the calling thread on a signal-fd wait for SIGINT/SIGTERM and
//! shuts down in order: flag, wake, join.

use crate::{
    config::Config,
    cors::CorsPolicy,
    errors::ServerError,
    jwt::JwtService,
    metrics::Metrics,
    router::Router,
    server::{
        io_worker::{IoWorker, Shared},
        worker_pool::WorkerPool,
    },
};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};
use tracing::info;

pub struct Server {
    config: Config,
    shared: Arc<Shared>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            config: None,
            router: None,
        }
    }

    /// Binds the listeners, spawns the I/O workers and returns immediately.
    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        let cfg = &self.config;
        let shutdown = Arc::new(AtomicBool::new(false));
        let metrics = Arc::clone(&self.shared.metrics);

        let threads_per_pool = (cfg.pool_size / cfg.io_threads).max(1);
        let mut port = cfg.port;

        let mut wakers = Vec::with_capacity(cfg.io_threads);
        let mut joins = Vec::with_capacity(cfg.io_threads);

        for id in 0..cfg.io_threads {
            let listener = bind_listener(port)?;
            if port == 0 {
                // first bind resolved the ephemeral port; siblings share it
                port = listener.local_addr().map_err(ServerError::Poll)?.port();
            }

            let pool = WorkerPool::start(&format!("io{id}"), threads_per_pool, cfg.queue_capacity)
                .map_err(ServerError::Poll)?;

            let (worker, waker) = IoWorker::new(
                id,
                listener,
                pool,
                cfg.queue_capacity * 2,
                Arc::clone(&self.shared),
                Arc::clone(&shutdown),
            )
            .map_err(ServerError::Poll)?;

            wakers.push(waker);
            joins.push(
                thread::Builder::new()
                    .name(format!("io-{id}"))
                    .spawn(move || worker.run())
                    .map_err(ServerError::Poll)?,
            );
        }

        info!(
            port,
            io_workers = cfg.io_threads,
            threads_per_pool,
            queue_capacity = cfg.queue_capacity,
            "listening"
        );

        Ok(ServerHandle {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            shutdown,
            wakers,
            joins,
            metrics,
        })
    }

    /// Spawns the workers, then blocks reading the signal fd until SIGINT or
    /// SIGTERM arrives and drains everything before returning.
    pub fn run(self) -> Result<(), ServerError> {
        let handle = self.spawn()?;

        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(ServerError::Poll)?;
        if let Some(signal) = signals.forever().next() {
            info!(signal, "shutdown requested");
        }

        handle.shutdown();
        Ok(())
    }
}

pub struct ServerBuilder {
    config: Option<Config>,
    router: Option<Router>,
}

impl ServerBuilder {
    #[inline(always)]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Optional; a server without registrations still serves the built-in
    /// endpoints.
    #[inline(always)]
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// # Panics
    ///
    /// Panics when [`config`](Self::config) was not called.
    #[track_caller]
    pub fn build(self) -> Server {
        let config = self.config.expect("The `config` method must be called to create");
        let router = self.router.unwrap_or_default();

        let shared = Arc::new(Shared {
            router,
            cors: CorsPolicy::from_csv(&config.cors_origins),
            jwt: JwtService::new(&config.jwt_secret, config.jwt_timeout_seconds),
            metrics: Arc::new(Metrics::new()),
            api_key: config.api_key.clone(),
            pod_name: config.pod_name.clone(),
            read_timeout: config.read_timeout,
            max_request_size: config.max_request_size,
        });

        Server { config, shared }
    }
}

/// Running server: the resolved address plus everything needed to stop it.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    wakers: Vec<Arc<mio::Waker>>,
    joins: Vec<JoinHandle<()>>,
    metrics: Arc<Metrics>,
}

impl ServerHandle {
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    #[inline]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Sets the shutdown flag, wakes every event loop, and joins the I/O
    /// workers in order. Returns once every in-flight request has drained.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for waker in &self.wakers {
            let _ = waker.wake();
        }
        for join in self.joins {
            let _ = join.join();
        }
        info!("all I/O workers joined");
    }
}

/// One listening socket per I/O worker: address+port reuse lets every worker
/// bind the same port and the kernel balance accepts between them.
fn bind_listener(port: u16) -> Result<mio::net::TcpListener, ServerError> {
    let bind_err = |source: std::io::Error| ServerError::Bind { port, source };
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_reuse_port(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(1024).map_err(bind_err)?;

    Ok(mio::net::TcpListener::from_std(socket.into()))
}
