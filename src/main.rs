use anvil_api::{Config, Router, Server};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    // business endpoints are registered by embedding the library; the bare
    // binary serves the built-ins (/ping, /metrics, /metricsp, /version)
    let router = Router::new();

    if let Err(e) = Server::builder().config(config).router(router).build().run() {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}
