use std::env;
use std::process::ExitCode;

use hyper_epoll::{Config, Server};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match Config::from_args(env::args().skip(1)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Usage: hyper-epoll [host] [port]");
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut server = match Server::bind(config) {
        Ok(server) => server,
        Err(err) => {
            error!("setup failed: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match server.run() {
        Ok(signal) => {
            debug!("shut down by {}", signal);
            // Stopping on a signal still exits with status 1.
            ExitCode::from(1)
        }
        Err(err) => {
            error!("event loop failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
