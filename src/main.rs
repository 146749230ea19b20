//! diam-bench: a Diameter load generator
//!
//! Modes:
//! - `client`: send one Credit-Control-Request and wait for the answer
//! - `bench`: open many connections, stream Accounting-Requests on each
//!   and report aggregate throughput
//! - `serve`: answer every request, as the far end of a benchmark
//!
//! Configuration via CLI arguments or TOML file.

mod bench;
mod client;
mod completion;
mod config;
mod diameter;
mod error;
mod error_sink;
mod factory;
mod identity;
mod mux;
mod server;
mod transport;

use std::sync::Arc;

use bench::{run_benchmark, BenchOptions};
use completion::{completion_queue, run_completion};
use config::{Config, Mode};
use identity::Identity;
use mux::Mux;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use transport::TcpDialer;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        mode = ?config.mode,
        addr = %config.addr,
        host = %config.host,
        realm = %config.realm,
        "Starting diam-bench"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async move {
        match config.mode {
            Mode::Client => run_client(config).await,
            Mode::Bench => run_bench(config).await,
            Mode::Serve => run_serve(config).await,
        }
    });

    if let Err(ref e) = result {
        error!(error = %e, "Run failed");
    }
    result
}

/// Send one CCR and wait for its CCA.
async fn run_client(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let identity = Arc::new(Identity::from_config(&config));
    let (tracker, _completions) = completion_queue(1);
    let (done, completed) = run_completion();
    let (reporter, sink) = error_sink::error_stream(error_sink::DEFAULT_CAPACITY);
    let _errors = sink.spawn();

    let dialer = TcpDialer::new(
        config.addr.clone(),
        Arc::clone(&identity),
        Arc::new(Mux::standard(tracker, done)),
        reporter,
        config.handshake_timeout,
    );

    client::run_single_exchange(&dialer, identity, completed, config.answer_timeout).await?;
    Ok(())
}

/// Benchmark the peer with ACRs.
async fn run_bench(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let options = BenchOptions {
        connections: config.bench_clients,
        messages: config.bench_msgs,
        signal_timeout: config.signal_timeout,
    };

    let identity = Arc::new(Identity::from_config(&config));
    let (tracker, mut completions) = completion_queue(options.expected_completions());
    let (done, _completed) = run_completion();
    let (reporter, sink) = error_sink::error_stream(error_sink::DEFAULT_CAPACITY);
    let _errors = sink.spawn();

    let dialer = TcpDialer::new(
        config.addr.clone(),
        Arc::clone(&identity),
        Arc::new(Mux::standard(tracker, done)),
        reporter,
        config.handshake_timeout,
    );

    let report = run_benchmark(&dialer, identity, options, &mut completions).await?;
    info!(
        clients = report.connections,
        messages = report.messages_per_connection,
        rate = report.rate(),
        "{}",
        report
    );
    Ok(())
}

/// Answer requests until interrupted.
async fn run_serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let identity = Arc::new(Identity::from_config(&config));
    let server = server::Server::bind(&config.listen, identity).await?;
    server.run().await.map_err(|e| e as Box<dyn std::error::Error>)
}
