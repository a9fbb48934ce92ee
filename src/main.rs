//! Table Broker - Main entry point.
//!
//! Reads bridge calls as JSON lines on stdin and writes response envelopes
//! as JSON lines on stdout, backed by a SQLite table store.

use clap::Parser;
use std::sync::Arc;
use table_broker::config::Config;
use table_broker::db::SqliteDatabaseService;
use table_broker::executor::Broker;
use table_broker::host::LocalHost;
use table_broker::transport::{StdioTransport, Transport};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs always go to stderr; stdout carries envelopes.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    if let Err(message) = config.validate() {
        eprintln!("Error: {}", message);
        eprintln!();
        eprintln!("Usage: table-broker --database sqlite:<path> [--queue-order lifo|fifo]");
        std::process::exit(1);
    }

    info!(
        app_name = %config.app_name,
        queue_order = %config.queue_order,
        "Starting table broker v{}",
        env!("CARGO_PKG_VERSION")
    );

    let service =
        SqliteDatabaseService::connect(&config.database, &config.service_options()).await?;
    let service = Arc::new(service);

    let (outbound, envelopes) = mpsc::unbounded_channel();
    let host = Arc::new(LocalHost::with_outbound(config.app_name.clone(), outbound));
    host.bind(service.clone());

    let broker = Broker::start(host.clone(), config.settings());
    broker.watch_availability();

    let transport = StdioTransport::new(broker, envelopes);
    info!(transport = transport.name(), "Using stdio transport");
    let result = transport.run().await;

    host.unbind();
    service.close().await;

    if let Err(e) = result {
        error!(error = %e, "Broker error");
        return Err(e.into());
    }

    info!("Broker shutdown complete");
    Ok(())
}
