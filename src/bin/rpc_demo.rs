//! Runs an rpc server and client in one process over the loopback transport.
//!
//! ```text
//! rpc-demo --requests 3 --think-time-ms 200
//! RUST_LOG=rendezvous_rpc=debug rpc-demo --config deployment.json
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use rendezvous_rpc::agent::AgentRunner;
use rendezvous_rpc::client::ClientAgent;
use rendezvous_rpc::config::DeploymentConfig;
use rendezvous_rpc::idle::BackoffIdleStrategy;
use rendezvous_rpc::server::ServerAgent;
use rendezvous_rpc::shutdown::{ClosedFlag, ShutdownCoordinator};
use rendezvous_rpc::transport::LoopbackTransport;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "rpc-demo")]
#[command(about = "Rendezvous request/response demo over an in-process transport", long_about = None)]
struct Args {
    /// JSON file with `client` and `server` sections
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many responses (runs until Ctrl-C when omitted)
    #[arg(short = 'n', long)]
    requests: Option<u64>,

    /// Delay before each request, overriding the config file
    #[arg(long)]
    think_time_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = match &args.config {
        Some(path) => DeploymentConfig::from_json_file(path)?,
        None => DeploymentConfig::default(),
    };
    if let Some(ms) = args.think_time_ms {
        config.client.think_time = Duration::from_millis(ms);
    }

    let transport = LoopbackTransport::new();

    let server_closed = ClosedFlag::new();
    let server = ServerAgent::new(transport.clone(), &config.server, server_closed.clone())?;
    let server = AgentRunner::new(
        server,
        BackoffIdleStrategy::with_config(config.server.idle),
        server_closed,
    )
    .start();

    let (tx, mut responses) = tokio::sync::mpsc::unbounded_channel();
    let client_closed = ClosedFlag::new();
    let client = ClientAgent::new(&transport, &config.client, client_closed.clone())?
        .with_response_sink(tx);
    let client = AgentRunner::new(
        client,
        BackoffIdleStrategy::with_config(config.client.idle),
        client_closed,
    )
    .start();

    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register("close rpc client", 0, async move {
        if let Some(client) = client.close().await {
            tracing::info!("client received {} responses", client.responses_received());
        }
    });
    coordinator.register("close rpc server", 10, async move {
        if let Some(server) = server.close().await {
            tracing::info!("server answered {} requests", server.dispatcher().requests_served());
        }
    });

    let trigger = coordinator.trigger();
    let limit = args.requests;
    tokio::spawn(async move {
        let mut seen = 0;
        while let Some(response) = responses.recv().await {
            seen += 1;
            tracing::debug!("response {} of {:?}: {}", seen, limit, response.res);
            if limit.is_some_and(|n| seen >= n) {
                break;
            }
        }
        trigger.signal();
    });

    coordinator.wait_for_signal().await;
    let completed = coordinator.run().await;
    tracing::info!("process exiting, {} shutdown hooks completed", completed.len());
    Ok(())
}
