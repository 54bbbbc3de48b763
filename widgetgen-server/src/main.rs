//! Widget server - HTTP/SSE front end for widget generation.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use widgetgen::io::agent::{Agent, CliAgent};
use widgetgen::io::config::{DEFAULT_CONFIG_FILE, load_config};
use widgetgen::logging;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "widgetgen-server")]
#[command(about = "HTTP/SSE server for question-to-widget generation")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Config file (TOML). Missing file means defaults.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = load_config(&args.config)?;
    logging::init("warn,widgetgen=info,widgetgen_server=info", cfg.debug);

    let agent: Arc<dyn Agent> = Arc::new(CliAgent::from_config(&cfg.agent, cfg.debug));
    let state = AppState::from_config(agent, &cfg)?;
    info!(
        model = %cfg.model,
        sweep_interval_secs = cfg.rate_limit.sweep_interval_secs,
        "starting widgetgen-server"
    );
    state.start_sweeper();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
