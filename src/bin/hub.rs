use anyhow::Context;
use chainwatch::{
    Monitor,
    api::{ApiConfig, ApiState, spawn_api_server},
    config::read_config_file,
    util::{get_bind_addr, get_config_path},
};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (defaults to $CHAINWATCH_CONFIG, then chainwatch.json)
    #[arg(short, long)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("chainwatch", LevelFilter::TRACE),
        ("chainwatch_hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let path = args.file.unwrap_or_else(get_config_path);
    let config = read_config_file(&path)?;

    let mut api_config = ApiConfig::from(&config.api);
    if let Some(bind_addr) = get_bind_addr() {
        api_config.bind_addr = bind_addr;
    }

    let monitor = Monitor::new(config)
        .await
        .context("failed to set up monitor")?;
    let handles = monitor.start().context("failed to start pollers")?;

    let addr = spawn_api_server(api_config, ApiState::new(monitor)).await?;
    info!("chainwatch hub ready on {addr}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    handles.shutdown().await;

    Ok(())
}
