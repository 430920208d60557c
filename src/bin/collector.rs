use apm_collector::{
    collector::Collector,
    config::{Config, read_config_file},
};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (defaults apply when omitted)
    #[arg(short)]
    file: Option<String>,

    /// Log level for the collector
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("apm_collector", level),
        ("tower_http", level),
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
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    };

    let collector = Collector::bootstrap(&config).await?;

    #[cfg(feature = "api")]
    {
        if let Some(api) = &config.api {
            let state = apm_collector::api::ApiState::from_collector(&collector);
            apm_collector::api::spawn_api_server(api.bind_addr, state).await?;
        }
    }

    info!("collector running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    collector.shutdown().await?;
    Ok(())
}
