use clap::Parser;
use clap_derive::Parser;
use mcpe_raknet::server::Server;
use mcpe_raknet::transport::config::RakNetConfig;
use mcpe_raknet::world::level_info::LevelInfo;
use mcpe_raknet::world::providers::{CachingWorldProvider, FlatlandWorldProvider};
use std::net::SocketAddr;
use tracing::{info, Level};

#[derive(Parser)]
struct Args {
    #[clap(default_value = "0.0.0.0:19132")]
    bind_address: String,

    #[clap(long, default_value = "MCPE;Minecraft Server;20;0.10.0;0;20")]
    server_name: String,

    #[clap(long, default_value_t = 0)]
    seed: i64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let bind_addr: SocketAddr = args.bind_address.parse()?;
    let mut config = RakNetConfig::default_server(bind_addr);
    config.server_name = args.server_name;

    let level_info = LevelInfo {
        level_name: "flat".to_string(),
        random_seed: args.seed,
        generator_name: "flat".to_string(),
        ..LevelInfo::default()
    };

    let server = Server::start(config, CachingWorldProvider::new(FlatlandWorldProvider), level_info).await?;
    info!("listening on {:?}, press Ctrl-C to stop", server.local_addr());

    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    Ok(())
}
