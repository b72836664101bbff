use clap::Parser;
use clap_derive::Parser;
use mcpe_raknet::client::Client;
use mcpe_raknet::transport::config::RakNetConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, Level};

#[derive(Parser)]
struct Args {
    server_address: String,

    #[clap(long, default_value = "Client12")]
    username: String,

    /// sent as a chat message once spawned
    #[clap(long)]
    message: Option<String>,

    #[clap(long)]
    mtu: Option<u16>,

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

    let server_addr: SocketAddr = args.server_address.parse()?;
    let mut config = RakNetConfig::default_client();
    config.login.username = args.username;
    if let Some(mtu) = args.mtu {
        config.mtu_size = mtu;
    }

    let client = Client::connect(config, server_addr).await?;
    info!("connected to {:?} from {:?}", server_addr, client.local_addr());

    let mut state = client.subscribe();
    tokio::time::timeout(Duration::from_secs(30), state.wait_for(|s| s.spawned || s.disconnected)).await??;
    info!("received {} chunks", client.state().chunks.len());

    if let Some(message) = &args.message {
        client.send_chat(message).await?;
    }

    tokio::signal::ctrl_c().await?;
    client.disconnect().await;
    Ok(())
}
