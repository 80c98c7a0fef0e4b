use clap::Parser;
use env_logger::Env;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use server::transport::UdpTransport;
use std::path::PathBuf;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, starts the server and ticks it until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "9002")]
        port: u16,
        /// Tick rate (updates per second)
        #[clap(short, long, default_value = "30")]
        tick_rate: u32,
        /// Account record file
        #[clap(short, long, default_value = "Accounts.txt")]
        accounts: PathBuf,
        /// Maximum number of live connections
        #[clap(short, long, default_value = "1000")]
        max_connections: usize,
        /// Seconds of silence before a client is dropped
        #[clap(long, default_value = "5")]
        timeout_secs: u64,
    }

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        tick_rate: args.tick_rate,
        accounts_path: args.accounts,
        max_connections: args.max_connections,
        connection_timeout: Duration::from_secs(args.timeout_secs),
    };

    let transport = UdpTransport::new(config.connection_timeout);
    let mut server = match Server::start(transport, &config) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };
    info!(
        "Accounts stored in {}, {} ticks per second",
        config.accounts_path.display(),
        config.tick_rate
    );

    // Handle shutdown gracefully
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            } else {
                info!("Received Ctrl+C, shutting down gracefully...");
            }
        })
        .await;

    server.stop();
    Ok(())
}
