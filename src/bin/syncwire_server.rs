use std::{error::Error, net::SocketAddr, sync::atomic::Ordering, time::Duration};

use clap::Parser;
use log::info;
use syncwire::{binding::SyncServer, config::ServerConfig};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for new connections at address
    address: SocketAddr,
    /// Connections served at the same time
    #[arg(long, default_value_t = 8)]
    workers: usize,
    /// Per-connection buffer size in bytes
    #[arg(long, default_value_t = syncwire::config::DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,
    /// Largest frame accepted, in bytes
    #[arg(long, default_value_t = syncwire::protocol::DEFAULT_MAX_FRAME)]
    max_frame: usize,
    /// Drop connections idle for this many seconds (0 waits forever)
    #[arg(long, default_value_t = 300)]
    read_timeout_secs: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ServerConfig {
        workers: cli.workers,
        buffer_size: cli.buffer_size,
        max_frame: cli.max_frame,
        read_timeout: (cli.read_timeout_secs > 0)
            .then(|| Duration::from_secs(cli.read_timeout_secs)),
    };

    let server = SyncServer::bind(cli.address, config)?;
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("received interrupt");
        shutdown.store(true, Ordering::SeqCst);
    })?;

    server.listen()?;
    Ok(())
}
