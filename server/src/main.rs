use clap::Parser;
use log::info;
use server::network::Server;
use shared::WorldConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// World width in cells
    #[arg(long, default_value_t = shared::DEFAULT_WORLD_WIDTH)]
    world_width: u32,

    /// World height in cells
    #[arg(long, default_value_t = shared::DEFAULT_WORLD_HEIGHT)]
    world_height: u32,

    /// Seconds of silence before a session expires
    #[arg(short = 't', long, default_value = "5")]
    session_timeout_s: f64,

    /// Milliseconds between expiry sweeps
    #[arg(long, default_value = "1000")]
    sweep_interval_ms: u64,

    /// Maximum number of concurrent sessions
    #[arg(short, long, default_value = "48")]
    max_sessions: usize,
}

impl Args {
    fn world_config(&self) -> Result<WorldConfig, Box<dyn std::error::Error>> {
        let session_timeout = Duration::try_from_secs_f64(self.session_timeout_s)?;
        Ok(WorldConfig {
            world_width: self.world_width,
            world_height: self.world_height,
            session_timeout,
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            max_sessions: self.max_sessions,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.world_config()?;
    let address = format!("{}:{}", args.host, args.port);

    let server = Server::bind(&address, config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
