use clap::Parser;
use client::driver::{ClientLoop, LoopState, TickOutcome, TickPacer};
use client::input::InputManager;
use client::network::UdpTransport;
use client::rendering::{HudState, Renderer};
use log::{error, info};
use macroquad::prelude::{next_frame, Conf};
use shared::ClientConfig;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name to join the world under
    name: String,

    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Display ticks per second
    #[arg(long, default_value = "10")]
    display_rate_hz: u32,

    /// Push a move once every K display ticks
    #[arg(short = 'k', long, default_value = "3")]
    move_divisor_k: u32,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value = "80")]
    request_timeout_ms: u64,

    /// Consecutive timeouts before showing a connectivity warning
    #[arg(long, default_value = "10")]
    max_consecutive_timeouts: u32,

    /// Start with auto-move enabled
    #[arg(short = 'a', long)]
    auto_move: bool,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            display_rate_hz: self.display_rate_hz,
            move_divisor_k: self.move_divisor_k,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_consecutive_timeouts: self.max_consecutive_timeouts,
            auto_move_default: self.auto_move,
        }
    }
}

fn window_conf() -> Conf {
    Conf {
        window_title: "World Sync".to_owned(),
        window_width: 800,
        window_height: 624,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Client stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.client_config();
    config.validate()?;

    info!("Starting client...");
    info!("Connecting to: {} as {}", args.server, args.name);
    info!("Controls: arrows to move, A auto-move, C random color, Q quit");

    let transport = UdpTransport::connect(&args.server, config.request_timeout)?;
    let mut client = ClientLoop::new(transport, &args.name, config.clone());
    let mut input = InputManager::new();
    let mut renderer = Renderer::new();
    let mut pacer = TickPacer::new(config.tick_period(), Instant::now());

    // Frames run at the window's rate; the client loop ticks at the display rate
    loop {
        input.collect();

        if pacer.due(Instant::now()) {
            let events = input.drain();
            if client.tick(&events, &mut renderer)? == TickOutcome::Quit {
                break;
            }
        }

        let hud = HudState {
            name: args.name.clone(),
            auto_move: client.auto_move(),
            connected: client.state() == LoopState::Active,
        };
        renderer.draw(client.bounds(), &hud);

        next_frame().await;
    }

    info!("Client shut down");
    Ok(())
}
