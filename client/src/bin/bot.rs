//! Headless client that joins and wanders with auto-move on
//!
//! Useful for populating a world without opening windows.

use clap::Parser;
use client::driver::{ClientLoop, InputSource};
use client::input::InputEvent;
use client::network::UdpTransport;
use client::rendering::Display;
use log::{debug, info};
use shared::{ClientConfig, EntityView};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless auto-moving client", long_about = None)]
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

    /// Leave after this many ticks instead of running until Ctrl-C
    #[arg(long)]
    ticks: Option<u64>,
}

/// Logs changes in how many entities are visible
struct LogDisplay {
    visible: usize,
}

impl Display for LogDisplay {
    fn display(&mut self, entities: &[EntityView]) {
        if entities.len() != self.visible {
            info!("{} entities visible", entities.len());
            self.visible = entities.len();
        }
        debug!("{:?}", entities);
    }
}

/// Quits on Ctrl-C or once the tick limit is used up
struct StopSignal {
    stop: Arc<AtomicBool>,
    remaining: Option<u64>,
}

impl InputSource for StopSignal {
    fn poll(&mut self) -> Vec<InputEvent> {
        if self.stop.load(Ordering::SeqCst) {
            return vec![InputEvent::Quit];
        }
        match self.remaining.as_mut() {
            Some(0) => vec![InputEvent::Quit],
            Some(remaining) => {
                *remaining -= 1;
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = ClientConfig {
        display_rate_hz: args.display_rate_hz,
        move_divisor_k: args.move_divisor_k,
        request_timeout: Duration::from_millis(args.request_timeout_ms),
        auto_move_default: true,
        ..ClientConfig::default()
    };
    config.validate()?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || handler_stop.store(true, Ordering::SeqCst))?;

    info!("Bot {} connecting to {}", args.name, args.server);
    let transport = UdpTransport::connect(&args.server, config.request_timeout)?;
    let mut client = ClientLoop::new(transport, &args.name, config);

    let mut display = LogDisplay { visible: 0 };
    let mut input = StopSignal {
        stop,
        remaining: args.ticks,
    };
    client.run_blocking(&mut display, &mut input)?;

    info!("Bot {} left", args.name);
    Ok(())
}
