//! Broadcast a synthetic tone to WebSocket subscribers
//!
//! Run with: cargo run --example tone_bridge [BIND_ADDR] [FREQUENCY_HZ]
//!
//! Examples:
//!   cargo run --example tone_bridge                       # 440 Hz on 0.0.0.0:8080
//!   cargo run --example tone_bridge localhost:9000 220    # 220 Hz on 127.0.0.1:9000
//!
//! ## Listening
//!
//! Every binary message is one frame of interleaved little-endian f32
//! samples (stereo, 48 kHz). The first message is a JSON text message with
//! the session parameters.
//!
//! With websocat:
//!   websocat --binary ws://localhost:8080 | ffplay -f f32le -ar 48000 -ac 2 -

use std::net::SocketAddr;
use std::time::Duration;

use audio_bridge::server::config::DEFAULT_PORT;
use audio_bridge::{AudioBridge, BridgeConfig, ServerConfig, ToneSource, WsAcceptor};

const CHANNELS: u16 = 2;
const SAMPLE_RATE: u32 = 48000;

/// Accepts "localhost", "IP" or "IP:PORT"
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: tone_bridge [BIND_ADDR] [FREQUENCY_HZ]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR       Address to bind to (default: 0.0.0.0:{})", DEFAULT_PORT);
    eprintln!("  FREQUENCY_HZ    Tone frequency (default: 440)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let bind_addr = match args.get(1) {
        Some(arg) => parse_bind_addr(arg)?,
        None => SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
    };
    let frequency: f32 = match args.get(2) {
        Some(arg) => arg.parse()?,
        None => 440.0,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("audio_bridge=debug".parse()?)
                .add_directive("tone_bridge=debug".parse()?),
        )
        .init();

    let acceptor = WsAcceptor::new(ServerConfig::with_addr(bind_addr).announce_params(true));
    let source = ToneSource::new(frequency).amplitude(0.2);
    let mut bridge = AudioBridge::new(BridgeConfig::default(), source).with_acceptor(acceptor);

    bridge.start(CHANNELS, SAMPLE_RATE).await?;
    println!("Broadcasting {} Hz on ws://{}", frequency, bind_addr);
    println!("Press Ctrl+C to stop");

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = bridge.status();
                if let Some(stats) = status.stats {
                    println!(
                        "Stats: state={} subscribers={} captured={} broadcast={} unheard={} overflows={} rate={:.1}/s",
                        status.state,
                        status.subscriber_count,
                        stats.frames_captured,
                        stats.frames_broadcast,
                        stats.frames_unheard,
                        stats.handoff_overflows,
                        stats.capture_rate(),
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    bridge.stop().await;
    Ok(())
}
