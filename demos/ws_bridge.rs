//! Broadcast the default input device to WebSocket subscribers
//!
//! Run with: cargo run --example ws_bridge --features device [BIND_ADDR]
//!
//! The device's preferred channel count (mono or stereo) and default sample
//! rate are used. Set `announce_params` so clients learn them on connect.

use std::net::SocketAddr;

use audio_bridge::server::config::DEFAULT_PORT;
use audio_bridge::{AudioBridge, BridgeConfig, BridgeState, CpalSource, ServerConfig, WsAcceptor};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr: SocketAddr = match std::env::args().nth(1) {
        Some(arg) => arg.replace("localhost", "127.0.0.1").parse()?,
        None => SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("audio_bridge=info".parse()?)
                .add_directive("ws_bridge=info".parse()?),
        )
        .init();

    let params = CpalSource::preferred_params()?;
    println!(
        "Capturing {} channel(s) at {} Hz, serving ws://{}",
        params.channels, params.sample_rate, bind_addr
    );

    let acceptor = WsAcceptor::new(ServerConfig::with_addr(bind_addr).announce_params(true));
    let mut bridge =
        AudioBridge::new(BridgeConfig::default(), CpalSource::new()).with_acceptor(acceptor);
    let mut states = bridge.state_changes();

    bridge.start(params.channels, params.sample_rate).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
        _ = states.wait_for(|s| *s == BridgeState::Idle) => {
            eprintln!("Capture ended: {:?}", bridge.last_error());
        }
    }

    bridge.stop().await;
    Ok(())
}
