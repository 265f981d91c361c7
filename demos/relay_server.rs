//! H.264 relay server example
//!
//! Run with: cargo run --example relay_server [LISTEN_ADDR] [INPUT|-] [WIDTH] [HEIGHT]
//!
//! Examples:
//!   cargo run --example relay_server     # 127.0.0.1:8000, stdin, 1280x720
//!   cargo run --example relay_server 0.0.0.0:8000 camera.h264 1920 1080
//!
//! ## Feeding a stream
//!
//! From a Raspberry Pi camera:
//!   raspivid -t 0 -w 1280 -h 720 -fps 30 -pf high -o - | cargo run --example relay_server
//!
//! With ffmpeg (baseline profile, no B-frames):
//!   ffmpeg -re -i input.mp4 -c:v libx264 -profile:v baseline -tune zerolatency \
//!     -bsf:v h264_mp4toannexb -an -f h264 - | cargo run --example relay_server
//!
//! ## Watching
//!
//! Open http://127.0.0.1:8000/ in a browser. The player attaches to
//! ws://127.0.0.1:8000/websocket and appends each segment to a
//! MediaSource buffer.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use mse_relay::hub::{Hub, HubConfig};
use mse_relay::server::DEFAULT_PORT;
use mse_relay::source::AnnexBSource;
use mse_relay::{RelayServer, ServerConfig};
use tokio::io::AsyncRead;

type Input = Box<dyn AsyncRead + Unpin + Send>;

struct Args {
    listen: SocketAddr,
    input: String,
    width: u16,
    height: u16,
}

fn parse_listen_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid listen address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn parse_dimension(arg: Option<&String>, default: u16, name: &str) -> Result<u16, String> {
    match arg {
        None => Ok(default),
        Some(s) => match s.parse::<u16>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(format!("Invalid {}: '{}'", name, s)),
        },
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let listen = match args.get(1) {
        Some(s) => parse_listen_addr(s)?,
        None => ServerConfig::default().bind_addr,
    };
    let input = args.get(2).cloned().unwrap_or_else(|| "-".to_string());
    let width = parse_dimension(args.get(3), 1280, "width")?;
    let height = parse_dimension(args.get(4), 720, "height")?;

    Ok(Args {
        listen,
        input,
        width,
        height,
    })
}

fn print_usage() {
    eprintln!("Usage: relay_server [LISTEN_ADDR] [INPUT|-] [WIDTH] [HEIGHT]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  LISTEN_ADDR  Address to listen on (default: 127.0.0.1:8000)");
    eprintln!("  INPUT        Annex B H.264 file, or - for stdin (default: -)");
    eprintln!("  WIDTH        Frame width in pixels (default: 1280)");
    eprintln!("  HEIGHT       Frame height in pixels (default: 720)");
}

async fn open_input(path: &str) -> std::io::Result<Input> {
    if path == "-" {
        Ok(Box::new(tokio::io::stdin()))
    } else {
        Ok(Box::new(tokio::fs::File::open(path).await?))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().collect();

    if argv.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Capture failures are fatal
    let input = open_input(&args.input).await?;
    let (stream, source) = AnnexBSource::open(input, args.width, args.height).await?;
    let codec = stream.avc.codec_string();

    let (hub, handle, frames) = Hub::new(HubConfig::default(), stream);
    let hub_task = tokio::spawn(hub.run());

    let source_task = tokio::spawn(async move {
        if let Err(e) = source.run(frames).await {
            tracing::error!(error = %e, "Capture source failed");
        }
    });

    let mut config = ServerConfig::with_addr(args.listen).write_timeout(Duration::from_secs(10));
    let assets = Path::new(env!("CARGO_MANIFEST_DIR")).join("static");
    if assets.is_dir() {
        config = config.static_dir(assets);
    }

    println!("Relaying {} on http://{}/", codec, config.bind_addr);

    let server = RelayServer::new(config, handle.clone());

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
            }
        }
        _ = hub_task => {
            println!("Stream ended");
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
    }

    source_task.abort();

    let stats = handle.stats();
    println!(
        "Stats: frames={} keyframes={} viewers={} dropped={}",
        stats.frames_received, stats.keyframes, stats.total_clients, stats.dropped_clients
    );

    Ok(())
}
