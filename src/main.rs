//! Portscope - serial-line terminal and debugger
//!
//! Opens a serial port, prints inbound traffic as text (two-byte decode
//! windows) or hex, and forwards stdin lines, a fixed payload on a timer,
//! or a whole file out over the wire.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use portscope::{codec, AppConfig, SerialSession, SessionEvent, TextEncoding};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Portscope CLI
#[derive(Parser, Debug)]
#[command(
    name = "portscope",
    version,
    about = "Serial-line terminal and debugger",
    long_about = None
)]
struct Cli {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts,

    /// Open a serial session and bridge it to the terminal
    Open(OpenArgs),
}

#[derive(Args, Debug)]
struct OpenArgs {
    /// Serial port name (e.g., COM3, /dev/ttyUSB0)
    port: String,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data bits (5-8)
    #[arg(long)]
    data_bits: Option<u8>,

    /// Stop bits (1, 2)
    #[arg(long)]
    stop_bits: Option<u8>,

    /// Parity (none, odd, even)
    #[arg(long)]
    parity: Option<String>,

    /// Text encoding (gbk, utf8, latin1)
    #[arg(long)]
    encoding: Option<String>,

    /// Render inbound bytes as hex
    #[arg(long)]
    hex_display: bool,

    /// Transmit byte-by-byte with per-byte progress
    #[arg(long)]
    hex_send: bool,

    /// Payload to retransmit on a timer
    #[arg(long)]
    auto_send: Option<String>,

    /// Auto-send interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Transmit a text file after opening
    #[arg(long)]
    send_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match cli.command {
        Commands::ListPorts => list_ports(),
        Commands::Open(args) => run_session(args).await,
    }
}

fn list_ports() -> anyhow::Result<()> {
    let ports = portscope::list_ports().context("enumerating serial ports")?;
    if ports.is_empty() {
        println!("no serial ports found");
    } else {
        for name in ports {
            println!("{name}");
        }
    }
    Ok(())
}

async fn run_session(args: OpenArgs) -> anyhow::Result<()> {
    let defaults = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not load settings, using defaults");
        AppConfig::default()
    });

    let mut config = defaults.port_config(&args.port);
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if let Some(bits) = args.data_bits {
        config.data_bits = bits;
    }
    if let Some(bits) = args.stop_bits {
        config.stop_bits = bits;
    }
    if let Some(parity) = args.parity.as_deref() {
        config.parity = parity.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    }
    if let Some(encoding) = args.encoding.as_deref() {
        config.encoding = encoding.parse()?;
    }

    let encoding = config.encoding;
    let hex_display = args.hex_display || defaults.hex_display;
    let hex_send = args.hex_send || defaults.send.hex_send;
    let interval = Duration::from_millis(
        args.interval_ms
            .unwrap_or(defaults.send.auto_send_interval_ms),
    );

    let session = SerialSession::new();
    session
        .open(config)
        .await
        .with_context(|| format!("opening {}", args.port))?;
    tracing::info!(port = %args.port, "session open, Ctrl-C to quit");

    let events = session.subscribe();
    let display = tokio::spawn(render_events(events, encoding, hex_display));

    if let Some(path) = args.send_file.as_deref() {
        let sent = session
            .send_file(path)
            .await
            .with_context(|| format!("sending {}", path.display()))?;
        tracing::info!(bytes = sent, file = %path.display(), "file transmitted");
    }

    if let Some(payload) = args.auto_send.as_deref() {
        session
            .start_auto_send(payload, hex_send, interval)
            .await
            .context("starting auto-send")?;
        tracing::info!(?interval, "auto-send running");
    }

    // Forward stdin lines until EOF or Ctrl-C.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = session.send(&format!("{line}\n"), hex_send).await {
                        tracing::error!(error = %e, "send failed");
                    }
                }
                None => break,
            },
        }
    }

    session.close().await;
    drop(session);

    let total = display.await.unwrap_or(0);
    println!();
    tracing::info!(total_bytes_sent = total, "session finished");
    Ok(())
}

/// Render inbound bytes as they arrive. Text mode accumulates two-byte
/// windows before decoding, the way the classic debugger display did; a
/// pair that does not decode shows a replacement glyph.
async fn render_events(
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
    encoding: TextEncoding,
    hex_display: bool,
) -> u64 {
    use std::io::Write;

    let mut window: Vec<u8> = Vec::with_capacity(2);
    let mut total: u64 = 0;

    while let Ok(event) = events.recv().await {
        match event {
            SessionEvent::InboundByte(byte) => {
                if hex_display {
                    print!("{} ", codec::to_hex(byte));
                } else {
                    window.push(byte);
                    if window.len() == 2 {
                        match codec::decode_pair(window[0], window[1], encoding) {
                            Ok(text) => print!("{text}"),
                            Err(_) => print!("\u{FFFD}"),
                        }
                        window.clear();
                    }
                }
                let _ = std::io::stdout().flush();
            }
            SessionEvent::BytesSent(count) => {
                total += count;
                tracing::debug!(total, "bytes sent");
            }
            SessionEvent::Line(event) => {
                tracing::info!(%event, "line event");
            }
        }
    }
    total
}
