use anyhow::Context;
use clap::{Parser, Subcommand};
use flightdeck::dispatch::{ROUTE_CHANNEL, ROUTE_FIRE_AND_FORGET};
use flightdeck::gateway::Frame;
use flightdeck::model::Timestamp;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const REQUEST_ID: &str = "1";

#[derive(Parser)]
#[command(name = "flightdeck")]
#[command(about = "Flightdeck gateway CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: FLIGHTDECK_CONFIG_PATH or ~/.flightdeck/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway (HTTP + WebSocket). The backend connection opens on the first request.
    Gateway {
        /// Config file path (default: FLIGHTDECK_CONFIG_PATH or ~/.flightdeck/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// WebSocket and HTTP port (default from config or 15152)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Send one request to a running gateway and print each reply element as a JSON line.
    /// For fireforget and channel, further payloads are read from stdin (one JSON value per line).
    Request {
        /// Config file path (default: FLIGHTDECK_CONFIG_PATH or ~/.flightdeck/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Route: reqresp, reqstream, fireforget, or channel.
        route: String,

        /// First payload as JSON. Defaults to the current time for reqresp and reqstream.
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("flightdeck {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Request { config, route, data }) => {
            if let Err(e) = run_request(config, route, data).await {
                eprintln!("request failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(flightdeck::config::default_config_path);
    let dir = flightdeck::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = flightdeck::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{} (config {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    flightdeck::gateway::run_gateway(config).await
}

async fn run_request(
    config_path: Option<std::path::PathBuf>,
    route: String,
    data: Option<String>,
) -> anyhow::Result<()> {
    let (config, _) = flightdeck::config::load_config(config_path)?;
    let ws_url = format!(
        "ws://{}:{}/ws",
        config.gateway.bind.trim(),
        config.gateway.port
    );
    let streams_stdin = route == ROUTE_FIRE_AND_FORGET || route == ROUTE_CHANNEL;

    let first = match data {
        Some(s) => Some(serde_json::from_str(&s).context("parsing --data as JSON")?),
        None if streams_stdin => None,
        None => Some(serde_json::to_value(Timestamp::now())?),
    };

    let (ws, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .with_context(|| format!("connecting to {}", ws_url))?;
    let (mut sink, mut stream) = ws.split();

    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Frame>();
    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if sink.send(Message::Text(frame.to_text())).await.is_err() {
                break;
            }
        }
    });

    let _ = frame_tx.send(Frame::Req {
        id: REQUEST_ID.to_string(),
        route,
        data: first,
    });
    if streams_stdin {
        let tx = frame_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str(line) {
                    Ok(data) => {
                        let _ = tx.send(Frame::Next {
                            id: REQUEST_ID.to_string(),
                            data,
                        });
                    }
                    Err(e) => eprintln!("skipping line (not JSON): {}", e),
                }
            }
            let _ = tx.send(Frame::Complete {
                id: REQUEST_ID.to_string(),
            });
        });
    } else {
        let _ = frame_tx.send(Frame::Complete {
            id: REQUEST_ID.to_string(),
        });
    }

    loop {
        let msg = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let _ = frame_tx.send(Frame::Cancel { id: REQUEST_ID.to_string() });
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                return Ok(());
            }
            msg = stream.next() => msg,
        };
        let Some(msg) = msg else {
            anyhow::bail!("gateway closed the connection");
        };
        let Message::Text(text) = msg.context("reading from gateway")? else {
            continue;
        };
        match Frame::parse(&text) {
            Ok(Frame::Next { data, .. }) => println!("{}", data),
            Ok(Frame::Complete { .. }) => return Ok(()),
            Ok(Frame::Error { code, message, .. }) => anyhow::bail!("{}: {}", code, message),
            Ok(Frame::Event { event }) if event == "shutdown" => {
                anyhow::bail!("gateway is shutting down")
            }
            Ok(_) => {}
            Err(e) => log::debug!("unreadable frame from gateway: {}", e),
        }
    }
}
