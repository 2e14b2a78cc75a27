use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use relaylink::{
    ConnectionEvent, ControlMessage, FnDispatch, RelayClient, RelayConfig, RelayStreams,
    StatsSnapshot,
};

#[derive(Parser)]
#[command(name = "relaylink-probe")]
#[command(about = "Connects to a relay server and logs the traffic it receives")]
struct Args {
    #[arg(short, long, help = "Relay address as host:port (overrides the config file)")]
    address: Option<String>,

    #[arg(short, long, help = "JSON config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Capacity of the keepalive and media queues")]
    queue_capacity: Option<usize>,

    #[arg(long, help = "Reconnect if no datagram arrives within this many ms")]
    receive_timeout_ms: Option<u64>,

    #[arg(long, default_value_t = 10, help = "Seconds between stats reports")]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config(&args)?;
    let address = config.address.clone();

    let dispatch = FnDispatch(|message: ControlMessage| {
        let ControlMessage { kind, body } = message;
        log::info!(
            "Control message {}: {}",
            kind,
            serde_json::Value::Object(body)
        );
    });

    let (client, streams) = RelayClient::connect::<ControlMessage, _>(config, dispatch)
        .await
        .with_context(|| format!("failed to connect to relay at {}", address))?;
    let RelayStreams {
        mut keepalives,
        mut media,
    } = streams;
    let mut events = client.subscribe();

    let mut stats_timer = tokio::time::interval(Duration::from_secs(args.stats_interval.max(1)));
    stats_timer.tick().await;

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => {
                log::info!("Interrupt received");
                break;
            }
            Some(keepalive) = keepalives.recv() => {
                log::debug!(
                    "Keepalive from {}",
                    String::from_utf8_lossy(keepalive.guid())
                );
            }
            Some(packet) = media.recv() => {
                log::debug!(
                    "Media packet from {} ({} byte payload)",
                    String::from_utf8_lossy(packet.guid()),
                    packet.payload().len()
                );
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Missed {} connection events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = stats_timer.tick() => log_stats(&client.stats()),
        }
    }

    let stats = client.stats();
    client.shutdown().await;
    log_stats(&stats);

    Ok(())
}

fn load_config(args: &Args) -> Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => RelayConfig::default(),
    };

    if let Some(address) = &args.address {
        config.address = address.clone();
    }
    if let Some(capacity) = args.queue_capacity {
        config.queue_capacity = capacity;
    }
    if let Some(timeout_ms) = args.receive_timeout_ms {
        config.receive_timeout = Some(Duration::from_millis(timeout_ms));
    }

    config.validate()?;
    Ok(config)
}

fn log_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::Connected { generation } => {
            log::info!("Connected (generation {})", generation);
        }
        ConnectionEvent::ChannelFault(fault) => {
            log::warn!(
                "{} channel failed (generation {}): {}",
                fault.channel,
                fault.generation,
                fault.reason
            );
        }
        ConnectionEvent::ReconnectScheduled {
            attempt,
            delay,
            error,
        } => {
            log::warn!(
                "Reconnect attempt {} failed: {}, next in {:?}",
                attempt + 1,
                error,
                delay
            );
        }
        ConnectionEvent::Reconnected {
            generation,
            attempts,
        } => {
            log::info!(
                "Reconnected after {} attempt(s) (generation {})",
                attempts,
                generation
            );
        }
        ConnectionEvent::Disconnected => log::info!("Disconnected"),
    }
}

fn log_stats(stats: &StatsSnapshot) {
    log::info!(
        "Received {} keepalives, {} media packets, {} control messages ({} bytes); \
         dropped {} malformed packets, {} undecodable records; {} read errors, {} faults",
        stats.keepalives,
        stats.media_packets,
        stats.control_messages,
        stats.bytes_received,
        stats.malformed_packets,
        stats.decode_failures,
        stats.read_errors,
        stats.faults_reported
    );
}
