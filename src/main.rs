use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;

mod blockchain;
mod config;
mod consensus;
mod network;

use config::{ConfigError, NodeConfig};
use consensus::{ConsensusEngine, EngineSettings, Topology};
use network::UdpBoundary;

const QUEUE_DEPTH: usize = 256;

/// Simulated MANET blockchain node
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(default_value = "/app/conf.toml")]
    config: PathBuf,
}

// Time left until `target` (unix seconds); None when there is nothing to wait for
fn sync_delay(target: f64, now: DateTime<Utc>) -> Option<Duration> {
    if target <= 0.0 {
        return None;
    }

    let now = now.timestamp_millis() as f64 / 1_000.0;
    if target <= now {
        return None;
    }

    match Duration::try_from_secs_f64(target - now) {
        Ok(wait) => Some(wait),
        Err(err) => {
            warn!("Ignoring start barrier {}: {}", target, err);
            None
        }
    }
}

async fn wait_for_sync(target: f64) {
    if let Some(wait) = sync_delay(target, Utc::now()) {
        info!("Waiting {:?} for the start barrier", wait);
        tokio::time::sleep(wait).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loaded = NodeConfig::load(&cli.config);

    // Initialize logger
    let level = loaded.as_ref().map(|c| c.log_level.clone()).unwrap_or_else(|_| "info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(level));

    let config = match loaded {
        Ok(config) => config,
        Err(ConfigError::Io(err)) => {
            warn!("Failed to read {}: {}", cli.config.display(), err);
            warn!("Using default configuration instead");
            NodeConfig::default()
        }
        Err(err) => return Err(err).context("invalid configuration"),
    };

    info!("config = {}", cli.config.display());
    info!("rootNode = {}", config.root_node);
    info!("Starting Blockchain process, waiting some time to get my own IP...");

    wait_for_sync(config.target_sync).await;

    let me = match config.self_ip {
        Some(ip) => ip,
        None => network::discover_self_ip(SocketAddr::new(config.root_node, config.listen_addr.port()))
            .context("failed to discover own IP")?,
    };
    info!("Good to go, my ip is {}", me);

    let boundary = UdpBoundary::bind(config.listen_addr, config.router_addr)
        .await
        .context("failed to bind UDP socket")?;
    info!("Node {} bound to {}", me, boundary.local_addr()?);

    let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_DEPTH);
    let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_DEPTH);

    let receiver = boundary.spawn_receiver(inbound_tx.clone());
    let sender = boundary.spawn_sender(outbound_rx);

    let engine = ConsensusEngine::new(
        EngineSettings::from_config(&config, me),
        Topology::new(config.hop_chain.clone(), config.leader_candidates.clone()),
        StdRng::from_entropy(),
    );

    let consensus = consensus::drive(engine, inbound_rx, inbound_tx, outbound_tx);

    tokio::select! {
        engine = consensus => {
            info!(
                "Finished in state {:?} after {} rounds with a chain of {} blocks",
                engine.state(),
                engine.rounds(),
                engine.chain().len()
            );
        }
        result = receiver => {
            let err = result.context("receiver task failed")?.err();
            error!("Receiver stopped: {:?}", err);
            anyhow::bail!("network receiver stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    // Let queued packets, such as the final tip announcement, go out
    if tokio::time::timeout(Duration::from_secs(1), sender).await.is_err() {
        warn!("Outbound queue not drained before exit");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn test_sync_delay_waits_for_future_target() {
        assert_eq!(sync_delay(1_010.5, at(1_000)), Some(Duration::from_millis(10_500)));
    }

    #[test]
    fn test_sync_delay_skips_disabled_and_past_targets() {
        assert_eq!(sync_delay(0.0, at(1_000)), None);
        assert_eq!(sync_delay(999.0, at(1_000)), None);
        assert_eq!(sync_delay(f64::NAN, at(1_000)), None);
    }

    #[test]
    fn test_sync_delay_ignores_unrepresentable_target() {
        assert_eq!(sync_delay(f64::INFINITY, at(1_000)), None);
        assert_eq!(sync_delay(f64::MAX, at(1_000)), None);
    }
}
