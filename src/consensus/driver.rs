use chrono::Utc;
use log::{debug, info, warn};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::blockchain::Packet;

use super::engine::{ConsensusEngine, Effect, Event};

/// Runs the engine as the single consumer of the inbound queue
///
/// Delayed sends and scheduled events are spawned as timers that only hold
/// queue handles, so a pending delay never blocks the next packet. Scheduled
/// events re-enter through `inbound`, keeping the engine the only writer.
///
/// # Returns
///
/// The engine, once it terminates or every inbound producer is gone
pub async fn drive<R: Rng>(
    mut engine: ConsensusEngine<R>,
    mut inbound: mpsc::Receiver<Event>,
    loopback: mpsc::Sender<Event>,
    outbound: mpsc::Sender<Packet>,
) -> ConsensusEngine<R> {
    let weak = loopback.downgrade();
    drop(loopback);
    let loopback = weak;

    let effects = engine.start();
    if !apply(effects, &loopback, &outbound).await {
        return engine;
    }

    while let Some(event) = inbound.recv().await {
        let effects = engine.handle(event, Utc::now());
        if !apply(effects, &loopback, &outbound).await {
            return engine;
        }
    }

    debug!("Inbound queue closed");
    engine
}

/// Carries out effects; false once the engine asked to stop
async fn apply(
    effects: Vec<Effect>,
    loopback: &mpsc::WeakSender<Event>,
    outbound: &mpsc::Sender<Packet>,
) -> bool {
    for effect in effects {
        match effect {
            Effect::Send(packet) => {
                debug!("Sending Packet with ID {} to channel output", packet.id);
                if outbound.send(packet).await.is_err() {
                    warn!("Outbound queue closed, packet dropped");
                }
            }
            Effect::SendAfter(packet, delay) => {
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    if outbound.send(packet).await.is_err() {
                        warn!("Outbound queue closed, delayed packet dropped");
                    }
                });
            }
            Effect::Schedule(event, delay) => {
                let loopback = loopback.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    if let Some(inbound) = loopback.upgrade() {
                        let _ = inbound.send(event).await;
                    }
                });
            }
            Effect::Terminate => {
                info!("Consensus engine terminated");
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::packet::PacketType;
    use crate::consensus::engine::{EngineSettings, NodeState};
    use crate::consensus::topology::Topology;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::time::timeout;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 12, 0, last))
    }

    fn engine(me: IpAddr) -> ConsensusEngine<StdRng> {
        let settings = EngineSettings {
            me,
            root_node: ip(1),
            crypto_piece: String::new(),
            max_rounds: 1,
            query_time_limit_secs: 60,
            query_number_limit: 1,
            first_round_delay: Duration::from_millis(10),
            next_round_delay: Duration::from_millis(10),
            max_jitter_ms: 5,
            deadline_timer: false,
            announce_hop_path: false,
        };
        let topology = Topology::new(vec![ip(1)], vec![ip(1)]);
        ConsensusEngine::new(settings, topology, StdRng::seed_from_u64(5))
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let node = tokio::spawn(drive(engine(ip(9)), in_rx, in_tx.clone(), out_tx));

        in_tx.send(Event::Inbound(Packet::ping(ip(4)))).await.unwrap();
        let pong = timeout(Duration::from_secs(2), out_rx.recv()).await.unwrap().unwrap();
        assert_eq!(pong.packet_type, PacketType::Pong);
        assert_eq!(pong.destination, Some(ip(4)));

        drop(in_tx);
        let engine = timeout(Duration::from_secs(2), node).await.unwrap().unwrap();
        assert_eq!(engine.chain().len(), 0);
    }

    #[tokio::test]
    async fn test_root_runs_single_round_to_termination() {
        let (in_tx, in_rx) = mpsc::channel(32);
        let (out_tx, mut out_rx) = mpsc::channel(32);
        let node = tokio::spawn(drive(engine(ip(1)), in_rx, in_tx.clone(), out_tx));

        // Act as the router: echo everything back to the node
        let echo = tokio::spawn(async move {
            let mut kinds = Vec::new();
            while let Some(packet) = out_rx.recv().await {
                kinds.push(packet.packet_type);
                if in_tx.send(Event::Inbound(packet)).await.is_err() {
                    break;
                }
            }
            kinds
        });

        let engine = timeout(Duration::from_secs(5), node).await.unwrap().unwrap();
        assert_eq!(engine.state(), NodeState::Terminated);
        assert_eq!(engine.chain().len(), 1);
        assert!(engine.chain().is_valid());

        let kinds = timeout(Duration::from_secs(2), echo).await.unwrap().unwrap();
        assert_eq!(
            &kinds[..4],
            &[PacketType::Query, PacketType::Transaction, PacketType::ElectionLaunch, PacketType::Block]
        );
        assert!(kinds.contains(&PacketType::LastBlock));
    }
}
