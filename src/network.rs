// UDP boundary between the node and its router process
//
// One datagram carries one JSON-encoded packet. The receiver decodes and
// forwards packets to the engine's inbound queue; the sender drains the
// outbound queue to the router. Neither task touches consensus state.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::blockchain::Packet;
use crate::consensus::Event;

/// Receive buffer size; larger datagrams are truncated and fail to decode
pub const MAX_DATAGRAM: usize = 1024;

/// Bound UDP socket plus the router it talks to
#[derive(Debug, Clone)]
pub struct UdpBoundary {
    socket: Arc<UdpSocket>,
    router: SocketAddr,
}

impl UdpBoundary {
    /// Binds the inbound socket
    ///
    /// # Arguments
    ///
    /// * `listen` - Local address to receive on
    /// * `router` - Destination of every outbound packet
    pub async fn bind(listen: SocketAddr, router: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(listen).await?;
        info!("Listening on {}, routing through {}", listen, router);

        Ok(UdpBoundary {
            socket: Arc::new(socket),
            router,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns the receive loop
    ///
    /// Malformed datagrams are logged and dropped. The task ends with an
    /// error if the socket fails, or cleanly once the engine stops listening.
    pub fn spawn_receiver(&self, inbound: mpsc::Sender<Event>) -> JoinHandle<io::Result<()>> {
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM];
            loop {
                let (len, from) = socket.recv_from(&mut buf).await?;

                let packet = match Packet::decode(&buf[..len]) {
                    Ok(packet) => packet,
                    Err(err) => {
                        warn!("Dropping datagram from {}: {}", from, err);
                        continue;
                    }
                };

                debug!("Received {} packet {} from {}", packet.packet_type, packet.id, from);
                if inbound.send(Event::Inbound(packet)).await.is_err() {
                    debug!("Inbound queue closed, stopping receiver");
                    return Ok::<(), io::Error>(());
                }
            }
        })
    }

    /// Spawns the send loop
    ///
    /// Runs until the outbound queue closes. Encoding failures drop the
    /// packet; socket failures end the task with the error.
    pub fn spawn_sender(&self, mut outbound: mpsc::Receiver<Packet>) -> JoinHandle<io::Result<()>> {
        let socket = Arc::clone(&self.socket);
        let router = self.router;

        tokio::spawn(async move {
            while let Some(packet) = outbound.recv().await {
                let bytes = match packet.encode() {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        error!("Failed to encode packet {}: {}", packet.id, err);
                        continue;
                    }
                };

                if bytes.len() > MAX_DATAGRAM {
                    warn!("Packet {} is {} bytes, peers may truncate it", packet.id, bytes.len());
                }

                debug!("Sending {} packet {} to {}", packet.packet_type, packet.id, router);
                socket.send_to(&bytes, router).await?;
            }
            debug!("Outbound queue closed, stopping sender");
            Ok::<(), io::Error>(())
        })
    }
}

/// Finds the address this host uses to reach `target`
///
/// Connecting a UDP socket sends nothing; it only selects the route.
pub fn discover_self_ip(target: SocketAddr) -> io::Result<IpAddr> {
    let socket = StdUdpSocket::bind(("0.0.0.0", 0))?;
    socket.connect(target)?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::time::timeout;

    fn localhost() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn test_receiver_decodes_and_drops_garbage() {
        let boundary = UdpBoundary::bind(localhost(), localhost()).await.unwrap();
        let addr = boundary.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = boundary.spawn_receiver(tx);

        let peer = UdpSocket::bind(localhost()).await.unwrap();
        peer.send_to(b"not a packet", addr).await.unwrap();
        let ping = Packet::ping(IpAddr::V4(Ipv4Addr::new(10, 12, 0, 4)));
        peer.send_to(&ping.encode().unwrap(), addr).await.unwrap();

        let event = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        match event {
            Event::Inbound(packet) => assert_eq!(packet.id, ping.id),
            other => panic!("unexpected event {:?}", other),
        }

        handle.abort();
    }

    #[tokio::test]
    async fn test_sender_routes_to_router() {
        let router = UdpSocket::bind(localhost()).await.unwrap();
        let boundary = UdpBoundary::bind(localhost(), router.local_addr().unwrap()).await.unwrap();
        let (tx, rx) = mpsc::channel(8);
        let handle = boundary.spawn_sender(rx);

        let ping = Packet::ping(IpAddr::V4(Ipv4Addr::new(10, 12, 0, 4)));
        tx.send(ping.clone()).await.unwrap();

        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, _) = timeout(Duration::from_secs(2), router.recv_from(&mut buf)).await.unwrap().unwrap();
        assert_eq!(Packet::decode(&buf[..len]).unwrap().id, ping.id);

        drop(tx);
        assert!(handle.await.unwrap().is_ok());
    }

    #[test]
    fn test_discover_self_ip_loopback() {
        let ip = discover_self_ip(SocketAddr::from(([127, 0, 0, 1], 9))).unwrap();
        assert!(ip.is_loopback());
    }
}
