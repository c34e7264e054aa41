//! Owns the single UDP socket used for a voice or Go-Live session (spec §4.2).

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::discovery::{self, DiscoveredAddress};
use crate::error::{Error, Result};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
const RECV_BUF_LEN: usize = 2048;

/// A connectionless IPv4 UDP socket bound to exactly one peer endpoint, with
/// IP discovery and an ordered `send` primitive. There is no receive pipeline
/// beyond discovery: every datagram after that is discarded (spec §4.2).
pub struct UdpTransport {
    socket: UdpSocket,
    // Serializes sends so packets reach the socket in construction order even
    // if callers race (spec §5: "single logical writer; sends must be
    // serialized").
    write_lock: Mutex<()>,
}

impl UdpTransport {
    /// Binds a local IPv4 socket and connects it to `peer`.
    pub async fn connect(peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind((IpAddr::from([0, 0, 0, 0]), 0)).await?;
        socket.connect(peer).await?;
        Ok(Self {
            socket,
            write_lock: Mutex::new(()),
        })
    }

    /// Runs Discord's IP-discovery handshake: sends the 74-byte request and
    /// waits for a single reply datagram. Fails the session (returns Err) if
    /// the response type is wrong or the address can't be parsed.
    pub async fn discover_ip(&self, audio_ssrc: u32) -> Result<DiscoveredAddress> {
        let request = discovery::build_request(audio_ssrc);
        self.send(&request).await?;

        let mut buf = [0u8; RECV_BUF_LEN];
        let len = tokio::time::timeout(DISCOVERY_TIMEOUT, self.socket.recv(&mut buf))
            .await
            .map_err(|_| Error::DiscoveryTimedOut)??;

        discovery::parse_reply(&buf[..len])
    }

    /// Sends one already-assembled packet to the connected peer, in order
    /// relative to other calls on this transport.
    pub async fn send(&self, packet: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.socket.send(packet).await?;
        Ok(())
    }

    /// Spawns a background task that drains (and discards) every datagram
    /// received after IP discovery has completed. Dropping the returned
    /// handle's `JoinHandle` without aborting leaves it running until the
    /// transport (and thus the socket) is dropped, since `recv` then errors.
    pub fn spawn_discard_loop(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = [0u8; RECV_BUF_LEN];
            loop {
                match self.socket.recv(&mut buf).await {
                    Ok(_) => continue,
                    Err(e) => {
                        log::debug!("voice-net: discard loop exiting: {e}");
                        break;
                    }
                }
            }
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovery_roundtrip_over_loopback() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let transport = UdpTransport::connect(server_addr).await.unwrap();

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 74];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, 74);
            assert_eq!(&buf[0..8], &[0x00, 0x01, 0x00, 0x46, 0x11, 0x11, 0x11, 0x11]);

            let mut reply = vec![0u8; 74];
            reply[1] = 0x02;
            reply[8..8 + 10].copy_from_slice(b"127.0.0.1\0");
            reply[72] = 0x1F;
            reply[73] = 0x40;
            server.send_to(&reply, from).await.unwrap();
        });

        let addr = transport.discover_ip(0x11111111).await.unwrap();
        assert_eq!(addr.ip, std::net::Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(addr.port, 8000);

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn send_serializes_against_concurrent_callers() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let transport = std::sync::Arc::new(UdpTransport::connect(server_addr).await.unwrap());

        let mut handles = Vec::new();
        for i in 0u8..8 {
            let t = transport.clone();
            handles.push(tokio::spawn(async move {
                t.send(&[i; 4]).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut received = 0;
        let mut buf = [0u8; 16];
        for _ in 0..8 {
            let (len, _) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, 4);
            received += 1;
        }
        assert_eq!(received, 8);
    }
}
