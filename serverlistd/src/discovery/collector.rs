use std::time::Duration;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use shared::types::DiscoveryResult;
use crate::config::DiscoveryConfig;
use crate::decode::Decoder;
use super::{Accumulator, Collector};

/// Broadcasts the probe and collects replies over UDP
pub struct UdpCollector {
    config: DiscoveryConfig,
    probe: Vec<u8>,
    decoder: Decoder,
}

impl UdpCollector {
    pub fn new(config: DiscoveryConfig, decoder: Decoder) -> Result<Self> {
        let probe = config.probe()?;
        Ok(Self { config, probe, decoder })
    }

    /// Run one collection. Only failing to set up the socket is an error;
    /// bad packets are skipped.
    pub async fn run(&self) -> Result<DiscoveryResult> {
        let socket = UdpSocket::bind(self.config.listen)
            .await
            .with_context(|| format!("Failed to bind discovery socket on {}", self.config.listen))?;
        socket
            .set_broadcast(true)
            .context("Failed to enable broadcast on discovery socket")?;

        let window = self.config.max_receiving_time();
        let receive_timeout = self.config.receive_timeout();
        let deadline = Instant::now() + window;

        // Replies arrive asynchronously within the window, so sending first is fine
        if let Err(e) = socket.send_to(&self.probe, self.config.broadcast).await {
            tracing::error!("Failed to send probe to {}: {}", self.config.broadcast, e);
        } else {
            tracing::debug!("Sent probe to {}", self.config.broadcast);
        }

        let mut accumulator = Accumulator::default();
        let mut buf = vec![0u8; self.config.recv_buffer_size];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining.min(receive_timeout), socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => {
                    let Ok(server) = self.decoder.decode(from.ip(), &buf[..len]) else {
                        continue;
                    };
                    let name = server.name.clone();
                    if accumulator.insert(from.ip(), server) {
                        tracing::debug!("Discovered server '{}' at {}", name, from);
                    } else {
                        tracing::debug!("Discarding duplicate server '{}' at {}", name, from);
                    }
                }
                Ok(Err(e)) => {
                    tracing::debug!("Discovery recv error: {}", e);
                    tokio::time::sleep(Duration::from_millis(10).min(remaining)).await;
                }
                Err(_) => {
                    // receive timeout, re-check the deadline
                }
            }
        }

        drop(socket);

        let result = DiscoveryResult::completed(accumulator.into_groups());
        tracing::info!(
            "Finished loading the server list ({} hosts, {} servers, {}/{} players)",
            result.host_count(),
            result.server_count(),
            result.player_count(),
            result.slot_count()
        );

        Ok(result)
    }
}

impl Collector for UdpCollector {
    fn collect(&self) -> BoxFuture<'_, Result<DiscoveryResult>> {
        Box::pin(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use crate::config::DecoderConfig;

    const MIXED: &[u8] = b"\n\0\x01\n#??M?!E\0\x13v?\0\0\0\0\0\0.|\0\0\0\x1fMiddle-earth Fun | Mixed | 2020\0\0\0\0\0\0\0\x10v??<???????T\0\0\0\0";
    // same name, different player count
    const MIXED_LATER: &[u8] = b"\n\0\x01\n#??M?!E\0\x13v?\0\0\0\0\0\0.|\0\0\0\x1fMiddle-earth Fun | Mixed | 2020\0\0\0\x05\0\0\0\x10v??<???????T\0\0\0\0";
    const DUEL: &[u8] = b"\n\0\x01\n#??M?!E\0\x13v?\0\0\0\0\0\0.}\0\0\0\x1eMiddle-earth Fun | Duel | 2020\0\0\0\0\0\0\0\x06x'?*??^\x1f????\0\0\0\0";

    fn collector(broadcast: SocketAddr, window_ms: u64) -> UdpCollector {
        let config = DiscoveryConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            broadcast,
            max_receiving_time_ms: window_ms,
            receive_timeout_ms: 50,
            ..DiscoveryConfig::default()
        };
        UdpCollector::new(config, Decoder::new(&DecoderConfig::default())).unwrap()
    }

    /// Answers the first probe with the given replies
    async fn fake_game_host(replies: Vec<&'static [u8]>) -> (SocketAddr, tokio::task::JoinHandle<Vec<u8>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (len, from) = socket.recv_from(&mut buf).await.unwrap();
            for reply in replies {
                socket.send_to(reply, from).await.unwrap();
            }
            buf[..len].to_vec()
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_collects_and_dedups_replies() {
        let (host, handle) = fake_game_host(vec![MIXED, &b"junk"[..], MIXED_LATER, DUEL]).await;

        let result = collector(host, 300).run().await.unwrap();

        let probe = handle.await.unwrap();
        assert_eq!(probe, DiscoveryConfig::default().probe().unwrap());

        assert!(!result.is_loading);
        assert_eq!(result.servers.len(), 1);
        let group = &result.servers[0];
        assert_eq!(group.len(), 2);
        assert_eq!(group[0].name, "Middle-earth Fun | Mixed | 2020");
        assert_eq!(group[0].players, 0, "first reply must win");
        assert_eq!(group[1].name, "Middle-earth Fun | Duel | 2020");
    }

    #[tokio::test]
    async fn test_no_replies_yields_empty_result() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let collector = collector(silent.local_addr().unwrap(), 200);

        let started = std::time::Instant::now();
        let result = collector.run().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(result.servers.is_empty());
        assert!(!result.is_loading);
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = DiscoveryConfig {
            listen: taken.local_addr().unwrap(),
            broadcast: taken.local_addr().unwrap(),
            max_receiving_time_ms: 100,
            receive_timeout_ms: 10,
            ..DiscoveryConfig::default()
        };
        let collector = UdpCollector::new(config, Decoder::new(&DecoderConfig::default())).unwrap();

        assert!(collector.run().await.is_err());
    }

    #[tokio::test]
    async fn test_usable_as_trait_object() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let collector: Arc<dyn Collector> = Arc::new(collector(silent.local_addr().unwrap(), 100));

        let result = collector.collect().await.unwrap();
        assert!(result.servers.is_empty());
    }
}
