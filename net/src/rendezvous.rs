use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};

use crate::{error::RendezvousError, topology::BlockLayout};

/// One peer this worker must connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub id: u32,
    pub ip: IpAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousQuery {
    #[serde(rename = "id")]
    pub own_id: u32,
    pub worker_count: u32,
    pub block_dim: u32,
}

/// Resolves the peer set of one worker. Authoritative for membership; the
/// topology mask only decides which of those connections carry data.
#[async_trait]
pub trait RendezvousDirectory: Send + Sync {
    async fn resolve(&self, query: RendezvousQuery) -> Result<Vec<PeerEntry>, RendezvousError>;
}

#[derive(Debug, Deserialize)]
struct PeerList {
    peers: Vec<PeerEntry>,
}

/// Asks the coordinator service with one JSON line and reads one JSON line back.
#[derive(Debug, Clone)]
pub struct CoordinatorDirectory {
    addr: SocketAddr,
    timeout: Duration,
}

impl CoordinatorDirectory {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exchange(&self, query: &RendezvousQuery) -> std::io::Result<String> {
        let mut stream = TcpStream::connect(self.addr).await?;
        let mut request = serde_json::to_vec(query)?;
        request.push(b'\n');
        stream.write_all(&request).await?;

        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).await?;
        Ok(line)
    }
}

#[async_trait]
impl RendezvousDirectory for CoordinatorDirectory {
    async fn resolve(&self, query: RendezvousQuery) -> Result<Vec<PeerEntry>, RendezvousError> {
        let unreachable = |source| RendezvousError::Unreachable {
            addr: self.addr,
            source,
        };
        let line = timeout(self.timeout, self.exchange(&query))
            .await
            .map_err(|_| unreachable(std::io::ErrorKind::TimedOut.into()))?
            .map_err(unreachable)?;

        if line.trim().is_empty() {
            return Err(RendezvousError::Malformed(
                "coordinator closed without a reply".to_string(),
            ));
        }
        let list: PeerList = serde_json::from_str(line.trim())
            .map_err(|err| RendezvousError::Malformed(err.to_string()))?;
        validate(&query, &list.peers)?;
        Ok(list.peers)
    }
}

/// Every worker on one address, grouped into `block_dim` blocks.
#[derive(Debug, Clone, Copy)]
pub struct LoopbackDirectory {
    ip: IpAddr,
}

impl Default for LoopbackDirectory {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl LoopbackDirectory {
    pub fn new(ip: IpAddr) -> Self {
        Self { ip }
    }
}

#[async_trait]
impl RendezvousDirectory for LoopbackDirectory {
    async fn resolve(&self, query: RendezvousQuery) -> Result<Vec<PeerEntry>, RendezvousError> {
        let layout = BlockLayout::new(query.worker_count, query.block_dim)?;
        if query.own_id >= query.worker_count {
            return Err(RendezvousError::UnknownWorker(query.own_id));
        }
        Ok(layout
            .peers_of(query.own_id)
            .map(|id| PeerEntry { id, ip: self.ip })
            .collect())
    }
}

fn validate(query: &RendezvousQuery, peers: &[PeerEntry]) -> Result<(), RendezvousError> {
    let mut seen = HashSet::with_capacity(peers.len());
    for peer in peers {
        if peer.id >= query.worker_count {
            return Err(RendezvousError::UnknownWorker(peer.id));
        }
        if peer.id == query.own_id {
            return Err(RendezvousError::Malformed(format!(
                "peer list of worker {} contains itself",
                query.own_id
            )));
        }
        if !seen.insert(peer.id) {
            return Err(RendezvousError::Malformed(format!(
                "peer {} listed twice",
                peer.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    /// Accepts one client, checks its query and answers with `reply`.
    async fn coordinator(reply: &'static str) -> (SocketAddr, tokio::task::JoinHandle<RendezvousQuery>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let mut stream = reader.into_inner();
            stream.write_all(reply.as_bytes()).await.unwrap();
            serde_json::from_str(&line).unwrap()
        });
        (addr, handle)
    }

    fn query(own_id: u32) -> RendezvousQuery {
        RendezvousQuery {
            own_id,
            worker_count: 4,
            block_dim: 1,
        }
    }

    #[tokio::test]
    async fn coordinator_returns_peers_in_order() {
        let (addr, seen) = coordinator(
            "{\"peers\":[{\"id\":2,\"ip\":\"10.0.0.2\"},{\"id\":0,\"ip\":\"10.0.0.7\"}]}\n",
        )
        .await;
        let peers = CoordinatorDirectory::new(addr).resolve(query(1)).await.unwrap();
        assert_eq!(
            peers,
            [
                PeerEntry {
                    id: 2,
                    ip: "10.0.0.2".parse().unwrap()
                },
                PeerEntry {
                    id: 0,
                    ip: "10.0.0.7".parse().unwrap()
                },
            ]
        );
        assert_eq!(seen.await.unwrap(), query(1));
    }

    #[tokio::test]
    async fn coordinator_garbage_is_malformed() {
        for reply in ["not json\n", "{\"peers\":[{\"id\":1}]}\n", "\n"] {
            let (addr, _seen) = coordinator(reply).await;
            let err = CoordinatorDirectory::new(addr)
                .resolve(query(0))
                .await
                .unwrap_err();
            assert!(matches!(err, RendezvousError::Malformed(_)), "{reply}: {err}");
        }
    }

    #[tokio::test]
    async fn coordinator_peer_lists_are_validated() {
        let (addr, _seen) =
            coordinator("{\"peers\":[{\"id\":9,\"ip\":\"10.0.0.1\"}]}\n").await;
        let err = CoordinatorDirectory::new(addr).resolve(query(0)).await;
        assert!(matches!(err, Err(RendezvousError::UnknownWorker(9))));

        let (addr, _seen) = coordinator(
            "{\"peers\":[{\"id\":1,\"ip\":\"10.0.0.1\"},{\"id\":1,\"ip\":\"10.0.0.1\"}]}\n",
        )
        .await;
        let err = CoordinatorDirectory::new(addr).resolve(query(0)).await;
        assert!(matches!(err, Err(RendezvousError::Malformed(_))));

        let (addr, _seen) = coordinator("{\"peers\":[{\"id\":0,\"ip\":\"10.0.0.1\"}]}\n").await;
        let err = CoordinatorDirectory::new(addr).resolve(query(0)).await;
        assert!(matches!(err, Err(RendezvousError::Malformed(_))));
    }

    #[tokio::test]
    async fn unreachable_coordinator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = CoordinatorDirectory::new(addr).resolve(query(0)).await;
        assert!(matches!(err, Err(RendezvousError::Unreachable { .. })));
    }

    #[tokio::test]
    async fn silent_coordinator_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let err = CoordinatorDirectory::new(addr)
            .with_timeout(Duration::from_millis(100))
            .resolve(query(0))
            .await;
        assert!(matches!(err, Err(RendezvousError::Unreachable { .. })));
        drop(listener);
    }

    #[tokio::test]
    async fn loopback_groups_by_block() {
        let directory = LoopbackDirectory::default();
        let peers = directory
            .resolve(RendezvousQuery {
                own_id: 6,
                worker_count: 10,
                block_dim: 2,
            })
            .await
            .unwrap();
        let ids: Vec<u32> = peers.iter().map(|peer| peer.id).collect();
        assert_eq!(ids, [5, 7, 8, 9]);
        assert!(peers.iter().all(|peer| peer.ip.is_loopback()));

        let err = directory
            .resolve(RendezvousQuery {
                own_id: 0,
                worker_count: 10,
                block_dim: 3,
            })
            .await;
        assert!(matches!(err, Err(RendezvousError::Topology(_))));
    }
}
