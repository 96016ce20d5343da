use crate::protocol_constants::CRLF;
use crate::util::construct_redis_command;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Slave => "slave",
        }
    }
}

/// A registered follower. The write half lives here from PSYNC
/// onwards; the propagation path is its only writer and always writes
/// whole frames under the lock, so frames from different clients
/// never interleave on the link.
pub struct ReplicaHandle {
    pub addr: SocketAddr,
    pub listening_port: Option<u16>,
    pub capabilities: Vec<String>,
    writer: Mutex<OwnedWriteHalf>,
    acked_offset: AtomicU64,
}

impl ReplicaHandle {
    pub fn new(
        addr: SocketAddr,
        writer: OwnedWriteHalf,
        listening_port: Option<u16>,
        capabilities: Vec<String>,
    ) -> Self {
        Self {
            addr,
            listening_port,
            capabilities,
            writer: Mutex::new(writer),
            acked_offset: AtomicU64::new(0),
        }
    }

    pub fn acked_offset(&self) -> u64 {
        self.acked_offset.load(Ordering::SeqCst)
    }

    async fn send_frame(&self, frame: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await
    }
}

/// Replication identity and, on a leader, the live follower registry
/// with offset and acknowledgement bookkeeping.
///
/// The offset counts bytes of the propagated command stream. It is
/// advanced exactly once per frame no matter how many followers the
/// frame goes to, and a follower dying mid-send does not roll it
/// back; it describes the stream, not delivery.
pub struct ReplicationConfig {
    role: Role,
    master_addr: Option<(String, u16)>,
    master_replid: String,
    master_repl_offset: AtomicU64,
    replicas: RwLock<Vec<Arc<ReplicaHandle>>>,
    ack_notify: Notify,
}

impl ReplicationConfig {
    pub fn new_master() -> Self {
        Self {
            role: Role::Master,
            master_addr: None,
            master_replid: Self::generate_replication_id(),
            master_repl_offset: AtomicU64::new(0),
            replicas: RwLock::new(Vec::new()),
            ack_notify: Notify::new(),
        }
    }

    pub fn new_replica(host: String, port: u16) -> Self {
        Self {
            role: Role::Slave,
            master_addr: Some((host, port)),
            master_replid: Self::generate_replication_id(),
            master_repl_offset: AtomicU64::new(0),
            replicas: RwLock::new(Vec::new()),
            ack_notify: Notify::new(),
        }
    }

    fn generate_replication_id() -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut rng = rand::rng();
        (0..40).map(|_| HEX[rng.random_range(0..16)] as char).collect()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn master_addr(&self) -> Option<&(String, u16)> {
        self.master_addr.as_ref()
    }

    pub fn master_replid(&self) -> &str {
        &self.master_replid
    }

    pub fn master_repl_offset(&self) -> u64 {
        self.master_repl_offset.load(Ordering::SeqCst)
    }

    pub async fn replica_count(&self) -> usize {
        self.replicas.read().await.len()
    }

    pub async fn register_replica(&self, handle: Arc<ReplicaHandle>) {
        let mut replicas = self.replicas.write().await;
        replicas.push(handle);
        info!("registered replica, total {}", replicas.len());
    }

    pub async fn remove_replica(&self, addr: SocketAddr) {
        let mut replicas = self.replicas.write().await;
        let before = replicas.len();
        replicas.retain(|replica| replica.addr != addr);
        if replicas.len() != before {
            info!("removed replica {}, total {}", addr, replicas.len());
        }
        drop(replicas);
        // a dropped follower can only shrink the satisfied count, but
        // a WAIT whose target count is now unreachable must still see
        // the change
        self.ack_notify.notify_waiters();
    }

    /// Records `REPLCONF ACK <offset>` from a follower link and pokes
    /// any WAIT barrier.
    pub async fn record_ack(&self, addr: SocketAddr, offset: u64) {
        let replicas = self.replicas.read().await;
        if let Some(replica) = replicas.iter().find(|replica| replica.addr == addr) {
            replica.acked_offset.fetch_max(offset, Ordering::SeqCst);
            debug!("replica {} acked offset {}", addr, offset);
        }
        drop(replicas);
        self.ack_notify.notify_waiters();
    }

    /// Fans one framed command out to every registered follower.
    /// Followers whose link errors are dropped on the spot.
    pub async fn propagate(&self, frame: &[u8]) {
        let replicas = self.replicas.read().await.clone();
        if replicas.is_empty() {
            return;
        }
        self.master_repl_offset
            .fetch_add(frame.len() as u64, Ordering::SeqCst);
        for replica in &replicas {
            if let Err(e) = replica.send_frame(frame).await {
                warn!("propagation to {} failed: {}", replica.addr, e);
                self.remove_replica(replica.addr).await;
            }
        }
    }

    /// WAIT barrier. Counts followers whose acknowledged offset covers
    /// the leader offset as it was when the barrier was requested.
    pub async fn wait_for_acks(&self, num_replicas: usize, timeout_ms: u64) -> usize {
        // the clock starts when WAIT arrives, not when GETACKs go out
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        if num_replicas == 0 {
            return 0;
        }
        let target = self.master_repl_offset();
        let replicas = self.replicas.read().await.clone();
        if replicas.is_empty() || target == 0 {
            // with nothing propagated yet every follower is caught up
            return replicas
                .iter()
                .filter(|replica| replica.acked_offset() >= target)
                .count();
        }

        // the GETACK frame joins the command stream like any other
        // propagated frame, but only after the barrier target was
        // snapshotted above
        let getack = construct_redis_command(&[b"REPLCONF", b"GETACK", b"*"]);
        self.master_repl_offset
            .fetch_add(getack.len() as u64, Ordering::SeqCst);
        for replica in &replicas {
            if let Err(e) = replica.send_frame(&getack).await {
                warn!("GETACK to {} failed: {}", replica.addr, e);
                self.remove_replica(replica.addr).await;
            }
        }

        if timeout_ms == 0 {
            return self.count_acked(target).await;
        }

        loop {
            let notified = self.ack_notify.notified();
            let count = self.count_acked(target).await;
            if count >= num_replicas {
                return count;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.count_acked(target).await;
            }
        }
    }

    async fn count_acked(&self, target: u64) -> usize {
        self.replicas
            .read()
            .await
            .iter()
            .filter(|replica| replica.acked_offset() >= target)
            .count()
    }

    /// The replication section of INFO, lines joined by CRLF.
    pub async fn replication_info(&self) -> String {
        let mut info = format!("role:{}", self.role.as_str());
        match self.role {
            Role::Master => {
                info.push_str(&format!("{}master_replid:{}", CRLF, self.master_replid));
                info.push_str(&format!(
                    "{}master_repl_offset:{}",
                    CRLF,
                    self.master_repl_offset()
                ));
                info.push_str(&format!(
                    "{}connected_slaves:{}",
                    CRLF,
                    self.replica_count().await
                ));
            }
            Role::Slave => {
                if let Some((host, port)) = &self.master_addr {
                    info.push_str(&format!("{}master_host:{}", CRLF, host));
                    info.push_str(&format!("{}master_port:{}", CRLF, port));
                    info.push_str(&format!("{}master_link_status:up", CRLF));
                }
            }
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replication_id_is_forty_hex_chars() {
        let id = ReplicationConfig::generate_replication_id();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn replication_ids_differ_between_instances() {
        assert_ne!(
            ReplicationConfig::new_master().master_replid(),
            ReplicationConfig::new_master().master_replid()
        );
    }

    #[tokio::test]
    async fn master_info_carries_replid_and_offset() {
        let replication = ReplicationConfig::new_master();
        let info = replication.replication_info().await;
        assert!(info.starts_with("role:master\r\n"));
        assert!(info.contains("master_repl_offset:0"));
        assert!(info.contains(&format!("master_replid:{}", replication.master_replid())));
    }

    #[tokio::test]
    async fn replica_info_names_the_master() {
        let replication = ReplicationConfig::new_replica("localhost".to_string(), 7777);
        let info = replication.replication_info().await;
        assert!(info.starts_with("role:slave"));
        assert!(info.contains("master_host:localhost"));
        assert!(info.contains("master_port:7777"));
    }

    #[tokio::test]
    async fn propagation_with_no_replicas_leaves_offset_alone() {
        let replication = ReplicationConfig::new_master();
        replication.propagate(b"*1\r\n$4\r\nPING\r\n").await;
        assert_eq!(replication.master_repl_offset(), 0);
    }

    #[tokio::test]
    async fn wait_with_no_replicas_returns_zero_immediately() {
        let replication = ReplicationConfig::new_master();
        assert_eq!(replication.wait_for_acks(1, 5_000).await, 0);
    }
}
