use crate::config::ServerConfig;
use crate::connection;
use crate::keyspace::Keyspace;
use crate::rdb_parser::RdbParser;
use crate::replica;
use crate::replication_config::ReplicationConfig;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Owns everything a running node needs: the bound listener, the
/// keyspace, the parsed options, and the replication state. Built once
/// at bootstrap and handed out to connection tasks; there are no
/// process-wide singletons.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    keyspace: Keyspace,
    config: Arc<ServerConfig>,
    replication: Arc<ReplicationConfig>,
}

impl Server {
    /// Loads the snapshot (a missing or unreadable one means an empty
    /// database) and binds the listen socket. A bind failure is the
    /// one fatal error here.
    pub async fn setup(config: ServerConfig) -> Result<Server> {
        let keyspace = Keyspace::new();
        let path = config.rdb_path();
        match tokio::fs::read(&path).await {
            Ok(data) => match RdbParser::new(&data).parse() {
                Ok(entries) => {
                    let count = entries.len();
                    for (key, entry) in entries {
                        keyspace.set(key, entry).await;
                    }
                    info!("loaded {} keys from {}", count, path.display());
                }
                Err(e) => warn!("ignoring snapshot {}: {}", path.display(), e),
            },
            Err(_) => debug!("no snapshot at {}", path.display()),
        }

        let replication = Arc::new(match &config.replicaof {
            Some((host, port)) => ReplicationConfig::new_replica(host.clone(), *port),
            None => ReplicationConfig::new_master(),
        });

        let listener = TcpListener::bind(("127.0.0.1", config.port))
            .await
            .with_context(|| format!("failed to bind port {}", config.port))?;
        let local_addr = listener.local_addr().context("listener address")?;

        Ok(Server {
            listener,
            local_addr,
            keyspace,
            config: Arc::new(config),
            replication,
        })
    }

    /// The address actually bound, which differs from the configured
    /// one when port 0 requested an ephemeral port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop. If this node is a follower, the outbound link to
    /// the master runs alongside it; either way clients are served
    /// the moment the socket is open.
    pub async fn run(self) -> Result<()> {
        if self.config.replicaof.is_some() {
            let keyspace = self.keyspace.clone();
            let config = Arc::clone(&self.config);
            let replication = Arc::clone(&self.replication);
            let listen_port = self.local_addr.port();
            tokio::spawn(async move {
                if let Err(e) =
                    replica::start_replication(keyspace, config, replication, listen_port).await
                {
                    error!("replication link ended: {:#}", e);
                }
            });
        }

        loop {
            let (stream, addr) = self.listener.accept().await.context("accept failed")?;
            debug!("accepted connection from {}", addr);
            let keyspace = self.keyspace.clone();
            let config = Arc::clone(&self.config);
            let replication = Arc::clone(&self.replication);
            tokio::spawn(async move {
                connection::handle_connection(stream, addr, keyspace, config, replication).await;
            });
        }
    }
}
