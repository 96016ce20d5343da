use crate::command::{Command, CommandResponse};
use crate::command_parser::parse_command;
use crate::config::ServerConfig;
use crate::keyspace::Keyspace;
use crate::protocol_constants::*;
use crate::rdb_parser;
use crate::replication_config::{ReplicaHandle, ReplicationConfig, Role};
use crate::util::construct_redis_command;
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Serves one accepted connection until it closes. Frames are pulled
/// out of a growing buffer so a single read may carry half a command
/// or several; commands are answered one reply per frame. A PSYNC
/// handshake hands the write half over to the replica registry and
/// this task then only consumes ACKs.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    keyspace: Keyspace,
    config: Arc<ServerConfig>,
    replication: Arc<ReplicationConfig>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buffer = BytesMut::with_capacity(4096);
    // REPLCONF state a would-be replica announces before its PSYNC
    let mut pending_port: Option<u16> = None;
    let mut pending_capabilities: Vec<String> = Vec::new();

    loop {
        loop {
            let parsed = match parse_command(&buffer[..]) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => break,
                Err(e) => {
                    let reply = CommandResponse::Error(format!("ERR {}", e)).into_bytes();
                    let _ = writer.write_all(&reply).await;
                    debug!("closing {} after protocol error", addr);
                    return;
                }
            };
            let args = parsed.args;
            buffer.advance(parsed.frame_len);

            let command = match Command::parse(&args) {
                Ok(command) => command,
                Err(e) => {
                    let reply = CommandResponse::Error(format!("ERR {}", e)).into_bytes();
                    if writer.write_all(&reply).await.is_err() {
                        return;
                    }
                    continue;
                }
            };

            if let Command::Psync { ref replid, offset } = command {
                if replid != "?" || offset != -1 {
                    let reply =
                        CommandResponse::Error("ERR partial resync not supported".to_string())
                            .into_bytes();
                    if writer.write_all(&reply).await.is_err() {
                        return;
                    }
                    continue;
                }
                if full_resync(&mut writer, &replication).await.is_err() {
                    return;
                }
                let handle = Arc::new(ReplicaHandle::new(
                    addr,
                    writer,
                    pending_port,
                    pending_capabilities,
                ));
                replication.register_replica(Arc::clone(&handle)).await;
                info!("connection {} promoted to replica", addr);
                replica_ack_loop(&mut reader, &mut buffer, addr, &replication).await;
                replication.remove_replica(addr).await;
                return;
            }

            remember_replconf_state(&command, &mut pending_port, &mut pending_capabilities);

            let is_write = command.is_write();
            let reply = match command.execute(&keyspace, &config, &replication).await {
                Ok(response) => {
                    // a write joins the replication stream before its
                    // originating client hears +OK
                    if is_write && replication.role() == Role::Master {
                        let arg_refs: Vec<&[u8]> =
                            args.iter().map(|arg| arg.as_ref()).collect();
                        replication
                            .propagate(&construct_redis_command(&arg_refs))
                            .await;
                    }
                    response.into_bytes()
                }
                Err(e) => CommandResponse::Error(format!("ERR {}", e)).into_bytes(),
            };
            if !reply.is_empty() && writer.write_all(&reply).await.is_err() {
                return;
            }
        }

        match reader.read_buf(&mut buffer).await {
            Ok(0) => {
                debug!("client {} disconnected", addr);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("read error on {}: {}", addr, e);
                return;
            }
        }
    }
}

/// `+FULLRESYNC <replid> <offset>` then the snapshot framed as a bulk
/// string with no trailing CRLF after the payload.
async fn full_resync(
    writer: &mut OwnedWriteHalf,
    replication: &ReplicationConfig,
) -> std::io::Result<()> {
    let header = format!(
        "{}FULLRESYNC {} {}{}",
        SIMPLE_STRING_PREFIX,
        replication.master_replid(),
        replication.master_repl_offset(),
        CRLF
    );
    let snapshot = rdb_parser::empty_rdb();
    let mut payload = header.into_bytes();
    payload.extend_from_slice(
        format!("{}{}{}", BULK_STRING_PREFIX, snapshot.len(), CRLF).as_bytes(),
    );
    payload.extend_from_slice(&snapshot);
    writer.write_all(&payload).await
}

/// After promotion the only traffic this side reads is
/// `REPLCONF ACK <offset>`; anything else is ignored. Returns when the
/// link drops.
async fn replica_ack_loop(
    reader: &mut OwnedReadHalf,
    buffer: &mut BytesMut,
    addr: SocketAddr,
    replication: &ReplicationConfig,
) {
    loop {
        loop {
            let parsed = match parse_command(&buffer[..]) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => break,
                Err(_) => {
                    warn!("malformed frame from replica {}", addr);
                    return;
                }
            };
            buffer.advance(parsed.frame_len);
            let args = parsed.args;
            if args.len() == 3
                && args[0].eq_ignore_ascii_case(REPLCONF_COMMAND.as_bytes())
                && args[1].eq_ignore_ascii_case(b"ACK")
            {
                if let Ok(offset) = String::from_utf8_lossy(&args[2]).parse::<u64>() {
                    replication.record_ack(addr, offset).await;
                }
            }
        }
        match reader.read_buf(buffer).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn remember_replconf_state(
    command: &Command,
    pending_port: &mut Option<u16>,
    pending_capabilities: &mut Vec<String>,
) {
    if let Command::Replconf(sub) = command {
        if sub.len() >= 2 {
            let name = String::from_utf8_lossy(&sub[0]).to_lowercase();
            if name == REPLCONF_LISTENING_PORT {
                *pending_port = String::from_utf8_lossy(&sub[1]).parse().ok();
            } else if name == REPLCONF_CAPA {
                for capability in &sub[1..] {
                    pending_capabilities.push(String::from_utf8_lossy(capability).into_owned());
                }
            }
        }
    }
}
