use crate::command::Command;
use crate::command_parser::parse_command;
use crate::config::ServerConfig;
use crate::keyspace::Keyspace;
use crate::protocol_constants::*;
use crate::rdb_parser::RdbParser;
use crate::replication_config::ReplicationConfig;
use crate::util::construct_redis_command;
use anyhow::{bail, Context, Result};
use bytes::{Buf, BytesMut};
use regex::Regex;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Runs the follower side of replication: the four-step handshake,
/// snapshot ingest, then the apply loop, which this task owns until
/// the link dies. Returns only on handshake or link failure.
pub async fn start_replication(
    keyspace: Keyspace,
    config: Arc<ServerConfig>,
    replication: Arc<ReplicationConfig>,
    listen_port: u16,
) -> Result<()> {
    let (host, port) = replication
        .master_addr()
        .context("started replication without a master address")?;
    let master_address = format!("{}:{}", host, port);
    let mut stream = TcpStream::connect(&master_address)
        .await
        .with_context(|| format!("failed to connect to master at {}", master_address))?;
    info!("connected to master at {}", master_address);

    let mut buffer = BytesMut::with_capacity(4096);

    send_command(&mut stream, &[PING_COMMAND.as_bytes()]).await?;
    expect_reply(&mut stream, &mut buffer, "+PONG").await?;

    let own_port = listen_port.to_string();
    send_command(
        &mut stream,
        &[
            REPLCONF_COMMAND.as_bytes(),
            REPLCONF_LISTENING_PORT.as_bytes(),
            own_port.as_bytes(),
        ],
    )
    .await?;
    expect_reply(&mut stream, &mut buffer, "+OK").await?;

    send_command(
        &mut stream,
        &[REPLCONF_COMMAND.as_bytes(), REPLCONF_CAPA.as_bytes(), b"psync2"],
    )
    .await?;
    expect_reply(&mut stream, &mut buffer, "+OK").await?;

    send_command(&mut stream, &[PSYNC_COMMAND.as_bytes(), b"?", b"-1"]).await?;
    let line = read_line(&mut stream, &mut buffer).await?;
    let fullresync =
        Regex::new(r"^\+FULLRESYNC ([0-9a-fA-F]{40}) (-?\d+)$").context("fullresync pattern")?;
    let captures = fullresync
        .captures(&line)
        .with_context(|| format!("unexpected PSYNC reply '{}'", line))?;
    info!(
        "full resync from master {} at offset {}",
        &captures[1], &captures[2]
    );

    ingest_snapshot(&mut stream, &mut buffer, &keyspace).await?;

    // everything already in the buffer past the snapshot is the live
    // command stream and must not be dropped
    apply_loop(stream, buffer, keyspace, config, replication).await
}

/// The streaming half of the link. Each fully parsed frame is applied
/// silently and counted into the replica offset by its exact wire
/// length; GETACK is the one frame that gets a reply, reporting the
/// offset as it stood before that frame.
async fn apply_loop(
    mut stream: TcpStream,
    mut buffer: BytesMut,
    keyspace: Keyspace,
    config: Arc<ServerConfig>,
    replication: Arc<ReplicationConfig>,
) -> Result<()> {
    let mut offset: u64 = 0;
    loop {
        loop {
            let parsed = match parse_command(&buffer[..]) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => break,
                Err(e) => bail!("malformed frame on master link: {}", e),
            };
            let frame_len = parsed.frame_len;
            buffer.advance(frame_len);

            match Command::parse(&parsed.args) {
                Ok(Command::Replconf(sub))
                    if sub
                        .first()
                        .map(|s| s.eq_ignore_ascii_case(b"GETACK"))
                        .unwrap_or(false) =>
                {
                    let ack_offset = offset.to_string();
                    let ack = construct_redis_command(&[
                        REPLCONF_COMMAND.as_bytes(),
                        b"ACK",
                        ack_offset.as_bytes(),
                    ]);
                    stream.write_all(&ack).await.context("sending ACK")?;
                    // the GETACK frame itself counts, but only after
                    // the reply reported the pre-GETACK offset
                    offset += frame_len as u64;
                }
                Ok(cmd) if cmd.is_write() => {
                    if let Err(e) = cmd.execute(&keyspace, &config, &replication).await {
                        debug!("replicated command failed locally: {}", e);
                    }
                    offset += frame_len as u64;
                }
                // PING keepalives and anything unrecognized advance
                // the offset and are otherwise ignored
                _ => offset += frame_len as u64,
            }
        }

        let read = stream
            .read_buf(&mut buffer)
            .await
            .context("reading from master")?;
        if read == 0 {
            bail!("master closed the replication link");
        }
    }
}

async fn send_command(stream: &mut TcpStream, args: &[&[u8]]) -> Result<()> {
    stream
        .write_all(&construct_redis_command(args))
        .await
        .context("sending handshake command to master")
}

async fn expect_reply(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    expected: &str,
) -> Result<()> {
    let line = read_line(stream, buffer).await?;
    if line != expected {
        bail!("master replied '{}', expected '{}'", line, expected);
    }
    Ok(())
}

/// One CRLF-terminated line from the master, pulled through the shared
/// buffer so bytes beyond the line survive for later stages.
async fn read_line(stream: &mut TcpStream, buffer: &mut BytesMut) -> Result<String> {
    loop {
        if let Some(pos) = buffer.windows(2).position(|window| window == b"\r\n") {
            let line = buffer.split_to(pos + 2);
            return Ok(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        let read = stream
            .read_buf(buffer)
            .await
            .context("reading handshake reply")?;
        if read == 0 {
            bail!("master closed the connection during handshake");
        }
    }
}

/// Reads the `$<len>\r\n<bytes>` snapshot frame. There is no trailing
/// CRLF after the payload.
async fn ingest_snapshot(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    keyspace: &Keyspace,
) -> Result<()> {
    let header = read_line(stream, buffer).await?;
    let length: usize = header
        .strip_prefix('$')
        .and_then(|len| len.parse().ok())
        .with_context(|| format!("unexpected snapshot header '{}'", header))?;

    while buffer.len() < length {
        let read = stream
            .read_buf(buffer)
            .await
            .context("reading snapshot payload")?;
        if read == 0 {
            bail!("master closed the connection mid-snapshot");
        }
    }
    let snapshot = buffer.split_to(length).freeze();

    match RdbParser::new(&snapshot).parse() {
        Ok(entries) => {
            let count = entries.len();
            for (key, entry) in entries {
                keyspace.set(key, entry).await;
            }
            info!("ingested replication snapshot, {} keys", count);
        }
        Err(e) => warn!("replication snapshot unreadable, starting empty: {}", e),
    }
    Ok(())
}
