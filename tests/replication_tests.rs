mod common;

use bytes::{Buf, Bytes, BytesMut};
use common::*;
use redis_lite::command_parser::parse_command;
use redis_lite::rdb_parser::empty_rdb;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_replica_of(master: SocketAddr) -> SocketAddr {
    let replicaof = format!("127.0.0.1 {}", master.port());
    start_server(&["--port", "0", "--replicaof", &replicaof]).await
}

/// Reads one complete command frame from a replication link.
async fn read_frame(stream: &mut TcpStream, buffer: &mut BytesMut) -> Vec<Bytes> {
    loop {
        if let Some(parsed) = parse_command(&buffer[..]).expect("well formed frame") {
            buffer.advance(parsed.frame_len);
            return parsed.args;
        }
        let read = stream.read_buf(buffer).await.expect("read from link");
        assert!(read > 0, "link closed mid-frame");
    }
}

/// Serves the master half of the replication handshake on an accepted
/// connection, answering with the given replication id.
async fn serve_handshake(link: &mut TcpStream, buffer: &mut BytesMut, replid: &str) {
    let args = read_frame(link, buffer).await;
    assert!(args[0].eq_ignore_ascii_case(b"PING"));
    link.write_all(b"+PONG\r\n").await.expect("pong");

    let args = read_frame(link, buffer).await;
    assert!(args[0].eq_ignore_ascii_case(b"REPLCONF"));
    assert!(args[1].eq_ignore_ascii_case(b"listening-port"));
    link.write_all(b"+OK\r\n").await.expect("ok");

    let args = read_frame(link, buffer).await;
    assert!(args[0].eq_ignore_ascii_case(b"REPLCONF"));
    assert!(args[1].eq_ignore_ascii_case(b"capa"));
    link.write_all(b"+OK\r\n").await.expect("ok");

    let args = read_frame(link, buffer).await;
    assert!(args[0].eq_ignore_ascii_case(b"PSYNC"));
    assert_eq!(&args[1][..], b"?");
    assert_eq!(&args[2][..], b"-1");

    let snapshot = empty_rdb();
    let mut payload = format!("+FULLRESYNC {} 0\r\n", replid).into_bytes();
    payload.extend_from_slice(format!("${}\r\n", snapshot.len()).as_bytes());
    payload.extend_from_slice(&snapshot);
    link.write_all(&payload).await.expect("fullresync");
}

/// Performs the replica half of the handshake against a real master
/// and returns the link with the snapshot already consumed.
async fn join_as_replica(master: SocketAddr) -> TcpStream {
    let mut link = connect(master).await;
    assert_eq!(request(&mut link, &["PING"]).await, b"+PONG\r\n");
    assert_eq!(
        request(&mut link, &["REPLCONF", "listening-port", "7777"]).await,
        b"+OK\r\n"
    );
    assert_eq!(
        request(&mut link, &["REPLCONF", "capa", "psync2"]).await,
        b"+OK\r\n"
    );

    link.write_all(&encode(&["PSYNC", "?", "-1"]))
        .await
        .expect("send psync");
    let header = read_reply(&mut link).await;
    let header_text = String::from_utf8_lossy(&header).into_owned();
    assert!(
        header_text.starts_with("+FULLRESYNC "),
        "unexpected PSYNC reply {}",
        header_text
    );
    let replid = header_text
        .trim_start_matches("+FULLRESYNC ")
        .split(' ')
        .next()
        .expect("replid field");
    assert_eq!(replid.len(), 40);

    // bulk-framed snapshot, no trailing CRLF after the payload
    let mut length_line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        link.read_exact(&mut byte).await.expect("snapshot header");
        length_line.push(byte[0]);
        if length_line.ends_with(b"\r\n") {
            break;
        }
    }
    assert_eq!(length_line[0], b'$');
    let length: usize = std::str::from_utf8(&length_line[1..length_line.len() - 2])
        .expect("ascii length")
        .parse()
        .expect("numeric length");
    let snapshot = read_exact(&mut link, length).await;
    assert!(snapshot.starts_with(b"REDIS0011"));
    link
}

#[tokio::test]
async fn writes_propagate_to_a_real_replica() {
    let master = start_server(&["--port", "0"]).await;
    let replica = start_replica_of(master).await;
    wait_for_replicas(master, 1).await;

    let mut client = connect(master).await;
    assert_eq!(request(&mut client, &["SET", "k", "v"]).await, b"+OK\r\n");
    wait_for_value(replica, "k", b"$1\r\nv\r\n").await;

    let mut replica_client = connect(replica).await;
    let info = request(&mut replica_client, &["INFO", "replication"]).await;
    assert!(String::from_utf8_lossy(&info).contains("role:slave"));
}

#[tokio::test]
async fn del_and_incr_replicate() {
    let master = start_server(&["--port", "0"]).await;
    let replica = start_replica_of(master).await;
    wait_for_replicas(master, 1).await;

    let mut client = connect(master).await;
    request(&mut client, &["SET", "n", "5"]).await;
    assert_eq!(request(&mut client, &["INCR", "n"]).await, b":6\r\n");
    request(&mut client, &["SET", "gone", "x"]).await;
    assert_eq!(request(&mut client, &["DEL", "gone"]).await, b":1\r\n");

    wait_for_value(replica, "n", b"$1\r\n6\r\n").await;
    wait_for_value(replica, "gone", b"$-1\r\n").await;
}

#[tokio::test]
async fn propagated_frames_are_canonical_resp_arrays() {
    let master = start_server(&["--port", "0"]).await;
    let mut link = join_as_replica(master).await;
    wait_for_replicas(master, 1).await;

    let mut client = connect(master).await;
    assert_eq!(request(&mut client, &["SET", "k", "v"]).await, b"+OK\r\n");

    let expected = encode(&["SET", "k", "v"]);
    let propagated = read_exact(&mut link, expected.len()).await;
    assert_eq!(propagated, expected);
}

#[tokio::test]
async fn wait_barrier_resolves_when_the_ack_arrives() {
    let master = start_server(&["--port", "0"]).await;
    let mut link = join_as_replica(master).await;
    wait_for_replicas(master, 1).await;

    let mut client = connect(master).await;
    assert_eq!(request(&mut client, &["SET", "k", "v"]).await, b"+OK\r\n");
    let set_frame = encode(&["SET", "k", "v"]);
    let propagated = read_exact(&mut link, set_frame.len()).await;
    assert_eq!(propagated, set_frame);

    // WAIT blocks on the master until the ACK below lands
    let wait_task = tokio::spawn(async move {
        let mut waiter = connect(master).await;
        request(&mut waiter, &["WAIT", "1", "2000"]).await
    });

    let getack = encode(&["REPLCONF", "GETACK", "*"]);
    let received = read_exact(&mut link, getack.len()).await;
    assert_eq!(received, getack);
    let ack_offset = set_frame.len().to_string();
    link.write_all(&encode(&["REPLCONF", "ACK", &ack_offset]))
        .await
        .expect("send ack");

    assert_eq!(wait_task.await.expect("wait task"), b":1\r\n");
}

#[tokio::test]
async fn wait_counts_all_replicas_when_nothing_was_written() {
    let master = start_server(&["--port", "0"]).await;
    let _replica_a = start_replica_of(master).await;
    let _replica_b = start_replica_of(master).await;
    wait_for_replicas(master, 2).await;

    let mut client = connect(master).await;
    // no writes yet: every replica trivially satisfies the barrier
    assert_eq!(request(&mut client, &["WAIT", "1", "100"]).await, b":2\r\n");
    assert_eq!(request(&mut client, &["WAIT", "0", "100"]).await, b":0\r\n");
}

#[tokio::test]
async fn wait_reaches_two_replicas_after_a_write() {
    let master = start_server(&["--port", "0"]).await;
    let replica_a = start_replica_of(master).await;
    let replica_b = start_replica_of(master).await;
    wait_for_replicas(master, 2).await;

    let mut client = connect(master).await;
    assert_eq!(request(&mut client, &["SET", "k", "v"]).await, b"+OK\r\n");
    wait_for_value(replica_a, "k", b"$1\r\nv\r\n").await;
    wait_for_value(replica_b, "k", b"$1\r\nv\r\n").await;

    assert_eq!(
        request(&mut client, &["WAIT", "2", "2000"]).await,
        b":2\r\n"
    );
}

#[tokio::test]
async fn replica_offset_accounting_matches_the_stream_bytes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake master");
    let master_addr = listener.local_addr().expect("fake master addr");
    let _replica = start_server(&[
        "--port",
        "0",
        "--replicaof",
        &format!("127.0.0.1 {}", master_addr.port()),
    ])
    .await;

    let (mut link, _) = listener.accept().await.expect("replica dialed in");
    let mut buffer = BytesMut::new();
    let replid = "a".repeat(40);
    serve_handshake(&mut link, &mut buffer, &replid).await;

    // 14 bytes of PING, 29 bytes of SET, then a GETACK: the ACK must
    // report 43, the bytes consumed before the GETACK frame
    link.write_all(&encode(&["PING"])).await.expect("ping");
    link.write_all(&encode(&["SET", "foo", "1"]))
        .await
        .expect("set");
    link.write_all(&encode(&["REPLCONF", "GETACK", "*"]))
        .await
        .expect("getack");

    let expected = b"*3\r\n$8\r\nREPLCONF\r\n$3\r\nACK\r\n$2\r\n43\r\n";
    let ack = read_exact(&mut link, expected.len()).await;
    assert_eq!(ack, expected);

    // the GETACK frame itself (37 bytes) is counted after the reply
    link.write_all(&encode(&["REPLCONF", "GETACK", "*"]))
        .await
        .expect("second getack");
    let expected = b"*3\r\n$8\r\nREPLCONF\r\n$3\r\nACK\r\n$2\r\n80\r\n";
    let ack = read_exact(&mut link, expected.len()).await;
    assert_eq!(ack, expected);
}

#[tokio::test]
async fn replica_applies_the_stream_silently() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake master");
    let master_addr = listener.local_addr().expect("fake master addr");
    let replica = start_server(&[
        "--port",
        "0",
        "--replicaof",
        &format!("127.0.0.1 {}", master_addr.port()),
    ])
    .await;

    let (mut link, _) = listener.accept().await.expect("replica dialed in");
    let mut buffer = BytesMut::new();
    let replid = "b".repeat(40);
    serve_handshake(&mut link, &mut buffer, &replid).await;

    link.write_all(&encode(&["SET", "n", "5"])).await.expect("set");
    link.write_all(&encode(&["INCR", "n"])).await.expect("incr");
    link.write_all(&encode(&["SET", "x", "y"])).await.expect("set x");
    link.write_all(&encode(&["DEL", "x"])).await.expect("del x");

    wait_for_value(replica, "n", b"$1\r\n6\r\n").await;
    wait_for_value(replica, "x", b"$-1\r\n").await;
}
