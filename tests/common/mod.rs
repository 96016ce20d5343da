#![allow(dead_code)]

use redis_lite::config::ServerConfig;
use redis_lite::server::Server;
use redis_lite::util::construct_redis_command;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Boots a server from CLI-style args on an in-process task and
/// returns the address it actually bound. Tests pass `--port 0` to
/// get an ephemeral port.
pub async fn start_server(args: &[&str]) -> SocketAddr {
    let config =
        ServerConfig::from_args(args.iter().map(|s| s.to_string())).expect("parse test config");
    let server = Server::setup(config).await.expect("server setup");
    let addr = server.local_addr();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

pub async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("connect to server")
}

pub fn encode(args: &[&str]) -> Vec<u8> {
    let arg_bytes: Vec<&[u8]> = args.iter().map(|arg| arg.as_bytes()).collect();
    construct_redis_command(&arg_bytes)
}

/// Sends one command and reads back one complete reply, raw.
pub async fn request(stream: &mut TcpStream, args: &[&str]) -> Vec<u8> {
    stream.write_all(&encode(args)).await.expect("send command");
    read_reply(stream).await
}

/// Reads exactly one RESP reply and returns its wire bytes. Arrays
/// are assumed to contain bulk strings, which is all this server
/// emits.
pub async fn read_reply(stream: &mut TcpStream) -> Vec<u8> {
    let mut reply = read_line(stream).await;
    match reply[0] {
        b'+' | b'-' | b':' => reply,
        b'$' => {
            let len = line_integer(&reply);
            if len >= 0 {
                reply.extend_from_slice(&read_exact(stream, len as usize + 2).await);
            }
            reply
        }
        b'*' => {
            let items = line_integer(&reply);
            for _ in 0..items {
                let header = read_line(stream).await;
                assert_eq!(header[0], b'$', "array elements should be bulk strings");
                let len = line_integer(&header);
                reply.extend_from_slice(&header);
                if len >= 0 {
                    reply.extend_from_slice(&read_exact(stream, len as usize + 2).await);
                }
            }
            reply
        }
        other => panic!("unexpected reply prefix {:?}", other as char),
    }
}

pub async fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.expect("read reply bytes");
    buf
}

async fn read_line(stream: &mut TcpStream) -> Vec<u8> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.expect("read reply line");
        line.push(byte[0]);
        if line.ends_with(b"\r\n") {
            return line;
        }
    }
}

fn line_integer(line: &[u8]) -> i64 {
    std::str::from_utf8(&line[1..line.len() - 2])
        .expect("reply header is ascii")
        .parse()
        .expect("reply header is a number")
}

/// Polls INFO until the master reports the wanted replica count.
pub async fn wait_for_replicas(master: SocketAddr, count: usize) {
    let needle = format!("connected_slaves:{}", count);
    for _ in 0..200 {
        let mut stream = connect(master).await;
        let reply = request(&mut stream, &["INFO", "replication"]).await;
        if String::from_utf8_lossy(&reply).contains(&needle) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("master never reported {} connected replicas", count);
}

/// Polls GET until it returns the expected raw reply.
pub async fn wait_for_value(addr: SocketAddr, key: &str, expected: &[u8]) {
    for _ in 0..200 {
        let mut stream = connect(addr).await;
        let reply = request(&mut stream, &["GET", key]).await;
        if reply == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("key '{}' never reached the expected value", key);
}
