//! End-to-end tests over a real TCP socket.
//!
//! Each test binds its own server on an ephemeral port and talks to it
//! with a plain blocking client, one line per request and response.

use linecache::{Config, Server, ShardedCache};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn start_server_with(config: Config) -> (SocketAddr, Arc<ShardedCache>) {
    let mut server = Server::bind(&config).expect("bind failed");
    let addr = server.local_addr();
    let cache = server.cache();
    thread::spawn(move || {
        let _ = server.run();
    });
    (addr, cache)
}

fn start_server() -> SocketAddr {
    let config = Config {
        listen: "127.0.0.1:0".to_string(),
        ..Config::default()
    };
    start_server_with(config).0
}

struct TestClient {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl TestClient {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect failed");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let writer = stream.try_clone().unwrap();
        Self {
            writer,
            reader: BufReader::new(stream),
        }
    }

    fn request(&mut self, line: &str) -> String {
        self.writer.write_all(format!("{line}\n").as_bytes()).unwrap();
        self.writer.flush().unwrap();

        let mut response = String::new();
        self.reader.read_line(&mut response).unwrap();
        response.trim_end_matches('\n').to_string()
    }
}

#[test]
fn test_add_get_delete_roundtrip() {
    let addr = start_server();
    let mut client = TestClient::connect(addr);

    assert_eq!(client.request("ADD abcd test"), "OK");
    assert_eq!(client.request("GET abcd"), "test");
    assert_eq!(client.request("DELETE abcd"), "OK");
    assert_eq!(client.request("GET abcd"), "");
}

#[test]
fn test_heartbeat_ignores_cache_state() {
    let addr = start_server();
    let mut client = TestClient::connect(addr);

    assert_eq!(client.request("HEARTBEAT"), "OK");
    assert_eq!(client.request("ADD abcd test"), "OK");
    assert_eq!(client.request("HEARTBEAT"), "OK");
}

#[test]
fn test_unknown_command() {
    let addr = start_server();
    let mut client = TestClient::connect(addr);

    assert_eq!(client.request("FOO bar"), "ERROR Unknown command");
}

#[test]
fn test_protocol_errors_keep_connection_usable() {
    let addr = start_server();
    let mut client = TestClient::connect(addr);

    assert_eq!(client.request("ADD abcde test"), "ERROR key too large");
    assert_eq!(client.request("GET"), "ERROR Invalid GET format");
    assert_eq!(client.request("DELETE gone"), "ERROR Invalid key");

    // The same connection still serves valid requests
    assert_eq!(client.request("ADD abcd test"), "OK");
    assert_eq!(client.request("GET abcd"), "test");
}

#[test]
fn test_get_all_reflects_current_key_set() {
    let addr = start_server();
    let mut client = TestClient::connect(addr);

    assert_eq!(client.request("ADD abcd test1"), "OK");
    assert_eq!(client.request("ADD pqrs test2"), "OK");
    assert_eq!(client.request("ADD klmn test3"), "OK");
    assert_eq!(client.request("DELETE pqrs"), "OK");

    let response = client.request("GET ALL");
    let mut keys: Vec<&str> = response.split(',').collect();
    keys.sort();
    assert_eq!(keys, vec!["abcd", "klmn"]);
}

#[test]
fn test_responses_arrive_in_request_order() {
    let addr = start_server();
    let mut client = TestClient::connect(addr);

    for i in 0..20 {
        assert_eq!(client.request(&format!("ADD k{i} v{i}")), "OK");
    }
    for i in 0..20 {
        assert_eq!(client.request(&format!("GET k{i}")), format!("v{i}"));
    }
}

#[test]
fn test_connections_are_isolated() {
    let addr = start_server();
    let mut first = TestClient::connect(addr);
    let mut second = TestClient::connect(addr);

    assert_eq!(first.request("ADD abcd test"), "OK");

    // Abruptly dropping one connection must not disturb the other
    drop(first);

    assert_eq!(second.request("GET abcd"), "test");
    assert_eq!(second.request("HEARTBEAT"), "OK");
}

#[test]
fn test_concurrent_clients_on_distinct_keys() {
    let addr = start_server();
    let threads = 8;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            thread::spawn(move || {
                let mut client = TestClient::connect(addr);
                let key = format!("k{t}");
                assert_eq!(client.request(&format!("ADD {key} v{t}")), "OK");
                assert_eq!(client.request(&format!("GET {key}")), format!("v{t}"));
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // Every key is retrievable afterwards from a fresh connection
    let mut client = TestClient::connect(addr);
    for t in 0..threads {
        assert_eq!(client.request(&format!("GET k{t}")), format!("v{t}"));
    }
}

#[test]
fn test_requests_mutate_the_shared_cache() {
    let config = Config {
        listen: "127.0.0.1:0".to_string(),
        ..Config::default()
    };
    let (addr, cache) = start_server_with(config);
    let mut client = TestClient::connect(addr);

    assert_eq!(cache.len(), 0);
    assert_eq!(client.request("ADD abcd test"), "OK");
    assert_eq!(cache.get("abcd").as_deref(), Some("test"));

    assert_eq!(client.request("DELETE abcd"), "OK");
    assert!(cache.get("abcd").is_none());
    assert_eq!(cache.len(), 0);
}

#[test]
fn test_flooded_connection_is_closed_while_others_survive() {
    let config = Config {
        listen: "127.0.0.1:0".to_string(),
        write_queue_capacity: 2,
        ..Config::default()
    };
    let (addr, cache) = start_server_with(config);

    let mut healthy = TestClient::connect(addr);
    let value = "A".repeat(2096);
    assert_eq!(healthy.request(&format!("ADD cccc {value}")), "OK");

    // A client that keeps sending and never reads. A small receive buffer
    // makes the server's writes stall almost immediately, so the bounded
    // write queue overflows and the server closes the connection.
    let flooder = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .unwrap();
    flooder.set_recv_buffer_size(1024).unwrap();
    flooder.connect(&addr.into()).unwrap();
    let mut flooder: TcpStream = flooder.into();
    flooder
        .set_write_timeout(Some(Duration::from_secs(1)))
        .unwrap();

    let mut disconnected = false;
    for _ in 0..2000 {
        if flooder.write_all(b"GET cccc\n").is_err() {
            disconnected = true;
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    assert!(disconnected, "server never closed the flooded connection");

    // The other connection and the cache are untouched
    assert_eq!(healthy.request("HEARTBEAT"), "OK");
    assert_eq!(healthy.request("GET cccc"), value);
    assert_eq!(cache.len(), 1);
}
