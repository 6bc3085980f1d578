//! Shared helpers for the end-to-end suites: a server on an ephemeral port
//! and a minimal blocking HTTP client.

#![allow(dead_code, reason = "each suite uses a different subset")]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use gatehouse_config::ListenEndpoint;
use gatehoused::content::{MemoryStore, StoreContentBuilder};
use gatehoused::dispatch::SharedDatabase;
use gatehoused::{ServerBuilder, ServerHandle};

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for the bundled store on a loopback listener without ACL.
pub fn store_server() -> ServerBuilder<MemoryStore> {
    ServerBuilder::new(
        SharedDatabase::new(MemoryStore::new()),
        Arc::new(StoreContentBuilder::new()),
    )
    .listen(loopback(), false)
    .shutdown_timeout(IO_TIMEOUT)
}

pub fn loopback() -> ListenEndpoint {
    ListenEndpoint::tcp("127.0.0.1", 0)
}

/// First bound address of a running server.
pub fn address(handle: &ServerHandle) -> SocketAddr {
    *handle.local_addrs().first().expect("server has a listener")
}

/// Parsed response as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response body is JSON")
    }
}

/// Keep-alive client connection.
pub struct Client {
    reader: BufReader<TcpStream>,
}

impl Client {
    pub fn connect(address: SocketAddr) -> Self {
        let stream = TcpStream::connect(address).expect("connect to server");
        stream
            .set_read_timeout(Some(IO_TIMEOUT))
            .expect("set read timeout");
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Writes raw bytes, which may hold several requests.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.reader
            .get_mut()
            .write_all(bytes)
            .expect("write request");
    }

    pub fn get(&mut self, target: &str) -> Response {
        self.send_raw(get_request(target, &[]).as_bytes());
        self.read_response()
    }

    pub fn post(&mut self, target: &str, body: &str) -> Response {
        self.send_raw(post_request(target, body).as_bytes());
        self.read_response()
    }

    /// Reads one `Content-Length` framed response.
    pub fn read_response(&mut self) -> Response {
        let mut status_line = String::new();
        self.reader
            .read_line(&mut status_line)
            .expect("read status line");
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap_or_else(|| panic!("malformed status line: {status_line:?}"));

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            self.reader.read_line(&mut line).expect("read header line");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').expect("header has a colon");
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }
        let length = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = vec![0; length];
        self.reader.read_exact(&mut body).expect("read body");
        Response {
            status,
            headers,
            body,
        }
    }

    /// Whether no further bytes arrive within `wait`, leaving the connection
    /// open.
    pub fn stays_quiet_for(&mut self, wait: Duration) -> bool {
        if !self.reader.buffer().is_empty() {
            return false;
        }
        self.reader
            .get_ref()
            .set_read_timeout(Some(wait))
            .expect("set read timeout");
        let quiet = match self.reader.fill_buf() {
            Ok(bytes) => bytes.is_empty(),
            Err(error) => matches!(
                error.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
        };
        self.reader
            .get_ref()
            .set_read_timeout(Some(IO_TIMEOUT))
            .expect("restore read timeout");
        quiet
    }

    /// Whether the server closed the connection without sending anything.
    pub fn closed_without_response(&mut self) -> bool {
        let mut rest = Vec::new();
        match self.reader.read_to_end(&mut rest) {
            Ok(_) => rest.is_empty(),
            Err(error) => error.kind() == std::io::ErrorKind::ConnectionReset,
        }
    }
}

pub fn get_request(target: &str, extra: &[(&str, &str)]) -> String {
    let mut request = format!("GET {target} HTTP/1.1\r\nHost: gatehouse.test\r\n");
    for (name, value) in extra {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    request
}

pub fn post_request(target: &str, body: &str) -> String {
    format!(
        "POST {target} HTTP/1.1\r\nHost: gatehouse.test\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

/// JSON-RPC `echo` call carrying `id`.
pub fn echo_call(id: u64) -> String {
    post_request(
        "/?mjsonrpc",
        &format!(r#"{{"jsonrpc":"2.0","method":"echo","params":{{"n":{id}}},"id":{id}}}"#),
    )
}
