//! Test utilities for the end-to-end tests.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use mockhook::config::Configuration;
use mockhook::dump::{Sink, START_MARKER};
use mockhook::server::{RunningServer, WebhookServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// In-memory writer that can be read back while a `Sink` holds a clone of it
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, decoded lossily
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Start a server on a free loopback port that writes into a fresh buffer
pub fn start() -> (RunningServer, SharedBuffer) {
    let buffer = SharedBuffer::new();
    let configuration = Configuration {
        host: "127.0.0.1".to_string(),
        port: 0,
    };

    let server = WebhookServer::new(configuration, Sink::new(buffer.clone()))
        .start()
        .expect("server failed to start");

    (server, buffer)
}

/// Send one raw request and read until the server closes the connection
pub async fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();

    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    String::from_utf8_lossy(&response).into_owned()
}

pub fn status_line(response: &str) -> &str {
    response.lines().next().unwrap_or("")
}

pub fn blocks(output: &str) -> Vec<&str> {
    output
        .split(START_MARKER)
        .filter(|block| !block.is_empty())
        .collect()
}

/// The indented header lines of the first block in `output`
pub fn header_lines(output: &str) -> Vec<&str> {
    output
        .lines()
        .skip_while(|line| *line != "Headers:")
        .skip(1)
        .take_while(|line| *line != "Body:")
        .collect()
}
