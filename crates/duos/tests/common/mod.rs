#![allow(dead_code)]

use duo_common::types::DEFAULT_READ_BUFFER;
use duo_common::SniffingClassifier;
use duos::config::ServerConfig;
use duos::error::DuosError;
use duos::server::ServerState;
use duos::status::serve_status;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub fn test_config(listen: SocketAddr, status_addr: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        status_addr,
        max_conns: 64,
        read_buffer: DEFAULT_READ_BUFFER,
        control_phrase: "CATASTROPHE".to_string(),
        drain_timeout: 2,
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub status_addr: SocketAddr,
    pub state: Arc<ServerState>,
    pub handle: JoinHandle<Result<(), DuosError>>,
}

impl TestServer {
    /// Fetch `/count` over HTTP.
    pub async fn query_count(&self) -> String {
        let url = format!("http://{}/count", self.status_addr);
        let response = reqwest::get(url).await.unwrap();
        assert!(response.status().is_success());
        response.text().await.unwrap()
    }

    /// Poll the registry until it holds exactly `expected` peers.
    pub async fn wait_for_count(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.state.registry.count() != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "registry stuck at {} peers, expected {expected}",
                self.state.registry.count()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait for the accept loop to return.
    pub async fn join(self) -> Result<(), DuosError> {
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("timeout waiting for relay to stop")
            .unwrap()
    }
}

pub async fn start_server() -> TestServer {
    start_server_with(|_| {}).await
}

pub async fn start_server_with(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let status_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let status_addr = status_listener.local_addr().unwrap();

    let mut config = test_config(addr, status_addr);
    configure(&mut config);
    let classifier: SniffingClassifier = config.classifier().unwrap();
    let state = Arc::new(ServerState::new(config, classifier));

    tokio::spawn({
        let state = state.clone();
        async move {
            if let Err(e) = serve_status(status_listener, state, None).await {
                eprintln!("status server error in test: {e}");
            }
        }
    });
    let handle = tokio::spawn(duos::run(listener, state.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        status_addr,
        state,
        handle,
    }
}

pub struct TestClient {
    pub stream: TcpStream,
}

impl TestClient {
    pub async fn connect(addr: &SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self { stream }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.stream.local_addr().unwrap()
    }

    pub async fn send(&mut self, payload: &[u8]) {
        self.stream.write_all(payload).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Read exactly `len` bytes, however many relays they arrive in.
    pub async fn recv_exact(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_exact(&mut buf))
            .await
            .expect("timeout waiting for relayed bytes")
            .unwrap();
        buf
    }

    /// Returns `true` if nothing arrives within `wait`.
    pub async fn recv_nothing(&mut self, wait: Duration) -> bool {
        let mut buf = [0u8; 64];
        match tokio::time::timeout(wait, self.stream.read(&mut buf)).await {
            Err(_) => true,
            Ok(Ok(0)) | Ok(Err(_)) => true,
            Ok(Ok(_)) => false,
        }
    }

    /// Read until the relay closes the connection. Returns whatever arrived first.
    pub async fn recv_until_closed(&mut self) -> Vec<u8> {
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let read = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut buf))
                .await
                .expect("timeout waiting for relay to close connection");
            match read {
                Ok(0) | Err(_) => return received,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
    }
}

/// A minimal PCM WAV file: 44-byte header followed by `samples` bytes of data.
pub fn wav_bytes(samples: usize) -> Vec<u8> {
    let mut wav = Vec::with_capacity(44 + samples);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + samples as u32).to_le_bytes());
    wav.extend_from_slice(b"WAVEfmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&8000u32.to_le_bytes());
    wav.extend_from_slice(&8000u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&8u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(samples as u32).to_le_bytes());
    wav.extend((0..samples).map(|i| (i % 251) as u8));
    wav
}
