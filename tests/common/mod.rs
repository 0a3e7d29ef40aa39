//! Scripted protocol peers shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use podbridge::rpc::{Call, Reply};
use podbridge::{Connector, Result, RpcChannel};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};

// =============================================================================
// Manual Peer
// =============================================================================

/// Service side of an in-memory connection, driven step by step.
pub struct Peer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

/// A client channel wired to a scripted service peer.
pub fn channel_pair() -> (RpcChannel, Peer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (read, write) = tokio::io::split(server);
    let peer = Peer {
        reader: BufReader::new(read),
        writer: write,
    };
    (RpcChannel::new(client), peer)
}

impl Peer {
    /// Next call from the client, `None` once the client hung up.
    pub async fn next_call(&mut self) -> Option<Call> {
        let mut line = String::new();
        match self.reader.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(Call::from_json(&line).expect("client sent invalid call")),
        }
    }

    /// Reads the next call and checks its method.
    pub async fn expect_call(&mut self, method: &str) -> Call {
        let call = self.next_call().await.expect("client closed the connection");
        assert_eq!(call.method, method);
        call
    }

    pub async fn try_send(&mut self, reply: &Reply) -> std::io::Result<()> {
        let line = reply.to_json_line().expect("reply serializes");
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await
    }

    pub async fn send(&mut self, reply: Reply) {
        self.try_send(&reply).await.expect("client hung up");
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("client hung up");
        self.writer.flush().await.expect("client hung up");
    }

    pub async fn read_raw(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        self.reader.read_exact(&mut buf).await.expect("short raw read");
        buf
    }

    /// Closes the service's write side; the client reads EOF.
    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
    }
}

// =============================================================================
// Scripted Service
// =============================================================================

type Handler = dyn Fn(&Call) -> Vec<Reply> + Send + Sync;

/// Connector to an in-memory service answering calls through a handler.
///
/// After replying to an upgrading call the service writes `raw` and closes
/// the connection.
#[derive(Clone)]
pub struct ScriptedService {
    handler: Arc<Handler>,
    raw: Arc<Vec<u8>>,
    calls: Arc<Mutex<Vec<Call>>>,
    connects: Arc<AtomicUsize>,
    call_timeout: Option<Duration>,
}

impl ScriptedService {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Call) -> Vec<Reply> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            raw: Arc::new(Vec::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            connects: Arc::new(AtomicUsize::new(0)),
            call_timeout: None,
        }
    }

    /// Deadline applied to every channel this connector opens.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_raw(mut self, raw: &[u8]) -> Self {
        self.raw = Arc::new(raw.to_vec());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.method).collect()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedService {
    async fn connect(&self) -> Result<RpcChannel> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (channel, mut peer) = channel_pair();
        let handler = Arc::clone(&self.handler);
        let raw = Arc::clone(&self.raw);
        let calls = Arc::clone(&self.calls);
        tokio::spawn(async move {
            while let Some(call) = peer.next_call().await {
                calls.lock().unwrap().push(call.clone());
                for reply in handler(&call) {
                    if peer.try_send(&reply).await.is_err() {
                        return;
                    }
                }
                if call.upgrade {
                    peer.write_raw(&raw).await;
                    peer.close().await;
                    return;
                }
            }
        });
        Ok(channel.with_timeout(self.call_timeout))
    }

    fn address(&self) -> String {
        "scripted".to_string()
    }
}
