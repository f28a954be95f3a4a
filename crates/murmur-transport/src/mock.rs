//! In-memory connector for tests: scripts connection outcomes and hands
//! the test a peer handle for each accepted connection.

use std::collections::VecDeque;

use async_trait::async_trait;
use murmur_core::VoiceError;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::connector::{Connector, FrameSink, FrameSocket, FrameStream, SocketFrame};

/// Scripted outcome for one `connect` call.
#[derive(Clone, Copy, Debug)]
pub enum ConnectOutcome {
    Accept,
    Refuse,
}

/// Server side of an accepted mock connection.
pub struct MockPeer {
    pub url: String,
    to_client: mpsc::UnboundedSender<SocketFrame>,
    from_client: mpsc::UnboundedReceiver<SocketFrame>,
}

impl MockPeer {
    pub fn send(&self, frame: SocketFrame) {
        let _ = self.to_client.send(frame);
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        self.send(SocketFrame::Binary(bytes));
    }

    /// Next frame the client wrote, skipping pings and pongs.
    pub async fn recv_frame(&mut self) -> Option<SocketFrame> {
        loop {
            match self.from_client.recv().await? {
                SocketFrame::Ping | SocketFrame::Pong => continue,
                frame => return Some(frame),
            }
        }
    }

    /// Next binary frame the client wrote.
    pub async fn recv_binary(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.recv_frame().await? {
                SocketFrame::Binary(bytes) => return Some(bytes),
                _ => continue,
            }
        }
    }

    /// Drop the connection without a close frame, as a dying server would.
    pub fn abort(self) {}
}

/// Connector whose connections live in memory. Outcomes are scripted with
/// [`MockConnector::push_outcome`]; unscripted calls accept.
pub struct MockConnector {
    plan: Mutex<VecDeque<ConnectOutcome>>,
    attempts: Mutex<Vec<tokio::time::Instant>>,
    peer_tx: mpsc::UnboundedSender<MockPeer>,
    peer_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockPeer>>,
}

impl MockConnector {
    pub fn new() -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        Self {
            plan: Mutex::new(VecDeque::new()),
            attempts: Mutex::new(Vec::new()),
            peer_tx,
            peer_rx: tokio::sync::Mutex::new(peer_rx),
        }
    }

    pub fn push_outcome(&self, outcome: ConnectOutcome) {
        self.plan.lock().push_back(outcome);
    }

    pub fn refuse_next(&self, count: usize) {
        let mut plan = self.plan.lock();
        for _ in 0..count {
            plan.push_back(ConnectOutcome::Refuse);
        }
    }

    /// Wait for the next accepted connection and return its peer handle.
    pub async fn accept(&self) -> MockPeer {
        self.peer_rx
            .lock()
            .await
            .recv()
            .await
            .expect("mock connector dropped")
    }

    /// Instants at which `connect` was called, in order.
    pub fn attempt_times(&self) -> Vec<tokio::time::Instant> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSocket>, VoiceError> {
        self.attempts.lock().push(tokio::time::Instant::now());

        let outcome = self
            .plan
            .lock()
            .pop_front()
            .unwrap_or(ConnectOutcome::Accept);
        match outcome {
            ConnectOutcome::Refuse => Err(VoiceError::NetworkUnavailable),
            ConnectOutcome::Accept => {
                let (to_client, incoming) = mpsc::unbounded_channel();
                let (outgoing, from_client) = mpsc::unbounded_channel();
                let _ = self.peer_tx.send(MockPeer {
                    url: url.to_string(),
                    to_client,
                    from_client,
                });
                Ok(Box::new(MockSocket { incoming, outgoing }))
            }
        }
    }
}

struct MockSocket {
    incoming: mpsc::UnboundedReceiver<SocketFrame>,
    outgoing: mpsc::UnboundedSender<SocketFrame>,
}

impl FrameSocket for MockSocket {
    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameStream>) {
        (
            Box::new(MockSink {
                outgoing: self.outgoing,
            }),
            Box::new(MockStream {
                incoming: self.incoming,
            }),
        )
    }
}

struct MockSink {
    outgoing: mpsc::UnboundedSender<SocketFrame>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: SocketFrame) -> Result<(), VoiceError> {
        self.outgoing
            .send(frame)
            .map_err(|_| VoiceError::SendFailed("mock peer gone".into()))
    }

    async fn close(&mut self, code: u16) {
        let _ = self.outgoing.send(SocketFrame::Close(Some(code)));
    }
}

struct MockStream {
    incoming: mpsc::UnboundedReceiver<SocketFrame>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn next(&mut self) -> Option<SocketFrame> {
        self.incoming.recv().await
    }
}
