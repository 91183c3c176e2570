//! Scripted socket connector for testing

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::transport::{Frame, SocketConnection, SocketConnector};
use crate::error::SocketError;

/// Outcome of one connect attempt
pub enum MockConnect {
    Fail,
    /// Open a connection that yields frames from the channel and closes
    /// when the sender is dropped
    Open(mpsc::UnboundedReceiver<Frame>),
}

impl MockConnect {
    /// An open outcome plus the sender that feeds it
    pub fn open() -> (mpsc::UnboundedSender<Frame>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, MockConnect::Open(rx))
    }
}

/// Connector that replays scripted outcomes, then fails every attempt
#[derive(Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<MockConnect>>,
    attempts: Mutex<Vec<Instant>>,
    closed: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, outcome: MockConnect) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
        self
    }

    /// When each connect attempt happened
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Connections closed from our side
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocketConnector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn SocketConnection>, SocketError> {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Instant::now());
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match next {
            Some(MockConnect::Open(frames)) => Ok(Box::new(MockConnection {
                frames,
                closed: Arc::clone(&self.closed),
            })),
            Some(MockConnect::Fail) | None => {
                Err(SocketError::Connect(format!("connection refused: {}", url)))
            }
        }
    }
}

struct MockConnection {
    frames: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl SocketConnection for MockConnection {
    async fn next_frame(&mut self) -> Option<Result<Frame, SocketError>> {
        self.frames.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
