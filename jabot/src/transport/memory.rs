//! In-process transport.
//!
//! A [`MemoryConnector`] hands out transports that read events pushed through
//! the matching [`MemoryPeer`] and record every send for inspection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Connector, Credentials, Transport, TransportError, TransportResult};
use crate::event::{Event, Outbound};

type Inbound = TransportResult<Event>;

#[derive(Default)]
struct Shared {
    sent: Mutex<Vec<Outbound>>,
    credentials: Mutex<Option<Credentials>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    reject_auth: AtomicBool,
    failing_sends: AtomicUsize,
}

/// Test-side end: inject events, inspect sends.
#[derive(Clone)]
pub struct MemoryPeer {
    events: mpsc::UnboundedSender<Inbound>,
    shared: Arc<Shared>,
}

impl MemoryPeer {
    /// Queue an inbound event.
    pub fn push(&self, event: Event) {
        let _ = self.events.send(Ok(event));
    }

    /// Queue a receive failure.
    pub fn fail(&self, error: TransportError) {
        let _ = self.events.send(Err(error));
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<Outbound> {
        self.shared.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Drain the send log.
    pub fn take_sent(&self) -> Vec<Outbound> {
        self.shared
            .sent
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }

    /// Make the next `count` sends fail without being recorded.
    pub fn fail_sends(&self, count: usize) {
        self.shared.failing_sends.store(count, Ordering::SeqCst);
    }

    /// Make the next connects fail authentication.
    pub fn reject_auth(&self, reject: bool) {
        self.shared.reject_auth.store(reject, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Credentials of the most recent connect.
    pub fn last_credentials(&self) -> Option<Credentials> {
        self.shared.credentials.lock().ok().and_then(|c| c.clone())
    }
}

/// Connector producing in-process transports.
pub struct MemoryConnector {
    events: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>>,
    shared: Arc<Shared>,
}

impl MemoryConnector {
    pub fn pair() -> (Self, MemoryPeer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let connector = Self {
            events: Arc::new(tokio::sync::Mutex::new(rx)),
            shared: shared.clone(),
        };
        (connector, MemoryPeer { events: tx, shared })
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, credentials: &Credentials) -> TransportResult<Arc<dyn Transport>> {
        if self.shared.reject_auth.load(Ordering::SeqCst) {
            return Err(TransportError::Auth(format!("{} rejected", credentials.jid)));
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.shared.credentials.lock() {
            *last = Some(credentials.clone());
        }
        Ok(Arc::new(MemoryTransport {
            events: self.events.clone(),
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Transport end handed to the engine.
pub struct MemoryTransport {
    events: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>>,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn receive(&self) -> TransportResult<Event> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut events = self.events.lock().await;
        events.recv().await.unwrap_or(Err(TransportError::Closed))
    }

    async fn send(&self, outbound: Outbound) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let failing = self
            .shared
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(TransportError::SendFailed("injected send failure".into()));
        }
        self.shared
            .sent
            .lock()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?
            .push(outbound);
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
