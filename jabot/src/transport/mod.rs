//! Transport seam between the engine and the wire-level protocol client.
//!
//! The engine only sees decoded [`Event`]s and emits [`Outbound`] sends.
//! [`gateway`] talks JSON frames to a stanza gateway over WebSocket;
//! [`memory`] is an in-process pair used by tests and demos.

pub mod gateway;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::event::{Event, Outbound};

pub use gateway::GatewayConnector;
pub use memory::{MemoryConnector, MemoryPeer};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Session closed")]
    Closed,
}

/// Login credentials plus the session resource label.
#[derive(Clone)]
pub struct Credentials {
    pub jid: String,
    pub password: String,
    pub resource: String,
    /// Presence show announced on login
    pub status: String,
    /// Presence status line announced on login
    pub status_message: String,
}

impl Credentials {
    pub fn new(jid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            password: password.into(),
            resource: resource_label(),
            status: "xa".into(),
            status_message: String::new(),
        }
    }

    pub fn from_config(config: &jabot_common::Config) -> Self {
        Self {
            status: config.account.status.clone(),
            status_message: config.account.status_message.clone(),
            ..Self::new(&config.account.jid, &config.account.password)
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("jid", &self.jid)
            .field("password", &"***")
            .field("resource", &self.resource)
            .finish()
    }
}

/// Session resource label: `ebot-` followed by ten random digits.
pub fn resource_label() -> String {
    let mut rng = rand::thread_rng();
    let digits: String = (0..10)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect();
    format!("ebot-{digits}")
}

/// An established protocol session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &'static str;

    /// Wait for the next inbound event.
    ///
    /// Must be cancel-safe: dropping the future before it completes loses
    /// no event.
    async fn receive(&self) -> TransportResult<Event>;

    /// Send one outbound stanza.
    async fn send(&self, outbound: Outbound) -> TransportResult<()>;

    /// Release the session.
    async fn close(&self) -> TransportResult<()>;
}

/// Opens protocol sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> TransportResult<Arc<dyn Transport>>;
}
