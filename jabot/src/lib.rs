//! jabot - a presence-aware chat-protocol bot engine.
//!
//! The engine keeps one session against a federated messaging network,
//! tracks contacts, subscriptions and presence, answers introspection
//! queries and routes chat to local commands or a conversational backend.
//!
//! ## Architecture
//!
//! ```text
//! Transport::receive ──► Bot::handle_event ──┬─► SubscriptionHandler (presence)
//!                                            ├─► QueryResponder (queries, roster)
//!                                            └─► CommandRouter (chat) ──► ChatBackend
//!                               │
//!                               ▼
//!                         ContactStore ◄── BotHandle (snapshots from other tasks)
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod backend;
pub mod console;
pub mod contacts;
pub mod error;
pub mod event;
pub mod jid;
pub mod query;
pub mod router;
pub mod session;
pub mod subscription;
pub mod transport;

// Re-export commonly used types
pub use backend::{BackendError, BackendResult, ChatBackend, TulingBackend};
pub use contacts::{Avatar, Contact, ContactStore, ContactUpdate, SharedContacts, Subscription};
pub use error::{BotError, BotResult};
pub use event::{
    ChatKind, ChatMessage, Event, IqType, Outbound, OutboundQuery, PresenceNotice, PresenceType,
    QueryStanza, RosterItem, RosterPush,
};
pub use query::{QueryKind, QueryResponder};
pub use router::{CommandHandler, CommandRegistry, CommandRouter, MonitorHook, RouterConfig};
pub use session::{Bot, BotHandle, SessionState};
pub use subscription::SubscriptionHandler;
pub use transport::{
    Connector, Credentials, GatewayConnector, MemoryConnector, MemoryPeer, Transport,
    TransportError, TransportResult,
};

use std::sync::Arc;

use jabot_common::Config;

/// Build a bot wired to the configured gateway and backend, with the
/// built-in commands registered.
pub fn build_bot(config: &Config) -> Bot {
    let connector = Arc::new(GatewayConnector::from_config(&config.gateway));
    let backend: Option<Arc<dyn ChatBackend>> = if config.backend.enabled {
        Some(Arc::new(TulingBackend::from_config(&config.backend)))
    } else {
        tracing::info!("Conversational backend disabled");
        None
    };
    Bot::new(config, connector, CommandRegistry::with_builtins(), backend)
}
