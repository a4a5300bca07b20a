//! Inbound events and outbound sends exchanged with the transport.
//!
//! Both directions are tagged unions so the dispatcher can match exhaustively
//! on the event kind instead of comparing strings.

use serde::{Deserialize, Serialize};

use crate::contacts::Subscription;

/// Chat message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    #[default]
    Chat,
    GroupChat,
    Normal,
    Headline,
}

/// Presence stanza type. An empty wire type is an availability notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceType {
    #[default]
    #[serde(alias = "")]
    Available,
    Unavailable,
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
    Probe,
    Error,
}

impl PresenceType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "",
            Self::Unavailable => "unavailable",
            Self::Subscribe => "subscribe",
            Self::Subscribed => "subscribed",
            Self::Unsubscribe => "unsubscribe",
            Self::Unsubscribed => "unsubscribed",
            Self::Probe => "probe",
            Self::Error => "error",
        }
    }
}

/// Query (IQ) verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IqType {
    Get,
    Set,
    Result,
    Error,
}

impl IqType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Result => "result",
            Self::Error => "error",
        }
    }
}

/// Inbound chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender address, possibly with resource
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub kind: ChatKind,
    #[serde(default)]
    pub text: String,
}

/// Inbound presence notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceNotice {
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default, rename = "type")]
    pub kind: PresenceType,
    #[serde(default)]
    pub show: String,
}

/// One roster entry as pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterItem {
    pub jid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub subscription: Subscription,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Roster delivered by the transport already decoded.
///
/// Handled exactly like a `jabber:iq:roster` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterPush {
    #[serde(default)]
    pub to: String,
    pub items: Vec<RosterItem>,
}

/// Inbound query stanza; `payload` is the raw child element XML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStanza {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IqType,
    #[serde(default)]
    pub payload: String,
}

/// One discrete inbound protocol event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Chat(ChatMessage),
    Presence(PresenceNotice),
    RosterPush(RosterPush),
    Query(QueryStanza),
}

/// Outbound query stanza.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundQuery {
    #[serde(default)]
    pub from: String,
    /// Empty means "to the server / own account"
    #[serde(default)]
    pub to: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IqType,
    /// Namespace of the payload's root element
    pub namespace: String,
    /// Child element XML
    pub payload: String,
}

/// Something the bot sends through the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "send", rename_all = "snake_case")]
pub enum Outbound {
    Message {
        to: String,
        #[serde(default)]
        kind: ChatKind,
        text: String,
    },
    Presence {
        to: String,
        #[serde(rename = "type")]
        kind: PresenceType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        show: Option<String>,
    },
    Query(OutboundQuery),
}

impl Outbound {
    /// One-to-one chat message.
    pub fn chat(to: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Message {
            to: to.into(),
            kind: ChatKind::Chat,
            text: text.into(),
        }
    }

    /// Presence of the given type with no `show`.
    pub fn presence(to: impl Into<String>, kind: PresenceType) -> Self {
        Self::Presence {
            to: to.into(),
            kind,
            show: None,
        }
    }

    /// Approve a peer's subscription request.
    pub fn approve_subscription(to: impl Into<String>) -> Self {
        Self::presence(to, PresenceType::Subscribed)
    }

    /// Ask a peer for a subscription to its presence.
    pub fn request_subscription(to: impl Into<String>) -> Self {
        Self::presence(to, PresenceType::Subscribe)
    }

    /// Revoke a peer's subscription to our presence.
    pub fn revoke_subscription(to: impl Into<String>) -> Self {
        Self::presence(to, PresenceType::Unsubscribed)
    }

    /// Directed availability with `show=xa`.
    pub fn directed_available(to: impl Into<String>) -> Self {
        Self::Presence {
            to: to.into(),
            kind: PresenceType::Available,
            show: Some("xa".into()),
        }
    }

    /// Recipient address of this send.
    pub fn recipient(&self) -> &str {
        match self {
            Self::Message { to, .. } | Self::Presence { to, .. } => to,
            Self::Query(query) => &query.to,
        }
    }
}
