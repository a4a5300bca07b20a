//! Query (IQ) responder.
//!
//! Inbound payloads are raw XML fragments. They are parsed once into a
//! [`QueryKind`] and dispatched by namespace and verb; anything unrecognized
//! is logged and dropped.

use std::time::Duration;

use base64::Engine;
use chrono_tz::Tz;
use minidom::Element;

use crate::contacts::{Avatar, ContactStore, ContactUpdate, Subscription};
use crate::event::{IqType, Outbound, OutboundQuery, QueryStanza, RosterItem};
use crate::jid;

/// Namespaces the responder understands.
pub mod ns {
    pub const VERSION: &str = "jabber:iq:version";
    pub const LAST: &str = "jabber:iq:last";
    pub const TIME: &str = "urn:xmpp:time";
    pub const ROSTER: &str = "jabber:iq:roster";
    pub const VCARD: &str = "vcard-temp";
    pub const PING: &str = "urn:xmpp:ping";
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
}

/// Id of the bot's own keep-alive ping.
pub const PING_ID: &str = "c2s1";

/// Id of profile fetches.
pub const VCARD_ID: &str = "vc";

/// Payload that could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("Malformed query payload: {0}")]
pub struct MalformedPayload(String);

/// Photo carried by a vCard, still base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Photo {
    pub mime_type: String,
    pub binval: String,
}

/// The parts of a vCard the bot cares about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VCard {
    pub full_name: String,
    pub nick_name: String,
    pub photo: Option<Photo>,
}

/// Query payload classified by namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    Version,
    Last,
    Time,
    Ping,
    Roster(Vec<RosterItem>),
    VCard(VCard),
    Unknown { namespace: String, name: String },
}

impl QueryKind {
    /// Parse a payload fragment. An empty payload yields `None`.
    pub fn parse(payload: &str) -> Result<Option<Self>, MalformedPayload> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(None);
        }
        let root = payload
            .parse::<Element>()
            .map_err(|e| MalformedPayload(e.to_string()))?;

        let namespace = root.ns();
        let kind = match (namespace.as_str(), root.name()) {
            (ns::VERSION, "query") => Self::Version,
            (ns::LAST, "query") => Self::Last,
            (ns::TIME, "time") => Self::Time,
            (ns::PING, "ping") => Self::Ping,
            (ns::ROSTER, "query") => Self::Roster(parse_roster(&root)),
            (ns::VCARD, "vCard") => Self::VCard(parse_vcard(&root)),
            (_, name) => Self::Unknown {
                namespace: namespace.clone(),
                name: name.to_string(),
            },
        };
        Ok(Some(kind))
    }
}

fn parse_subscription(value: Option<&str>) -> Subscription {
    match value.unwrap_or_default() {
        "from" => Subscription::From,
        "to" => Subscription::To,
        "both" => Subscription::Both,
        "remove" => Subscription::Removed,
        _ => Subscription::None,
    }
}

fn parse_roster(root: &Element) -> Vec<RosterItem> {
    root.children()
        .filter(|child| child.name() == "item")
        .filter_map(|item| {
            let Some(addr) = item.attr("jid").filter(|j| !j.is_empty()) else {
                tracing::debug!("Roster item without jid dropped");
                return None;
            };
            Some(RosterItem {
                jid: addr.to_string(),
                name: item.attr("name").map(str::to_string),
                subscription: parse_subscription(item.attr("subscription")),
                groups: item
                    .children()
                    .filter(|c| c.name() == "group")
                    .map(|c| c.text().trim().to_string())
                    .filter(|g| !g.is_empty())
                    .collect(),
            })
        })
        .collect()
}

fn child_text(parent: &Element, name: &str) -> String {
    parent
        .get_child(name, ns::VCARD)
        .map(|c| c.text().trim().to_string())
        .unwrap_or_default()
}

fn parse_vcard(root: &Element) -> VCard {
    let photo = root.get_child("PHOTO", ns::VCARD).and_then(|photo| {
        let binval = child_text(photo, "BINVAL");
        (!binval.is_empty()).then(|| Photo {
            mime_type: child_text(photo, "TYPE"),
            binval,
        })
    });
    VCard {
        full_name: child_text(root, "FN"),
        nick_name: child_text(root, "NICKNAME"),
        photo,
    }
}

fn decode_photo(photo: &Photo) -> Option<Avatar> {
    let compact: String = photo.binval.split_whitespace().collect();
    match base64::engine::general_purpose::STANDARD.decode(compact) {
        Ok(data) => Some(Avatar {
            mime_type: photo.mime_type.clone(),
            data,
        }),
        Err(e) => {
            tracing::info!(error = %e, "Ignoring undecodable vCard photo");
            None
        }
    }
}

/// Roster fetch request.
pub fn roster_request(id: impl Into<String>) -> Outbound {
    Outbound::Query(OutboundQuery {
        from: String::new(),
        to: String::new(),
        id: id.into(),
        kind: IqType::Get,
        namespace: ns::ROSTER.into(),
        payload: format!("<query xmlns='{}'/>", ns::ROSTER),
    })
}

/// Profile fetch request. An empty `to` fetches the bot's own card.
pub fn vcard_request(to: impl Into<String>) -> Outbound {
    Outbound::Query(OutboundQuery {
        from: String::new(),
        to: to.into(),
        id: VCARD_ID.into(),
        kind: IqType::Get,
        namespace: ns::VCARD.into(),
        payload: format!("<vCard xmlns='{}'/>", ns::VCARD),
    })
}

/// Keep-alive ping to the server.
pub fn ping_request(server: impl Into<String>) -> Outbound {
    Outbound::Query(OutboundQuery {
        from: String::new(),
        to: server.into(),
        id: PING_ID.into(),
        kind: IqType::Get,
        namespace: ns::PING.into(),
        payload: format!("<ping xmlns='{}'/>", ns::PING),
    })
}

/// Answers introspection queries and folds roster/profile replies into the
/// contact store.
#[derive(Debug, Clone)]
pub struct QueryResponder {
    identity: String,
    name: String,
    version: String,
    os: String,
    activity_tracking: bool,
    own_nick: String,
    zone: Tz,
}

impl QueryResponder {
    pub fn new(
        identity: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        activity_tracking: bool,
    ) -> Self {
        let identity = jid::bare(&identity.into()).to_string();
        Self {
            own_nick: jid::local_part(&identity).to_string(),
            identity,
            name: name.into(),
            version: version.into(),
            os: std::env::consts::OS.to_string(),
            activity_tracking,
            zone: local_zone(),
        }
    }

    /// Report `zone` in time replies instead of the host zone.
    pub fn with_time_zone(mut self, zone: Tz) -> Self {
        self.zone = zone;
        self
    }

    /// The bot's operating nickname, from its own vCard once fetched.
    pub fn own_nick(&self) -> &str {
        &self.own_nick
    }

    /// Handle one inbound query. `idle` is the time since the last outbound send.
    pub fn handle(
        &mut self,
        stanza: &QueryStanza,
        contacts: &mut ContactStore,
        idle: Duration,
    ) -> Vec<Outbound> {
        let kind = match QueryKind::parse(&stanza.payload) {
            Ok(Some(kind)) => kind,
            Ok(None) => {
                if stanza.kind == IqType::Result && stanza.id == PING_ID {
                    tracing::info!(from = %stanza.from, to = %stanza.to, "Got pong");
                } else {
                    tracing::debug!(
                        from = %stanza.from,
                        id = %stanza.id,
                        kind = stanza.kind.as_str(),
                        "Query without payload"
                    );
                }
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(from = %stanza.from, error = %e, "Dropping query");
                return Vec::new();
            }
        };

        match (kind, stanza.kind) {
            (QueryKind::Version, IqType::Get) => vec![self.version_reply(stanza)],
            (QueryKind::Last, IqType::Get) => vec![self.last_reply(stanza, idle)],
            (QueryKind::Time, IqType::Get) => vec![time_reply(stanza, self.zone)],
            (QueryKind::Ping, IqType::Get) => {
                vec![reply(stanza, IqType::Result, ns::PING, String::new())]
            }
            (QueryKind::Roster(items), verb @ (IqType::Result | IqType::Set)) => {
                apply_roster(contacts, &items, verb == IqType::Set)
            }
            (QueryKind::VCard(card), IqType::Result) => {
                self.apply_vcard(contacts, &stanza.from, card);
                Vec::new()
            }
            (QueryKind::Unknown { namespace, name }, _) => {
                tracing::info!(
                    from = %stanza.from,
                    namespace = %namespace,
                    element = %name,
                    "Ignoring unknown query"
                );
                Vec::new()
            }
            (kind, verb) => {
                tracing::debug!(
                    from = %stanza.from,
                    kind = ?kind,
                    verb = verb.as_str(),
                    "Ignoring query with unsupported verb"
                );
                Vec::new()
            }
        }
    }

    fn version_reply(&self, stanza: &QueryStanza) -> Outbound {
        let payload = format!(
            "<query xmlns='{}'><name>{}</name><version>{}</version><os>{}</os></query>",
            ns::VERSION,
            html_escape::encode_text(&self.name),
            html_escape::encode_text(&self.version),
            html_escape::encode_text(&self.os),
        );
        reply(stanza, IqType::Result, ns::VERSION, payload)
    }

    fn last_reply(&self, stanza: &QueryStanza, idle: Duration) -> Outbound {
        if !self.activity_tracking {
            let payload = format!(
                "<query xmlns='{}'/><error type='cancel'><service-unavailable xmlns='{}'/></error>",
                ns::LAST,
                ns::STANZAS,
            );
            return reply(stanza, IqType::Error, ns::LAST, payload);
        }
        let payload = format!(
            "<query xmlns='{}' seconds='{}'>Working</query>",
            ns::LAST,
            idle.as_secs()
        );
        reply(stanza, IqType::Result, ns::LAST, payload)
    }

    fn apply_vcard(&mut self, contacts: &mut ContactStore, from: &str, card: VCard) {
        let own = from.is_empty();
        let identity = if own {
            self.identity.clone()
        } else {
            jid::bare(from).to_string()
        };
        if own && !card.nick_name.is_empty() {
            tracing::info!(nick = %card.nick_name, "Got own nickname");
            self.own_nick = card.nick_name.clone();
        }

        let mut update = ContactUpdate::new(&identity).nick_name(card.nick_name.clone());
        // Roster names win over profile names.
        let named = contacts
            .get(&identity)
            .is_some_and(|c| !c.display_name.is_empty());
        if !named {
            update = update.display_name(card.full_name.clone());
        }
        if let Some(avatar) = card.photo.as_ref().and_then(decode_photo) {
            update = update.avatar(avatar);
        }
        contacts.merge(update);

        tracing::info!(
            from = %identity,
            full_name = %card.full_name,
            nick = %contacts.nick_name(&identity),
            "Got vCard"
        );
    }
}

/// Fold roster items into the store and emit the follow-up sends.
///
/// `is_set` distinguishes a server push from a fetch result.
pub fn apply_roster(contacts: &mut ContactStore, items: &[RosterItem], is_set: bool) -> Vec<Outbound> {
    let mut sends = Vec::new();
    for item in items {
        let identity = jid::bare(&item.jid);
        if item.subscription == Subscription::Removed {
            contacts.remove(identity);
            tracing::info!(jid = %identity, "Roster item removed");
            continue;
        }

        let mut update = ContactUpdate::new(identity)
            .groups(item.groups.iter().cloned())
            .subscription(item.subscription);
        if let Some(name) = &item.name {
            update = update.display_name(name.clone());
        }
        contacts.merge(update);

        let online = contacts.get(identity).is_some_and(|c| c.online);
        if item.subscription == Subscription::From && online {
            tracing::info!(jid = %identity, "Requesting subscription back");
            sends.push(Outbound::request_subscription(identity));
        }
        if is_set && item.subscription == Subscription::Both {
            sends.push(Outbound::directed_available(identity));
        }
        tracing::info!(
            jid = %identity,
            subscription = ?item.subscription,
            groups = ?item.groups,
            "Roster item"
        );
    }
    sends
}

fn reply(stanza: &QueryStanza, kind: IqType, namespace: &str, payload: String) -> Outbound {
    Outbound::Query(OutboundQuery {
        from: stanza.to.clone(),
        to: stanza.from.clone(),
        id: stanza.id.clone(),
        kind,
        namespace: namespace.to_string(),
        payload,
    })
}

/// Host time zone, UTC when it cannot be resolved.
pub fn local_zone() -> Tz {
    match iana_time_zone::get_timezone() {
        Ok(name) => name.parse().unwrap_or_else(|_| {
            tracing::debug!(zone = %name, "Unknown host time zone, using UTC");
            Tz::UTC
        }),
        Err(e) => {
            tracing::debug!(error = %e, "Host time zone unavailable, using UTC");
            Tz::UTC
        }
    }
}

fn time_reply(stanza: &QueryStanza, zone: Tz) -> Outbound {
    let now = chrono::Utc::now();
    // zone abbreviation, e.g. CST
    let tzo = now.with_timezone(&zone).format("%Z");
    let utc = now.format("%Y-%m-%dT%H:%M:%SZ");
    let payload = format!(
        "<time xmlns='{}'><tzo>{tzo}</tzo><utc>{utc}</utc></time>",
        ns::TIME
    );
    reply(stanza, IqType::Result, ns::TIME, payload)
}
