//! Presence handling: the subscription handshake and online tracking.

use crate::contacts::ContactStore;
use crate::event::{Outbound, PresenceNotice, PresenceType};
use crate::jid;
use crate::query;

/// Drives the subscription handshake for one home domain.
#[derive(Debug, Clone)]
pub struct SubscriptionHandler {
    home_domain: String,
}

impl SubscriptionHandler {
    pub fn new(home_domain: impl Into<String>) -> Self {
        Self {
            home_domain: home_domain.into(),
        }
    }

    pub fn home_domain(&self) -> &str {
        &self.home_domain
    }

    /// Handle one presence notice.
    ///
    /// Online state is recorded even when `responsive` is false; sends are not.
    pub fn handle(
        &self,
        contacts: &mut ContactStore,
        notice: &PresenceNotice,
        responsive: bool,
    ) -> Vec<Outbound> {
        let from = notice.from.as_str();
        let mut sends = Vec::new();

        match notice.kind {
            PresenceType::Available => {
                contacts.set_online(from, true);
                let needs_profile = contacts.get(from).is_some_and(|c| c.needs_profile());
                if responsive && needs_profile {
                    sends.push(query::vcard_request(jid::bare(from)));
                }
                tracing::info!(from = %from, show = %notice.show, "Presence available");
            }
            PresenceType::Unavailable => {
                if contacts.set_offline_if_known(from) {
                    tracing::info!(from = %from, "Presence unavailable");
                }
            }
            PresenceType::Subscribe if responsive => {
                if !jid::domain(from).eq_ignore_ascii_case(&self.home_domain) {
                    tracing::info!(from = %from, "Subscription request from foreign domain dropped");
                    return sends;
                }
                tracing::info!(from = %from, "Approving subscription");
                sends.push(Outbound::approve_subscription(from));
                sends.push(Outbound::request_subscription(from));
            }
            PresenceType::Unsubscribe if responsive => {
                tracing::info!(from = %from, "Revoking subscription");
                sends.push(Outbound::revoke_subscription(from));
            }
            other => {
                tracing::debug!(
                    from = %from,
                    kind = other.as_str(),
                    responsive,
                    "Presence ignored"
                );
            }
        }
        sends
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(from: &str, kind: PresenceType) -> PresenceNotice {
        PresenceNotice {
            from: from.into(),
            to: "bot@example.com/ebot-1".into(),
            kind,
            show: String::new(),
        }
    }

    #[test]
    fn home_domain_subscribe_is_approved_then_reciprocated() {
        let handler = SubscriptionHandler::new("example.com");
        let mut contacts = ContactStore::new();
        let sends = handler.handle(
            &mut contacts,
            &notice("amy@example.com", PresenceType::Subscribe),
            true,
        );
        assert_eq!(
            sends,
            vec![
                Outbound::approve_subscription("amy@example.com"),
                Outbound::request_subscription("amy@example.com"),
            ]
        );
    }

    #[test]
    fn foreign_domain_subscribe_is_dropped() {
        let handler = SubscriptionHandler::new("example.com");
        let mut contacts = ContactStore::new();
        let sends = handler.handle(
            &mut contacts,
            &notice("x@other.org", PresenceType::Subscribe),
            true,
        );
        assert!(sends.is_empty());
    }

    #[test]
    fn unsubscribe_is_revoked() {
        let handler = SubscriptionHandler::new("example.com");
        let mut contacts = ContactStore::new();
        let sends = handler.handle(
            &mut contacts,
            &notice("x@other.org", PresenceType::Unsubscribe),
            true,
        );
        assert_eq!(sends, vec![Outbound::revoke_subscription("x@other.org")]);
    }

    #[test]
    fn available_marks_online_and_fetches_profile() {
        let handler = SubscriptionHandler::new("example.com");
        let mut contacts = ContactStore::new();
        let sends = handler.handle(
            &mut contacts,
            &notice("ben@example.com/pc", PresenceType::Available),
            true,
        );
        assert!(contacts.get("ben@example.com").unwrap().online);
        assert_eq!(sends, vec![query::vcard_request("ben@example.com")]);
    }

    #[test]
    fn unavailable_only_for_known_contacts() {
        let handler = SubscriptionHandler::new("example.com");
        let mut contacts = ContactStore::new();
        handler.handle(
            &mut contacts,
            &notice("ghost@example.com", PresenceType::Unavailable),
            true,
        );
        assert!(contacts.is_empty());

        contacts.set_online("ben@example.com", true);
        handler.handle(
            &mut contacts,
            &notice("ben@example.com/pc", PresenceType::Unavailable),
            true,
        );
        assert!(!contacts.get("ben@example.com").unwrap().online);
    }

    #[test]
    fn suppressed_mode_records_but_never_sends() {
        let handler = SubscriptionHandler::new("example.com");
        let mut contacts = ContactStore::new();
        for kind in [
            PresenceType::Subscribe,
            PresenceType::Unsubscribe,
            PresenceType::Available,
        ] {
            let sends = handler.handle(&mut contacts, &notice("amy@example.com", kind), false);
            assert!(sends.is_empty(), "{kind:?} sent while suppressed");
        }
        assert!(contacts.get("amy@example.com").unwrap().online);
    }
}
