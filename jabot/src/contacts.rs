//! In-memory contact store.
//!
//! One record per bare identity. Roster pushes, presence notices and profile
//! replies all feed partial updates into [`ContactStore::merge`] or
//! [`ContactStore::set_online`]; only presence handling writes `online`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::jid;

/// Contact store shared between the session loop (sole writer) and readers
/// in other tasks.
pub type SharedContacts = Arc<RwLock<ContactStore>>;

/// Subscription state of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subscription {
    #[default]
    None,
    From,
    To,
    Both,
    /// Logical delete; the record stays queryable
    #[serde(rename = "remove", alias = "removed")]
    Removed,
}

/// Profile picture decoded from a vCard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avatar {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One known identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Bare address, never empty
    pub identity: String,
    pub display_name: String,
    pub nick_name: String,
    pub groups: BTreeSet<String>,
    pub subscription: Subscription,
    pub online: bool,
    pub avatar: Option<Avatar>,
    /// Nickname was filled in from the display name or local part
    nick_derived: bool,
}

impl Contact {
    fn placeholder(identity: &str) -> Self {
        let mut contact = Self {
            identity: identity.to_string(),
            display_name: String::new(),
            nick_name: String::new(),
            groups: BTreeSet::new(),
            subscription: Subscription::None,
            online: false,
            avatar: None,
            nick_derived: false,
        };
        contact.fill_nick();
        contact
    }

    /// Recompute the nickname when blank: display name, then local part.
    fn fill_nick(&mut self) {
        if !self.nick_name.trim().is_empty() {
            return;
        }
        self.nick_name = if self.display_name.trim().is_empty() {
            jid::local_part(&self.identity).to_string()
        } else {
            self.display_name.clone()
        };
        self.nick_derived = true;
    }

    /// Whether a profile fetch would still tell us something.
    ///
    /// Nicknames derived from the local part do not count as known.
    pub fn needs_profile(&self) -> bool {
        self.display_name.trim().is_empty()
            || self.nick_name.trim().is_empty()
            || self.nick_name == jid::local_part(&self.identity)
    }
}

/// Partial contact update. `None` (or an empty string) means "not present".
#[derive(Debug, Clone, Default)]
pub struct ContactUpdate {
    pub identity: String,
    pub display_name: Option<String>,
    pub nick_name: Option<String>,
    pub groups: Option<Vec<String>>,
    pub subscription: Option<Subscription>,
    pub avatar: Option<Avatar>,
}

impl ContactUpdate {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Self::default()
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn nick_name(mut self, nick: impl Into<String>) -> Self {
        self.nick_name = Some(nick.into());
        self
    }

    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    pub fn subscription(mut self, subscription: Subscription) -> Self {
        self.subscription = Some(subscription);
        self
    }

    pub fn avatar(mut self, avatar: Avatar) -> Self {
        self.avatar = Some(avatar);
        self
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Mapping from normalized bare identity to contact record.
#[derive(Debug, Default)]
pub struct ContactStore {
    contacts: HashMap<String, Contact>,
}

impl ContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh store for sharing across tasks.
    pub fn shared() -> SharedContacts {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Merge a partial update. Never touches `online`.
    pub fn merge(&mut self, update: ContactUpdate) {
        let identity = jid::bare(update.identity.trim());
        if identity.is_empty() {
            tracing::debug!("Dropping contact update without identity");
            return;
        }

        let contact = self
            .contacts
            .entry(jid::key(identity))
            .or_insert_with(|| Contact::placeholder(identity));

        if let Some(name) = non_blank(update.display_name) {
            // A derived nick follows the new name.
            if contact.nick_derived {
                contact.nick_name.clear();
            }
            contact.display_name = name;
        }
        if let Some(nick) = non_blank(update.nick_name) {
            contact.nick_name = nick;
            contact.nick_derived = false;
        }
        if let Some(groups) = update.groups {
            contact.groups = groups.into_iter().filter(|g| !g.is_empty()).collect();
        }
        if let Some(subscription) = update.subscription {
            contact.subscription = subscription;
        }
        if let Some(avatar) = update.avatar {
            contact.avatar = Some(avatar);
        }
        contact.fill_nick();
    }

    /// Set the online flag, creating a placeholder record when absent.
    pub fn set_online(&mut self, identity: &str, online: bool) {
        let identity = jid::bare(identity.trim());
        if identity.is_empty() {
            return;
        }
        self.contacts
            .entry(jid::key(identity))
            .or_insert_with(|| Contact::placeholder(identity))
            .online = online;
    }

    /// Mark offline only when the identity is already stored.
    ///
    /// Returns whether anything changed.
    pub fn set_offline_if_known(&mut self, identity: &str) -> bool {
        match self.contacts.get_mut(&jid::key(identity)) {
            Some(contact) => std::mem::replace(&mut contact.online, false),
            None => false,
        }
    }

    /// Logical delete.
    pub fn remove(&mut self, identity: &str) {
        self.merge(ContactUpdate::new(identity).subscription(Subscription::Removed));
    }

    pub fn get(&self, identity: &str) -> Option<&Contact> {
        self.contacts.get(&jid::key(identity))
    }

    /// All online contacts, in no particular order.
    pub fn list_online(&self) -> Vec<Contact> {
        self.contacts.values().filter(|c| c.online).cloned().collect()
    }

    /// Nickname for any address, falling back to its local part.
    pub fn nick_name(&self, addr: &str) -> String {
        self.get(addr)
            .map(|c| c.nick_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| jid::local_part(addr).to_string())
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}
