//! Session driver: connection lifecycle and the receive/dispatch loop.
//!
//! One task owns the [`Bot`] and runs [`Bot::run_loop`]. All protocol state is
//! mutated inside that task. Other tasks talk to it through a [`BotHandle`]:
//! contact snapshots come from the shared store, sends and close requests
//! travel over a control channel and are executed by the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use jabot_common::Config;

use crate::backend::ChatBackend;
use crate::contacts::{Contact, ContactStore, SharedContacts};
use crate::error::{BotError, BotResult};
use crate::event::{ChatKind, Event, Outbound};
use crate::jid;
use crate::query::{self, QueryResponder};
use crate::router::{CommandRegistry, CommandRouter, MonitorHook, RouterConfig};
use crate::subscription::SubscriptionHandler;
use crate::transport::{Connector, Credentials, Transport};

/// Connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
enum Control {
    Send(Outbound),
    Close,
}

/// Cloneable handle for tasks other than the loop.
#[derive(Clone)]
pub struct BotHandle {
    contacts: SharedContacts,
    connected: Arc<AtomicBool>,
    control: mpsc::UnboundedSender<Control>,
}

impl BotHandle {
    /// Snapshot of the online contacts, in no particular order.
    pub async fn list_online(&self) -> Vec<Contact> {
        self.contacts.read().await.list_online()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue a chat message; the loop sends it.
    pub fn send_message(&self, to: &str, text: &str) -> BotResult<()> {
        self.request(Control::Send(Outbound::chat(to, text)))
    }

    /// Ask the loop to close the session and return.
    pub fn close(&self) -> BotResult<()> {
        self.request(Control::Close)
    }

    fn request(&self, control: Control) -> BotResult<()> {
        if !self.is_connected() {
            return Err(BotError::NotConnected);
        }
        self.control
            .send(control)
            .map_err(|_| BotError::NotConnected)
    }
}

/// The bot: session driver plus the components it dispatches to.
pub struct Bot {
    credentials: Credentials,
    identity: String,
    connector: Arc<dyn Connector>,
    transport: Option<Arc<dyn Transport>>,
    state: SessionState,
    connected: Arc<AtomicBool>,
    last_activity: Instant,
    contacts: SharedContacts,
    router: CommandRouter,
    subscriptions: SubscriptionHandler,
    queries: QueryResponder,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
}

impl Bot {
    /// Build a bot. `registry` is fixed from here on.
    pub fn new(
        config: &Config,
        connector: Arc<dyn Connector>,
        registry: CommandRegistry,
        backend: Option<Arc<dyn ChatBackend>>,
    ) -> Self {
        let credentials = Credentials::from_config(config);
        let identity = jid::bare(&config.account.jid).to_string();
        let home_domain = config
            .domain_override()
            .unwrap_or_else(|| jid::domain(&identity))
            .to_string();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Self {
            router: CommandRouter::new(
                RouterConfig::from_config(config),
                Arc::new(registry),
                backend,
            ),
            subscriptions: SubscriptionHandler::new(home_domain),
            queries: QueryResponder::new(
                &identity,
                &config.bot.version_name,
                &config.bot.version,
                config.bot.activity_tracking,
            ),
            credentials,
            identity,
            connector,
            transport: None,
            state: SessionState::Disconnected,
            connected: Arc::new(AtomicBool::new(false)),
            last_activity: Instant::now(),
            contacts: ContactStore::shared(),
            control_tx,
            control_rx,
        }
    }

    pub fn handle(&self) -> BotHandle {
        BotHandle {
            contacts: self.contacts.clone(),
            connected: self.connected.clone(),
            control: self.control_tx.clone(),
        }
    }

    pub fn contacts(&self) -> SharedContacts {
        self.contacts.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Bare identity of the bot.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Resource label of this session.
    pub fn resource(&self) -> &str {
        &self.credentials.resource
    }

    /// Operating nickname, learned from the bot's own vCard.
    pub fn own_nick(&self) -> &str {
        self.queries.own_nick()
    }

    pub fn is_auto(&self) -> bool {
        self.router.is_auto()
    }

    /// Time since the last outbound send.
    pub fn idle(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Route chat from `nick` to `hook` only; see [`CommandRouter::set_hook`].
    pub fn set_hook(&mut self, nick: impl Into<String>, hook: MonitorHook) {
        self.router.set_hook(nick, hook);
    }

    pub fn clear_hook(&mut self) {
        self.router.clear_hook();
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.connected
            .store(state == SessionState::Connected, Ordering::SeqCst);
    }

    /// Open a session, replacing any prior one, and fetch the roster.
    pub async fn connect(&mut self) -> BotResult<()> {
        self.set_state(SessionState::Connecting);
        let transport = match self.connector.connect(&self.credentials).await {
            Ok(transport) => transport,
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                tracing::error!(jid = %self.identity, error = %e, "Connect failed");
                return Err(e.into());
            }
        };

        let transport_name = transport.name();
        if let Some(prior) = self.transport.replace(transport) {
            if let Err(e) = prior.close().await {
                tracing::warn!(error = %e, "Failed to close prior session");
            }
        }
        self.set_state(SessionState::Connected);
        self.last_activity = Instant::now();
        tracing::info!(
            jid = %self.identity,
            resource = %self.credentials.resource,
            transport = transport_name,
            "Connected"
        );

        self.request_roster().await?;
        // Own profile, for the operating nickname.
        self.send(query::vcard_request("")).await
    }

    /// Receive and dispatch until `budget` elapses (zero runs until error)
    /// or a handle closes the session.
    ///
    /// Only a receive failure ends the session. Send failures are logged.
    pub async fn run_loop(&mut self, budget: Duration) -> BotResult<()> {
        let transport = self
            .transport
            .clone()
            .filter(|_| self.is_connected())
            .ok_or(BotError::NotConnected)?;
        // A budget past the clock's range behaves like no budget.
        let deadline = (!budget.is_zero())
            .then(|| Instant::now().checked_add(budget))
            .flatten();

        loop {
            tokio::select! {
                biased;

                control = self.control_rx.recv() => match control {
                    Some(Control::Send(outbound)) => {
                        if let Err(e) = self.send(outbound).await {
                            tracing::warn!(error = %e, "Queued send failed");
                        }
                    }
                    Some(Control::Close) | None => {
                        tracing::info!("Close requested");
                        return match self.close().await {
                            Err(BotError::NotConnected) | Ok(()) => Ok(()),
                            Err(e) => Err(e),
                        };
                    }
                },

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    tracing::debug!(budget = ?budget, "Loop budget elapsed");
                    return Ok(());
                }

                event = transport.receive() => {
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::error!(error = %e, "Receive failed, session ends");
                            self.set_state(SessionState::Disconnected);
                            return Err(e.into());
                        }
                    };
                    if let Err(e) = self.handle_event(event).await {
                        tracing::warn!(error = %e, "Event handling failed");
                    }
                }
            }
        }
    }

    /// Dispatch one inbound event and perform its sends.
    ///
    /// Backend faults come back as [`BotError::Backend`]. Every send is
    /// attempted even when an earlier one fails; the first failure is
    /// returned once all have been tried. Neither affects the session.
    pub async fn handle_event(&mut self, event: Event) -> BotResult<()> {
        let sends = match event {
            Event::Chat(message) => {
                let nick = self.contacts.read().await.nick_name(&message.from);
                self.router.route(&message, &nick).await?
            }
            Event::Presence(notice) => {
                let responsive = self.router.is_auto();
                let mut contacts = self.contacts.write().await;
                self.subscriptions.handle(&mut contacts, &notice, responsive)
            }
            Event::RosterPush(push) => {
                let mut contacts = self.contacts.write().await;
                query::apply_roster(&mut contacts, &push.items, true)
            }
            Event::Query(stanza) => {
                let idle = self.last_activity.elapsed();
                let mut contacts = self.contacts.write().await;
                self.queries.handle(&stanza, &mut contacts, idle)
            }
        };

        let mut first_error = None;
        for outbound in sends {
            if let Err(e) = self.send(outbound).await {
                tracing::warn!(error = %e, "Send failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Release the session.
    pub async fn close(&mut self) -> BotResult<()> {
        let transport = self.transport.take().ok_or(BotError::NotConnected)?;
        self.set_state(SessionState::Disconnected);
        tracing::info!(jid = %self.identity, "Closing session");
        transport.close().await?;
        Ok(())
    }

    async fn send(&mut self, outbound: Outbound) -> BotResult<()> {
        let transport = self
            .transport
            .as_ref()
            .filter(|_| self.is_connected())
            .ok_or(BotError::NotConnected)?;
        self.last_activity = Instant::now();
        transport.send(outbound).await?;
        Ok(())
    }

    /// Send a one-to-one chat message.
    pub async fn send_message(&mut self, text: &str, to: &str) -> BotResult<()> {
        self.send(Outbound::chat(to, text)).await
    }

    /// Send a message to a group chat room.
    pub async fn send_group_message(&mut self, text: &str, room: &str) -> BotResult<()> {
        self.send(Outbound::Message {
            to: room.to_string(),
            kind: ChatKind::GroupChat,
            text: text.to_string(),
        })
        .await
    }

    /// Keep-alive ping to the home server.
    pub async fn ping(&mut self) -> BotResult<()> {
        let server = jid::domain(&self.identity).to_string();
        self.send(query::ping_request(server)).await
    }

    /// Announce availability directly to `to`.
    pub async fn add_chat(&mut self, to: &str) -> BotResult<()> {
        self.send(Outbound::directed_available(to)).await
    }

    /// Fetch the roster.
    pub async fn request_roster(&mut self) -> BotResult<()> {
        let id = format!("roster-{}", uuid::Uuid::new_v4());
        self.send(query::roster_request(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryConnector, MemoryPeer, TransportError};

    fn config() -> Config {
        let mut config = Config::default();
        config.account.jid = "bot@example.com".into();
        config.account.password = "pw".into();
        config.account.default_jid = "ops@example.com".into();
        config
    }

    fn bot() -> (Bot, MemoryPeer) {
        let (connector, peer) = MemoryConnector::pair();
        let bot = Bot::new(
            &config(),
            Arc::new(connector),
            CommandRegistry::with_builtins(),
            None,
        );
        (bot, peer)
    }

    #[tokio::test]
    async fn operations_need_a_session() {
        let (mut bot, _peer) = bot();
        assert_eq!(bot.state(), SessionState::Disconnected);
        assert!(matches!(bot.close().await, Err(BotError::NotConnected)));
        assert!(matches!(
            bot.send_message("hi", "a@example.com").await,
            Err(BotError::NotConnected)
        ));
        assert!(matches!(bot.ping().await, Err(BotError::NotConnected)));
        assert!(matches!(
            bot.run_loop(Duration::ZERO).await,
            Err(BotError::NotConnected)
        ));
        assert!(bot.handle().send_message("a@example.com", "hi").is_err());
    }

    #[test]
    fn home_domain_from_identity_or_override() {
        let (bot, _peer) = bot();
        assert_eq!(bot.subscriptions.home_domain(), "example.com");

        let mut config = config();
        config.account.jid = "bot@example.com/home".into();
        config.account.domain = Some("other.org".into());
        let (connector, _peer) = MemoryConnector::pair();
        let bot = Bot::new(&config, Arc::new(connector), CommandRegistry::new(), None);
        assert_eq!(bot.identity(), "bot@example.com");
        assert_eq!(bot.subscriptions.home_domain(), "other.org");
    }

    #[tokio::test]
    async fn connect_fetches_roster_and_own_card() {
        let (mut bot, peer) = bot();
        bot.connect().await.unwrap();

        assert_eq!(bot.state(), SessionState::Connected);
        let sent = peer.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], Outbound::Query(q) if q.namespace == query::ns::ROSTER));
        assert_eq!(sent[1], query::vcard_request(""));
        assert!(bot.resource().starts_with("ebot-"));
        assert_eq!(peer.last_credentials().unwrap().resource, bot.resource());
    }

    #[tokio::test]
    async fn reconnect_closes_prior_session() {
        let (mut bot, peer) = bot();
        bot.connect().await.unwrap();
        bot.connect().await.unwrap();
        assert_eq!(peer.connects(), 2);
        assert_eq!(peer.closes(), 1);
    }

    #[tokio::test]
    async fn failed_connect_leaves_disconnected() {
        let (mut bot, peer) = bot();
        peer.reject_auth(true);
        let err = bot.connect().await.unwrap_err();
        assert!(matches!(err, BotError::Transport(TransportError::Auth(_))));
        assert_eq!(bot.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn close_then_close_again() {
        let (mut bot, _peer) = bot();
        bot.connect().await.unwrap();
        bot.close().await.unwrap();
        assert!(!bot.is_connected());
        assert!(matches!(bot.close().await, Err(BotError::NotConnected)));
    }

    #[tokio::test]
    async fn send_helpers_shape_stanzas() {
        let (mut bot, peer) = bot();
        bot.connect().await.unwrap();
        peer.take_sent();

        bot.send_group_message("hello all", "room@conf.example.com").await.unwrap();
        bot.add_chat("amy@example.com").await.unwrap();
        bot.ping().await.unwrap();

        let sent = peer.sent();
        assert!(matches!(
            &sent[0],
            Outbound::Message { kind: ChatKind::GroupChat, to, .. } if to == "room@conf.example.com"
        ));
        assert_eq!(sent[1], Outbound::directed_available("amy@example.com"));
        assert_eq!(sent[2], query::ping_request("example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_returns_after_budget() {
        let (mut bot, _peer) = bot();
        bot.connect().await.unwrap();
        bot.run_loop(Duration::from_secs(5)).await.unwrap();
        assert!(bot.is_connected());
    }

    #[tokio::test]
    async fn oversized_budget_runs_until_closed() {
        let (mut bot, _peer) = bot();
        bot.connect().await.unwrap();
        bot.handle().close().unwrap();
        bot.run_loop(Duration::from_secs(u64::MAX)).await.unwrap();
        assert!(!bot.is_connected());
    }

    #[tokio::test]
    async fn send_failures_keep_the_session() {
        let (mut bot, peer) = bot();
        bot.connect().await.unwrap();
        peer.take_sent();
        peer.fail_sends(1);

        let handle = bot.handle();
        handle.send_message("amy@example.com", "lost").unwrap();
        handle.send_message("amy@example.com", "kept").unwrap();
        handle.close().unwrap();

        bot.run_loop(Duration::ZERO).await.unwrap();
        assert_eq!(peer.sent(), vec![Outbound::chat("amy@example.com", "kept")]);
    }

    #[tokio::test]
    async fn receive_error_ends_session() {
        let (mut bot, peer) = bot();
        bot.connect().await.unwrap();
        peer.fail(TransportError::Connection("reset".into()));
        let err = bot.run_loop(Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, BotError::Transport(TransportError::Connection(_))));
        assert!(!bot.is_connected());
        assert_eq!(bot.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn handle_close_ends_loop() {
        let (mut bot, peer) = bot();
        bot.connect().await.unwrap();
        let handle = bot.handle();
        handle.send_message("amy@example.com", "queued").unwrap();
        handle.close().unwrap();

        bot.run_loop(Duration::ZERO).await.unwrap();
        assert!(!handle.is_connected());
        assert!(peer.sent().contains(&Outbound::chat("amy@example.com", "queued")));
        assert_eq!(peer.closes(), 1);
    }
}
