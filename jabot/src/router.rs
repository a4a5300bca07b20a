//! Chat routing: local commands, loopback control and backend fallback.
//!
//! Messages from the bot's own identity form the operator control channel.
//! Reserved keywords suspend or resume autonomous replies; anything else is
//! run as a command whose reply goes to the configured broadcast target.
//! Peer messages run a matching command or, in auto mode, go to the backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jabot_common::util::{sanitize_for_log, truncate_with_ellipsis};

use crate::backend::{BackendError, ChatBackend};
use crate::error::{BotError, BotResult};
use crate::event::{ChatMessage, Outbound};
use crate::jid;

/// Command handler: arguments in, reply out. An empty reply sends nothing.
pub type CommandHandler = Arc<dyn Fn(&[String]) -> String + Send + Sync>;

/// Monitor hook receiving the trimmed text of matching messages.
pub type MonitorHook = Arc<dyn Fn(&str) + Send + Sync>;

const LOG_TEXT_CHARS: usize = 200;

fn log_text(text: &str) -> String {
    sanitize_for_log(&truncate_with_ellipsis(text, LOG_TEXT_CHARS))
}

/// Built-in `time` command: local `MM-DD HH:MM:SS`, or UTC when the first
/// argument is `utc`.
pub fn time_command(args: &[String]) -> String {
    const FORMAT: &str = "%m-%d %H:%M:%S";
    let utc = args
        .first()
        .is_some_and(|a| a.trim().eq_ignore_ascii_case("utc"));
    if utc {
        chrono::Utc::now().format(FORMAT).to_string()
    } else {
        chrono::Local::now().format(FORMAT).to_string()
    }
}

fn normalize_keyword(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}

/// Keyword → handler table. Filled at startup, read-only afterwards.
#[derive(Default, Clone)]
pub struct CommandRegistry {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `time` and `时间` installed.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let time: CommandHandler = Arc::new(time_command);
        registry.handlers.insert("time".into(), time.clone());
        registry.handlers.insert("时间".into(), time);
        registry
    }

    /// Register a handler under a case-insensitive keyword.
    pub fn register<F>(&mut self, keyword: &str, handler: F) -> BotResult<()>
    where
        F: Fn(&[String]) -> String + Send + Sync + 'static,
    {
        let keyword = normalize_keyword(keyword);
        if self.handlers.contains_key(&keyword) {
            return Err(BotError::HandlerExists(keyword));
        }
        self.handlers.insert(keyword, Arc::new(handler));
        Ok(())
    }

    pub fn get(&self, keyword: &str) -> Option<&CommandHandler> {
        self.handlers.get(&normalize_keyword(keyword))
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.get(keyword).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler for the first comma-separated token of `content`.
    ///
    /// `None` when no handler matches.
    fn invoke(&self, content: &str) -> Option<String> {
        let mut tokens = content.split(',');
        let keyword = tokens.next().unwrap_or_default();
        let handler = self.get(keyword)?;
        let args: Vec<String> = tokens.map(str::to_string).collect();
        Some(handler(&args))
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keywords: Vec<_> = self.handlers.keys().collect();
        keywords.sort();
        f.debug_struct("CommandRegistry")
            .field("keywords", &keywords)
            .finish()
    }
}

/// Router settings.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// The bot's own bare identity
    pub identity: String,
    /// Target for replies to self-issued commands
    pub default_jid: String,
    pub suspend_keyword: String,
    pub resume_keyword: String,
    pub backend_timeout: Duration,
}

impl RouterConfig {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            default_jid: String::new(),
            suspend_keyword: "退下".into(),
            resume_keyword: "来人".into(),
            backend_timeout: Duration::from_secs(15),
        }
    }

    pub fn from_config(config: &jabot_common::Config) -> Self {
        Self {
            identity: jid::bare(&config.account.jid).to_string(),
            default_jid: config.account.default_jid.clone(),
            suspend_keyword: config.bot.suspend_keyword.clone(),
            resume_keyword: config.bot.resume_keyword.clone(),
            backend_timeout: Duration::from_secs(config.backend.timeout_secs),
        }
    }
}

/// Routes chat messages to commands or the backend.
pub struct CommandRouter {
    config: RouterConfig,
    registry: Arc<CommandRegistry>,
    backend: Option<Arc<dyn ChatBackend>>,
    auto: bool,
    hook: Option<(String, MonitorHook)>,
}

impl CommandRouter {
    pub fn new(
        config: RouterConfig,
        registry: Arc<CommandRegistry>,
        backend: Option<Arc<dyn ChatBackend>>,
    ) -> Self {
        Self {
            config,
            registry,
            backend,
            auto: true,
            hook: None,
        }
    }

    /// Whether autonomous replies are on.
    pub fn is_auto(&self) -> bool {
        self.auto
    }

    pub fn set_auto(&mut self, auto: bool) {
        self.auto = auto;
    }

    /// Install a monitor hook. While installed, routing is off and only
    /// messages from `nick` reach the hook.
    pub fn set_hook(&mut self, nick: impl Into<String>, hook: MonitorHook) {
        self.hook = Some((nick.into(), hook));
    }

    pub fn clear_hook(&mut self) {
        self.hook = None;
    }

    /// Route one chat message. `sender_nick` is the sender's resolved nickname.
    ///
    /// Backend faults are returned; the caller decides how to log them.
    pub async fn route(
        &mut self,
        message: &ChatMessage,
        sender_nick: &str,
    ) -> Result<Vec<Outbound>, BackendError> {
        let content = message.text.trim();
        if content.is_empty() {
            return Ok(Vec::new());
        }

        if let Some((nick, hook)) = &self.hook {
            tracing::info!(
                from = %sender_nick,
                text = %log_text(content),
                "Monitored chat"
            );
            if nick == sender_nick {
                hook(content);
            }
            return Ok(Vec::new());
        }

        if jid::same_identity(&message.from, &self.config.identity) {
            Ok(self.route_self(content))
        } else {
            self.route_peer(message, content, sender_nick).await
        }
    }

    fn route_self(&mut self, content: &str) -> Vec<Outbound> {
        if content == self.config.suspend_keyword {
            tracing::info!("Autonomous replies suspended");
            self.auto = false;
            return Vec::new();
        }
        if content == self.config.resume_keyword {
            tracing::info!("Autonomous replies resumed");
            self.auto = true;
            return Vec::new();
        }

        tracing::info!(
            text = %log_text(content),
            "Self command"
        );
        let Some(reply) = self.registry.invoke(content).filter(|r| !r.is_empty()) else {
            return Vec::new();
        };
        if self.config.default_jid.is_empty() {
            tracing::warn!("No default target for self command reply, dropping it");
            return Vec::new();
        }
        vec![Outbound::chat(&self.config.default_jid, reply)]
    }

    async fn route_peer(
        &self,
        message: &ChatMessage,
        content: &str,
        sender_nick: &str,
    ) -> Result<Vec<Outbound>, BackendError> {
        tracing::info!(
            from = %sender_nick,
            text = %log_text(content),
            "Chat"
        );

        if let Some(reply) = self.registry.invoke(content) {
            if reply.is_empty() {
                return Ok(Vec::new());
            }
            return Ok(vec![Outbound::chat(&message.from, reply)]);
        }

        if !self.auto {
            return Ok(Vec::new());
        }
        let Some(backend) = &self.backend else {
            tracing::debug!(from = %sender_nick, "No backend configured, not replying");
            return Ok(Vec::new());
        };

        let user_id = jid::bare(&message.from);
        let reply = tokio::time::timeout(
            self.config.backend_timeout,
            backend.complete(content, user_id),
        )
        .await
        .map_err(|_| BackendError::Timeout(self.config.backend_timeout))??;

        if reply.trim().is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(
            to = %sender_nick,
            text = %log_text(&reply),
            "Backend reply"
        );
        Ok(vec![Outbound::chat(&message.from, reply)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendResult;
    use crate::event::ChatKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatBackend for CountingBackend {
        async fn complete(&self, text: &str, _user_id: &str) -> BackendResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("echo {text}"))
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl ChatBackend for SlowBackend {
        async fn complete(&self, _text: &str, _user_id: &str) -> BackendResult<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".into())
        }
    }

    fn chat(from: &str, text: &str) -> ChatMessage {
        ChatMessage {
            from: from.into(),
            to: "bot@x.com".into(),
            kind: ChatKind::Chat,
            text: text.into(),
        }
    }

    fn router(backend: Arc<dyn ChatBackend>) -> CommandRouter {
        let mut config = RouterConfig::new("bot@x.com");
        config.default_jid = "ops@x.com".into();
        CommandRouter::new(config, Arc::new(CommandRegistry::with_builtins()), Some(backend))
    }

    #[test]
    fn register_twice_fails() {
        let mut registry = CommandRegistry::new();
        registry.register("Echo", |args| args.join(",")).unwrap();
        let err = registry.register(" echo ", |_| String::new()).unwrap_err();
        assert!(matches!(err, BotError::HandlerExists(k) if k == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn builtins_include_both_time_keywords() {
        let registry = CommandRegistry::with_builtins();
        assert!(registry.contains("TIME"));
        assert!(registry.contains("时间"));
    }

    #[test]
    fn time_command_format() {
        let local = time_command(&[]);
        assert_eq!(local.len(), "01-02 15:04:05".len());
        let utc = time_command(&[" UTC ".to_string()]);
        assert_eq!(utc.len(), local.len());
    }

    #[test]
    fn invoke_splits_arguments_on_commas() {
        let mut registry = CommandRegistry::new();
        registry.register("echo", |args| args.join("|")).unwrap();
        assert_eq!(registry.invoke(" ECHO ,a,b"), Some("a|b".to_string()));
        assert_eq!(registry.invoke("nothing"), None);
    }

    #[tokio::test]
    async fn command_suppresses_backend() {
        let backend = Arc::new(CountingBackend::default());
        let mut router = router(backend.clone());
        let sends = router.route(&chat("amy@x.com/pc", "TIME"), "amy").await.unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].recipient(), "amy@x.com/pc");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unmatched_goes_to_backend() {
        let backend = Arc::new(CountingBackend::default());
        let mut router = router(backend.clone());
        let sends = router.route(&chat("amy@x.com", "hello"), "amy").await.unwrap();
        assert_eq!(sends, vec![Outbound::chat("amy@x.com", "echo hello")]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_text_is_ignored() {
        let backend = Arc::new(CountingBackend::default());
        let mut router = router(backend.clone());
        assert!(router.route(&chat("amy@x.com", "  \t"), "amy").await.unwrap().is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn self_command_replies_to_default_target() {
        let mut router = router(Arc::new(CountingBackend::default()));
        let sends = router.route(&chat("bot@x.com/ebot-1", "time"), "bot").await.unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].recipient(), "ops@x.com");
    }

    #[tokio::test]
    async fn self_unmatched_never_reaches_backend() {
        let backend = Arc::new(CountingBackend::default());
        let mut router = router(backend.clone());
        assert!(router.route(&chat("bot@x.com", "hello"), "bot").await.unwrap().is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn suspend_and_resume_keywords() {
        let backend = Arc::new(CountingBackend::default());
        let mut router = router(backend.clone());

        router.route(&chat("bot@x.com", "退下"), "bot").await.unwrap();
        assert!(!router.is_auto());
        assert!(router.route(&chat("amy@x.com", "hello"), "amy").await.unwrap().is_empty());

        // Commands still work while suspended.
        assert_eq!(router.route(&chat("amy@x.com", "time"), "amy").await.unwrap().len(), 1);

        router.route(&chat("bot@x.com", "来人"), "bot").await.unwrap();
        assert!(router.is_auto());
        assert_eq!(router.route(&chat("amy@x.com", "hello"), "amy").await.unwrap().len(), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_default_target_drops_reply() {
        let mut router = CommandRouter::new(
            RouterConfig::new("bot@x.com"),
            Arc::new(CommandRegistry::with_builtins()),
            None,
        );
        assert!(router.route(&chat("bot@x.com", "time"), "bot").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let mut router = router(Arc::new(SlowBackend));
        let err = router.route(&chat("amy@x.com", "hello"), "amy").await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout(_)));
        assert!(router.is_auto());
    }

    #[tokio::test]
    async fn hook_takes_over_routing() {
        let backend = Arc::new(CountingBackend::default());
        let mut router = router(backend.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        router.set_hook(
            "amy",
            Arc::new(move |text: &str| sink.lock().unwrap().push(text.to_string())),
        );

        assert!(router.route(&chat("amy@x.com", " time "), "amy").await.unwrap().is_empty());
        assert!(router.route(&chat("ben@x.com", "hello"), "ben").await.unwrap().is_empty());
        assert_eq!(*seen.lock().unwrap(), vec!["time".to_string()]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

        router.clear_hook();
        assert_eq!(router.route(&chat("ben@x.com", "hello"), "ben").await.unwrap().len(), 1);
    }
}
