//! Conversational backend used when no command matches.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use jabot_common::BackendConfig;

/// Result type for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Backend error type.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Request(String),

    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed backend response: {0}")]
    Decode(String),

    #[error("Backend timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Request/reply conversational backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Produce a reply for `text` sent by `user_id`.
    async fn complete(&self, text: &str, user_id: &str) -> BackendResult<String>;
}

// ============================================================================
// Tuling
// ============================================================================

const CODE_TEXT: i64 = 100000;
const CODE_LINK: i64 = 200000;
const CODE_NEWS: i64 = 302000;
const CODE_MENU: i64 = 308000;

#[derive(Debug, Serialize)]
struct TulingRequest<'a> {
    key: &'a str,
    info: &'a str,
    userid: &'a str,
}

#[derive(Debug, Deserialize)]
struct TulingReply {
    code: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    list: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct NewsItem {
    #[serde(default)]
    article: String,
    #[serde(default)]
    detailurl: String,
}

#[derive(Debug, Deserialize)]
struct MenuItem {
    #[serde(default)]
    name: String,
    #[serde(default)]
    info: String,
    #[serde(default)]
    detailurl: String,
}

/// Tuling-style HTTP JSON backend.
pub struct TulingBackend {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl TulingBackend {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(
            &config.url,
            &config.api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn flatten(reply: TulingReply) -> BackendResult<String> {
        match reply.code {
            CODE_TEXT => Ok(reply.text),
            CODE_LINK => Ok(format!("{} {}", reply.text, reply.url)),
            CODE_NEWS => {
                let items: Vec<NewsItem> = Self::list(reply.list)?;
                Ok(items
                    .iter()
                    .map(|n| format!("{}\n{}\n", n.article, n.detailurl))
                    .collect())
            }
            CODE_MENU => {
                let items: Vec<MenuItem> = Self::list(reply.list)?;
                Ok(items
                    .iter()
                    .map(|m| format!("{}\n{}\n{}\n", m.name, m.info, m.detailurl))
                    .collect())
            }
            _ => Ok(reply.text),
        }
    }

    fn list<T: serde::de::DeserializeOwned>(list: Option<serde_json::Value>) -> BackendResult<Vec<T>> {
        match list {
            None | Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value).map_err(|e| BackendError::Decode(e.to_string())),
        }
    }
}

#[async_trait]
impl ChatBackend for TulingBackend {
    async fn complete(&self, text: &str, user_id: &str) -> BackendResult<String> {
        let body = TulingRequest {
            key: &self.api_key,
            info: text,
            userid: user_id,
        };

        let resp = self.client.post(&self.url).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let reply: TulingReply = resp.json().await?;
        tracing::debug!(code = reply.code, "Backend reply");
        Self::flatten(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(json: serde_json::Value) -> TulingReply {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn text_and_link_codes() {
        let text = reply(serde_json::json!({"code": 100000, "text": "hi"}));
        assert_eq!(TulingBackend::flatten(text).unwrap(), "hi");

        let link = reply(serde_json::json!({"code": 200000, "text": "see", "url": "http://a"}));
        assert_eq!(TulingBackend::flatten(link).unwrap(), "see http://a");
    }

    #[test]
    fn news_items_are_line_delimited() {
        let news = reply(serde_json::json!({
            "code": 302000,
            "text": "news",
            "list": [
                {"article": "A", "source": "s", "detailurl": "http://a"},
                {"article": "B", "source": "s", "detailurl": "http://b"}
            ]
        }));
        assert_eq!(
            TulingBackend::flatten(news).unwrap(),
            "A\nhttp://a\nB\nhttp://b\n"
        );
    }

    #[test]
    fn menu_items_are_line_delimited() {
        let menu = reply(serde_json::json!({
            "code": 308000,
            "list": [{"name": "Soup", "info": "hot", "detailurl": "http://s"}]
        }));
        assert_eq!(TulingBackend::flatten(menu).unwrap(), "Soup\nhot\nhttp://s\n");
    }

    #[test]
    fn unknown_code_falls_back_to_text() {
        let other = reply(serde_json::json!({"code": 40004, "text": "quota"}));
        assert_eq!(TulingBackend::flatten(other).unwrap(), "quota");
    }

    #[test]
    fn malformed_list_is_a_decode_error() {
        let bad = reply(serde_json::json!({"code": 302000, "list": "nope"}));
        assert!(matches!(
            TulingBackend::flatten(bad),
            Err(BackendError::Decode(_))
        ));
    }
}
