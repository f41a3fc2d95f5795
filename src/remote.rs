use async_trait::async_trait;
use log::*;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// A fetch failure, classified at the wire boundary so callers never have to
/// inspect HTTP details to decide whether retrying makes sense.
#[derive(Debug, Clone)]
pub struct FetchError {
    message: String,
    retryable: bool,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.retryable
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.retryable {
            write!(f, "transient: {}", self.message)
        } else {
            write!(f, "permanent: {}", self.message)
        }
    }
}

impl std::error::Error for FetchError {}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawActor {
    pub id: u64,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawReaction {
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub count: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawReference {
    #[serde(default)]
    pub record_id: Option<u64>,
    #[serde(default)]
    pub actor_id: Option<u64>,
}

/// The wire shape of one activity record. Optional sub-resources default to
/// neutral values so a sparse payload still deserializes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: u64,
    pub partition_id: u64,
    pub actor: RawActor,
    /// Unix milliseconds; strictly increasing within a partition.
    pub occurred_at: i64,
    #[serde(default)]
    pub edited_at: Option<i64>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
    #[serde(default)]
    pub embeds: Vec<serde_json::Value>,
    #[serde(default)]
    pub reactions: Vec<RawReaction>,
    #[serde(default)]
    pub mentions: Vec<u64>,
    #[serde(default)]
    pub reference: Option<RawReference>,
    #[serde(default)]
    pub thread_id: Option<u64>,
    #[serde(default)]
    pub pinned: bool,
}

/// History-since-cursor access to the remote platform. Pages are ascending by
/// `occurred_at` and strictly newer than `after`.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_partitions(&self) -> Result<Vec<u64>, FetchError>;

    async fn fetch_page(
        &self,
        partition_id: u64,
        after: Option<i64>,
        limit: u32,
    ) -> Result<Vec<RawRecord>, FetchError>;
}

pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn classify_send_error(err: &reqwest::Error) -> FetchError {
        if err.is_timeout() || err.is_connect() {
            FetchError::transient(format!("request failed: {}", err))
        } else {
            FetchError::permanent(format!("request failed: {}", err))
        }
    }

    fn classify_status(status: StatusCode, context: &str) -> FetchError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            FetchError::permanent(format!("{}: access denied ({})", context, status))
        } else if status.as_u16() == 429 || status.is_server_error() {
            FetchError::transient(format!("{}: remote overloaded ({})", context, status))
        } else {
            FetchError::permanent(format!("{}: unexpected status {}", context, status))
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        context: &str,
    ) -> Result<T, FetchError> {
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| {
                error!("{} request error: {}", context, e);
                Self::classify_send_error(&e)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let err = Self::classify_status(status, context);
            warn!("{} failed: {}", context, err);
            return Err(err);
        }

        resp.json::<T>().await.map_err(|e| {
            error!("{} body parse error: {}", context, e);
            FetchError::permanent(format!("{}: bad response body: {}", context, e))
        })
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn list_partitions(&self) -> Result<Vec<u64>, FetchError> {
        let url = format!("{}/partitions", self.base_url);
        self.get_json(url, "list_partitions").await
    }

    async fn fetch_page(
        &self,
        partition_id: u64,
        after: Option<i64>,
        limit: u32,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let mut url = format!(
            "{}/partitions/{}/records?limit={}",
            self.base_url, partition_id, limit
        );
        if let Some(after) = after {
            url.push_str(&format!("&after={}", after));
        }
        let context = format!("fetch_page partition {}", partition_id);
        self.get_json(url, &context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(!HttpRemote::classify_status(StatusCode::FORBIDDEN, "t").is_transient());
        assert!(!HttpRemote::classify_status(StatusCode::UNAUTHORIZED, "t").is_transient());
        assert!(HttpRemote::classify_status(StatusCode::TOO_MANY_REQUESTS, "t").is_transient());
        assert!(HttpRemote::classify_status(StatusCode::SERVICE_UNAVAILABLE, "t").is_transient());
        assert!(HttpRemote::classify_status(StatusCode::INTERNAL_SERVER_ERROR, "t").is_transient());
        assert!(!HttpRemote::classify_status(StatusCode::NOT_FOUND, "t").is_transient());
    }

    #[test]
    fn test_raw_record_defaults() {
        let raw: RawRecord = serde_json::from_value(serde_json::json!({
            "id": 10,
            "partition_id": 1,
            "actor": { "id": 7 },
            "occurred_at": 1000
        }))
        .unwrap();
        assert_eq!(raw.content, "");
        assert!(raw.attachments.is_empty());
        assert!(raw.reactions.is_empty());
        assert!(raw.mentions.is_empty());
        assert!(raw.reference.is_none());
        assert!(raw.thread_id.is_none());
        assert!(!raw.pinned);
        assert!(!raw.actor.bot);
        assert_eq!(raw.actor.display_name, "");
    }
}
