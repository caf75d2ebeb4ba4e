use crate::config::HttpEventSourceConfig;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One event as delivered by the remote feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub id: String,
    pub aggregate_id: String,
    pub causation_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub sequence_number: u64,
    pub offset: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// One page of the remote feed. The `*_offset` fields use -1 for "before any
/// event", matching the server convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    pub events: Vec<FeedEvent>,
    pub query_max_offset: i64,
    pub global_max_offset: i64,
    pub page_start_offset: i64,
    pub page_end_offset: i64,
}

/// Where a query starts reading. Offset -1 asks for the feed from the very
/// beginning.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedPosition {
    AfterOffset(i64),
    AfterTimestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedQuery {
    pub tags: Vec<String>,
    pub position: FeedPosition,
    pub batch_size: u32,
}

impl FeedQuery {
    pub(crate) fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("tags", self.tags.join(","))];
        match &self.position {
            FeedPosition::AfterOffset(offset) => params.push(("after_offset", offset.to_string())),
            FeedPosition::AfterTimestamp(timestamp) => params.push((
                "after_timestamp",
                timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            )),
        }
        params.push(("batch_size", self.batch_size.to_string()));
        params
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("feed returned status {status}")]
    Status { status: u16 },
}

/// Fetches one page of the remote feed. The HTTP client is the production
/// implementation; tests script pages through an in-memory one.
#[async_trait]
pub trait FeedClient: Send + Sync + 'static {
    async fn fetch(&self, query: &FeedQuery) -> Result<FeedPage, FeedError>;
}

/// Feed client speaking the remote context's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpFeedClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFeedClient {
    pub fn new(config: &HttpEventSourceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url(),
        }
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn fetch(&self, query: &FeedQuery) -> Result<FeedPage, FeedError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&query.to_params())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FeedError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(response.json::<FeedPage>().await?)
    }
}
