//! Upstream feed retrieval.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Feed transport failure.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("failed to build http client: {0}")]
    Client(String),
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
}

/// Source of raw feed documents.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<String, FeedError>;
}

/// Fetches the feed over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
}

impl HttpFeedSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FeedError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "application/rss+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5",
            ),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FeedError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self) -> Result<String, FeedError> {
        let transport = |e: reqwest::Error| FeedError::Transport {
            url: self.url.clone(),
            message: e.to_string(),
        };

        let response = self.client.get(&self.url).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(transport)?;
        debug!(url = %self.url, bytes = body.len(), "fetched feed");
        Ok(body)
    }
}

/// Serves a fixed document. Used in tests and for offline runs.
#[derive(Debug, Clone)]
pub struct StaticFeedSource {
    body: Result<String, String>,
}

impl StaticFeedSource {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: Ok(body.into()),
        }
    }

    /// A source whose every fetch fails with a transport error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            body: Err(message.into()),
        }
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    async fn fetch(&self) -> Result<String, FeedError> {
        self.body.clone().map_err(|message| FeedError::Transport {
            url: "static".to_string(),
            message,
        })
    }
}
