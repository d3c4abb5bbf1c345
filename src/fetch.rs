//! Plain HTTP document source
//!
//! Not a browser: one GET, no JavaScript. Pages that render their price
//! client-side need a rendering accessor supplied by the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::accessor::DocumentSource;
use crate::document::StaticDocument;
use crate::error::FetchError;
use crate::resolver::page_url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/118.0.5993.118 Safari/537.36";

/// Fetches pages with `reqwest` and hands them out as [`StaticDocument`]s.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    /// # Errors
    ///
    /// [`FetchError::Http`] if the client cannot be built (TLS backend).
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentSource for HttpSource {
    type Accessor = StaticDocument;

    async fn open(&self, url: &str) -> Result<StaticDocument, FetchError> {
        let parsed = page_url(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }

        let response = self
            .client
            .get(parsed)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let final_url = response.url().clone();
        let body = response.text().await?;
        tracing::debug!(%final_url, bytes = body.len(), "fetched document");

        Ok(StaticDocument::new(final_url, body))
    }
}
