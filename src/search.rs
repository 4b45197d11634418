//! Tavily web search client.

use std::{fmt::Write as _, time::Duration};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::SearchConfig;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Tavily API key not configured")]
    NotConfigured,
    #[error("{0}")]
    Api(String),
    #[error("search request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'static str,
    include_answer: bool,
    include_raw_content: bool,
    max_results: u32,
}

#[derive(Debug, Clone)]
pub struct SearchClient {
    client: Client,
    api_url: String,
    max_results: u32,
    api_key: Option<String>,
}

impl SearchClient {
    pub fn new(config: &SearchConfig, api_key: Option<String>) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SearchError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            max_results: config.max_results,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn search_web(&self, query: &str) -> Result<SearchResponse, SearchError> {
        let api_key = self.api_key.as_deref().ok_or(SearchError::NotConfigured)?;
        let payload = TavilyRequest {
            api_key,
            query,
            search_depth: "basic",
            include_answer: true,
            include_raw_content: false,
            max_results: self.max_results,
        };

        debug!(query_len = query.len(), "sending search request");
        let response = self
            .client
            .post(&self.api_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(url = %self.api_url, error = %e, "search HTTP request failed (transport)");
                SearchError::Request(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "search request returned HTTP error");
            return Err(SearchError::Api(format!("Tavily API error: {body}")));
        }

        let parsed = response
            .json::<SearchResponse>()
            .await
            .map_err(|e| SearchError::Request(format!("failed to parse response body: {e}")))?;
        debug!(results = parsed.results.len(), "received search response");
        Ok(parsed)
    }
}

/// Render results as LLM context.
pub fn format_for_context(response: &SearchResponse) -> String {
    if response.results.is_empty() {
        return "No search results found.".to_string();
    }

    let mut context = format!("Web search results for \"{}\":\n\n", response.query);
    if let Some(answer) = &response.answer {
        let _ = write!(context, "Summary: {answer}\n\n");
    }
    for (i, r) in response.results.iter().enumerate() {
        let _ = write!(context, "[{}] {}\nURL: {}\n{}\n\n", i + 1, r.title, r.url, r.content);
    }
    context
}
