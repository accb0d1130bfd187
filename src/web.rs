//! Web Research Tools
//!
//! Topic research for quiz material: web search through the Tavily API and
//! plain-text content extraction from pages.

use futures_util::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, SearchCache};
use crate::config::Config;

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Concurrent page fetches per extraction batch
pub const EXTRACT_FAN_OUT: usize = 4;

pub const DEFAULT_MAX_RESULTS: usize = 5;
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 2000;

static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("valid script regex"));
static STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("valid style regex"));
static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

impl SearchResult {
    /// Result returned when no search backend is configured
    pub fn placeholder(query: &str) -> Self {
        Self {
            title: format!("Search result for: {}", query),
            url: "https://example.com".to_string(),
            content: format!("Mock search result content for query: {}", query),
            score: 0.9,
        }
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Extracted page text, or the reason it could not be fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractedContent {
    fn failed(url: &str, err: impl std::fmt::Display) -> Self {
        Self {
            url: url.to_string(),
            title: None,
            content: String::new(),
            length: 0,
            error: Some(format!("Failed to extract content: {}", err)),
        }
    }
}

/// Search and extraction client
#[derive(Clone)]
pub struct WebResearch {
    client: Client,
    tavily_api_key: Option<String>,
    search_url: String,
    cache: SearchCache,
}

impl WebResearch {
    pub fn new(tavily_api_key: Option<&str>, cache_ttl: Duration) -> Self {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("quizsmith/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            tavily_api_key: tavily_api_key.map(|k| k.to_string()),
            search_url: TAVILY_SEARCH_URL.to_string(),
            cache: SearchCache::new(1000, cache_ttl),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.tavily_api_key.as_deref(), config.search_cache_ttl())
    }

    /// Point search at another Tavily-compatible endpoint
    pub fn with_search_url(mut self, url: &str) -> Self {
        self.search_url = url.to_string();
        self
    }

    pub fn has_search_backend(&self) -> bool {
        self.tavily_api_key.is_some()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Search the web; without an API key a single placeholder result comes back
    pub async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            anyhow::bail!("search query must not be empty");
        }
        let max_results = max_results.max(1);

        let Some(api_key) = &self.tavily_api_key else {
            debug!("No TAVILY_API_KEY, returning placeholder result");
            return Ok(vec![SearchResult::placeholder(query)]);
        };

        let key = SearchCache::compute_key(query, max_results);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached.as_ref().clone());
        }

        let response = self
            .client
            .post(&self.search_url)
            .json(&TavilyRequest {
                api_key,
                query,
                max_results,
                search_depth: "basic",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Search failed: {} {}", status, body);
        }

        let mut results = response.json::<TavilyResponse>().await?.results;
        results.truncate(max_results);
        info!("Search '{}' returned {} results", query, results.len());

        self.cache.set(&key, results.clone()).await;
        Ok(results)
    }

    /// Fetch and extract several pages, preserving input order
    pub async fn extract_many(&self, urls: &[String], max_content_length: usize) -> Vec<ExtractedContent> {
        stream::iter(urls.iter().cloned())
            .map(|url| async move { self.extract_one(&url, max_content_length).await })
            .buffered(EXTRACT_FAN_OUT)
            .collect::<Vec<_>>()
            .await
    }

    /// Fetch and extract one page; failures become an error entry
    pub async fn extract_one(&self, url: &str, max_content_length: usize) -> ExtractedContent {
        match self.fetch(url).await {
            Ok(html) => {
                let page = extract_page(&html, max_content_length);
                debug!("Extracted {} chars from {}", page.content.len(), url);
                ExtractedContent {
                    url: url.to_string(),
                    title: Some(page.title),
                    length: page.content.chars().count(),
                    content: page.content,
                    error: None,
                }
            }
            Err(e) => {
                warn!("Content extraction failed for {}: {}", url, e);
                ExtractedContent::failed(url, e)
            }
        }
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Title and cleaned body text of an HTML page
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub title: String,
    pub content: String,
}

/// Strip markup from `html` and truncate the text to `max_len` characters
pub fn extract_page(html: &str, max_len: usize) -> PageText {
    let title = TITLE_RE
        .captures(html)
        .map(|c| decode_entities(c[1].trim()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "No title".to_string());

    let text = SCRIPT_RE.replace_all(html, " ");
    let text = STYLE_RE.replace_all(&text, " ");
    let text = TITLE_RE.replace_all(&text, " ");
    let text = TAG_RE.replace_all(&text, " ");
    let text = decode_entities(&text);
    let text = WS_RE.replace_all(&text, " ").trim().to_string();

    let content = if text.chars().count() > max_len {
        let mut truncated: String = text.chars().take(max_len).collect();
        truncated.push_str("...");
        truncated
    } else {
        text
    };

    PageText { title, content }
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
