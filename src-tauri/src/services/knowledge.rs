use crate::error::AppError;
use crate::models::classify_types::Summary;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Resolves a label to a short encyclopedia summary.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn lookup(&self, label: &str) -> Result<Summary, AppError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    /// Wikipedia language edition, e.g. `en`
    #[serde(default = "default_language")]
    pub language: String,
    /// Wikimedia rejects requests without a descriptive User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Overrides `https://<language>.wikipedia.org/w/api.php`
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_language() -> String {
    "en".to_string()
}
fn default_user_agent() -> String {
    format!("ObjectLens/{}", env!("CARGO_PKG_VERSION"))
}
fn default_timeout_secs() -> u64 {
    15
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            endpoint: None,
        }
    }
}

impl LookupConfig {
    pub fn api_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}.wikipedia.org/w/api.php", self.language),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    query: Option<QueryBody>,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    title: Option<String>,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    extract: Option<String>,
}

/// Intro-section plain-text extracts from the MediaWiki action API.
pub struct WikipediaClient {
    client: reqwest::Client,
    config: LookupConfig,
}

impl WikipediaClient {
    pub fn new(config: LookupConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::lookup(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl KnowledgeSource for WikipediaClient {
    async fn lookup(&self, label: &str) -> Result<Summary, AppError> {
        let title = label.trim();
        if title.is_empty() {
            return Ok(Summary::NotFound {
                label: label.to_string(),
            });
        }

        debug!("Looking up '{}' on {} Wikipedia", title, self.config.language);
        let response = self
            .client
            .get(self.config.api_url())
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("formatversion", "2"),
                ("prop", "extracts"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("titles", title),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::lookup(format!(
                "Wikipedia returned HTTP {} for '{}'",
                response.status(),
                title
            )));
        }

        let body = response.text().await?;
        let summary = parse_extract_response(title, &body)?;
        info!("Lookup for '{}': found={}", title, summary.exists());
        Ok(summary)
    }
}

/// Interprets a `prop=extracts` response. A page that is missing, has an
/// invalid title or comes back with an empty extract counts as not found.
pub fn parse_extract_response(label: &str, body: &str) -> Result<Summary, AppError> {
    let response: QueryResponse = serde_json::from_str(body)
        .map_err(|e| AppError::lookup(format!("Unexpected Wikipedia response: {}", e)))?;

    let page = response.query.and_then(|q| q.pages.into_iter().next());
    let not_found = Summary::NotFound {
        label: label.to_string(),
    };

    let Some(page) = page else {
        return Ok(not_found);
    };
    if page.missing || page.invalid {
        return Ok(not_found);
    }

    match page.extract.map(|e| e.trim().to_string()) {
        Some(extract) if !extract.is_empty() => Ok(Summary::Found {
            title: page.title.unwrap_or_else(|| label.to_string()),
            extract,
        }),
        _ => Ok(not_found),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_found_page() {
        let body = r#"{"batchcomplete": true, "query": {"normalized": [{"fromencoded": false, "from": "golden retriever", "to": "Golden retriever"}],
            "pages": [{"pageid": 21022536, "ns": 0, "title": "Golden Retriever",
            "extract": "The Golden Retriever is a Scottish breed of retriever dog of medium size.\n"}]}}"#;

        let summary = parse_extract_response("golden retriever", body).unwrap();
        assert_eq!(
            summary,
            Summary::Found {
                title: "Golden Retriever".to_string(),
                extract: "The Golden Retriever is a Scottish breed of retriever dog of medium size."
                    .to_string(),
            }
        );
    }

    #[test]
    fn test_missing_page() {
        let body = r#"{"batchcomplete": true, "query": {"pages": [{"ns": 0, "title": "Zzxq blorp", "missing": true}]}}"#;
        let summary = parse_extract_response("zzxq blorp", body).unwrap();
        assert!(!summary.exists());
        assert_eq!(
            summary.display_text(),
            "No information found for zzxq blorp on Wikipedia."
        );
    }

    #[test]
    fn test_invalid_title() {
        let body = r#"{"query": {"pages": [{"title": "a|b", "invalidreason": "bad", "invalid": true}]}}"#;
        assert!(!parse_extract_response("a|b", body).unwrap().exists());
    }

    #[test]
    fn test_empty_extract_is_not_found() {
        let body = r#"{"query": {"pages": [{"pageid": 1, "title": "Stub", "extract": "  "}]}}"#;
        assert!(!parse_extract_response("stub", body).unwrap().exists());
    }

    #[test]
    fn test_garbage_is_lookup_error() {
        let err = parse_extract_response("x", "<html>").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Lookup);
    }

    #[test]
    fn test_api_url() {
        let mut config = LookupConfig::default();
        assert_eq!(config.api_url(), "https://en.wikipedia.org/w/api.php");
        config.language = "fr".to_string();
        assert_eq!(config.api_url(), "https://fr.wikipedia.org/w/api.php");
        config.endpoint = Some("http://127.0.0.1:9/api.php".to_string());
        assert_eq!(config.api_url(), "http://127.0.0.1:9/api.php");
    }

    #[tokio::test]
    async fn test_blank_label_skips_request() {
        let config = LookupConfig {
            endpoint: Some("http://127.0.0.1:9/unreachable".to_string()),
            ..LookupConfig::default()
        };
        let client = WikipediaClient::new(config).unwrap();
        let summary = client.lookup("   ").await.unwrap();
        assert!(!summary.exists());
    }
}
