//! Algolia search client for username lookups.
//!
//! Queries are restricted to the `username` attribute with typo tolerance
//! off, so a hit means the exact handle (or a prefix of a longer one) exists.
//! Results are cached for 30 seconds to absorb repeated probes while a user
//! edits the field.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::AlgoliaConfig;
use crate::firebase::truncate;
use crate::providers::{SearchError, SearchHit, SearchIndex};
use crate::services::availability::USERNAME_ATTRIBUTE;

/// Hits requested per probe.
const HITS_PER_PAGE: u32 = 5;

/// Client for the Algolia search API.
#[derive(Clone)]
pub struct AlgoliaClient {
    inner: Arc<AlgoliaClientInner>,
}

struct AlgoliaClientInner {
    client: reqwest::Client,
    /// `https://<app>-dsn.algolia.net/1/indexes/*/queries`
    endpoint: String,
    cache: Cache<(String, String), Arc<Vec<SearchHit>>>,
}

#[derive(Debug, Deserialize)]
struct MultiQueryResponse {
    results: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

impl AlgoliaClient {
    /// Create a new Algolia client.
    ///
    /// # Errors
    ///
    /// Returns error if the credentials are not valid header values or the
    /// HTTP client fails to build.
    pub fn new(config: &AlgoliaConfig) -> Result<Self, SearchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Algolia-Application-Id",
            HeaderValue::from_str(&config.app_id)
                .map_err(|e| SearchError::Parse(format!("Invalid application id: {e}")))?,
        );
        headers.insert(
            "X-Algolia-API-Key",
            HeaderValue::from_str(config.search_api_key.expose_secret())
                .map_err(|e| SearchError::Parse(format!("Invalid API key format: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let cache = Cache::builder()
            .max_capacity(500)
            .time_to_live(Duration::from_secs(30))
            .build();

        Ok(Self {
            inner: Arc::new(AlgoliaClientInner {
                client,
                endpoint: format!(
                    "https://{}-dsn.algolia.net/1/indexes/*/queries",
                    config.app_id
                ),
                cache,
            }),
        })
    }

    async fn query(&self, index_name: &str, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let body = serde_json::json!({
            "requests": [{ "indexName": index_name, "params": query_params(query) }]
        });

        let response = self
            .inner
            .client
            .post(&self.inner.endpoint)
            .json(&body)
            .send()
            .await?;
        let status = response.status();

        if status.is_server_error() {
            return Err(SearchError::Unavailable(format!("status {status}")));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message: truncate(&message, 200),
            });
        }

        let text = response.text().await?;
        parse_hits(&text)
    }
}

/// URL-encoded search parameters for a username probe.
fn query_params(query: &str) -> String {
    format!(
        "query={}&restrictSearchableAttributes={USERNAME_ATTRIBUTE}&typoTolerance=false&hitsPerPage={HITS_PER_PAGE}",
        urlencoding::encode(query)
    )
}

/// Hits of the single query in a multi-query response.
fn parse_hits(body: &str) -> Result<Vec<SearchHit>, SearchError> {
    serde_json::from_str::<MultiQueryResponse>(body)
        .map(|response| {
            response
                .results
                .into_iter()
                .next()
                .map(|result| result.hits)
                .unwrap_or_default()
        })
        .map_err(|e| SearchError::Parse(e.to_string()))
}

impl SearchIndex for AlgoliaClient {
    #[instrument(skip(self))]
    async fn search(&self, index_name: &str, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let key = (index_name.to_string(), query.to_string());
        if let Some(hits) = self.inner.cache.get(&key).await {
            debug!("Cache hit for search");
            return Ok(hits.as_ref().clone());
        }

        let hits = self.query(index_name, query).await?;
        debug!(count = hits.len(), "Search returned hits");
        self.inner.cache.insert(key, Arc::new(hits.clone())).await;
        Ok(hits)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn test_query_params_encode_input() {
        assert_eq!(
            query_params("ada lovelace"),
            "query=ada%20lovelace&restrictSearchableAttributes=username&typoTolerance=false&hitsPerPage=5"
        );
    }

    #[test]
    fn test_parse_hits() {
        let body = r#"{
            "results": [{
                "hits": [
                    {"objectID": "u1", "username": "ada", "_highlightResult": {}},
                    {"objectID": "u2", "username": "adam"}
                ],
                "nbHits": 2,
                "index": "Users"
            }]
        }"#;

        let hits = parse_hits(body).unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits.first().unwrap().object_id, "u1");
        assert_eq!(hits.first().unwrap().attribute("username"), Some("ada"));
        assert!(parse_hits(r#"{"results": []}"#).unwrap().is_empty());
        assert!(matches!(parse_hits("<html>"), Err(SearchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_empty_query_skips_the_network() {
        let client = AlgoliaClient::new(&AlgoliaConfig {
            app_id: "APPID".to_string(),
            search_api_key: SecretString::from("search-key"),
            users_index: "Users".to_string(),
        })
        .unwrap();

        assert!(client.search("Users", "").await.unwrap().is_empty());
    }
}
