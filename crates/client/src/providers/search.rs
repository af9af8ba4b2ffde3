//! Search index interface.

use std::future::Future;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors reported by the search index.
#[derive(Debug, Error)]
pub enum SearchError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response.
    #[error("parse error: {0}")]
    Parse(String),

    /// The index could not be reached.
    #[error("search index unavailable: {0}")]
    Unavailable(String),
}

/// One record returned by a search.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "objectID")]
    pub object_id: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl SearchHit {
    /// A string attribute of the hit.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }
}

/// Hosted full-text index, queried on a single searchable attribute.
pub trait SearchIndex: Send + Sync + 'static {
    /// Hits for `query` in `index_name`, best match first.
    fn search(
        &self,
        index_name: &str,
        query: &str,
    ) -> impl Future<Output = Result<Vec<SearchHit>, SearchError>> + Send;
}
