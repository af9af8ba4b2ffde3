//! Remote document store interface.

use std::future::Future;

use futures::stream::BoxStream;
use packup_core::{Document, DocumentId, FilterSet};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors reported by the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A patch targeted a document that does not exist.
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    /// Security rules rejected the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store returned a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// A value could not be converted to or from the wire format.
    #[error("codec error: {0}")]
    Codec(String),

    /// The store could not be reached.
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

/// The remote document database.
pub trait DocumentStore: Send + Sync + 'static {
    /// Fetch one document; `None` if it does not exist.
    fn get_document(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> impl Future<Output = Result<Option<Document>, StoreError>> + Send;

    /// Fetch every document in `collection` matching all `filters`.
    fn list_documents(
        &self,
        collection: &str,
        filters: &FilterSet,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send;

    /// Create or fully replace a document.
    fn set_document(
        &self,
        collection: &str,
        id: &DocumentId,
        value: &Map<String, Value>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Update the given top-level fields of an existing document.
    fn patch_document(
        &self,
        collection: &str,
        id: &DocumentId,
        patch: &Map<String, Value>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Push channel for one document. Each item is the document's new state
    /// (`None` once deleted); an `Err` item means the channel broke and the
    /// stream ends.
    fn subscribe(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> BoxStream<'static, Result<Option<Document>, StoreError>>;
}
