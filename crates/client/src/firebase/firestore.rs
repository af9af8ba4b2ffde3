//! Firestore REST client.
//!
//! Implements [`DocumentStore`]. Requests carry the signed-in user's ID token
//! when an [`IdentityToolkitClient`] is attached, so security rules see the
//! same identity the app does. Realtime channels poll the document and yield
//! whenever its `updateTime` (or existence) changes.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use packup_core::{Document, DocumentId, FilterSet};
use secrecy::ExposeSecret;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};
use url::Url;

use super::auth::IdentityToolkitClient;
use super::value::{decode_document, encode, encode_fields};
use super::{parse_error, truncate};
use crate::config::FirebaseConfig;
use crate::providers::{DocumentStore, IdentityError, StoreError};

const FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";

/// Client for the Firestore REST API.
#[derive(Clone)]
pub struct FirestoreClient {
    inner: Arc<FirestoreInner>,
}

struct FirestoreInner {
    client: reqwest::Client,
    /// `.../projects/<id>/databases/(default)/documents`
    documents_url: String,
    api_key: String,
    identity: Option<IdentityToolkitClient>,
    poll_interval: Duration,
}

impl FirestoreClient {
    /// Create a client for the project's default database.
    ///
    /// `identity` supplies ID tokens for authenticated requests;
    /// `poll_interval` paces realtime channels.
    #[must_use]
    pub fn new(
        config: &FirebaseConfig,
        identity: Option<IdentityToolkitClient>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(FirestoreInner {
                client: reqwest::Client::new(),
                documents_url: format!(
                    "{FIRESTORE_URL}/projects/{}/databases/(default)/documents",
                    config.project_id
                ),
                api_key: config.api_key.expose_secret().to_string(),
                identity,
                poll_interval,
            }),
        }
    }

    /// `documents` URL followed by `suffix` (`/<path>` or `:<method>`).
    fn url(&self, suffix: &str) -> Result<Url, StoreError> {
        let raw = format!("{}{suffix}", self.inner.documents_url);
        let mut url = Url::parse(&raw).map_err(|e| StoreError::Codec(e.to_string()))?;
        url.query_pairs_mut().append_pair("key", &self.inner.api_key);
        Ok(url)
    }

    fn document_path(collection: &str, id: &DocumentId) -> String {
        format!(
            "/{}/{}",
            urlencoding::encode(collection),
            urlencoding::encode(id.as_str())
        )
    }

    /// Send a request with the user's ID token, if any.
    ///
    /// Returns the body, or `None` on 404.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<String>, StoreError> {
        let request = match &self.inner.identity {
            Some(identity) => match identity.id_token().await {
                Ok(Some(token)) => request.bearer_auth(token.expose_secret()),
                Ok(None) => request,
                Err(IdentityError::NotSignedIn) => {
                    return Err(StoreError::PermissionDenied(
                        "session was revoked".to_string(),
                    ));
                }
                Err(e) => return Err(StoreError::Unavailable(format!("token refresh failed: {e}"))),
            },
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            debug!(status = %status, body = %truncate(&body, 500), "Firestore request failed");
            return Err(error_for(status.as_u16(), &body));
        }
        Ok(Some(body))
    }

    /// Fetch a document with its `updateTime`.
    async fn fetch(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<(Document, String)>, StoreError> {
        let url = self.url(&Self::document_path(collection, id))?;
        let Some(body) = self.send(self.inner.client.get(url)).await? else {
            return Ok(None);
        };
        let resource: Value = parse_json(&body)?;
        decode_document(&resource).map(Some)
    }
}

fn parse_json(body: &str) -> Result<Value, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Map an error response to a [`StoreError`].
fn error_for(status: u16, body: &str) -> StoreError {
    let message = parse_error(body).map_or_else(|| truncate(body, 200), |(_, message)| message);
    match status {
        401 | 403 => StoreError::PermissionDenied(message),
        503 => StoreError::Unavailable(message),
        _ => StoreError::Api { status, message },
    }
}

/// Quote field path segments that are not plain identifiers.
fn field_path(path: &str) -> String {
    path.split('.')
        .map(|segment| {
            let mut chars = segment.chars();
            let simple = chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
            if simple {
                segment.to_string()
            } else {
                format!("`{}`", segment.replace('\\', "\\\\").replace('`', "\\`"))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// `structuredQuery` body for `collection` filtered by `filters` (AND).
fn structured_query(collection: &str, filters: &FilterSet) -> Value {
    let mut field_filters: Vec<Value> = filters
        .iter()
        .map(|filter| {
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": field_path(&filter.field) },
                    "op": filter.op.as_str(),
                    "value": encode(&filter.value),
                }
            })
        })
        .collect();

    let mut query = json!({ "from": [{ "collectionId": collection }] });
    let condition = match field_filters.len() {
        0 => None,
        1 => field_filters.pop(),
        _ => Some(json!({ "compositeFilter": { "op": "AND", "filters": field_filters } })),
    };
    if let (Some(condition), Some(query)) = (condition, query.as_object_mut()) {
        query.insert("where".to_string(), condition);
    }
    json!({ "structuredQuery": query })
}

impl DocumentStore for FirestoreClient {
    #[instrument(skip(self))]
    async fn get_document(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.fetch(collection, id).await?.map(|(document, _)| document))
    }

    #[instrument(skip(self, filters), fields(filters = filters.len()))]
    async fn list_documents(
        &self,
        collection: &str,
        filters: &FilterSet,
    ) -> Result<Vec<Document>, StoreError> {
        let url = self.url(":runQuery")?;
        let body = structured_query(collection, filters);

        let Some(response) = self
            .send(self.inner.client.post(url).json(&body))
            .await?
        else {
            return Ok(Vec::new());
        };

        // One entry per result; entries without `document` only carry the
        // read time.
        let results: Vec<Value> = serde_json::from_str(&response)
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        let documents = results
            .iter()
            .filter_map(|result| result.get("document"))
            .map(|resource| decode_document(resource).map(|(document, _)| document))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = documents.len(), "Query returned documents");
        Ok(documents)
    }

    #[instrument(skip(self, value))]
    async fn set_document(
        &self,
        collection: &str,
        id: &DocumentId,
        value: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let url = self.url(&Self::document_path(collection, id))?;
        let body = json!({ "fields": encode_fields(value) });
        self.send(self.inner.client.patch(url).json(&body)).await?;
        Ok(())
    }

    #[instrument(skip(self, patch))]
    async fn patch_document(
        &self,
        collection: &str,
        id: &DocumentId,
        patch: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut url = self.url(&Self::document_path(collection, id))?;
        {
            let mut query = url.query_pairs_mut();
            for field in patch.keys() {
                query.append_pair("updateMask.fieldPaths", &field_path(field));
            }
            query.append_pair("currentDocument.exists", "true");
        }
        let body = json!({ "fields": encode_fields(patch) });

        match self.send(self.inner.client.patch(url).json(&body)).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
        }
    }

    fn subscribe(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> BoxStream<'static, Result<Option<Document>, StoreError>> {
        let client = self.clone();
        let (collection, id) = (collection.to_string(), id.clone());
        let interval = self.inner.poll_interval;

        async_stream::stream! {
            // `None` until the first poll; then the last seen update time
            // (`None` while the document does not exist).
            let mut last_seen: Option<Option<String>> = None;
            loop {
                match client.fetch(&collection, &id).await {
                    Ok(snapshot) => {
                        let marker = snapshot.as_ref().map(|(_, update_time)| update_time.clone());
                        if last_seen.as_ref() != Some(&marker) {
                            last_seen = Some(marker);
                            yield Ok(snapshot.map(|(document, _)| document));
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
                tokio::time::sleep(interval).await;
            }
        }
        .boxed()
    }
}
