//! [`DocumentStore`] over the relay's REST API.
//!
//! Maps the structured error responses back onto [`StoreError`]: 409 with
//! conflict details becomes [`StoreError::Conflict`], 422 with the no-changes
//! code becomes [`StoreError::NoChanges`], 404 becomes the matching
//! not-found variant. Everything else is a generic request failure.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{
    CheckpointRequest, DocumentStore, DocumentUpdate, NewDocument, RevertRequest, StoreError,
};
use crate::domain::{Contribution, Document, DocumentId, VersionMeta, VersionRecord};
use crate::error::{ApiError, ErrorResponse};

/// Default timeout applied to every request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the document REST API.
#[derive(Clone)]
pub struct HttpDocumentStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl fmt::Debug for HttpDocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDocumentStore")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl HttpDocumentStore {
    /// Creates a store rooted at `base_url` (e.g. `http://localhost:8080`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Request`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Sends `token` as a bearer credential on every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Creates a document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRequest`] or [`StoreError::Request`].
    pub async fn create(&self, request: &NewDocument) -> Result<Document, StoreError> {
        let url = format!("{}/api/v1/documents", self.base_url);
        let response = self
            .authorize(self.client.post(url).json(request))
            .send()
            .await
            .map_err(transport)?;
        decode(response, Target::default()).await
    }

    fn document_url(&self, document_id: DocumentId, suffix: &str) -> String {
        format!("{}/api/v1/documents/{document_id}{suffix}", self.base_url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        document_id: DocumentId,
        suffix: &str,
    ) -> Result<T, StoreError> {
        let url = self.document_url(document_id, suffix);
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport)?;
        decode(response, Target::document(document_id)).await
    }

    async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: String,
        body: &B,
        target: Target,
    ) -> Result<T, StoreError> {
        let response = self
            .authorize(self.client.request(method, url).json(body))
            .send()
            .await
            .map_err(transport)?;
        decode(response, target).await
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get(&self, document_id: DocumentId) -> Result<Document, StoreError> {
        self.get_json(document_id, "").await
    }

    async fn update(
        &self,
        document_id: DocumentId,
        update: DocumentUpdate,
    ) -> Result<Document, StoreError> {
        let url = self.document_url(document_id, "");
        self.send_json(reqwest::Method::PUT, url, &update, Target::document(document_id))
            .await
    }

    async fn create_version(
        &self,
        document_id: DocumentId,
        request: CheckpointRequest,
    ) -> Result<VersionRecord, StoreError> {
        let url = self.document_url(document_id, "/versions");
        self.send_json(reqwest::Method::POST, url, &request, Target::document(document_id))
            .await
    }

    async fn revert(
        &self,
        document_id: DocumentId,
        request: RevertRequest,
    ) -> Result<Document, StoreError> {
        let url = self.document_url(document_id, "/revert");
        let target = Target {
            document: Some(document_id),
            version: Some(request.version_number),
        };
        self.send_json(reqwest::Method::POST, url, &request, target)
            .await
    }

    async fn list_versions(&self, document_id: DocumentId) -> Result<Vec<VersionMeta>, StoreError> {
        self.get_json(document_id, "/versions").await
    }

    async fn contributions(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<Contribution>, StoreError> {
        self.get_json(document_id, "/contributions").await
    }
}

/// What a request addressed, used to name not-found errors.
#[derive(Debug, Clone, Copy, Default)]
struct Target {
    document: Option<DocumentId>,
    version: Option<u32>,
}

impl Target {
    const fn document(document_id: DocumentId) -> Self {
        Self {
            document: Some(document_id),
            version: None,
        }
    }
}

fn transport(err: reqwest::Error) -> StoreError {
    tracing::warn!(error = %err, "document API request failed");
    StoreError::Request(err.to_string())
}

async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    target: Target,
) -> Result<T, StoreError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Request(format!("undecodable response: {e}")));
    }
    let body = response.json::<ErrorResponse>().await.ok();
    Err(classify(status, body, target))
}

fn classify(status: StatusCode, body: Option<ErrorResponse>, target: Target) -> StoreError {
    let (code, message, conflict) = match body {
        Some(ErrorResponse { error }) => (Some(error.code), error.message, error.conflict),
        None => (None, status.to_string(), None),
    };

    match status {
        StatusCode::CONFLICT => match conflict {
            Some(details) => StoreError::Conflict(Box::new(details)),
            None => StoreError::Request(message),
        },
        StatusCode::UNPROCESSABLE_ENTITY if code == Some(ApiError::NO_CHANGES_CODE) => {
            StoreError::NoChanges
        }
        StatusCode::NOT_FOUND => match (target.version, target.document) {
            (Some(n), _) if code == Some(2002) => StoreError::VersionNotFound(n),
            (_, Some(id)) => StoreError::DocumentNotFound(id),
            _ => StoreError::Request(message),
        },
        StatusCode::BAD_REQUEST => StoreError::InvalidRequest(message),
        _ => StoreError::Request(format!("{status}: {message}")),
    }
}
