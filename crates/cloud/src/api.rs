//! Broker API client.
//!
//! Async HTTP client using `reqwest` with Bearer token authentication.
//! One client implements the broker, finalizer and quota-oracle traits;
//! the app constructs it once and shares it behind `Arc`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use clipvault_upload::cloud::{
    BrokerRejection, CloudError, Finalizer, NegotiatedUpload, QuotaOracle, SessionProvider,
    SignedUrlBroker, StorageUsage, UploadOutcome,
};

/// Errors from the broker API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no active session")]
    NoSession,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateRequest<'a> {
    file_name: &'a str,
    file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateResponse {
    upload_url: String,
    upload: UploadRecord,
}

/// Server-side upload record, as returned by the negotiation endpoint.
#[derive(Debug, Deserialize)]
pub struct UploadRecord {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest<'a> {
    upload_id: &'a str,
    status: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    upload_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageProfile {
    storage_used: i64,
    storage_limit: i64,
}

/// Classifies a non-success negotiation response into a rejection reason.
fn classify_rejection(status: u16, body: &str) -> BrokerRejection {
    match status {
        401 | 403 => BrokerRejection::Unauthenticated,
        413 => BrokerRejection::QuotaExceeded,
        _ => BrokerRejection::Server(format!("{status}: {body}")),
    }
}

/// Broker API client.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<dyn SessionProvider>,
    /// Last fetched usage; refreshed, never locked for correctness.
    cached_usage: RwLock<Option<StorageUsage>>,
}

impl ApiClient {
    /// Creates a client against the given API base URL. The bearer token is
    /// read from `session` per request, so token refreshes apply without
    /// rebuilding the client.
    pub fn new(
        base_url: impl Into<String>,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
            cached_usage: RwLock::new(None),
        })
    }

    fn bearer(&self) -> Result<String, ApiError> {
        self.session.bearer_token().ok_or(ApiError::NoSession)
    }

    /// Performs an authenticated POST, returning the status and body.
    async fn post_json<T: Serialize>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<(u16, String), ApiError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(self.bearer()?)
            .json(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        Ok((status, text))
    }

    async fn negotiate(
        &self,
        file_name: &str,
        file_size: u64,
        metadata: Option<&serde_json::Value>,
    ) -> Result<NegotiatedUpload, BrokerRejection> {
        let req = NegotiateRequest {
            file_name,
            file_size,
            metadata,
        };
        let (status, body) = self
            .post_json("/functions/generate-upload-url", &req)
            .await
            .map_err(|e| match e {
                ApiError::NoSession => BrokerRejection::Unauthenticated,
                other => BrokerRejection::Server(other.to_string()),
            })?;

        if !(200..300).contains(&status) {
            return Err(classify_rejection(status, &body));
        }
        let parsed: NegotiateResponse = serde_json::from_str(&body)
            .map_err(|e| BrokerRejection::Server(format!("malformed response: {e}")))?;
        debug!(file = %file_name, remote_id = %parsed.upload.id, "upload negotiated");
        Ok(NegotiatedUpload {
            upload_url: parsed.upload_url,
            remote_id: parsed.upload.id,
        })
    }

    async fn complete(&self, remote_id: &str, outcome: UploadOutcome) -> Result<(), CloudError> {
        let req = CompleteRequest {
            upload_id: remote_id,
            status: outcome.as_str(),
        };
        let (status, body) = self
            .post_json("/functions/complete-upload", &req)
            .await
            .map_err(|e| CloudError(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(CloudError(format!("complete-upload failed {status}: {body}")));
        }
        Ok(())
    }

    /// Deletes an upload record on the broker, then re-fetches usage so the
    /// freed bytes show up immediately.
    pub async fn delete_upload(&self, remote_id: &str) -> Result<(), ApiError> {
        let req = DeleteRequest {
            upload_id: remote_id,
        };
        let (status, body) = self.post_json("/functions/delete-upload", &req).await?;
        if !(200..300).contains(&status) {
            return Err(ApiError::Api { status, body });
        }
        debug!(remote_id = %remote_id, "upload deleted");
        if let Err(e) = self.fetch_usage().await {
            // The record is gone; usage catches up on the next fetch.
            debug!(error = %e, "usage refresh after delete failed");
        }
        Ok(())
    }

    async fn fetch_usage(&self) -> Result<StorageUsage, CloudError> {
        let url = format!("{}/profile/storage", self.base_url);
        let bearer = self.bearer().map_err(|e| CloudError(e.to_string()))?;
        let resp = self
            .http
            .get(&url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| CloudError(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CloudError(format!("profile fetch failed: {status}")));
        }
        let profile: StorageProfile = resp.json().await.map_err(|e| CloudError(e.to_string()))?;
        let usage = StorageUsage {
            used: profile.storage_used,
            limit: profile.storage_limit,
        };
        *self.cached_usage.write().unwrap() = Some(usage);
        Ok(usage)
    }
}

impl SignedUrlBroker for ApiClient {
    fn negotiate_upload(
        &self,
        file_name: &str,
        file_size: u64,
        metadata: Option<&serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = Result<NegotiatedUpload, BrokerRejection>> + Send + '_>> {
        let file_name = file_name.to_string();
        let metadata = metadata.cloned();
        Box::pin(async move {
            self.negotiate(&file_name, file_size, metadata.as_ref())
                .await
        })
    }
}

impl Finalizer for ApiClient {
    fn mark_terminal(
        &self,
        remote_id: &str,
        outcome: UploadOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + '_>> {
        let remote_id = remote_id.to_string();
        Box::pin(async move { self.complete(&remote_id, outcome).await })
    }
}

impl QuotaOracle for ApiClient {
    fn usage(&self) -> Pin<Box<dyn Future<Output = Result<StorageUsage, CloudError>> + Send + '_>> {
        Box::pin(async move {
            let cached = *self.cached_usage.read().unwrap();
            match cached {
                Some(usage) => Ok(usage),
                None => self.fetch_usage().await,
            }
        })
    }

    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + '_>> {
        Box::pin(async move {
            self.fetch_usage().await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_quota() {
        assert_eq!(
            classify_rejection(413, "Quota exceeded"),
            BrokerRejection::QuotaExceeded
        );
    }

    #[test]
    fn classify_auth() {
        assert_eq!(classify_rejection(401, ""), BrokerRejection::Unauthenticated);
        assert_eq!(classify_rejection(403, ""), BrokerRejection::Unauthenticated);
    }

    #[test]
    fn classify_server_keeps_status() {
        match classify_rejection(503, "maintenance") {
            BrokerRejection::Server(msg) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("maintenance"));
            }
            other => panic!("unexpected rejection: {other:?}"),
        }
    }

    #[test]
    fn negotiate_request_wire_shape() {
        let req = NegotiateRequest {
            file_name: "clip.mp4",
            file_size: 1024,
            metadata: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, "{\"fileName\":\"clip.mp4\",\"fileSize\":1024}");
    }

    #[test]
    fn negotiate_response_parses() {
        let json = r#"{
            "uploadUrl": "https://storage.example/put/abc?sig=x",
            "upload": { "id": "rec-42" }
        }"#;
        let parsed: NegotiateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.upload_url, "https://storage.example/put/abc?sig=x");
        assert_eq!(parsed.upload.id, "rec-42");
    }

    #[test]
    fn complete_request_wire_shape() {
        let req = CompleteRequest {
            upload_id: "rec-42",
            status: UploadOutcome::Uploaded.as_str(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, "{\"uploadId\":\"rec-42\",\"status\":\"UPLOADED\"}");
    }

    #[test]
    fn delete_request_wire_shape() {
        let req = DeleteRequest {
            upload_id: "rec-42",
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, "{\"uploadId\":\"rec-42\"}");
    }

    #[tokio::test]
    async fn delete_upload_requires_session() {
        struct NoSession;
        impl SessionProvider for NoSession {
            fn is_authenticated(&self) -> bool {
                false
            }
            fn bearer_token(&self) -> Option<String> {
                None
            }
        }
        let client = ApiClient::new("https://api.example.com", Arc::new(NoSession)).unwrap();
        let result = client.delete_upload("rec-42").await;
        assert!(matches!(result, Err(ApiError::NoSession)));
    }

    #[test]
    fn storage_profile_parses_camel_case() {
        let profile: StorageProfile =
            serde_json::from_str(r#"{"storageUsed":512,"storageLimit":4096}"#).unwrap();
        assert_eq!(profile.storage_used, 512);
        assert_eq!(profile.storage_limit, 4096);
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        struct NoSession;
        impl SessionProvider for NoSession {
            fn is_authenticated(&self) -> bool {
                false
            }
            fn bearer_token(&self) -> Option<String> {
                None
            }
        }
        let client = ApiClient::new("https://api.example.com/", Arc::new(NoSession)).unwrap();
        assert_eq!(client.base_url, "https://api.example.com");
    }
}
