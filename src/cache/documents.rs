//! Status and result slots for documents going through analysis.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    client::StoreClient,
    error::CacheResult,
    keys::CacheKeys,
    traits::SetOptions,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Processing,
    Completed,
    Failed,
}

/// Progress report written by the processing pipeline and polled by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub status: ProcessingState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    /// Pipeline-specific fields (extracted data, confidence, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DocumentStatus {
    pub fn processing(progress: u8, message: impl Into<String>) -> Self {
        Self {
            status: ProcessingState::Processing,
            progress: Some(progress.min(100)),
            message: Some(message.into()),
            error: None,
            processed_at: None,
            failed_at: None,
            extra: Default::default(),
        }
    }

    pub fn completed(extra: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            status: ProcessingState::Completed,
            progress: Some(100),
            message: None,
            error: None,
            processed_at: Some(Utc::now()),
            failed_at: None,
            extra,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ProcessingState::Failed,
            progress: None,
            message: None,
            error: Some(error.into()),
            processed_at: None,
            failed_at: Some(Utc::now()),
            extra: Default::default(),
        }
    }
}

impl StoreClient {
    /// Record the processing status of a document. Status entries don't expire.
    pub async fn set_document_status(
        &self,
        document_id: &str,
        status: &DocumentStatus,
    ) -> CacheResult<bool> {
        let value = match Value::from_serializable(status) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(document_id, error = %e, "Failed to encode document status");
                return Ok(false);
            }
        };
        self.set(&CacheKeys::doc_status(document_id), &value, SetOptions::default())
            .await
    }

    pub async fn document_status(&self, document_id: &str) -> CacheResult<Option<DocumentStatus>> {
        let Some(value) = self.get(&CacheKeys::doc_status(document_id)).await? else {
            return Ok(None);
        };

        // Older writers stored the status as a JSON string
        let value = match value {
            Value::String(text) => match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(json) => Value::from(json),
                Err(_) => Value::String(text),
            },
            other => other,
        };

        match value.deserialize_into() {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                tracing::warn!(document_id, error = %e, "Ignoring malformed document status");
                Ok(None)
            }
        }
    }

    /// Cache the analysis output of a document. Without a TTL the configured
    /// result lifetime applies.
    pub async fn cache_document_result(
        &self,
        document_id: &str,
        result: &Value,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let ttl = ttl.unwrap_or(self.options().document_result_ttl);
        self.cache_set(&CacheKeys::doc_result(document_id), result, Some(ttl))
            .await
    }

    pub async fn document_result(&self, document_id: &str) -> CacheResult<Option<Value>> {
        self.cache_get(&CacheKeys::doc_result(document_id)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::cache::{client::ClientOptions, memory::MemoryConnector};

    fn client() -> StoreClient {
        let connector = Arc::new(MemoryConnector::from_config(&Default::default()));
        StoreClient::new(connector, ClientOptions::default())
    }

    #[tokio::test]
    async fn test_status_progression() {
        let client = client();
        assert!(client.document_status("d1").await.unwrap().is_none());

        let status = DocumentStatus::processing(25, "Analyzing document structure");
        client.set_document_status("d1", &status).await.unwrap();
        assert_eq!(client.document_status("d1").await.unwrap(), Some(status));

        let mut extra = serde_json::Map::new();
        extra.insert("confidence_score".into(), json!(0.92));
        extra.insert("extracted_data".into(), json!({"total": "41.20"}));
        client
            .set_document_status("d1", &DocumentStatus::completed(extra.clone()))
            .await
            .unwrap();

        let done = client.document_status("d1").await.unwrap().unwrap();
        assert_eq!(done.status, ProcessingState::Completed);
        assert_eq!(done.progress, Some(100));
        assert_eq!(done.extra, extra);
        assert!(done.processed_at.is_some());
        assert_eq!(client.ttl(&CacheKeys::doc_status("d1")).await.unwrap().as_secs(), -1);
    }

    #[tokio::test]
    async fn test_failed_status() {
        let client = client();
        client
            .set_document_status("d2", &DocumentStatus::failed("unsupported format"))
            .await
            .unwrap();

        let status = client.document_status("d2").await.unwrap().unwrap();
        assert_eq!(status.status, ProcessingState::Failed);
        assert_eq!(status.error.as_deref(), Some("unsupported format"));
        assert!(status.failed_at.is_some());
    }

    #[tokio::test]
    async fn test_legacy_string_status() {
        let client = client();
        let legacy = r#"{"status": "processing", "progress": 75, "message": "Enhancing with AI"}"#;
        client
            .set(&CacheKeys::doc_status("d3"), &Value::from(legacy), SetOptions::default())
            .await
            .unwrap();

        let status = client.document_status("d3").await.unwrap().unwrap();
        assert_eq!(status.progress, Some(75));
        assert_eq!(status.message.as_deref(), Some("Enhancing with AI"));
    }

    #[tokio::test]
    async fn test_result_cached_with_ttl() {
        let client = client();
        let result = Value::from(json!({"pages": 2, "tables": [{"rows": 3}]}));
        client.cache_document_result("d4", &result, None).await.unwrap();

        assert_eq!(client.document_result("d4").await.unwrap(), Some(result));
        let ttl = client.ttl(&CacheKeys::doc_result("d4")).await.unwrap();
        assert!(ttl.remaining().unwrap() > Duration::from_secs(3590));
    }
}
