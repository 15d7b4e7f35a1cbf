//! HTTP Remote Service
//!
//! REST client for the hosted backend:
//!
//! | Operation     | Request                                   |
//! |---------------|-------------------------------------------|
//! | `list`        | `GET /entities/{Entity}?sort=..&limit=..` |
//! | `get`         | `GET /entities/{Entity}/{id}`             |
//! | `create`      | `POST /entities/{Entity}`                 |
//! | `update`      | `PUT /entities/{Entity}/{id}`             |
//! | `delete`      | `DELETE /entities/{Entity}/{id}`          |
//! | `invoke`      | `POST /functions/{name}`                  |
//! | `upload_file` | `POST /files?name=..` (raw body)          |
//!
//! Requests carry `Authorization: Bearer <api key>` when a key is configured
//! and are bounded by the configured fetch timeout.

use crate::local_db::{Record, SortSpec};
use crate::remote::RemoteService;
use crate::shared::config::OfflineConfig;
use crate::shared::error::{OfflineError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// REST implementation of [`RemoteService`]
#[derive(Debug, Clone)]
pub struct HttpRemoteService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(alias = "url")]
    file_url: String,
}

impl HttpRemoteService {
    pub fn new(config: &OfflineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| OfflineError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.remote_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| OfflineError::unreachable(format!("Network error: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_else(|_| status.to_string());
        Err(classify(status, error_text))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| OfflineError::serialization(format!("Failed to parse response: {}", e)))
    }
}

/// Map a non-success status onto the error taxonomy
fn classify(status: StatusCode, body: String) -> OfflineError {
    if status.is_client_error() {
        OfflineError::rejected(status.as_u16(), body)
    } else {
        OfflineError::unreachable(format!("Request failed: {} - {}", status, body))
    }
}

fn expect_record(value: Value) -> Result<Record> {
    match value {
        Value::Object(record) => Ok(record),
        other => Err(OfflineError::serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn list(&self, entity: &str, sort: Option<&SortSpec>, limit: Option<usize>) -> Result<Vec<Record>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(sort) = sort {
            query.push(("sort", sort.to_param()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let request = self
            .client
            .get(self.url(&format!("/entities/{}", entity)))
            .query(&query);
        let values: Vec<Value> = self.send_json(request).await?;
        values.into_iter().map(expect_record).collect()
    }

    async fn get(&self, entity: &str, id: &str) -> Result<Record> {
        let request = self.client.get(self.url(&format!("/entities/{}/{}", entity, id)));
        expect_record(self.send_json(request).await?)
    }

    async fn create(&self, entity: &str, data: &Record) -> Result<Record> {
        let request = self
            .client
            .post(self.url(&format!("/entities/{}", entity)))
            .json(data);
        expect_record(self.send_json(request).await?)
    }

    async fn update(&self, entity: &str, id: &str, data: &Record) -> Result<Record> {
        let request = self
            .client
            .put(self.url(&format!("/entities/{}/{}", entity, id)))
            .json(data);
        expect_record(self.send_json(request).await?)
    }

    async fn delete(&self, entity: &str, id: &str) -> Result<()> {
        let request = self.client.delete(self.url(&format!("/entities/{}/{}", entity, id)));
        self.send(request).await?;
        Ok(())
    }

    async fn invoke(&self, function: &str, params: &Value) -> Result<Value> {
        let request = self
            .client
            .post(self.url(&format!("/functions/{}", function)))
            .json(params);
        self.send_json(request).await
    }

    async fn upload_file(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        let request = self
            .client
            .post(self.url("/files"))
            .query(&[("name", name)])
            .header("Content-Type", "application/octet-stream")
            .body(bytes);
        let uploaded: UploadResponse = self.send_json(request).await?;
        Ok(uploaded.file_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_client_error_is_rejection() {
        let error = classify(StatusCode::UNPROCESSABLE_ENTITY, "title is required".into());
        assert!(matches!(error, OfflineError::RemoteRejected { status: 422, .. }));
    }

    #[test]
    fn test_classify_server_error_is_unreachable() {
        let error = classify(StatusCode::BAD_GATEWAY, "upstream down".into());
        assert!(matches!(error, OfflineError::RemoteUnreachable { .. }));
    }

    #[test]
    fn test_expect_record_rejects_arrays() {
        assert!(expect_record(serde_json::json!([1, 2])).is_err());
        assert!(expect_record(serde_json::json!({"id": "1"})).is_ok());
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let config = OfflineConfig::builder()
            .remote_base_url("http://localhost:9000/api/")
            .build()
            .unwrap();
        let remote = HttpRemoteService::new(&config).unwrap();
        assert_eq!(remote.url("/entities/Memory"), "http://localhost:9000/api/entities/Memory");
    }
}
