//! OpenAI-compatible REST client for the Files and Batches endpoints.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use sdglens_core::{Error, PipelineConfig, Result};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::provider::{BatchApi, BatchInfo, BatchPage, CreateBatch};

pub struct OpenAiBatchClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiBatchClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".into()))?;
        Ok(Self::new(config.api_base_url.clone(), key))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| Error::Http(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: api_error_message(&body),
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("Response read error: {}", e)))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// The `error.message` field when the body carries one, else the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[derive(serde::Deserialize)]
struct FileObject {
    id: String,
}

#[async_trait]
impl BatchApi for OpenAiBatchClient {
    async fn upload_file(&self, file_name: &str, content: Vec<u8>) -> Result<String> {
        debug!("Uploading {} ({} bytes)", file_name, content.len());
        let part = Part::bytes(content)
            .file_name(file_name.to_string())
            .mime_str("application/jsonl")
            .map_err(|e| Error::Internal(e.to_string()))?;
        let form = Form::new().text("purpose", "batch").part("file", part);
        let file: FileObject = self
            .send_json(self.client.post(self.url("/files")).multipart(form))
            .await?;
        Ok(file.id)
    }

    async fn create_batch(&self, request: &CreateBatch) -> Result<BatchInfo> {
        debug!("Creating batch for file {}", request.input_file_id);
        self.send_json(self.client.post(self.url("/batches")).json(request))
            .await
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchInfo> {
        self.send_json(self.client.get(self.url(&format!("/batches/{}", batch_id))))
            .await
    }

    async fn cancel_batch(&self, batch_id: &str) -> Result<BatchInfo> {
        self.send_json(
            self.client
                .post(self.url(&format!("/batches/{}/cancel", batch_id))),
        )
        .await
    }

    async fn list_batches(&self, limit: usize, after: Option<&str>) -> Result<BatchPage> {
        let mut path = format!("/batches?limit={}", limit);
        if let Some(after) = after {
            path.push_str("&after=");
            path.push_str(after);
        }
        self.send_json(self.client.get(self.url(&path))).await
    }

    async fn file_content(&self, file_id: &str) -> Result<Vec<u8>> {
        let response = self
            .send(self.client.get(self.url(&format!("/files/{}/content", file_id))))
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("Stream read error: {}", e)))?;
        Ok(bytes.to_vec())
    }
}
