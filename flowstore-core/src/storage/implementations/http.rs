//! HTTP chunk store client
//!
//! Talks to the same-origin storage proxy. Authentication is the session
//! cookie, so the client keeps a cookie store and never holds credentials.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::instrument;

use crate::storage::ids::{BlockId, VersionId};
use crate::storage::manifest::{MANIFEST_FILE_NAME, Manifest};
use crate::storage::traits::{AllocatedVersion, ChunkStore, UploadedChunk};
use crate::storage::types::ResourceKey;
use crate::traffic_log;

const UPLOAD_PATH: &str = "/api/storage/upload/chunk/direct";
const DOWNLOAD_URL_PATH: &str = "/api/storage/download/url";
const DOWNLOAD_DIRECT_PATH: &str = "/api/storage/download/chunk/direct";
const DELETE_PATH: &str = "/api/storage/delete/chunk";
const MANIFEST_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Deserialize)]
struct CreateManifestResponse {
    key: String,
    version_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadChunkResponse {
    etag: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct DownloadUrlResponse {
    download_url: String,
}

/// `ChunkStore` backed by the storage HTTP API
#[derive(Clone, Debug)]
pub struct HttpChunkStore {
    client: Client,
    base_url: Url,
}

impl HttpChunkStore {
    /// Create a client for the API served at `base_url` (scheme + host)
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;
        Self::with_client(client, base_url)
    }

    /// Use a preconfigured client (e.g., one sharing a cookie jar with a login flow)
    pub fn with_client(client: Client, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("Invalid API base URL: {}", base_url))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base_url.join(path)?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url)
    }

    pub(crate) fn create_manifest_url(&self, block_id: &BlockId) -> Result<Url> {
        self.endpoint(
            UPLOAD_PATH,
            &[
                ("block_id", block_id.as_str()),
                ("file_name", MANIFEST_FILE_NAME),
                ("content_type", MANIFEST_CONTENT_TYPE),
            ],
        )
    }

    pub(crate) fn overwrite_manifest_url(&self, block_id: &BlockId, version_id: &VersionId) -> Result<Url> {
        self.endpoint(
            UPLOAD_PATH,
            &[
                ("block_id", block_id.as_str()),
                ("file_name", MANIFEST_FILE_NAME),
                ("content_type", MANIFEST_CONTENT_TYPE),
                ("version_id", version_id.as_str()),
            ],
        )
    }

    pub(crate) fn upload_chunk_url(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        name: &str,
        mime_type: &str,
    ) -> Result<Url> {
        self.endpoint(
            UPLOAD_PATH,
            &[
                ("block_id", block_id.as_str()),
                ("file_name", name),
                ("content_type", mime_type),
                ("version_id", version_id.as_str()),
            ],
        )
    }

    pub(crate) fn manifest_download_url(&self, resource_key: &ResourceKey) -> Result<Url> {
        let key = format!("{}/{}", resource_key, MANIFEST_FILE_NAME);
        self.endpoint(DOWNLOAD_URL_PATH, &[("key", key.as_str())])
    }

    pub(crate) fn direct_download_url(&self, block_id: &BlockId, version_id: &VersionId, name: &str) -> Result<Url> {
        self.endpoint(
            DOWNLOAD_DIRECT_PATH,
            &[
                ("block_id", block_id.as_str()),
                ("file_name", name),
                ("version_id", version_id.as_str()),
            ],
        )
    }

    pub(crate) fn delete_url(&self, block_id: &BlockId, version_id: &VersionId, name: &str) -> Result<Url> {
        self.endpoint(
            DELETE_PATH,
            &[
                ("block_id", block_id.as_str()),
                ("file_name", name),
                ("version_id", version_id.as_str()),
            ],
        )
    }

    /// Turn a non-2xx response into an error carrying status and body text
    async fn ensure_success(operation: &str, response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
        let message = format!("Chunk store request failed with status {}: {}", status, body);
        traffic_log::log_store_error(operation, &message);
        Err(anyhow!(message))
    }

    /// GET a manifest document; 404 means there is none
    async fn fetch_manifest_at(&self, operation: &str, url: Url) -> Result<Option<Manifest>> {
        traffic_log::log_store_request(operation, url.as_str());
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            traffic_log::log_store_response(operation, 404, "no manifest");
            return Ok(None);
        }
        let response = Self::ensure_success(operation, response).await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        traffic_log::log_store_response(operation, status, &text);

        let manifest = serde_json::from_str::<Manifest>(&text).context("Failed to parse manifest")?;
        Ok(Some(manifest))
    }
}

#[async_trait]
impl ChunkStore for HttpChunkStore {
    #[instrument(level = "debug", skip(self))]
    async fn create_initial_manifest(&self, block_id: &BlockId) -> Result<AllocatedVersion> {
        let url = self.create_manifest_url(block_id)?;
        traffic_log::log_store_request("create_manifest", url.as_str());

        let response = self
            .client
            .post(url)
            .json(&Manifest::generating(block_id))
            .send()
            .await?;
        let response = Self::ensure_success("create_manifest", response).await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        traffic_log::log_store_response("create_manifest", status, &text);

        let created: CreateManifestResponse = serde_json::from_str(&text)?;
        let resource_key = ResourceKey::from_storage_key(&created.key)
            .ok_or_else(|| anyhow!("Storage key has fewer than three segments: {}", created.key))?;

        Ok(AllocatedVersion {
            version_id: VersionId::from_string(created.version_id),
            resource_key,
        })
    }

    #[instrument(level = "debug", skip(self, bytes), fields(len = bytes.len()))]
    async fn upload_chunk(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<UploadedChunk> {
        let url = self.upload_chunk_url(block_id, version_id, name, mime_type)?;
        traffic_log::log_store_request("upload_chunk", url.as_str());

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes.to_vec())
            .send()
            .await?;
        let response = Self::ensure_success("upload_chunk", response).await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        traffic_log::log_store_response("upload_chunk", status, &text);

        let uploaded: UploadChunkResponse = serde_json::from_str(&text)?;
        Ok(UploadedChunk {
            etag: uploaded.etag,
            size: uploaded.size,
        })
    }

    #[instrument(level = "debug", skip(self, manifest), fields(chunks = manifest.chunks.len()))]
    async fn overwrite_manifest(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        manifest: &Manifest,
    ) -> Result<()> {
        let url = self.overwrite_manifest_url(block_id, version_id)?;
        traffic_log::log_store_request("overwrite_manifest", url.as_str());

        let response = self.client.post(url).json(manifest).send().await?;
        let response = Self::ensure_success("overwrite_manifest", response).await?;
        traffic_log::log_store_response("overwrite_manifest", response.status().as_u16(), "");
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_manifest(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        resource_key: Option<&ResourceKey>,
    ) -> Result<Option<Manifest>> {
        let Some(resource_key) = resource_key else {
            let url = self.direct_download_url(block_id, version_id, MANIFEST_FILE_NAME)?;
            return self.fetch_manifest_at("get_manifest_direct", url).await;
        };

        let url = self.manifest_download_url(resource_key)?;
        traffic_log::log_store_request("get_manifest_url", url.as_str());
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            traffic_log::log_store_response("get_manifest_url", 404, "no manifest");
            return Ok(None);
        }
        let response = Self::ensure_success("get_manifest_url", response).await?;
        let located: DownloadUrlResponse = response.json().await?;

        // The download URL may be presigned (absolute) or relative to the API origin
        let download_url = self.base_url.join(&located.download_url)?;
        self.fetch_manifest_at("get_manifest", download_url).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn delete_chunk(&self, block_id: &BlockId, version_id: &VersionId, name: &str) -> Result<()> {
        let url = self.delete_url(block_id, version_id, name)?;
        traffic_log::log_store_request("delete_chunk", url.as_str());

        let response = self.client.delete(url).send().await?;
        let response = Self::ensure_success("delete_chunk", response).await?;
        traffic_log::log_store_response("delete_chunk", response.status().as_u16(), name);
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn download_chunk(
        &self,
        block_id: &BlockId,
        version_id: &VersionId,
        name: &str,
    ) -> Result<Vec<u8>> {
        let url = self.direct_download_url(block_id, version_id, name)?;
        traffic_log::log_store_request("download_chunk", url.as_str());

        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success("download_chunk", response).await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        traffic_log::log_store_response("download_chunk", status, &format!("{} bytes", bytes.len()));
        Ok(bytes.to_vec())
    }
}
