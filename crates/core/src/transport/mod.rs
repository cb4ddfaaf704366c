use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use crate::{
    JumpBeatError, JumpDetector, NetworkConfig, ResourceResolver, Result, ServerUpdate,
    TelemetryBatch, POLL_PATH, UPLOAD_PATH,
};

/// Connection to the inference service.
///
/// Implementations must be cheap to share; the engine calls them from many
/// concurrently running request tasks.
#[async_trait]
pub trait InferenceTransport: Send + Sync + 'static {
    /// Sends one window and returns the service's verdict.
    async fn upload(&self, batch: TelemetryBatch) -> Result<ServerUpdate>;

    /// Asks for the latest verdict without sending telemetry.
    async fn poll(&self) -> Result<ServerUpdate>;

    /// Downloads raw cover image bytes.
    async fn fetch_cover(&self, url: Url) -> Result<Vec<u8>>;
}

/// HTTP implementation talking to `POST /process` and `GET /get_jpm`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    upload_url: Url,
    poll_url: Url,
}

impl HttpTransport {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Self::with_client(client, ResourceResolver::new(config.base_url()?))
    }

    pub fn with_client(client: reqwest::Client, resolver: ResourceResolver) -> Result<Self> {
        Ok(Self {
            client,
            upload_url: resolver.endpoint(UPLOAD_PATH)?,
            poll_url: resolver.endpoint(POLL_PATH)?,
        })
    }

    async fn read_update(response: reqwest::Response) -> Result<ServerUpdate> {
        let body = Self::successful_body(response).await?;
        ServerUpdate::from_slice(&body)
    }

    async fn successful_body(response: reqwest::Response) -> Result<Vec<u8>> {
        let status = response.status();
        if status != StatusCode::OK {
            return Err(JumpBeatError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl InferenceTransport for HttpTransport {
    async fn upload(&self, batch: TelemetryBatch) -> Result<ServerUpdate> {
        tracing::trace!(samples = batch.len(), url = %self.upload_url, "uploading window");
        let response = self
            .client
            .post(self.upload_url.clone())
            .json(&batch)
            .send()
            .await?;
        Self::read_update(response).await
    }

    async fn poll(&self) -> Result<ServerUpdate> {
        let response = self.client.get(self.poll_url.clone()).send().await?;
        Self::read_update(response).await
    }

    async fn fetch_cover(&self, url: Url) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        Self::successful_body(response).await
    }
}

/// Runs jump detection in-process instead of asking a server.
///
/// Polls answer with the most recent estimate. Track and cover paths are
/// never recommended.
#[derive(Debug)]
pub struct OfflineTransport {
    detector: JumpDetector,
    span: Duration,
    latest: Mutex<u32>,
}

impl OfflineTransport {
    /// `span` is the wall time each uploaded window covers.
    pub fn new(detector: JumpDetector, span: Duration) -> Self {
        Self {
            detector,
            span,
            latest: Mutex::new(0),
        }
    }

    fn store(&self, tempo: u32) -> Result<()> {
        let mut latest = self
            .latest
            .lock()
            .map_err(|_| JumpBeatError::msg("offline estimate has been poisoned"))?;
        *latest = tempo;
        Ok(())
    }
}

#[async_trait]
impl InferenceTransport for OfflineTransport {
    async fn upload(&self, batch: TelemetryBatch) -> Result<ServerUpdate> {
        let jpm = self.detector.jumps_per_minute(&batch, self.span);
        let tempo = jpm.round() as u32;
        self.store(tempo)?;
        Ok(ServerUpdate::with_tempo(tempo))
    }

    async fn poll(&self) -> Result<ServerUpdate> {
        let latest = *self
            .latest
            .lock()
            .map_err(|_| JumpBeatError::msg("offline estimate has been poisoned"))?;
        Ok(ServerUpdate::with_tempo(latest))
    }

    async fn fetch_cover(&self, url: Url) -> Result<Vec<u8>> {
        Err(JumpBeatError::InvalidResource(url.to_string()))
    }
}
