//! ゲームサーバーとの HTTP 通信

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use image::RgbImage;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Url};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::ServerConfig;
use crate::game::TargetLibrary;
use crate::logging::Logger;
use crate::protocol::{
    CaptureRequest, CaptureResponse, FinalizeResponse, SessionResult, StatusResponse, UploadAck,
    CAPTURE_PATH, END_PATH, RESULT_REDIRECT_PATH, UPLOAD_FIELD, UPLOAD_VIDEO_PATH,
};
use crate::recorder::Clip;

/// アップロード時のチャンクサイズ
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// ゲームサーバーのエンドポイント
#[async_trait]
pub trait GameApi: Send + Sync {
    /// POST /end（前回のセッションを閉じる）
    async fn reset_session(&self) -> Result<()>;

    /// POST /capture
    async fn capture(&self, request: &CaptureRequest) -> Result<CaptureResponse>;

    /// POST /upload_video（multipart, field `file`）
    ///
    /// `progress` には 0..=100 の単調増加な % が流れ、成功時の最後は必ず 100。
    async fn upload_video(
        &self,
        clip: Clip,
        progress: Option<UnboundedSender<u8>>,
    ) -> Result<UploadAck>;

    /// POST /result_redirect。リダイレクト先があれば返す
    async fn finalize(&self, result: &SessionResult) -> Result<Option<String>>;
}

pub struct HttpGameApi {
    client: Client,
    base_url: Url,
    logger: Logger,
}

impl HttpGameApi {
    pub fn new(config: &ServerConfig, logger: Logger) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid server url {}", config.base_url))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base_url,
            logger,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid path {}", path))
    }
}

/// 送信済みバイト数から % を出す（送信中は 99 止まり）
fn upload_percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((sent.min(total) * 100 / total) as u8).min(99)
}

/// クリップをチャンクに分けて、読まれるたびに進捗を送るボディにする
fn progress_body(data: Bytes, progress: Option<UnboundedSender<u8>>) -> Body {
    let total = data.len() as u64;
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| data.slice(start..(start + UPLOAD_CHUNK_SIZE).min(data.len())))
        .collect();

    let mut sent = 0u64;
    let mut last_percent = 0u8;
    let stream = futures::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        let percent = upload_percent(sent, total);
        if percent > last_percent {
            last_percent = percent;
            if let Some(tx) = &progress {
                let _ = tx.send(percent);
            }
        }
        Ok::<Bytes, std::io::Error>(chunk)
    });
    Body::wrap_stream(stream)
}

#[async_trait]
impl GameApi for HttpGameApi {
    async fn reset_session(&self) -> Result<()> {
        let response = self
            .client
            .post(self.url(END_PATH)?)
            .send()
            .await
            .context("POST /end failed")?
            .error_for_status()?;
        let body = response.text().await.unwrap_or_default();
        if let Ok(status) = serde_json::from_str::<StatusResponse>(&body) {
            if status.is_error() {
                bail!("/end: {}", status.message.unwrap_or_default());
            }
        }
        vlog!(self.logger, "[api] session reset");
        Ok(())
    }

    async fn capture(&self, request: &CaptureRequest) -> Result<CaptureResponse> {
        let response: CaptureResponse = self
            .client
            .post(self.url(CAPTURE_PATH)?)
            .json(request)
            .send()
            .await
            .context("POST /capture failed")?
            .error_for_status()?
            .json()
            .await
            .context("invalid /capture response")?;
        if response.status.as_deref() == Some("error") {
            bail!("/capture: {}", response.message.unwrap_or_default());
        }
        vlog!(
            self.logger,
            "[api] captured round {} -> {}",
            request.round,
            response.saved
        );
        Ok(response)
    }

    async fn upload_video(
        &self,
        clip: Clip,
        progress: Option<UnboundedSender<u8>>,
    ) -> Result<UploadAck> {
        let total = clip.bytes.len() as u64;
        let file_name = clip.file_name();
        let part = Part::stream_with_length(progress_body(clip.bytes, progress.clone()), total)
            .file_name(file_name)
            .mime_str(clip.mime_type)
            .context("invalid clip mime type")?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        log!(self.logger, "[api] uploading {} bytes", total);
        let ack: UploadAck = self
            .client
            .post(self.url(UPLOAD_VIDEO_PATH)?)
            .multipart(form)
            .send()
            .await
            .context("POST /upload_video failed")?
            .error_for_status()?
            .json()
            .await
            .context("invalid /upload_video response")?;
        if ack.status.as_deref() == Some("error") {
            bail!("/upload_video: {}", ack.message.unwrap_or_default());
        }

        if let Some(tx) = &progress {
            let _ = tx.send(100);
        }
        Ok(ack)
    }

    async fn finalize(&self, result: &SessionResult) -> Result<Option<String>> {
        let body = self
            .client
            .post(self.url(RESULT_REDIRECT_PATH)?)
            .json(result)
            .send()
            .await
            .context("POST /result_redirect failed")?
            .error_for_status()?
            .text()
            .await
            .context("failed to read /result_redirect response")?;
        // JSON でなければリダイレクトなし
        let redirect = serde_json::from_str::<FinalizeResponse>(&body)
            .ok()
            .and_then(|r| r.redirect)
            .filter(|url| !url.is_empty());
        vlog!(self.logger, "[api] finalize redirect={:?}", redirect);
        Ok(redirect)
    }
}

#[async_trait]
impl TargetLibrary for HttpGameApi {
    async fn load(&self, path: &str) -> Result<RgbImage> {
        let bytes = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?
            .error_for_status()?
            .bytes()
            .await?;
        let image = image::load_from_memory(&bytes)
            .with_context(|| format!("failed to decode {}", path))?;
        Ok(image.to_rgb8())
    }
}
