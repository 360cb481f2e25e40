//! セッション録画（カメラ映像をサンプリングしてクリップにし、アップロード）

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use image::RgbImage;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::GameApi;
use crate::camera::{encode_jpeg, mirror, FrameSource};
use crate::config::RecorderConfig;
use crate::logging::Logger;
use crate::protocol::UploadAck;

/// エンコード済みの録画
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub bytes: Bytes,
    pub mime_type: &'static str,
    /// ファイル拡張子（アップロード時のファイル名）
    pub extension: &'static str,
    pub frames: usize,
}

impl Clip {
    pub fn file_name(&self) -> String {
        format!("recording.{}", self.extension)
    }
}

/// フレーム列をクリップにするエンコーダ
pub trait ClipEncoder: Send {
    fn push_frame(&mut self, frame: &RgbImage) -> Result<()>;
    fn frame_count(&self) -> usize;
    fn finish(self: Box<Self>) -> Result<Clip>;
}

/// Motion-JPEG（JPEG を連結しただけのストリーム）
pub struct MjpegEncoder {
    quality: u8,
    buffer: Vec<u8>,
    frames: usize,
}

impl MjpegEncoder {
    pub const MIME_TYPE: &'static str = "video/x-motion-jpeg";

    pub fn new(quality: u8) -> Self {
        Self {
            quality,
            buffer: Vec::new(),
            frames: 0,
        }
    }
}

impl ClipEncoder for MjpegEncoder {
    fn push_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let jpeg = encode_jpeg(frame, self.quality)?;
        self.buffer.extend_from_slice(&jpeg);
        self.frames += 1;
        Ok(())
    }

    fn frame_count(&self) -> usize {
        self.frames
    }

    fn finish(self: Box<Self>) -> Result<Clip> {
        Ok(Clip {
            bytes: Bytes::from(self.buffer),
            mime_type: Self::MIME_TYPE,
            extension: "mjpeg",
            frames: self.frames,
        })
    }
}

pub type EncoderFactory = Box<dyn Fn() -> Box<dyn ClipEncoder> + Send + Sync>;

struct ActiveRecording {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<Box<dyn ClipEncoder>>>,
}

/// セッション録画
///
/// 描画ループとは独立に一定レートで最新フレームを読み、（設定により鏡像で）エンコーダに渡す。
pub struct SessionRecorder {
    source: Arc<dyn FrameSource>,
    config: RecorderConfig,
    encoder_factory: EncoderFactory,
    active: Option<ActiveRecording>,
    logger: Logger,
}

impl SessionRecorder {
    pub fn new(source: Arc<dyn FrameSource>, config: RecorderConfig, logger: Logger) -> Self {
        let quality = config.jpeg_quality;
        Self::with_encoder(
            source,
            config,
            Box::new(move || Box::new(MjpegEncoder::new(quality)) as Box<dyn ClipEncoder>),
            logger,
        )
    }

    pub fn with_encoder(
        source: Arc<dyn FrameSource>,
        config: RecorderConfig,
        encoder_factory: EncoderFactory,
        logger: Logger,
    ) -> Self {
        Self {
            source,
            config,
            encoder_factory,
            active: None,
            logger,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// 録画開始。無効設定・録画中なら何もしない
    pub fn start(&mut self) {
        if !self.config.enabled || self.active.is_some() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_ref = stop.clone();
        let source = self.source.clone();
        let mirror_frames = self.config.mirror;
        let period = Duration::from_micros(1_000_000 / self.config.fps.max(1) as u64);
        let logger = self.logger.clone();
        let mut encoder = (self.encoder_factory)();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if stop_ref.load(Ordering::Acquire) {
                    break;
                }
                // カメラが新フレームを出していなくても毎回サンプルする
                let Some(frame) = source.latest_frame() else {
                    continue;
                };
                // JPEG 化はランタイムのスレッドを塞がないように
                let (returned, result) = tokio::task::spawn_blocking(move || {
                    let result = if mirror_frames {
                        encoder.push_frame(&mirror(&frame))
                    } else {
                        encoder.push_frame(&frame)
                    };
                    (encoder, result)
                })
                .await
                .context("frame encoder panicked")?;
                encoder = returned;
                if let Err(e) = result {
                    vlog!(logger, "[recording] frame dropped: {:#}", e);
                }
            }
            Ok::<_, anyhow::Error>(encoder)
        });

        log!(
            self.logger,
            "[recording] started ({} fps{})",
            self.config.fps.max(1),
            if mirror_frames { ", mirrored" } else { "" }
        );
        self.active = Some(ActiveRecording { stop, handle });
    }

    /// 録画停止。録画していなければ None
    pub async fn stop(&mut self) -> Result<Option<Clip>> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };
        active.stop.store(true, Ordering::Release);
        let encoder = active.handle.await.context("recording task failed")??;
        let clip = encoder.finish()?;
        log!(
            self.logger,
            "[recording] stopped: {} frames, {} bytes",
            clip.frames,
            clip.bytes.len()
        );
        Ok(Some(clip))
    }

    /// 停止してアップロード
    ///
    /// 録画していなければすぐに `Ok(None)`。進捗は % で `progress` に流れる。
    pub async fn stop_and_upload(
        &mut self,
        api: &dyn GameApi,
        progress: Option<UnboundedSender<u8>>,
    ) -> Result<Option<UploadAck>> {
        let Some(clip) = self.stop().await? else {
            return Ok(None);
        };
        let ack = api.upload_video(clip, progress).await?;
        log!(self.logger, "[recording] upload complete {:?}", ack.path);
        Ok(Some(ack))
    }
}
