use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use image::imageops::FilterType;
use image::RgbImage;

use super::keypoint::Pose;
use super::normalize::{NormalizedVector, Normalizer, VECTOR_LEN};
use crate::logging::Logger;

/// 姿勢推定器
///
/// 1枚の画像から1人分の姿勢を返す。人物がいなければ `Ok(None)`。
/// 座標は入力画像のピクセル座標。
#[async_trait]
pub trait PoseEstimator: Send + Sync {
    async fn estimate(&self, image: &RgbImage) -> Result<Option<Pose>>;
}

/// 参照ポーズをどう得たか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSource {
    /// 元の解像度で検出
    Full,
    /// 半分の解像度で再検出
    HalfResolution,
    /// 検出できず全0の代替ポーズ
    Fallback,
}

/// ラウンドの目標ポーズ
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePose {
    /// ターゲット画像のピクセル座標
    pub pose: Pose,
    pub vector: NormalizedVector,
    pub source: ReferenceSource,
    /// ターゲット画像のサイズ
    pub image_size: (u32, u32),
}

impl ReferencePose {
    /// 全0・信頼度0の代替参照
    pub fn fallback(image_size: (u32, u32)) -> Self {
        let pose = Pose::zeroed();
        let vector = Normalizer::default()
            .normalize(&pose)
            .unwrap_or_else(|| NormalizedVector::new(vec![0.0; VECTOR_LEN]));
        Self {
            pose,
            vector,
            source: ReferenceSource::Fallback,
            image_size,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ReferenceSource::Fallback
    }
}

/// 1回分の検出。人物なし・アンカー欠け・エラーはすべて None
async fn try_detect(
    estimator: &dyn PoseEstimator,
    image: &RgbImage,
    normalizer: &Normalizer,
    logger: &Logger,
) -> Option<(Pose, NormalizedVector)> {
    match estimator.estimate(image).await {
        Ok(Some(pose)) => {
            let vector = normalizer.normalize(&pose)?;
            Some((pose, vector))
        }
        Ok(None) => None,
        Err(e) => {
            log!(logger, "[round] reference estimation error: {:#}", e);
            None
        }
    }
}

/// ターゲット画像から参照ポーズを作る
///
/// 失敗したら半分の解像度で1回だけ再試行し、それも失敗したら
/// 全0の代替ポーズを返す。エラーにはしない。
pub async fn detect_reference(
    estimator: &dyn PoseEstimator,
    image: &RgbImage,
    normalizer: &Normalizer,
    logger: &Logger,
) -> ReferencePose {
    let (width, height) = image.dimensions();

    if let Some((pose, vector)) = try_detect(estimator, image, normalizer, logger).await {
        return ReferencePose {
            pose,
            vector,
            source: ReferenceSource::Full,
            image_size: (width, height),
        };
    }

    let half_w = (width / 2).max(1);
    let half_h = (height / 2).max(1);
    log!(logger, "[round] reference not found, retrying at {}x{}", half_w, half_h);
    let half = image::imageops::resize(image, half_w, half_h, FilterType::Triangle);

    if let Some((pose, _)) = try_detect(estimator, &half, normalizer, logger).await {
        // 元画像の座標に戻す
        let pose = pose.scaled(width as f32 / half_w as f32, height as f32 / half_h as f32);
        if let Some(vector) = normalizer.normalize(&pose) {
            return ReferencePose {
                pose,
                vector,
                source: ReferenceSource::HalfResolution,
                image_size: (width, height),
            };
        }
    }

    log!(logger, "[round] reference not found, using fallback pose");
    ReferencePose::fallback((width, height))
}

/// 現在有効な参照ポーズ（常に高々1つ）
#[derive(Clone, Default)]
pub struct ReferenceSlot {
    inner: Arc<Mutex<Option<Arc<ReferencePose>>>>,
}

impl ReferenceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 差し替え（前の参照は破棄）
    pub fn set(&self, reference: ReferencePose) {
        let reference = Arc::new(reference);
        match self.inner.lock() {
            Ok(mut guard) => *guard = Some(reference),
            Err(poisoned) => *poisoned.into_inner() = Some(reference),
        }
    }

    /// ターゲット画像が変わったとき
    pub fn clear(&self) {
        match self.inner.lock() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    pub fn get(&self) -> Option<Arc<ReferencePose>> {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
