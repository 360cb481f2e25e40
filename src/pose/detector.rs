use anyhow::{Context, Result};
use async_trait::async_trait;
use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::estimator::PoseEstimator;
use super::keypoint::{JointName, Keypoint, Pose};
use super::preprocess::preprocess_for_movenet;

/// MoveNet を使用した姿勢推定器
///
/// モデルはこのハンドルが所有する。推論は blocking スレッドで行う。
#[derive(Clone)]
pub struct MoveNetEstimator {
    session: Arc<Mutex<Session>>,
    min_pose_score: f32,
}

impl MoveNetEstimator {
    /// ONNXモデルを読み込んで初期化
    pub fn new<P: AsRef<Path>>(model_path: P, min_pose_score: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path.as_ref())
            .with_context(|| format!("Failed to load ONNX model {}", model_path.as_ref().display()))?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            min_pose_score,
        })
    }

    /// 同期推論
    ///
    /// 出力は入力画像のピクセル座標。平均信頼度が低ければ None。
    pub fn detect(&self, image: &RgbImage) -> Result<Option<Pose>> {
        let input = preprocess_for_movenet(image);
        let input_tensor = Tensor::from_array(input)?;

        let mut session = match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let outputs = session
            .run(ort::inputs!["serving_default_input_0" => input_tensor])
            .context("Inference failed")?;

        // MoveNet の出力は [1, 1, 17, 3] (y, x, confidence)、座標は 0〜1
        let output: ndarray::ArrayViewD<f32> = outputs["StatefulPartitionedCall_0"]
            .try_extract_array()
            .context("Failed to extract output tensor")?;

        let width = image.width() as f32;
        let height = image.height() as f32;
        let keypoints: Vec<Keypoint> = JointName::ALL
            .iter()
            .enumerate()
            .map(|(i, &name)| {
                let y = output[[0, 0, i, 0]];
                let x = output[[0, 0, i, 1]];
                let confidence = output[[0, 0, i, 2]];
                Keypoint::new(name, x * width, y * height, confidence)
            })
            .collect();

        let pose = Pose::new(keypoints);
        if pose.average_score() < self.min_pose_score {
            return Ok(None);
        }
        Ok(Some(pose))
    }
}

#[async_trait]
impl PoseEstimator for MoveNetEstimator {
    async fn estimate(&self, image: &RgbImage) -> Result<Option<Pose>> {
        let this = self.clone();
        let image = image.clone();
        tokio::task::spawn_blocking(move || this.detect(&image))
            .await
            .context("inference task panicked")?
    }
}
