use super::keypoint::{JointName, Pose};

/// ベクトル化に使う関節の順番（耳を除く15関節）
///
/// この順番がベクトルのインデックスを決める。
pub const CANONICAL_JOINTS: [JointName; 15] = [
    JointName::Nose,
    JointName::LeftEye,
    JointName::RightEye,
    JointName::LeftShoulder,
    JointName::RightShoulder,
    JointName::LeftElbow,
    JointName::RightElbow,
    JointName::LeftWrist,
    JointName::RightWrist,
    JointName::LeftHip,
    JointName::RightHip,
    JointName::LeftKnee,
    JointName::RightKnee,
    JointName::LeftAnkle,
    JointName::RightAnkle,
];

/// 正規化ベクトルの長さ
pub const VECTOR_LEN: usize = CANONICAL_JOINTS.len() * 2;

/// 関節の採用に必要な最低信頼度
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// 骨盤中心・体格スケール基準の (x, y) 列
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedVector(Vec<f32>);

impl NormalizedVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 正規化座標での関節位置
    pub fn joint(&self, index: usize) -> Option<(f32, f32)> {
        let x = *self.0.get(index * 2)?;
        let y = *self.0.get(index * 2 + 1)?;
        Some((x, y))
    }

    /// 全要素が0か（代替参照ポーズなど）
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    /// 中心からの最大 |x|, |y|（0割り防止の下限付き）
    pub fn extents(&self) -> (f32, f32) {
        let mut max_x: f32 = 0.0;
        let mut max_y: f32 = 0.0;
        for pair in self.0.chunks_exact(2) {
            max_x = max_x.max(pair[0].abs());
            max_y = max_y.max(pair[1].abs());
        }
        (max_x.max(1e-6), max_y.max(1e-6))
    }
}

/// 骨盤中心とスケール
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyFrame {
    pub center_x: f32,
    pub center_y: f32,
    pub scale: f32,
}

impl BodyFrame {
    /// 両腰・両肩から基準フレームを作る。どれか欠けていれば None
    ///
    /// スケールは腰幅と肩幅の平均。0 のときは 1 にする。
    pub fn from_pose(pose: &Pose) -> Option<Self> {
        let left_hip = pose.get(JointName::LeftHip)?;
        let right_hip = pose.get(JointName::RightHip)?;
        let left_shoulder = pose.get(JointName::LeftShoulder)?;
        let right_shoulder = pose.get(JointName::RightShoulder)?;

        let center_x = (left_hip.x + right_hip.x) / 2.0;
        let center_y = (left_hip.y + right_hip.y) / 2.0;

        let hip_dist = (left_hip.x - right_hip.x).hypot(left_hip.y - right_hip.y);
        let shoulder_dist =
            (left_shoulder.x - right_shoulder.x).hypot(left_shoulder.y - right_shoulder.y);
        let mut scale = (hip_dist + shoulder_dist) / 2.0;
        if !(scale.is_finite() && scale > 0.0) {
            scale = 1.0;
        }

        Some(Self {
            center_x,
            center_y,
            scale,
        })
    }

    /// 正規化座標をこのフレームのピクセル座標に戻す
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        (self.center_x + x * self.scale, self.center_y + y * self.scale)
    }
}

/// キーポイント正規化
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    min_confidence: f32,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONFIDENCE)
    }
}

impl Normalizer {
    pub fn new(min_confidence: f32) -> Self {
        Self { min_confidence }
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    /// Pose を正規化ベクトルに変換
    ///
    /// アンカー（両腰・両肩）が欠けていれば None。
    /// 欠けた関節と信頼度不足の関節は (0, 0) で埋める。
    pub fn normalize(&self, pose: &Pose) -> Option<NormalizedVector> {
        let frame = BodyFrame::from_pose(pose)?;

        let mut values = Vec::with_capacity(VECTOR_LEN);
        for joint in CANONICAL_JOINTS.iter() {
            match pose.get(*joint) {
                Some(kp) if kp.is_valid(self.min_confidence) => {
                    values.push((kp.x - frame.center_x) / frame.scale);
                    values.push((kp.y - frame.center_y) / frame.scale);
                }
                _ => {
                    values.push(0.0);
                    values.push(0.0);
                }
            }
        }

        Some(NormalizedVector(values))
    }
}
