use serde::{Deserialize, Serialize};

/// MoveNet / COCO の 17 関節
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum JointName {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl JointName {
    pub const COUNT: usize = 17;

    /// モデル出力順の全関節
    pub const ALL: [JointName; JointName::COUNT] = [
        JointName::Nose,
        JointName::LeftEye,
        JointName::RightEye,
        JointName::LeftEar,
        JointName::RightEar,
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

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// ワイヤ上の名前 (例: "left_shoulder")
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }
}

/// 単一キーポイント（推定したフレームのピクセル座標）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub name: JointName,
    pub x: f32,
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub score: f32,
}

impl Keypoint {
    pub fn new(name: JointName, x: f32, y: f32, score: f32) -> Self {
        Self { name, x, y, score }
    }

    /// 信頼度が閾値以上か
    pub fn is_valid(&self, threshold: f32) -> bool {
        self.score >= threshold
    }

    /// 描画用ピクセル座標
    pub fn to_pixel(&self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}

/// 1人分の姿勢。関節は欠けていてもよい
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,
}

impl Pose {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self { keypoints }
    }

    /// 名前でキーポイントを取得
    pub fn get(&self, name: JointName) -> Option<&Keypoint> {
        self.keypoints.iter().find(|k| k.name == name)
    }

    /// 全関節が原点・信頼度0の代替ポーズ
    ///
    /// ターゲット画像から姿勢が取れなかったときの参照として使う。
    pub fn zeroed() -> Self {
        Self {
            keypoints: JointName::ALL
                .iter()
                .map(|&name| Keypoint::new(name, 0.0, 0.0, 0.0))
                .collect(),
        }
    }

    /// 全キーポイントの平均信頼度
    pub fn average_score(&self) -> f32 {
        if self.keypoints.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.keypoints.iter().map(|k| k.score).sum();
        sum / self.keypoints.len() as f32
    }

    /// 座標を一様にスケールしたコピー（縮小画像で推定した結果を戻す用）
    pub fn scaled(&self, factor_x: f32, factor_y: f32) -> Pose {
        Pose {
            keypoints: self
                .keypoints
                .iter()
                .map(|k| Keypoint::new(k.name, k.x * factor_x, k.y * factor_y, k.score))
                .collect(),
        }
    }

    /// 幅 `width` の画像で左右反転した座標
    pub fn mirrored(&self, width: f32) -> Pose {
        Pose {
            keypoints: self
                .keypoints
                .iter()
                .map(|k| Keypoint::new(k.name, width - k.x, k.y, k.score))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joint_name_count() {
        assert_eq!(JointName::COUNT, 17);
        assert_eq!(JointName::ALL.len(), JointName::COUNT);
    }

    #[test]
    fn test_joint_name_from_index() {
        assert_eq!(JointName::from_index(0), Some(JointName::Nose));
        assert_eq!(JointName::from_index(16), Some(JointName::RightAnkle));
        assert_eq!(JointName::from_index(17), None);
        for (i, joint) in JointName::ALL.iter().enumerate() {
            assert_eq!(*joint as usize, i);
        }
    }

    #[test]
    fn test_joint_name_wire_format() {
        let json = serde_json::to_string(&JointName::LeftShoulder).unwrap();
        assert_eq!(json, "\"left_shoulder\"");
        let parsed: JointName = serde_json::from_str("\"right_ankle\"").unwrap();
        assert_eq!(parsed, JointName::RightAnkle);
        assert_eq!(JointName::LeftShoulder.as_str(), "left_shoulder");
    }

    #[test]
    fn test_keypoint_is_valid() {
        let kp = Keypoint::new(JointName::Nose, 0.5, 0.5, 0.7);
        assert!(kp.is_valid(0.5));
        assert!(!kp.is_valid(0.8));
    }

    #[test]
    fn test_pose_get_missing_joint() {
        let pose = Pose::new(vec![Keypoint::new(JointName::Nose, 10.0, 20.0, 0.9)]);
        assert_eq!(pose.get(JointName::Nose).map(|k| k.x), Some(10.0));
        assert!(pose.get(JointName::LeftHip).is_none());
    }

    #[test]
    fn test_pose_zeroed() {
        let pose = Pose::zeroed();
        assert_eq!(pose.keypoints.len(), JointName::COUNT);
        assert!(pose.keypoints.iter().all(|k| k.x == 0.0 && k.y == 0.0 && k.score == 0.0));
        assert_eq!(pose.average_score(), 0.0);
    }

    #[test]
    fn test_pose_scaled_and_mirrored() {
        let pose = Pose::new(vec![Keypoint::new(JointName::Nose, 10.0, 20.0, 0.9)]);
        let scaled = pose.scaled(2.0, 2.0);
        assert_eq!(scaled.keypoints[0].x, 20.0);
        assert_eq!(scaled.keypoints[0].y, 40.0);
        let mirrored = pose.mirrored(100.0);
        assert_eq!(mirrored.keypoints[0].x, 90.0);
        assert_eq!(mirrored.keypoints[0].score, 0.9);
    }
}
