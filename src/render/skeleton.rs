use crate::pose::{JointName, Keypoint, Pose};

use super::surface::{Color, Surface};

/// ライブ骨格の接続定義 (開始関節, 終了関節)
pub const SKELETON_CONNECTIONS: [(JointName, JointName); 16] = [
    // 顔
    (JointName::Nose, JointName::LeftEye),
    (JointName::LeftEye, JointName::LeftEar),
    (JointName::Nose, JointName::RightEye),
    (JointName::RightEye, JointName::RightEar),
    // 腕
    (JointName::LeftShoulder, JointName::LeftElbow),
    (JointName::LeftElbow, JointName::LeftWrist),
    (JointName::RightShoulder, JointName::RightElbow),
    (JointName::RightElbow, JointName::RightWrist),
    // 胴体
    (JointName::LeftShoulder, JointName::RightShoulder),
    (JointName::LeftShoulder, JointName::LeftHip),
    (JointName::RightShoulder, JointName::RightHip),
    (JointName::LeftHip, JointName::RightHip),
    // 脚
    (JointName::LeftHip, JointName::LeftKnee),
    (JointName::LeftKnee, JointName::LeftAnkle),
    (JointName::RightHip, JointName::RightKnee),
    (JointName::RightKnee, JointName::RightAnkle),
];

/// ガイド（目標ポーズ）の接続定義。顔は描かない
pub const GUIDE_CONNECTIONS: [(JointName, JointName); 12] = [
    (JointName::LeftShoulder, JointName::RightShoulder),
    (JointName::LeftShoulder, JointName::LeftElbow),
    (JointName::LeftElbow, JointName::LeftWrist),
    (JointName::RightShoulder, JointName::RightElbow),
    (JointName::RightElbow, JointName::RightWrist),
    (JointName::LeftShoulder, JointName::LeftHip),
    (JointName::RightShoulder, JointName::RightHip),
    (JointName::LeftHip, JointName::RightHip),
    (JointName::LeftHip, JointName::LeftKnee),
    (JointName::LeftKnee, JointName::LeftAnkle),
    (JointName::RightHip, JointName::RightKnee),
    (JointName::RightKnee, JointName::RightAnkle),
];

/// ライブ関節の色（赤）
pub const LIVE_JOINT_COLOR: Color = 0xE6EF_4444;

/// ライブ骨格線の色（ライム）
pub const LIVE_LINK_COLOR: Color = 0xFF00_FF00;

/// ガイドの色（シアン）
pub const GUIDE_COLOR: Color = 0xD900_FFFF;

/// 骨格の描き方
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkeletonStyle {
    pub joint_color: Color,
    pub link_color: Color,
    pub line_width: u32,
    pub joint_radius: i32,
    /// 破線 (dash, gap)。None なら実線
    pub dash: Option<(u32, u32)>,
    /// これより大きい信頼度の関節だけ描く。None なら全部
    pub min_score: Option<f32>,
}

impl SkeletonStyle {
    /// 自分の骨格（実線・信頼度ゲートあり）
    pub fn live(line_width: u32, min_score: f32) -> Self {
        Self {
            joint_color: LIVE_JOINT_COLOR,
            link_color: LIVE_LINK_COLOR,
            line_width,
            joint_radius: 4,
            dash: None,
            min_score: Some(min_score),
        }
    }

    /// 目標の骨格（シアン破線）
    pub fn guide(line_width: u32) -> Self {
        Self {
            joint_color: GUIDE_COLOR,
            link_color: GUIDE_COLOR,
            line_width,
            joint_radius: 5,
            dash: Some((6, 6)),
            min_score: None,
        }
    }

    fn accepts(&self, kp: &Keypoint) -> bool {
        match self.min_score {
            Some(threshold) => kp.score > threshold,
            None => true,
        }
    }
}

/// Pose を骨格として描画
///
/// 両端の関節が描画対象のときだけ線を引く。
pub fn draw_skeleton(
    surface: &mut Surface,
    pose: &Pose,
    connections: &[(JointName, JointName)],
    style: &SkeletonStyle,
) {
    for (start, end) in connections.iter() {
        let (Some(a), Some(b)) = (pose.get(*start), pose.get(*end)) else {
            continue;
        };
        if !style.accepts(a) || !style.accepts(b) {
            continue;
        }
        let p0 = a.to_pixel();
        let p1 = b.to_pixel();
        match style.dash {
            Some((dash, gap)) => {
                surface.draw_dashed_line(p0, p1, style.line_width, style.link_color, dash, gap)
            }
            None => surface.draw_line(p0.0, p0.1, p1.0, p1.1, style.line_width, style.link_color),
        }
    }

    for kp in pose.keypoints.iter().filter(|k| style.accepts(k)) {
        let (px, py) = kp.to_pixel();
        surface.fill_circle(px, py, style.joint_radius, style.joint_color);
    }
}
