//! カメラ映像の上に目標ポーズのガイドを重ねる

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::GuideConfig;
use crate::logging::Logger;
use crate::pose::{Keypoint, NormalizedVector, Pose, ReferencePose, ReferenceSlot, CANONICAL_JOINTS};

use super::overlay::{lock_overlay, AnchorBox, OverlayRegistry, SharedOverlay};
use super::skeleton::{draw_skeleton, SkeletonStyle, GUIDE_COLOR, GUIDE_CONNECTIONS};
use super::surface::Surface;

pub const GUIDE_OVERLAY_ID: &str = "camGuideOverlay";
pub const GUIDE_Z_INDEX: i32 = 9999;

/// プレースホルダのリング半径と中心点の半径
const PLACEHOLDER_RING_RADIUS: i32 = 80;
const PLACEHOLDER_DOT_RADIUS: i32 = 5;

/// 正規化座標 → キャンバス座標の配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuideLayout {
    pub center_x: f32,
    pub center_y: f32,
    pub scale: f32,
}

impl GuideLayout {
    /// ベクトル全体がキャンバスに収まるよう配置
    ///
    /// 横は中央、骨盤中心は縦 `vertical_anchor` の位置。
    pub fn fit(vector: &NormalizedVector, width: u32, height: u32, config: &GuideConfig) -> Self {
        let (max_x, max_y) = vector.extents();
        let fit_w = width as f32 * config.fit_margin;
        let fit_h = height as f32 * config.fit_margin;
        let scale = (fit_w / (2.0 * max_x)).min(fit_h / (2.0 * max_y)) * config.scale_multiplier;
        Self {
            center_x: width as f32 / 2.0,
            center_y: height as f32 * config.vertical_anchor,
            scale,
        }
    }

    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        (self.center_x + x * self.scale, self.center_y + y * self.scale)
    }
}

/// 参照ポーズをキャンバス上の Pose に戻す
///
/// ベクトルに採用されなかった（0埋めの）関節は含めない。
pub fn reference_to_pose<F>(reference: &ReferencePose, min_confidence: f32, project: F) -> Pose
where
    F: Fn(f32, f32) -> (f32, f32),
{
    let keypoints = CANONICAL_JOINTS
        .iter()
        .enumerate()
        .filter_map(|(i, &joint)| {
            let source = reference.pose.get(joint)?;
            if !source.is_valid(min_confidence) {
                return None;
            }
            let (nx, ny) = reference.vector.joint(i)?;
            let (x, y) = project(nx, ny);
            Some(Keypoint::new(joint, x, y, 1.0))
        })
        .collect();
    Pose::new(keypoints)
}

/// 1フレーム分のガイドを描く
pub fn draw_guide(
    surface: &mut Surface,
    reference: Option<&ReferencePose>,
    config: &GuideConfig,
    min_confidence: f32,
    line_width: u32,
) {
    let width = surface.width() as u32;
    let height = surface.height() as u32;

    if config.fixed_placeholder {
        let cx = (width / 2) as i32;
        let cy = (height as f32 * config.vertical_anchor) as i32;
        surface.stroke_circle(cx, cy, PLACEHOLDER_RING_RADIUS, line_width, GUIDE_COLOR, Some((6, 6)));
        surface.fill_circle(cx, cy, PLACEHOLDER_DOT_RADIUS, GUIDE_COLOR);
        return;
    }

    let Some(reference) = reference else {
        return;
    };
    let layout = GuideLayout::fit(&reference.vector, width, height, config);
    let pose = reference_to_pose(reference, min_confidence, |x, y| layout.project(x, y));
    draw_skeleton(surface, &pose, &GUIDE_CONNECTIONS, &SkeletonStyle::guide(line_width));
}

struct GuideShared {
    overlay: SharedOverlay,
    registry: OverlayRegistry,
    reference: ReferenceSlot,
    config: GuideConfig,
    min_confidence: f32,
    line_width: u32,
    stopped: AtomicBool,
    renders: AtomicU64,
    logger: Logger,
}

impl GuideShared {
    fn render(&self) {
        let reference = self.reference.get();
        let mut overlay = lock_overlay(&self.overlay);
        if let Some(anchor) = self.registry.anchor() {
            overlay.resize_to_anchor(anchor);
        }
        let surface = overlay.surface_mut();
        surface.clear();
        draw_guide(
            surface,
            reference.as_deref(),
            &self.config,
            self.min_confidence,
            self.line_width,
        );
        self.renders.fetch_add(1, Ordering::Relaxed);
    }
}

/// ガイドオーバーレイ
///
/// 採点とは独立。読み込み中・準備中・終了時は hide で消す。
pub struct GuideOverlay {
    shared: Arc<GuideShared>,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl GuideOverlay {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: &OverlayRegistry,
        anchor: AnchorBox,
        reference: ReferenceSlot,
        config: GuideConfig,
        min_confidence: f32,
        line_width: u32,
        interval: Duration,
        logger: Logger,
    ) -> Self {
        let overlay = registry.create_or_get(GUIDE_OVERLAY_ID, anchor, GUIDE_Z_INDEX);
        Self {
            shared: Arc::new(GuideShared {
                overlay,
                registry: registry.clone(),
                reference,
                config,
                min_confidence,
                line_width,
                stopped: AtomicBool::new(true),
                renders: AtomicU64::new(0),
                logger,
            }),
            interval,
            handle: None,
        }
    }

    /// 描画ループを開始（停止中なら再開）
    pub fn start(&mut self) {
        if !self.shared.stopped.swap(false, Ordering::AcqRel) {
            return;
        }
        let shared = self.shared.clone();
        let interval = self.interval;
        vlog!(shared.logger, "[guide] start");
        self.handle = Some(tokio::spawn(async move {
            loop {
                if shared.stopped.load(Ordering::Acquire) {
                    break;
                }
                shared.render();
                tokio::time::sleep(interval).await;
            }
        }));
    }

    pub fn stop(&mut self) {
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            vlog!(self.shared.logger, "[guide] stop");
        }
        // 眠っている古いタスクが再開後も回り続けないように
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn show(&self) {
        lock_overlay(&self.shared.overlay).show();
    }

    pub fn hide(&self) {
        lock_overlay(&self.shared.overlay).hide();
    }

    pub fn is_visible(&self) -> bool {
        lock_overlay(&self.shared.overlay).is_visible()
    }

    /// ウィンドウリサイズ・映像サイズ確定時
    pub fn on_anchor_resized(&self, anchor: AnchorBox) {
        self.shared.registry.resize_all(anchor);
    }

    /// 1フレームだけ描く
    pub fn render_once(&self) {
        self.shared.render();
    }

    pub fn overlay(&self) -> SharedOverlay {
        self.shared.overlay.clone()
    }

    /// これまでに描いた回数
    pub fn render_count(&self) -> u64 {
        self.shared.renders.load(Ordering::Relaxed)
    }
}

impl Drop for GuideOverlay {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
