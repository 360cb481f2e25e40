//! 毎フレームの骨格描画と一致率の公開

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{GuideConfig, RenderConfig};
use crate::game::accuracy::SharedAccuracy;
use crate::logging::Logger;
use crate::pose::{similarity, to_percent, BodyFrame, Normalizer, ReferenceSlot};
use crate::pump::LatestPose;

use super::guide::{reference_to_pose, GuideLayout};
use super::overlay::{lock_overlay, AnchorBox, OverlayRegistry, SharedOverlay};
use super::skeleton::{draw_skeleton, SkeletonStyle, GUIDE_CONNECTIONS, SKELETON_CONNECTIONS};

pub const SKELETON_OVERLAY_ID: &str = "poseOverlay";
pub const SKELETON_Z_INDEX: i32 = 10000;

/// 1フレームで何をしたか
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub drew_reference: bool,
    pub drew_live: bool,
    /// 公開した一致率（更新が止められていれば None）
    pub published: Option<u8>,
}

struct RenderShared {
    overlay: SharedOverlay,
    registry: OverlayRegistry,
    latest: LatestPose,
    reference: ReferenceSlot,
    accuracy: SharedAccuracy,
    normalizer: Normalizer,
    render: RenderConfig,
    guide: GuideConfig,
    stopped: AtomicBool,
    frames: AtomicU64,
    logger: Logger,
}

impl RenderShared {
    fn frame(&self) -> FrameReport {
        let mut report = FrameReport::default();
        let live = self.latest.get();
        let reference = self.reference.get();
        let live_vector = live.as_deref().and_then(|pose| self.normalizer.normalize(pose));

        {
            let mut overlay = lock_overlay(&self.overlay);
            if let Some(anchor) = self.registry.anchor() {
                overlay.resize_to_anchor(anchor);
            }
            let surface = overlay.surface_mut();
            surface.clear();

            if let Some(reference) = reference.as_deref() {
                // 自分の骨盤・体格に合わせて重ねる。取れなければガイド配置
                let target = match live.as_deref().and_then(BodyFrame::from_pose) {
                    Some(frame) => reference_to_pose(reference, self.normalizer.min_confidence(), |x, y| {
                        frame.project(x, y)
                    }),
                    None => {
                        let layout = GuideLayout::fit(
                            &reference.vector,
                            surface.width() as u32,
                            surface.height() as u32,
                            &self.guide,
                        );
                        reference_to_pose(reference, self.normalizer.min_confidence(), |x, y| {
                            layout.project(x, y)
                        })
                    }
                };
                draw_skeleton(
                    surface,
                    &target,
                    &GUIDE_CONNECTIONS,
                    &SkeletonStyle::guide(self.render.line_width),
                );
                report.drew_reference = true;
            }

            if let Some(pose) = live.as_deref() {
                draw_skeleton(
                    surface,
                    pose,
                    &SKELETON_CONNECTIONS,
                    &SkeletonStyle::live(self.render.line_width, self.render.joint_threshold),
                );
                report.drew_live = true;
            }
        }

        if let (Some(_), Some(reference)) = (live.as_ref(), reference.as_ref()) {
            let score = similarity(live_vector.as_ref(), Some(&reference.vector));
            let percent = to_percent(score);
            if self.accuracy.publish(percent) {
                report.published = Some(percent);
            }
        }

        self.frames.fetch_add(1, Ordering::Relaxed);
        report
    }
}

/// 描画ループ
///
/// 推定ポンプとは独立に回り、最後に公開された姿勢をそのまま使う。
pub struct RenderLoop {
    shared: Arc<RenderShared>,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl RenderLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: &OverlayRegistry,
        anchor: AnchorBox,
        latest: LatestPose,
        reference: ReferenceSlot,
        accuracy: SharedAccuracy,
        normalizer: Normalizer,
        render: RenderConfig,
        guide: GuideConfig,
        logger: Logger,
    ) -> Self {
        let overlay = registry.create_or_get(SKELETON_OVERLAY_ID, anchor, SKELETON_Z_INDEX);
        let interval = render.frame_interval();
        Self {
            shared: Arc::new(RenderShared {
                overlay,
                registry: registry.clone(),
                latest,
                reference,
                accuracy,
                normalizer,
                render,
                guide,
                stopped: AtomicBool::new(false),
                frames: AtomicU64::new(0),
                logger,
            }),
            interval,
            handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.shared.stopped.store(false, Ordering::Release);
        let shared = self.shared.clone();
        let interval = self.interval;
        log!(shared.logger, "[render] start {}Hz", shared.render.refresh_hz);

        self.handle = Some(tokio::spawn(async move {
            let mut window_start = Instant::now();
            let mut window_frames = shared.frames.load(Ordering::Relaxed);
            loop {
                if shared.stopped.load(Ordering::Acquire) {
                    break;
                }
                shared.frame();

                if window_start.elapsed() >= Duration::from_secs(1) {
                    let total = shared.frames.load(Ordering::Relaxed);
                    let acc = shared.accuracy.snapshot();
                    vlog!(
                        shared.logger,
                        "[render] {} fps, accuracy {}% (best {}%)",
                        total - window_frames,
                        acc.current,
                        acc.best
                    );
                    window_frames = total;
                    window_start = Instant::now();
                }

                tokio::time::sleep(interval).await;
            }
        }));
    }

    pub fn stop(&mut self) {
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            log!(self.shared.logger, "[render] stop");
        }
        // 眠っている古いタスクが再開後も回り続けないように
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// 1フレームだけ描く
    pub fn render_frame(&self) -> FrameReport {
        self.shared.frame()
    }

    pub fn frame_count(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    pub fn overlay(&self) -> SharedOverlay {
        self.shared.overlay.clone()
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
