#[cfg(feature = "desktop")]
pub mod capture;
pub mod still;

#[cfg(feature = "desktop")]
pub use capture::{OpenCvCamera, ThreadedCamera};
pub use still::{capture_still, decode_data_url, encode_data_url, encode_jpeg, mirror, StillCapture};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbImage;

/// カメラ1フレーム（RGB）
pub type Frame = Arc<RgbImage>;

/// ライブ映像の供給元
///
/// 最新フレームをブロックせずに返す。初回フレーム到着前は None。
pub trait FrameSource: Send + Sync {
    fn latest_frame(&self) -> Option<Frame>;

    /// 現在のフレームID。新フレームのたびに増える
    fn frame_id(&self) -> u64;
}

/// 最新フレームを1枚だけ保持する共有スロット
#[derive(Default)]
pub struct SharedFrame {
    latest: Mutex<Option<Frame>>,
    frame_id: AtomicU64,
}

impl SharedFrame {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 新しいフレームを書き込む
    pub fn push(&self, frame: RgbImage) {
        let frame = Arc::new(frame);
        match self.latest.lock() {
            Ok(mut guard) => *guard = Some(frame),
            Err(poisoned) => *poisoned.into_inner() = Some(frame),
        }
        self.frame_id.fetch_add(1, Ordering::Release);
    }
}

impl FrameSource for SharedFrame {
    fn latest_frame(&self) -> Option<Frame> {
        match self.latest.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::Acquire)
    }
}
