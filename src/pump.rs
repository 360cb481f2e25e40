//! ライブ映像から一定間隔で姿勢を推定し、最新結果を公開する

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::camera::FrameSource;
use crate::logging::Logger;
use crate::pose::{Pose, PoseEstimator};

/// 推定間隔の下限（表示リフレッシュより速くしない）
pub const MIN_INTERVAL: Duration = Duration::from_millis(16);

/// fps から推定間隔を求める。fps=0 は 1 とみなす
pub fn pump_interval(fps: u32) -> Duration {
    let fps = fps.max(1) as u64;
    Duration::from_millis(1000 / fps).max(MIN_INTERVAL)
}

/// 最新姿勢の読み取りハンドル（ブロックしない）
#[derive(Clone, Default)]
pub struct LatestPose {
    inner: Arc<Mutex<Option<Arc<Pose>>>>,
}

impl LatestPose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<Pose>> {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, pose: Option<Pose>) {
        let pose = pose.map(Arc::new);
        match self.inner.lock() {
            Ok(mut guard) => *guard = pose,
            Err(poisoned) => *poisoned.into_inner() = pose,
        }
    }
}

/// 1 tick の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 前回の推定がまだ終わっていない
    Busy,
    /// まだフレームが無い
    NoFrame,
    /// 停止済み
    Stopped,
    Updated,
    /// 人物なしで姿勢をクリア
    Cleared,
    /// 推定エラー。前回の姿勢を維持
    Failed,
}

struct PumpShared {
    source: Arc<dyn FrameSource>,
    estimator: Arc<dyn PoseEstimator>,
    latest: LatestPose,
    in_flight: AtomicBool,
    stopped: AtomicBool,
    estimations: AtomicU64,
    logger: Logger,
}

impl PumpShared {
    async fn tick(&self) -> TickOutcome {
        if self.stopped.load(Ordering::Acquire) {
            return TickOutcome::Stopped;
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return TickOutcome::Busy;
        }
        let _in_flight = InFlight(&self.in_flight);

        match self.source.latest_frame() {
            None => TickOutcome::NoFrame,
            Some(frame) => {
                let result = self.estimator.estimate(&frame).await;
                self.estimations.fetch_add(1, Ordering::Relaxed);
                if self.stopped.load(Ordering::Acquire) {
                    TickOutcome::Stopped
                } else {
                    match result {
                        Ok(Some(pose)) => {
                            self.latest.set(Some(pose));
                            TickOutcome::Updated
                        }
                        Ok(None) => {
                            self.latest.set(None);
                            TickOutcome::Cleared
                        }
                        Err(e) => {
                            vlog!(self.logger, "[pump] estimation failed: {:#}", e);
                            TickOutcome::Failed
                        }
                    }
                }
            }
        }
    }
}

/// 推定中フラグ。タスクが中断されても drop で下ろす
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 姿勢推定ポンプ
///
/// 推定が終わってから次の間隔を待つので、遅い推定は自然に間引かれる。
pub struct EstimationPump {
    shared: Arc<PumpShared>,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl EstimationPump {
    pub fn new(
        source: Arc<dyn FrameSource>,
        estimator: Arc<dyn PoseEstimator>,
        fps: u32,
        logger: Logger,
    ) -> Self {
        Self {
            shared: Arc::new(PumpShared {
                source,
                estimator,
                latest: LatestPose::new(),
                in_flight: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                estimations: AtomicU64::new(0),
                logger,
            }),
            interval: pump_interval(fps),
            handle: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// ループを開始（tokio ランタイム上で呼ぶこと）。二重開始は無視
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        self.shared.stopped.store(false, Ordering::Release);
        let shared = self.shared.clone();
        let interval = self.interval;
        log!(shared.logger, "[pump] start interval={}ms", interval.as_millis());

        self.handle = Some(tokio::spawn(async move {
            let mut window_start = Instant::now();
            let mut window_count = shared.estimations.load(Ordering::Relaxed);
            loop {
                if shared.stopped.load(Ordering::Acquire) {
                    break;
                }
                shared.tick().await;

                if window_start.elapsed() >= Duration::from_secs(1) {
                    let total = shared.estimations.load(Ordering::Relaxed);
                    vlog!(shared.logger, "[pump] {} est/s", total - window_count);
                    window_count = total;
                    window_start = Instant::now();
                }

                tokio::time::sleep(interval).await;
            }
        }));
    }

    /// 1回分の推定（ループとは独立に呼べる。実行中なら Busy）
    pub async fn tick(&self) -> TickOutcome {
        self.shared.tick().await
    }

    /// 停止。以後の tick は推定を行わない
    pub fn stop(&mut self) {
        if !self.shared.stopped.swap(true, Ordering::AcqRel) {
            log!(self.shared.logger, "[pump] stop");
        }
        // 眠っている古いタスクが再開後も回り続けないように
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.shared.stopped.load(Ordering::Acquire)
    }

    /// 最新姿勢（古いかもしれない）
    pub fn latest_pose(&self) -> Option<Arc<Pose>> {
        self.shared.latest.get()
    }

    /// 描画ループ用の読み取りハンドル
    pub fn latest(&self) -> LatestPose {
        self.shared.latest.clone()
    }

    /// これまでの推定回数
    pub fn estimation_count(&self) -> u64 {
        self.shared.estimations.load(Ordering::Relaxed)
    }
}

impl Drop for EstimationPump {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SharedFrame;
    use crate::pose::normalize::tests::standing_pose;
    use anyhow::Result;
    use async_trait::async_trait;
    use image::RgbImage;
    use std::sync::atomic::AtomicUsize;

    /// 呼び出しごとに決めた結果を返す、遅い推定器
    struct ScriptedEstimator {
        delay: Duration,
        script: Mutex<Vec<Result<Option<Pose>>>>,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        starts: Mutex<Vec<Instant>>,
    }

    impl ScriptedEstimator {
        fn new(delay: Duration, script: Vec<Result<Option<Pose>>>) -> Arc<Self> {
            Arc::new(Self {
                delay,
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                starts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PoseEstimator for ScriptedEstimator {
        async fn estimate(&self, _image: &RgbImage) -> Result<Option<Pose>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.starts.lock().unwrap().push(Instant::now());
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(Some(standing_pose(320.0, 240.0, 40.0)))
            } else {
                script.remove(0)
            }
        }
    }

    fn camera_with_frame() -> Arc<SharedFrame> {
        let camera = SharedFrame::new();
        camera.push(RgbImage::new(64, 48));
        camera
    }

    #[test]
    fn test_pump_interval() {
        assert_eq!(pump_interval(12), Duration::from_millis(83));
        assert_eq!(pump_interval(30), Duration::from_millis(33));
        assert_eq!(pump_interval(120), Duration::from_millis(16));
        assert_eq!(pump_interval(1000), Duration::from_millis(16));
        assert_eq!(pump_interval(0), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_overlapping_estimations() {
        let estimator = ScriptedEstimator::new(Duration::from_millis(200), vec![]);
        let mut pump = EstimationPump::new(camera_with_frame(), estimator.clone(), 12, Logger::stderr());
        assert_eq!(pump.interval(), Duration::from_millis(83));
        pump.start();

        tokio::time::sleep(Duration::from_secs(3)).await;
        pump.stop();

        assert_eq!(estimator.max_active.load(Ordering::SeqCst), 1);
        let starts = estimator.starts.lock().unwrap().clone();
        assert!(starts.len() >= 5);
        // 推定 200ms + 間隔 83ms ごとに再実行される
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(283));
        }
        assert!(pump.latest_pose().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_tick_is_skipped() {
        let estimator = ScriptedEstimator::new(Duration::from_millis(100), vec![]);
        let pump = EstimationPump::new(camera_with_frame(), estimator.clone(), 12, Logger::stderr());
        let (a, b) = tokio::join!(pump.tick(), pump.tick());
        assert_eq!(a, TickOutcome::Updated);
        assert_eq!(b, TickOutcome::Busy);
        assert_eq!(estimator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_keeps_previous_pose_and_empty_clears() {
        let estimator = ScriptedEstimator::new(
            Duration::from_millis(1),
            vec![
                Ok(Some(standing_pose(100.0, 100.0, 10.0))),
                Err(anyhow::anyhow!("detector hiccup")),
                Ok(None),
            ],
        );
        let pump = EstimationPump::new(camera_with_frame(), estimator, 12, Logger::stderr());

        assert_eq!(pump.tick().await, TickOutcome::Updated);
        let first = pump.latest_pose().unwrap();

        assert_eq!(pump.tick().await, TickOutcome::Failed);
        assert_eq!(pump.latest_pose().unwrap(), first);

        assert_eq!(pump.tick().await, TickOutcome::Cleared);
        assert!(pump.latest_pose().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_frame_skips_estimation() {
        let estimator = ScriptedEstimator::new(Duration::from_millis(1), vec![]);
        let pump = EstimationPump::new(SharedFrame::new(), estimator.clone(), 12, Logger::stderr());
        assert_eq!(pump.tick().await, TickOutcome::NoFrame);
        assert_eq!(estimator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_estimations() {
        let estimator = ScriptedEstimator::new(Duration::from_millis(10), vec![]);
        let mut pump = EstimationPump::new(camera_with_frame(), estimator.clone(), 30, Logger::stderr());
        pump.start();
        assert!(pump.is_running());
        tokio::time::sleep(Duration::from_millis(500)).await;
        pump.stop();
        pump.stop();
        assert!(!pump.is_running());

        // 実行中だった1回は終わらせる
        tokio::time::sleep(Duration::from_millis(50)).await;
        let calls = estimator.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(estimator.calls.load(Ordering::SeqCst), calls);
        assert_eq!(pump.tick().await, TickOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_estimation_rate() {
        let estimator = ScriptedEstimator::new(Duration::from_millis(10), vec![]);
        let mut pump = EstimationPump::new(camera_with_frame(), estimator.clone(), 30, Logger::stderr());
        pump.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let first = estimator.calls.load(Ordering::SeqCst);

        pump.stop();
        pump.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = estimator.calls.load(Ordering::SeqCst) - first;

        assert!(first >= 20, "first = {}", first);
        assert!(second <= first + 2, "first = {}, after restart = {}", first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_estimation_does_not_wedge_restart() {
        let estimator = ScriptedEstimator::new(Duration::from_millis(200), vec![]);
        let mut pump = EstimationPump::new(camera_with_frame(), estimator.clone(), 30, Logger::stderr());
        pump.start();
        // 1回目の推定の途中で止める
        tokio::time::sleep(Duration::from_millis(100)).await;
        pump.stop();
        let calls = estimator.calls.load(Ordering::SeqCst);
        assert_eq!(calls, 1);

        pump.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(estimator.calls.load(Ordering::SeqCst) >= calls + 3);
        assert!(pump.latest_pose().is_some());
    }
}
