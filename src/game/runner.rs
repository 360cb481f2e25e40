use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;

use super::accuracy::SharedAccuracy;
use super::countdown::Countdown;
use super::session::{RoundRecord, Session, SessionParams};
use super::target::{TargetLibrary, TargetPicker};
use super::ui::{GameUi, RoundBanner};
use crate::api::GameApi;
use crate::camera::{capture_still, FrameSource};
use crate::config::Config;
use crate::logging::Logger;
use crate::pose::{detect_reference, Normalizer, PoseEstimator, ReferencePose, ReferenceSlot};
use crate::protocol::{CaptureRequest, SessionResult};
use crate::pump::{EstimationPump, LatestPose};
use crate::recorder::SessionRecorder;
use crate::render::{AnchorBox, GuideOverlay, OverlayRegistry, RenderLoop};

/// ゲームの状態（ラウンド番号は 1 始まり）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Idle,
    Loading,
    TargetSelecting { round: u32 },
    TargetPoseDetecting { round: u32 },
    RoundPreparing { round: u32 },
    RoundActive { round: u32 },
    Capturing { round: u32 },
    Finalizing,
    Done,
    /// カメラ・モデルの取得失敗
    Failed,
}

/// カメラとモデルの取得
#[async_trait]
pub trait GameDevices: Send + Sync {
    async fn open_camera(&self) -> Result<Arc<dyn FrameSource>>;
    async fn load_estimator(&self) -> Result<Arc<dyn PoseEstimator>>;
}

/// ゲームが使う外部のもの
#[derive(Clone)]
pub struct GameDeps {
    pub api: Arc<dyn GameApi>,
    pub targets: Arc<dyn TargetLibrary>,
    pub devices: Arc<dyn GameDevices>,
    pub ui: Arc<dyn GameUi>,
}

/// 1回のゲームの結果
#[derive(Debug, Clone)]
pub struct GameOutcome {
    pub result: SessionResult,
    pub rounds: Vec<RoundRecord>,
    pub navigate_to: String,
    pub recording_uploaded: bool,
}

/// ラウンド中に使うもの
struct Live {
    source: Arc<dyn FrameSource>,
    estimator: Arc<dyn PoseEstimator>,
    latest: LatestPose,
    guide: GuideOverlay,
}

/// ラウンド進行
pub struct Game {
    config: Config,
    params: SessionParams,
    deps: GameDeps,
    registry: OverlayRegistry,
    accuracy: SharedAccuracy,
    reference: ReferenceSlot,
    normalizer: Normalizer,
    state: watch::Sender<GameState>,
    rng: StdRng,
    logger: Logger,
}

impl Game {
    pub fn new(
        config: Config,
        params: SessionParams,
        deps: GameDeps,
        registry: OverlayRegistry,
        logger: Logger,
    ) -> Self {
        let normalizer = Normalizer::new(config.normalize.min_confidence);
        let (state, _) = watch::channel(GameState::Idle);
        Self {
            config,
            params,
            deps,
            registry,
            accuracy: SharedAccuracy::new(),
            reference: ReferenceSlot::new(),
            normalizer,
            state,
            rng: StdRng::from_os_rng(),
            logger,
        }
    }

    /// ターゲット選択の乱数を固定する
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<GameState> {
        self.state.subscribe()
    }

    /// 一致率（表示用）
    pub fn accuracy(&self) -> SharedAccuracy {
        self.accuracy.clone()
    }

    fn set_state(&self, state: GameState) {
        log!(self.logger, "[state] {:?}", state);
        self.state.send_replace(state);
    }

    fn anchor(&self) -> AnchorBox {
        self.registry.anchor().unwrap_or_else(|| {
            AnchorBox::new(self.config.camera.width, self.config.camera.height)
        })
    }

    async fn acquire(&self) -> Result<(Arc<dyn FrameSource>, Arc<dyn PoseEstimator>)> {
        let source = self.deps.devices.open_camera().await?;
        let estimator = self.deps.devices.load_estimator().await?;
        Ok((source, estimator))
    }

    /// セッションを最後まで進める
    ///
    /// カメラ・モデルが取れなければ loading_failed を出して Err。
    /// それ以外の失敗（送信・検出）はログに残して続行する。
    pub async fn run(self) -> Result<GameOutcome> {
        let ui = self.deps.ui.clone();
        self.set_state(GameState::Idle);
        self.accuracy.reset();

        if let Err(e) = self.deps.api.reset_session().await {
            log!(self.logger, "[api] /end failed: {:#}", e);
        }

        self.set_state(GameState::Loading);
        ui.show_loading();
        let mut guide = GuideOverlay::new(
            &self.registry,
            self.anchor(),
            self.reference.clone(),
            self.config.guide.clone(),
            self.normalizer.min_confidence(),
            self.config.render.line_width,
            self.config.render.frame_interval(),
            self.logger.clone(),
        );
        guide.hide();

        let (source, estimator) = match self.acquire().await {
            Ok(devices) => devices,
            Err(e) => {
                log!(self.logger, "[state] loading failed: {:#}", e);
                ui.loading_failed(&format!("{:#}", e));
                self.set_state(GameState::Failed);
                return Err(e.context("failed to start session"));
            }
        };
        ui.hide_loading();

        let mut pump = EstimationPump::new(
            source.clone(),
            estimator.clone(),
            self.config.pump.fps,
            self.logger.clone(),
        );
        pump.start();
        let mut render = RenderLoop::new(
            &self.registry,
            self.anchor(),
            pump.latest(),
            self.reference.clone(),
            self.accuracy.clone(),
            self.normalizer,
            self.config.render.clone(),
            self.config.guide.clone(),
            self.logger.clone(),
        );
        render.start();
        guide.start();

        let mut recorder =
            SessionRecorder::new(source.clone(), self.config.recorder.clone(), self.logger.clone());
        let rng = self.rng.clone();
        let mut picker = TargetPicker::new(self.params.players, rng);
        let mut session = Session::new(self.params);

        let live = Live {
            source,
            estimator,
            latest: pump.latest(),
            guide,
        };

        log!(
            self.logger,
            "[state] session start: attempt={} rounds={} players={}",
            self.params.attempt,
            self.params.total_rounds,
            self.params.players
        );

        let mut round = 1;
        loop {
            let record = self
                .play_round(round, &live, &mut picker, &mut recorder, &mut session)
                .await;
            session.record_round(record);
            if !session.has_next_round(round) {
                break;
            }
            round += 1;
        }

        // 終了
        self.set_state(GameState::Finalizing);
        self.accuracy.set_updates_enabled(false);
        live.guide.hide();
        ui.show_end();
        tokio::time::sleep(Duration::from_millis(self.config.game.end_ms)).await;
        ui.hide_end();

        let recording_uploaded = self.upload_recording(&mut recorder).await;

        pump.stop();
        render.stop();
        let Live { mut guide, .. } = live;
        guide.stop();

        session.best_accuracy = self.accuracy.snapshot().best;
        let result = session.to_result();
        let redirect = match self.deps.api.finalize(&result).await {
            Ok(redirect) => redirect,
            Err(e) => {
                log!(self.logger, "[api] finalize failed: {:#}", e);
                None
            }
        };
        let navigate_to = redirect.unwrap_or_else(|| session.default_result_url());
        ui.navigate(&navigate_to);
        self.set_state(GameState::Done);

        Ok(GameOutcome {
            result,
            rounds: session.rounds,
            navigate_to,
            recording_uploaded,
        })
    }

    async fn play_round(
        &self,
        round: u32,
        live: &Live,
        picker: &mut TargetPicker<StdRng>,
        recorder: &mut SessionRecorder,
        session: &mut Session,
    ) -> RoundRecord {
        let ui = self.deps.ui.clone();
        // 表示は毎ラウンド 0% から。best はそのまま
        self.accuracy.reset_current();
        ui.reset_accuracy_display();

        self.set_state(GameState::TargetSelecting { round });
        let (index, target) = picker.pick_path();
        log!(self.logger, "[round] {} target #{} {}", round, index, target);
        ui.set_target(&target);
        self.reference.clear();

        self.set_state(GameState::TargetPoseDetecting { round });
        let reference = match self.deps.targets.load(&target).await {
            Ok(image) => {
                detect_reference(
                    live.estimator.as_ref(),
                    &image,
                    &self.normalizer,
                    &self.logger,
                )
                .await
            }
            Err(e) => {
                log!(self.logger, "[round] target load failed: {:#}", e);
                let anchor = self.anchor();
                ReferencePose::fallback((anchor.width, anchor.height))
            }
        };
        vlog!(self.logger, "[round] reference {:?}", reference.source);
        self.reference.set(reference);

        // 準備中は採点とガイドを止める
        self.set_state(GameState::RoundPreparing { round });
        self.accuracy.set_updates_enabled(false);
        live.guide.hide();
        ui.show_round_banner(RoundBanner::Preparing(round));
        tokio::time::sleep(Duration::from_millis(self.config.game.prepare_ms)).await;
        ui.show_round_banner(RoundBanner::Go);
        tokio::time::sleep(Duration::from_millis(self.config.game.go_ms)).await;
        ui.hide_round_banner();

        self.set_state(GameState::RoundActive { round });
        self.accuracy.set_updates_enabled(true);
        live.guide.show();
        if round == 1 {
            recorder.start();
        }
        let countdown = Countdown::new(self.config.game.countdown(), self.config.game.countdown_poll());
        countdown.run(|left| ui.set_countdown(left)).await;

        self.set_state(GameState::Capturing { round });
        let accuracy_at_capture = self.accuracy.snapshot().current;
        let captured_image = self.capture(round, live, accuracy_at_capture, session).await;
        log!(
            self.logger,
            "[capture] round {}/{} accuracy {}% {}",
            round,
            session.total_rounds(),
            accuracy_at_capture,
            if captured_image.is_empty() { "(not saved)" } else { captured_image.as_str() }
        );

        RoundRecord {
            round_index: round,
            captured_image,
            target,
            accuracy_at_capture,
        }
    }

    /// 静止画を撮って送る。保存されたファイル名（失敗なら空）
    async fn capture(
        &self,
        round: u32,
        live: &Live,
        accuracy: u8,
        session: &mut Session,
    ) -> String {
        let Some(frame) = live.source.latest_frame() else {
            log!(self.logger, "[capture] no camera frame");
            return String::new();
        };

        let game = &self.config.game;
        let pose = if game.capture_with_skeleton {
            live.latest.get()
        } else {
            None
        };
        let still = match capture_still(&frame, game.capture_mirror, pose.as_deref(), game.jpeg_quality) {
            Ok(still) => still,
            Err(e) => {
                log!(self.logger, "[capture] encode failed: {:#}", e);
                return String::new();
            }
        };

        let request = CaptureRequest {
            image: still.data_url,
            skeleton: pose.is_some(),
            round,
            player: Some(self.params.players),
            accuracy: Some(accuracy),
        };
        match self.deps.api.capture(&request).await {
            Ok(response) => {
                session.set_folder(&response.session);
                response.saved_file_name().to_string()
            }
            Err(e) => {
                log!(self.logger, "[capture] send failed: {:#}", e);
                String::new()
            }
        }
    }

    /// 録画を止めてアップロード。進捗は保存中表示へ
    async fn upload_recording(&self, recorder: &mut SessionRecorder) -> bool {
        if !recorder.is_recording() {
            return false;
        }
        let ui = self.deps.ui.clone();
        ui.show_saving();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let progress_ui = ui.clone();
        let forward = tokio::spawn(async move {
            while let Some(percent) = rx.recv().await {
                progress_ui.update_saving(percent);
            }
        });

        let uploaded = match recorder.stop_and_upload(self.deps.api.as_ref(), Some(tx)).await {
            Ok(ack) => ack.is_some(),
            Err(e) => {
                log!(self.logger, "[upload] failed: {:#}", e);
                false
            }
        };
        let _ = forward.await;
        ui.hide_saving();
        uploaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SharedFrame;
    use crate::game::ui::LogUi;
    use crate::pose::normalize::tests::standing_pose;
    use crate::pose::Pose;
    use crate::protocol::{CaptureResponse, UploadAck};
    use crate::recorder::Clip;
    use crate::render::guide::GUIDE_OVERLAY_ID;
    use crate::render::lock_overlay;
    use anyhow::bail;
    use image::RgbImage;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedSender;
    use tokio::time::Instant;

    #[derive(Default)]
    struct MockApi {
        resets: Mutex<usize>,
        captures: Mutex<Vec<CaptureRequest>>,
        uploads: Mutex<Vec<usize>>,
        finalized: Mutex<Vec<SessionResult>>,
        redirect: Option<String>,
        fail_capture: bool,
    }

    #[async_trait]
    impl GameApi for MockApi {
        async fn reset_session(&self) -> Result<()> {
            *self.resets.lock().unwrap() += 1;
            Ok(())
        }

        async fn capture(&self, request: &CaptureRequest) -> Result<CaptureResponse> {
            self.captures.lock().unwrap().push(request.clone());
            if self.fail_capture {
                bail!("connection refused");
            }
            Ok(CaptureResponse {
                status: Some("ok".to_string()),
                session: "5".to_string(),
                saved: format!("/srv/capture/2025-09-01/5/2025-09-01_{}.jpg", request.round),
                message: None,
            })
        }

        async fn upload_video(&self, clip: Clip, progress: Option<UnboundedSender<u8>>) -> Result<UploadAck> {
            self.uploads.lock().unwrap().push(clip.frames);
            if let Some(tx) = progress {
                let _ = tx.send(50);
                let _ = tx.send(100);
            }
            Ok(UploadAck {
                status: Some("ok".to_string()),
                path: Some("video/2025-09-01.mp4".to_string()),
                message: None,
            })
        }

        async fn finalize(&self, result: &SessionResult) -> Result<Option<String>> {
            self.finalized.lock().unwrap().push(result.clone());
            Ok(self.redirect.clone())
        }
    }

    /// ターゲット画像は 100x200
    struct MockTargets;

    #[async_trait]
    impl TargetLibrary for MockTargets {
        async fn load(&self, _path: &str) -> Result<RgbImage> {
            Ok(RgbImage::new(100, 200))
        }
    }

    /// 高さ `blind_from` 以上の画像では人物を見つけない推定器
    struct MockEstimator {
        blind_from: u32,
    }

    #[async_trait]
    impl PoseEstimator for MockEstimator {
        async fn estimate(&self, image: &RgbImage) -> Result<Option<Pose>> {
            if image.height() >= self.blind_from {
                return Ok(None);
            }
            let (w, h) = image.dimensions();
            Ok(Some(standing_pose(w as f32 / 2.0, h as f32 / 2.0, h as f32 / 8.0)))
        }
    }

    struct MockDevices {
        camera: Arc<SharedFrame>,
        blind_from: u32,
        camera_available: bool,
    }

    #[async_trait]
    impl GameDevices for MockDevices {
        async fn open_camera(&self) -> Result<Arc<dyn FrameSource>> {
            if !self.camera_available {
                bail!("camera 0 is not available");
            }
            Ok(self.camera.clone())
        }

        async fn load_estimator(&self) -> Result<Arc<dyn PoseEstimator>> {
            Ok(Arc::new(MockEstimator {
                blind_from: self.blind_from,
            }))
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.game.countdown_secs = 3;
        config.camera.width = 64;
        config.camera.height = 48;
        config.render.refresh_hz = 30;
        config.recorder.fps = 10;
        config
    }

    struct Harness {
        api: Arc<MockApi>,
        ui: LogUi,
        registry: OverlayRegistry,
        game: Game,
    }

    fn harness(query: &str, api: MockApi, blind_from: u32, camera_available: bool) -> Harness {
        let camera = SharedFrame::new();
        camera.push(RgbImage::new(64, 48));
        let api = Arc::new(api);
        let ui = LogUi::new(Logger::stderr());
        let registry = OverlayRegistry::new();
        let deps = GameDeps {
            api: api.clone(),
            targets: Arc::new(MockTargets),
            devices: Arc::new(MockDevices {
                camera,
                blind_from,
                camera_available,
            }),
            ui: Arc::new(ui.clone()),
        };
        let game = Game::new(
            test_config(),
            SessionParams::from_query(query),
            deps,
            registry.clone(),
            Logger::stderr(),
        )
        .with_seed(7);
        Harness {
            api,
            ui,
            registry,
            game,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_rounds_produce_three_records() {
        let api = MockApi {
            redirect: Some("/result?n=2&a=100".to_string()),
            ..MockApi::default()
        };
        let Harness { api, ui, game, .. } = harness("n=2&photos=3&players=1", api, 10_000, true);
        let states = game.subscribe();

        let outcome = game.run().await.unwrap();

        assert_eq!(outcome.rounds.len(), 3);
        assert_eq!(outcome.result.max_image, 3);
        assert_eq!(outcome.result.folder, "5");
        assert_eq!(outcome.result.player, 1);
        let targets: HashSet<&String> = outcome.result.targets.iter().collect();
        assert_eq!(targets.len(), 3);
        assert_eq!(outcome.result.images_nm[2], "2025-09-01_3.jpg");
        // ライブと参照が同じ形なので満点
        assert_eq!(outcome.result.images_ac, vec![100, 100, 100]);
        assert_eq!(outcome.result.best_ac, 100);

        assert_eq!(*api.resets.lock().unwrap(), 1);
        let captures = api.captures.lock().unwrap();
        assert_eq!(captures.iter().map(|c| c.round).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(captures.iter().all(|c| c.player == Some(1)));
        assert!(captures[0].image.starts_with("data:image/jpeg;base64,"));
        assert!(!captures[0].skeleton);

        assert!(outcome.recording_uploaded);
        assert_eq!(api.uploads.lock().unwrap().len(), 1);
        assert!(api.uploads.lock().unwrap()[0] > 0);
        assert_eq!(api.finalized.lock().unwrap().len(), 1);

        assert_eq!(outcome.navigate_to, "/result?n=2&a=100");
        let snapshot = ui.snapshot();
        assert_eq!(snapshot.navigated_to.as_deref(), Some("/result?n=2&a=100"));
        assert_eq!(snapshot.countdown, Some(0));
        assert_eq!(snapshot.saving, None);
        assert_eq!(*states.borrow(), GameState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preparing_blocks_accuracy_and_hides_guide() {
        let Harness {
            api, registry, game, ..
        } = harness("photos=2", MockApi::default(), 10_000, true);
        let accuracy = game.accuracy();
        let mut states = game.subscribe();
        let prepare = Duration::from_millis(test_config().game.prepare_ms);
        let guide_visible =
            || registry.get(GUIDE_OVERLAY_ID).map(|overlay| lock_overlay(&overlay).is_visible());

        let watcher = async {
            let mut prepared = Vec::new();
            let mut activated = Vec::new();
            let mut first_active = None;
            let mut done_at = None;
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                match state {
                    GameState::RoundPreparing { round } => {
                        assert!(!accuracy.updates_enabled());
                        assert_eq!(guide_visible(), Some(false));
                        // バナー中は推定・描画が回っていても一致率が動かない
                        tokio::time::sleep(prepare / 2).await;
                        assert_eq!(*states.borrow(), GameState::RoundPreparing { round });
                        assert!(!accuracy.publish(77));
                        assert_eq!(accuracy.snapshot().current, 0);
                        assert_eq!(guide_visible(), Some(false));
                        prepared.push(round);
                    }
                    GameState::RoundActive { round } => {
                        assert!(accuracy.updates_enabled());
                        assert_eq!(guide_visible(), Some(true));
                        if round == 1 {
                            first_active = Some(Instant::now());
                        }
                        activated.push(round);
                    }
                    GameState::Done => {
                        done_at = Some(Instant::now());
                        break;
                    }
                    _ => {}
                }
            }
            (prepared, activated, first_active, done_at)
        };

        let (outcome, (prepared, activated, first_active, done_at)) =
            tokio::join!(game.run(), watcher);
        let outcome = outcome.unwrap();

        assert_eq!(prepared, vec![1, 2]);
        assert_eq!(activated, vec![1, 2]);
        // 開始後は一致率が動く
        assert_eq!(outcome.result.images_ac, vec![100, 100]);

        // 録画は1ラウンド目の開始から終了まで1本だけ
        let uploads = api.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 1);
        let recorded_ms = (done_at.unwrap() - first_active.unwrap()).as_millis() as usize;
        let expected = recorded_ms * test_config().recorder.fps as usize / 1000;
        assert!(uploads[0] <= expected + 2, "frames = {}, expected ~{}", uploads[0], expected);
        assert!(uploads[0] >= expected / 2, "frames = {}, expected ~{}", uploads[0], expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_detection_falls_back_and_completes() {
        // ターゲット(200)も半分(100)も検出失敗、カメラ(48)は検出できる
        let Harness { api, game, .. } = harness("photos=1", MockApi::default(), 100, true);

        let outcome = game.run().await.unwrap();

        assert_eq!(outcome.rounds.len(), 1);
        let accuracy = outcome.rounds[0].accuracy_at_capture;
        assert!(accuracy <= 100);
        assert_eq!(accuracy, 0);
        assert_eq!(outcome.result.best_ac, 0);
        assert_eq!(api.captures.lock().unwrap().len(), 1);
        // リダイレクトなしなら既定の結果ページ
        assert_eq!(outcome.navigate_to, "/result?n=1&a=0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_still_records_round() {
        let api = MockApi {
            fail_capture: true,
            ..MockApi::default()
        };
        let Harness { game, .. } = harness("photos=2", api, 10_000, true);

        let outcome = game.run().await.unwrap();

        assert_eq!(outcome.rounds.len(), 2);
        assert!(outcome.rounds.iter().all(|r| r.captured_image.is_empty()));
        assert_eq!(outcome.result.folder, "");
        assert_eq!(outcome.result.max_image, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_failure_is_fatal() {
        let Harness { api, ui, game, .. } = harness("photos=3", MockApi::default(), 10_000, false);
        let states = game.subscribe();

        let err = game.run().await.unwrap_err();

        assert!(format!("{:#}", err).contains("camera 0 is not available"));
        let snapshot = ui.snapshot();
        assert_eq!(snapshot.error.as_deref(), Some("camera 0 is not available"));
        assert!(!snapshot.loading);
        assert_eq!(*states.borrow(), GameState::Failed);
        assert!(api.captures.lock().unwrap().is_empty());
        assert!(api.finalized.lock().unwrap().is_empty());
    }
}
