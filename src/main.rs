use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use pose_match::api::HttpGameApi;
use pose_match::camera::{FrameSource, ThreadedCamera};
use pose_match::config::{CameraConfig, Config, ModelConfig};
use pose_match::game::{Game, GameDeps, GameDevices, GameOutcome, LogUi, SessionParams};
use pose_match::logging::Logger;
use pose_match::pose::{MoveNetEstimator, PoseEstimator};
use pose_match::render::{MinifbPresenter, OverlayRegistry};
use pose_match::log;

const CONFIG_PATH: &str = "config.toml";

type CameraSlot = Arc<Mutex<Option<Arc<ThreadedCamera>>>>;

/// OpenCV カメラと MoveNet
struct DesktopDevices {
    camera: CameraConfig,
    model: ModelConfig,
    /// 表示側と共有するカメラ
    slot: CameraSlot,
    logger: Logger,
}

#[async_trait]
impl GameDevices for DesktopDevices {
    async fn open_camera(&self) -> Result<Arc<dyn FrameSource>> {
        let camera = Arc::new(ThreadedCamera::start(
            self.camera.index,
            self.camera.width,
            self.camera.height,
        )?);
        let (w, h) = camera.resolution();
        log!(self.logger, "Camera {}: {}x{}", self.camera.index, w, h);
        match self.slot.lock() {
            Ok(mut guard) => *guard = Some(camera.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(camera.clone()),
        }
        Ok(camera)
    }

    async fn load_estimator(&self) -> Result<Arc<dyn PoseEstimator>> {
        log!(self.logger, "Loading model from {}...", self.model.path);
        let estimator = MoveNetEstimator::new(&self.model.path, self.model.min_pose_score)?;
        log!(self.logger, "Model loaded");
        Ok(Arc::new(estimator))
    }
}

fn current_camera(slot: &CameraSlot) -> Option<Arc<ThreadedCamera>> {
    match slot.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn main() -> Result<()> {
    let config = Config::load_or_default(CONFIG_PATH);
    let logger = Logger::open(&config.log.dir, "pose_match", config.log.verbose)?;
    log!(logger, "Pose Match ({})", env!("GIT_VERSION"));

    // 第1引数でプレイページのURLパラメータを上書き
    let query = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.session.query.clone());
    let params = SessionParams::from_query(&query);
    log!(
        logger,
        "Server: {}  attempt={} rounds={} players={}",
        config.server.base_url,
        params.attempt,
        params.total_rounds,
        params.players
    );

    let registry = OverlayRegistry::new();
    let ui = LogUi::new(logger.clone());
    let api = Arc::new(HttpGameApi::new(&config.server, logger.clone())?);
    let slot: CameraSlot = Arc::new(Mutex::new(None));
    let devices = Arc::new(DesktopDevices {
        camera: config.camera.clone(),
        model: config.model.clone(),
        slot: slot.clone(),
        logger: logger.clone(),
    });
    let deps = GameDeps {
        api: api.clone(),
        targets: api,
        devices,
        ui: Arc::new(ui.clone()),
    };

    let game = Game::new(config.clone(), params, deps, registry.clone(), logger.clone());
    let accuracy = game.accuracy();

    // ゲームは別スレッドの単一スレッドランタイムで、ウィンドウはメインスレッド
    let worker = thread::spawn(move || -> Result<GameOutcome> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(game.run())
    });

    let mut presenter = MinifbPresenter::new(
        "Pose Match",
        config.camera.width as usize,
        config.camera.height as usize,
    )?;
    registry.resize_all(presenter.anchor());
    let mut last_title = String::new();

    while presenter.is_open() && !worker.is_finished() {
        if let Some(frame) = current_camera(&slot).and_then(|camera| camera.latest_frame()) {
            if presenter.draw_frame(&frame) {
                registry.resize_all(presenter.anchor());
            }
        }
        presenter.draw_overlays(&registry);

        let acc = accuracy.snapshot();
        let title = format!(
            "Pose Match | {} | {}% (best {}%)",
            ui.snapshot().status_line(),
            acc.current,
            acc.best
        );
        if title != last_title {
            presenter.set_title(&title);
            last_title = title;
        }

        presenter.update()?;
        thread::sleep(Duration::from_millis(16));
    }

    if !worker.is_finished() {
        log!(logger, "Window closed, quitting");
        return Ok(());
    }

    let outcome = worker
        .join()
        .map_err(|_| anyhow!("game thread panicked"))??;
    log!(
        logger,
        "Finished: {} rounds, best {}%, recording {}",
        outcome.rounds.len(),
        outcome.result.best_ac,
        if outcome.recording_uploaded { "uploaded" } else { "not uploaded" }
    );
    log!(logger, "Result: {}{}", config.server.base_url, outcome.navigate_to);
    Ok(())
}
