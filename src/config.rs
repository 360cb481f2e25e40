use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub pump: PumpConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub guide: GuideConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// ゲームサーバーのベースURL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// リクエストタイムアウト（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String { "http://127.0.0.1:8000".to_string() }
fn default_timeout_secs() -> u64 { 30 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// プレイページのURLパラメータ (n, photos, players)
    #[serde(default = "default_query")]
    pub query: String,
}

fn default_query() -> String { "n=1&photos=3&players=1".to_string() }

impl Default for SessionConfig {
    fn default() -> Self {
        Self { query: default_query() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    /// 1ラウンドのカウントダウン（秒）
    #[serde(default = "default_countdown_secs")]
    pub countdown_secs: u64,
    /// カウントダウンのポーリング間隔（ミリ秒）
    #[serde(default = "default_countdown_poll_ms")]
    pub countdown_poll_ms: u64,
    /// 「N番目 準備...」の表示時間（ミリ秒）
    #[serde(default = "default_prepare_ms")]
    pub prepare_ms: u64,
    /// 「スタート!」の表示時間（ミリ秒）
    #[serde(default = "default_go_ms")]
    pub go_ms: u64,
    /// 終了表示の時間（ミリ秒）
    #[serde(default = "default_end_ms")]
    pub end_ms: u64,
    /// キャプチャ画像を左右反転（鏡像）するか
    #[serde(default)]
    pub capture_mirror: bool,
    /// キャプチャ画像に骨格を焼き込むか
    #[serde(default)]
    pub capture_with_skeleton: bool,
    #[serde(default = "default_capture_quality")]
    pub jpeg_quality: u8,
}

fn default_countdown_secs() -> u64 { 10 }
fn default_countdown_poll_ms() -> u64 { 200 }
fn default_prepare_ms() -> u64 { 2300 }
fn default_go_ms() -> u64 { 1000 }
fn default_end_ms() -> u64 { 2000 }
fn default_capture_quality() -> u8 { 90 }

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            countdown_secs: default_countdown_secs(),
            countdown_poll_ms: default_countdown_poll_ms(),
            prepare_ms: default_prepare_ms(),
            go_ms: default_go_ms(),
            end_ms: default_end_ms(),
            capture_mirror: false,
            capture_with_skeleton: false,
            jpeg_quality: default_capture_quality(),
        }
    }
}

impl GameConfig {
    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_secs)
    }

    pub fn countdown_poll(&self) -> Duration {
        Duration::from_millis(self.countdown_poll_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PumpConfig {
    /// 推定の目標レート
    #[serde(default = "default_pump_fps")]
    pub fps: u32,
}

fn default_pump_fps() -> u32 { 12 }

impl Default for PumpConfig {
    fn default() -> Self {
        Self { fps: default_pump_fps() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    /// 描画ループのリフレッシュレート
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: u32,
    /// 関節を描く信頼度の閾値（これより大きいもの）
    #[serde(default = "default_joint_threshold")]
    pub joint_threshold: f32,
    #[serde(default = "default_line_width")]
    pub line_width: u32,
}

fn default_refresh_hz() -> u32 { 60 }
fn default_joint_threshold() -> f32 { 0.4 }
fn default_line_width() -> u32 { 3 }

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            refresh_hz: default_refresh_hz(),
            joint_threshold: default_joint_threshold(),
            line_width: default_line_width(),
        }
    }
}

impl RenderConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.refresh_hz.max(1) as u64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NormalizeConfig {
    /// ベクトルに採用する関節の最低信頼度
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_min_confidence() -> f32 { 0.5 }

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self { min_confidence: default_min_confidence() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuideConfig {
    /// ポーズを使わず固定のリング+点を表示
    #[serde(default)]
    pub fixed_placeholder: bool,
    /// キャンバスに対する余白比
    #[serde(default = "default_fit_margin")]
    pub fit_margin: f32,
    /// フィット後にかける倍率
    #[serde(default = "default_scale_multiplier")]
    pub scale_multiplier: f32,
    /// 骨盤中心を置く縦位置（0=上端, 1=下端）
    #[serde(default = "default_vertical_anchor")]
    pub vertical_anchor: f32,
}

fn default_fit_margin() -> f32 { 0.9 }
fn default_scale_multiplier() -> f32 { 1.2 }
fn default_vertical_anchor() -> f32 { 0.6 }

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            fixed_placeholder: false,
            fit_margin: default_fit_margin(),
            scale_multiplier: default_scale_multiplier(),
            vertical_anchor: default_vertical_anchor(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 録画のサンプリングレート
    #[serde(default = "default_recorder_fps")]
    pub fps: u32,
    /// 鏡像で録画するか
    #[serde(default = "default_true")]
    pub mirror: bool,
    #[serde(default = "default_recorder_quality")]
    pub jpeg_quality: u8,
}

fn default_true() -> bool { true }
fn default_recorder_fps() -> u32 { 30 }
fn default_recorder_quality() -> u8 { 80 }

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fps: default_recorder_fps(),
            mirror: true,
            jpeg_quality: default_recorder_quality(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub index: i32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// MoveNet ONNX モデルのパス
    #[serde(default = "default_model_path")]
    pub path: String,
    /// これ未満の平均信頼度は「人物なし」とみなす
    #[serde(default = "default_min_pose_score")]
    pub min_pose_score: f32,
}

fn default_model_path() -> String { "models/movenet_lightning.onnx".to_string() }
fn default_min_pose_score() -> f32 { 0.25 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            min_pose_score: default_min_pose_score(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default)]
    pub verbose: bool,
}

fn default_log_dir() -> String { "logs".to_string() }

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            verbose: false,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("invalid config")?;
        Ok(config)
    }

    /// 読めなければデフォルト設定
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("[config] {:#}, using defaults", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.game.countdown_secs, 10);
        assert_eq!(config.game.countdown_poll_ms, 200);
        assert_eq!(config.game.prepare_ms, 2300);
        assert_eq!(config.game.go_ms, 1000);
        assert_eq!(config.pump.fps, 12);
        assert_eq!(config.render.joint_threshold, 0.4);
        assert_eq!(config.normalize.min_confidence, 0.5);
        assert_eq!(config.guide.fit_margin, 0.9);
        assert_eq!(config.guide.vertical_anchor, 0.6);
        assert_eq!(config.recorder.fps, 30);
        assert!(config.recorder.mirror);
        assert!(!config.game.capture_mirror);
    }

    #[test]
    fn test_partial_section_override() {
        let config = Config::from_toml(
            r#"
            [game]
            countdown_secs = 5
            capture_mirror = true

            [pump]
            fps = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.game.countdown_secs, 5);
        assert!(config.game.capture_mirror);
        assert_eq!(config.game.countdown_poll_ms, 200);
        assert_eq!(config.pump.fps, 30);
        assert_eq!(config.render.refresh_hz, 60);
    }

    #[test]
    fn test_invalid_config_is_error() {
        assert!(Config::from_toml("[game]\ncountdown_secs = \"ten\"").is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("/nonexistent/pose_match.toml");
        assert_eq!(config.pump.fps, 12);
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.game.countdown(), Duration::from_secs(10));
        assert_eq!(config.game.countdown_poll(), Duration::from_millis(200));
        assert_eq!(config.render.frame_interval(), Duration::from_micros(16_666));
    }
}
