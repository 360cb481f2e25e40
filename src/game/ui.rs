use std::sync::{Arc, Mutex};

use crate::logging::Logger;

/// ラウンド準備オーバーレイの表示内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundBanner {
    /// 「N番目 準備...」
    Preparing(u32),
    /// 「スタート!」
    Go,
}

/// 画面側（オーバーレイ・テキスト・遷移）
///
/// 状態遷移から呼ばれるだけで、待ち合わせはしない。
pub trait GameUi: Send + Sync {
    fn show_loading(&self);
    fn hide_loading(&self);
    /// カメラ・モデルが使えないとき
    fn loading_failed(&self, message: &str);

    fn set_target(&self, path: &str);
    fn show_round_banner(&self, banner: RoundBanner);
    fn hide_round_banner(&self);
    /// 一致率表示を 0% に戻す
    fn reset_accuracy_display(&self);
    fn set_countdown(&self, seconds_left: u64);

    fn show_end(&self);
    fn hide_end(&self);

    fn show_saving(&self);
    fn update_saving(&self, percent: u8);
    fn hide_saving(&self);

    fn navigate(&self, url: &str);
}

/// 画面表示の現在値
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiSnapshot {
    pub loading: bool,
    pub error: Option<String>,
    pub target: Option<String>,
    pub banner: Option<RoundBanner>,
    pub countdown: Option<u64>,
    pub ended: bool,
    pub saving: Option<u8>,
    pub navigated_to: Option<String>,
}

impl UiSnapshot {
    /// 一行の状態表示（ウィンドウタイトル用）
    pub fn status_line(&self) -> String {
        if let Some(error) = &self.error {
            return format!("error: {}", error);
        }
        if self.loading {
            return "loading...".to_string();
        }
        if let Some(url) = &self.navigated_to {
            return format!("result: {}", url);
        }
        if let Some(percent) = self.saving {
            return format!("saving {}%", percent);
        }
        if self.ended {
            return "finished!".to_string();
        }
        match self.banner {
            Some(RoundBanner::Preparing(round)) => return format!("round {} get ready...", round),
            Some(RoundBanner::Go) => return "go!".to_string(),
            None => {}
        }
        match self.countdown {
            Some(left) => format!("{}s", left),
            None => String::new(),
        }
    }
}

/// ログに出しつつ現在値を保持する UI
#[derive(Clone)]
pub struct LogUi {
    logger: Logger,
    snapshot: Arc<Mutex<UiSnapshot>>,
}

impl LogUi {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            snapshot: Arc::new(Mutex::new(UiSnapshot::default())),
        }
    }

    pub fn snapshot(&self) -> UiSnapshot {
        match self.snapshot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update<F: FnOnce(&mut UiSnapshot)>(&self, f: F) {
        match self.snapshot.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl GameUi for LogUi {
    fn show_loading(&self) {
        log!(self.logger, "[ui] loading...");
        self.update(|s| s.loading = true);
    }

    fn hide_loading(&self) {
        self.update(|s| s.loading = false);
    }

    fn loading_failed(&self, message: &str) {
        log!(self.logger, "[ui] loading failed: {}", message);
        self.update(|s| {
            s.loading = false;
            s.error = Some(message.to_string());
        });
    }

    fn set_target(&self, path: &str) {
        vlog!(self.logger, "[ui] target {}", path);
        self.update(|s| s.target = Some(path.to_string()));
    }

    fn show_round_banner(&self, banner: RoundBanner) {
        match banner {
            RoundBanner::Preparing(round) => log!(self.logger, "[ui] round {} get ready...", round),
            RoundBanner::Go => log!(self.logger, "[ui] go!"),
        }
        self.update(|s| s.banner = Some(banner));
    }

    fn hide_round_banner(&self) {
        self.update(|s| s.banner = None);
    }

    fn reset_accuracy_display(&self) {
        vlog!(self.logger, "[ui] accuracy 0%");
    }

    fn set_countdown(&self, seconds_left: u64) {
        vlog!(self.logger, "[ui] countdown {}", seconds_left);
        self.update(|s| s.countdown = Some(seconds_left));
    }

    fn show_end(&self) {
        log!(self.logger, "[ui] finished!");
        self.update(|s| s.ended = true);
    }

    fn hide_end(&self) {
        self.update(|s| s.ended = false);
    }

    fn show_saving(&self) {
        self.update(|s| s.saving = Some(0));
    }

    fn update_saving(&self, percent: u8) {
        vlog!(self.logger, "[ui] saving {}%", percent);
        self.update(|s| s.saving = Some(percent));
    }

    fn hide_saving(&self) {
        self.update(|s| s.saving = None);
    }

    fn navigate(&self, url: &str) {
        log!(self.logger, "[ui] navigate {}", url);
        self.update(|s| s.navigated_to = Some(url.to_string()));
    }
}
