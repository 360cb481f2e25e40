use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

/// 現在・最高の一致率（%）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccuracyState {
    pub current: u8,
    pub best: u8,
}

impl AccuracyState {
    /// current を上書きし、超えていれば best も更新
    pub fn publish(&mut self, percent: u8) {
        let percent = percent.min(100);
        self.current = percent;
        if percent > self.best {
            self.best = percent;
        }
    }
}

/// 描画ループ（書き手）とオーバーレイ・ステートマシン（読み手）で共有
///
/// current と best は同じロックの中で更新する。
#[derive(Clone)]
pub struct SharedAccuracy {
    state: Arc<Mutex<AccuracyState>>,
    updates_enabled: Arc<AtomicBool>,
}

impl Default for SharedAccuracy {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedAccuracy {
    /// 更新は最初は止まっている
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AccuracyState::default())),
            updates_enabled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn snapshot(&self) -> AccuracyState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// 更新が許可されていれば反映して true
    pub fn publish(&self, percent: u8) -> bool {
        if !self.updates_enabled() {
            return false;
        }
        match self.state.lock() {
            Ok(mut guard) => guard.publish(percent),
            Err(poisoned) => poisoned.into_inner().publish(percent),
        }
        true
    }

    /// ラウンド開始時の表示リセット（best は残す）
    pub fn reset_current(&self) {
        match self.state.lock() {
            Ok(mut guard) => guard.current = 0,
            Err(poisoned) => poisoned.into_inner().current = 0,
        }
    }

    /// セッション開始時の全リセット
    pub fn reset(&self) {
        match self.state.lock() {
            Ok(mut guard) => *guard = AccuracyState::default(),
            Err(poisoned) => *poisoned.into_inner() = AccuracyState::default(),
        }
    }

    pub fn set_updates_enabled(&self, enabled: bool) {
        self.updates_enabled.store(enabled, Ordering::Release);
    }

    pub fn updates_enabled(&self) -> bool {
        self.updates_enabled.load(Ordering::Acquire)
    }
}
