use std::time::Duration;

use tokio::time::Instant;

/// 残り時間を整数秒（切り上げ）で
pub fn seconds_left(remaining: Duration) -> u64 {
    (remaining.as_millis() as u64).div_ceil(1000)
}

/// ラウンドのカウントダウン
///
/// 短い間隔でポーリングし、表示する整数秒が変わったときだけ知らせる。
#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    duration: Duration,
    poll: Duration,
}

impl Countdown {
    pub fn new(duration: Duration, poll: Duration) -> Self {
        Self {
            duration,
            poll: poll.max(Duration::from_millis(1)),
        }
    }

    /// 0 になるまで待つ。表示更新の回数を返す
    pub async fn run<F>(&self, mut on_change: F) -> usize
    where
        F: FnMut(u64),
    {
        let end_at = Instant::now() + self.duration;
        let mut last_shown = None;
        let mut updates = 0;

        loop {
            let left = seconds_left(end_at.saturating_duration_since(Instant::now()));
            if last_shown != Some(left) {
                last_shown = Some(left);
                on_change(left);
                updates += 1;
            }
            if left == 0 {
                return updates;
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}
