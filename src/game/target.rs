use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use image::RgbImage;
use rand::Rng;

/// 通常のターゲット画像数
pub const DEFAULT_POOL_SIZE: u32 = 20;

/// 3人用のターゲット画像数
pub const THREE_PLAYER_POOL_SIZE: u32 = 18;

/// 人数ごとのターゲット数
pub fn pool_size(players: u32) -> u32 {
    if players == 3 {
        THREE_PLAYER_POOL_SIZE
    } else {
        DEFAULT_POOL_SIZE
    }
}

/// ターゲット画像の配信パス（index は 1 始まり）
pub fn target_path(players: u32, index: u32) -> String {
    format!("/static/result_images/matching/{}/{}.jpg", players, index)
}

/// ターゲット画像の取得元
#[async_trait]
pub trait TargetLibrary: Send + Sync {
    async fn load(&self, path: &str) -> Result<RgbImage>;
}

/// 使用済みを避けてターゲットを選ぶ
///
/// プールを使い切ったら使用済みをリセットして全体から選び直す。
pub struct TargetPicker<R: Rng> {
    rng: R,
    players: u32,
    pool_size: u32,
    used: HashSet<u32>,
}

impl<R: Rng> TargetPicker<R> {
    pub fn new(players: u32, rng: R) -> Self {
        Self {
            rng,
            players,
            pool_size: pool_size(players),
            used: HashSet::new(),
        }
    }

    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    /// 次のターゲット番号 (1..=pool_size)
    pub fn pick(&mut self) -> u32 {
        if self.used.len() >= self.pool_size as usize {
            self.used.clear();
        }
        let remaining: Vec<u32> = (1..=self.pool_size)
            .filter(|i| !self.used.contains(i))
            .collect();
        let index = remaining[self.rng.random_range(0..remaining.len())];
        self.used.insert(index);
        index
    }

    /// 次のターゲットのパス
    pub fn pick_path(&mut self) -> (u32, String) {
        let index = self.pick();
        (index, target_path(self.players, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_pool_size_by_players() {
        assert_eq!(pool_size(1), 20);
        assert_eq!(pool_size(2), 20);
        assert_eq!(pool_size(3), 18);
        assert_eq!(pool_size(4), 20);
    }

    #[test]
    fn test_target_path() {
        assert_eq!(target_path(2, 17), "/static/result_images/matching/2/17.jpg");
    }

    #[test]
    fn test_no_repeat_within_cycle_then_reset() {
        for players in [1, 3] {
            let mut picker = TargetPicker::new(players, StdRng::seed_from_u64(42));
            let size = picker.pool_size();

            let mut seen = HashSet::new();
            for _ in 0..size {
                let index = picker.pick();
                assert!((1..=size).contains(&index));
                assert!(seen.insert(index), "repeated {}", index);
            }
            assert_eq!(seen.len() as u32, size);
            assert_eq!(picker.used_count() as u32, size);

            // 使い切ったら新しいサイクル
            let next = picker.pick();
            assert!((1..=size).contains(&next));
            assert_eq!(picker.used_count(), 1);

            let mut cycle = HashSet::from([next]);
            for _ in 1..size {
                assert!(cycle.insert(picker.pick()));
            }
        }
    }

    #[test]
    fn test_pick_path_uses_players() {
        let mut picker = TargetPicker::new(3, StdRng::seed_from_u64(1));
        let (index, path) = picker.pick_path();
        assert_eq!(path, format!("/static/result_images/matching/3/{}.jpg", index));
    }
}
