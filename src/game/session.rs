use reqwest::Url;

use crate::protocol::SessionResult;

/// プレイページのURLパラメータ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    /// n: 何回目の挑戦か
    pub attempt: u32,
    /// photos: ラウンド数
    pub total_rounds: u32,
    /// players: 人数
    pub players: u32,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            attempt: 1,
            total_rounds: 1,
            players: 1,
        }
    }
}

impl SessionParams {
    /// `n=1&photos=3&players=1` 形式（先頭の `?` やフルURLも可）を読む
    ///
    /// 欠けた値・数値でない値・0 は 1 にする。
    pub fn from_query(query: &str) -> Self {
        let query = query.trim();
        let url = if query.contains("://") {
            Url::parse(query).ok()
        } else {
            Url::parse(&format!("http://localhost/play?{}", query.trim_start_matches('?'))).ok()
        };

        let mut params = Self::default();
        let Some(url) = url else {
            return params;
        };
        for (key, value) in url.query_pairs() {
            let Some(number) = value.trim().parse::<u32>().ok().filter(|n| *n > 0) else {
                continue;
            };
            match key.as_ref() {
                "n" => params.attempt = number,
                "photos" => params.total_rounds = number,
                "players" => params.players = number,
                _ => {}
            }
        }
        params
    }
}

/// 1ラウンドの記録
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundRecord {
    pub round_index: u32,
    /// サーバーに保存されたキャプチャのファイル名（送信失敗時は空）
    pub captured_image: String,
    pub target: String,
    pub accuracy_at_capture: u8,
}

/// 1回のゲーム
#[derive(Debug, Clone)]
pub struct Session {
    pub params: SessionParams,
    pub rounds: Vec<RoundRecord>,
    pub best_accuracy: u8,
    /// `YYYY-MM-DD`
    pub date: String,
    /// サーバーのセッションフォルダ（最初のキャプチャ応答で決まる）
    pub folder: Option<String>,
}

impl Session {
    pub fn new(params: SessionParams) -> Self {
        Self::with_date(params, chrono::Local::now().format("%Y-%m-%d").to_string())
    }

    pub fn with_date(params: SessionParams, date: String) -> Self {
        Self {
            params,
            rounds: Vec::new(),
            best_accuracy: 0,
            date,
            folder: None,
        }
    }

    pub fn total_rounds(&self) -> u32 {
        self.params.total_rounds
    }

    /// まだラウンドが残っているか
    pub fn has_next_round(&self, completed_round: u32) -> bool {
        completed_round < self.params.total_rounds
    }

    pub fn record_round(&mut self, record: RoundRecord) {
        self.rounds.push(record);
    }

    pub fn set_folder(&mut self, folder: &str) {
        if self.folder.is_none() && !folder.is_empty() {
            self.folder = Some(folder.to_string());
        }
    }

    /// 終了時に送る結果
    pub fn to_result(&self) -> SessionResult {
        SessionResult {
            date: self.date.clone(),
            folder: self.folder.clone().unwrap_or_default(),
            player: self.params.players,
            max_image: self.rounds.len() as u32,
            images_nm: self.rounds.iter().map(|r| r.captured_image.clone()).collect(),
            images_ac: self.rounds.iter().map(|r| r.accuracy_at_capture).collect(),
            best_ac: self.best_accuracy,
            targets: self.rounds.iter().map(|r| r.target.clone()).collect(),
        }
    }

    /// finalize がリダイレクト先を返さなかったときの遷移先
    pub fn default_result_url(&self) -> String {
        format!("/result?n={}&a={}", self.params.attempt, self.best_accuracy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_query() {
        let p = SessionParams::from_query("n=2&photos=3&players=3");
        assert_eq!(p, SessionParams { attempt: 2, total_rounds: 3, players: 3 });

        let p = SessionParams::from_query("?photos=5");
        assert_eq!(p, SessionParams { attempt: 1, total_rounds: 5, players: 1 });

        let p = SessionParams::from_query("http://127.0.0.1:8000/play?n=4&players=2");
        assert_eq!(p, SessionParams { attempt: 4, total_rounds: 1, players: 2 });
    }

    #[test]
    fn test_params_invalid_values_default() {
        let p = SessionParams::from_query("n=abc&photos=0&players=-1&extra=9");
        assert_eq!(p, SessionParams::default());
        assert_eq!(SessionParams::from_query(""), SessionParams::default());
    }

    #[test]
    fn test_huge_round_count_does_not_preallocate() {
        let params = SessionParams::from_query("photos=4000000000");
        assert_eq!(params.total_rounds, 4_000_000_000);
        let session = Session::with_date(params, "2025-09-01".to_string());
        assert!(session.rounds.is_empty());
        assert!(session.has_next_round(1));
        assert_eq!(session.to_result().max_image, 0);
    }

    #[test]
    fn test_session_result_payload() {
        let params = SessionParams { attempt: 2, total_rounds: 2, players: 1 };
        let mut session = Session::with_date(params, "2025-09-01".to_string());
        assert!(session.has_next_round(1));
        session.set_folder("3");
        session.set_folder("9");
        for (i, acc) in [(1, 40u8), (2, 75u8)] {
            session.record_round(RoundRecord {
                round_index: i,
                captured_image: format!("2025-09-01_{}.jpg", i),
                target: format!("/static/result_images/matching/1/{}.jpg", i + 4),
                accuracy_at_capture: acc,
            });
        }
        assert!(!session.has_next_round(2));
        session.best_accuracy = 81;

        let result = session.to_result();
        assert_eq!(result.max_image, 2);
        assert_eq!(result.folder, "3");
        assert_eq!(result.images_ac, vec![40, 75]);
        assert_eq!(result.images_nm[1], "2025-09-01_2.jpg");
        assert_eq!(result.best_ac, 81);
        assert_eq!(result.targets.len(), 2);
        assert_eq!(session.default_result_url(), "/result?n=2&a=81");
    }
}
