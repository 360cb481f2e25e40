use anyhow::{Context, Result};

use crate::protocol::SessionResult;

/// 結果画面のギャラリー
///
/// キャプチャ画像とターゲット画像を1枚ずつ前後にめくる。端で止まる。
#[derive(Debug, Clone)]
pub struct ResultGallery {
    result: SessionResult,
    index: usize,
}

impl ResultGallery {
    pub fn new(result: SessionResult) -> Self {
        Self { result, index: 0 }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let result: SessionResult = serde_json::from_str(json).context("invalid session result")?;
        Ok(Self::new(result))
    }

    pub fn result(&self) -> &SessionResult {
        &self.result
    }

    /// 表示できる枚数（記録された画像数と max_image の小さい方）
    pub fn len(&self) -> usize {
        (self.result.max_image as usize).min(self.result.images_nm.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 0 始まり
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn next(&mut self) -> usize {
        if self.index + 1 < self.len() {
            self.index += 1;
        }
        self.index
    }

    pub fn prev(&mut self) -> usize {
        self.index = self.index.saturating_sub(1);
        self.index
    }

    pub fn has_next(&self) -> bool {
        self.index + 1 < self.len()
    }

    pub fn has_prev(&self) -> bool {
        self.index > 0
    }

    /// 表示中のキャプチャ画像URL
    pub fn capture_url(&self) -> Option<String> {
        let name = self.result.images_nm.get(self.index).filter(|_| !self.is_empty())?;
        if name.is_empty() {
            return None;
        }
        Some(format!(
            "/static/result_images/capture/{}/{}/{}",
            self.result.date, self.result.folder, name
        ))
    }

    /// 表示中のターゲット画像パス
    pub fn target_url(&self) -> Option<&str> {
        if self.is_empty() {
            return None;
        }
        self.result.targets.get(self.index).map(String::as_str)
    }

    /// 表示中ラウンドの撮影時一致率
    pub fn accuracy(&self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        self.result.images_ac.get(self.index).copied()
    }

    pub fn best_accuracy(&self) -> u8 {
        self.result.best_ac
    }

    /// セッション録画のURL
    pub fn video_url(&self) -> String {
        format!(
            "/static/result_images/video/{}/{}/{}.mp4",
            self.result.date, self.result.folder, self.result.date
        )
    }

    /// 「2 / 3」形式
    pub fn page_label(&self) -> String {
        if self.is_empty() {
            return "0 / 0".to_string();
        }
        format!("{} / {}", self.index + 1, self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT_JSON: &str = r#"{
        "date": "2025-09-01",
        "folder": "4",
        "player": 1,
        "max_image": 3,
        "images_nm": ["2025-09-01_1.jpg", "", "2025-09-01_3.jpg"],
        "images_ac": [40, 0, 91],
        "best_ac": 95,
        "targets": [
            "/static/result_images/matching/1/2.jpg",
            "/static/result_images/matching/1/9.jpg",
            "/static/result_images/matching/1/14.jpg"
        ]
    }"#;

    #[test]
    fn test_paging_is_clamped() {
        let mut gallery = ResultGallery::from_json(RESULT_JSON).unwrap();
        assert_eq!(gallery.len(), 3);
        assert!(!gallery.has_prev());
        assert_eq!(gallery.prev(), 0);
        assert_eq!(gallery.page_label(), "1 / 3");

        assert_eq!(gallery.next(), 1);
        assert_eq!(gallery.next(), 2);
        assert!(!gallery.has_next());
        assert_eq!(gallery.next(), 2);
        assert_eq!(gallery.page_label(), "3 / 3");
        assert_eq!(gallery.prev(), 1);
    }

    #[test]
    fn test_urls_for_current_page() {
        let mut gallery = ResultGallery::from_json(RESULT_JSON).unwrap();
        assert_eq!(
            gallery.capture_url().as_deref(),
            Some("/static/result_images/capture/2025-09-01/4/2025-09-01_1.jpg")
        );
        assert_eq!(gallery.target_url(), Some("/static/result_images/matching/1/2.jpg"));
        assert_eq!(gallery.accuracy(), Some(40));
        assert_eq!(
            gallery.video_url(),
            "/static/result_images/video/2025-09-01/4/2025-09-01.mp4"
        );
        assert_eq!(gallery.best_accuracy(), 95);

        // 送信に失敗したラウンドは画像なし
        gallery.next();
        assert_eq!(gallery.capture_url(), None);
        assert_eq!(gallery.accuracy(), Some(0));
    }

    #[test]
    fn test_empty_result() {
        let json = r#"{"date":"2025-09-01","folder":"","player":1,"max_image":0,
            "images_nm":[],"images_ac":[],"best_ac":0,"targets":[]}"#;
        let mut gallery = ResultGallery::from_json(json).unwrap();
        assert!(gallery.is_empty());
        assert_eq!(gallery.next(), 0);
        assert_eq!(gallery.capture_url(), None);
        assert_eq!(gallery.target_url(), None);
        assert_eq!(gallery.page_label(), "0 / 0");
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(ResultGallery::from_json("{\"date\": 1}").is_err());
    }
}
