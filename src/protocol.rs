//! JSON wire types for the game server endpoints.
//!
//! Self-contained: no imports from other pose_match modules.

use serde::{Deserialize, Serialize};

// --- Endpoint paths ---

pub const END_PATH: &str = "/end";
pub const CAPTURE_PATH: &str = "/capture";
pub const UPLOAD_VIDEO_PATH: &str = "/upload_video";
pub const RESULT_REDIRECT_PATH: &str = "/result_redirect";

/// Multipart field name for the recorded clip
pub const UPLOAD_FIELD: &str = "file";

// --- Requests ---

/// POST /capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRequest {
    /// `data:image/jpeg;base64,...`
    pub image: String,
    /// Whether the skeleton is burned into the image
    pub skeleton: bool,
    /// 1-based round index
    pub round: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<u8>,
}

/// POST /result_redirect, also the session-result object the result view reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    /// `YYYY-MM-DD`
    pub date: String,
    /// Server-side session folder (returned by /capture)
    pub folder: String,
    pub player: u32,
    pub max_image: u32,
    /// Captured image file names, one per round
    pub images_nm: Vec<String>,
    /// Accuracy at capture, one per round
    pub images_ac: Vec<u8>,
    pub best_ac: u8,
    /// Target image paths, one per round
    pub targets: Vec<String>,
}

// --- Responses ---

/// Generic `{status, message}` body (/end, error bodies)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusResponse {
    pub fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error")
    }
}

/// POST /capture response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureResponse {
    #[serde(default)]
    pub status: Option<String>,
    /// Session folder name
    #[serde(default)]
    pub session: String,
    /// Saved file path on the server
    #[serde(default)]
    pub saved: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl CaptureResponse {
    /// File name part of `saved` (handles both separators)
    pub fn saved_file_name(&self) -> &str {
        self.saved
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.saved.as_str())
    }
}

/// POST /upload_video response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadAck {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// POST /result_redirect response. Anything without `redirect` means "no redirect".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalizeResponse {
    #[serde(default)]
    pub redirect: Option<String>,
}
