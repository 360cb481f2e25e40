use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};

use crate::pose::Pose;
use crate::render::skeleton::{draw_skeleton, SkeletonStyle, SKELETON_CONNECTIONS};
use crate::render::surface::Surface;

const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// キャプチャした静止画（送信用）
#[derive(Debug, Clone, PartialEq)]
pub struct StillCapture {
    pub data_url: String,
    pub width: u32,
    pub height: u32,
}

/// 左右反転（本人から見た鏡像）
pub fn mirror(frame: &RgbImage) -> RgbImage {
    image::imageops::flip_horizontal(frame)
}

/// JPEG にエンコード
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    encoder
        .encode(frame.as_raw(), frame.width(), frame.height(), ExtendedColorType::Rgb8)
        .context("JPEG encode failed")?;
    Ok(bytes)
}

/// JPEG data URL にエンコード
pub fn encode_data_url(frame: &RgbImage, quality: u8) -> Result<String> {
    let bytes = encode_jpeg(frame, quality)?;
    Ok(format!("{}{}", JPEG_DATA_URL_PREFIX, STANDARD.encode(bytes)))
}

/// data URL を画像に戻す
pub fn decode_data_url(data_url: &str) -> Result<RgbImage> {
    let Some((header, payload)) = data_url.split_once(',') else {
        bail!("not a data URL");
    };
    if !header.starts_with("data:image/") || !header.ends_with(";base64") {
        bail!("unsupported data URL header: {}", header);
    }
    let bytes = STANDARD.decode(payload).context("invalid base64 payload")?;
    let image = image::load_from_memory(&bytes).context("invalid image payload")?;
    Ok(image.to_rgb8())
}

/// ライブ映像から1枚キャプチャ
///
/// `skeleton` があれば骨格を焼き込む（座標は反転前のフレーム基準）。
pub fn capture_still(
    frame: &RgbImage,
    mirror_image: bool,
    skeleton: Option<&Pose>,
    quality: u8,
) -> Result<StillCapture> {
    let mut image = frame.clone();

    if let Some(pose) = skeleton {
        let mut surface = Surface::new(image.width() as usize, image.height() as usize);
        draw_skeleton(
            &mut surface,
            pose,
            &SKELETON_CONNECTIONS,
            &SkeletonStyle::live(3, 0.4),
        );
        surface.composite_onto(&mut image);
    }

    if mirror_image {
        image = mirror(&image);
    }

    Ok(StillCapture {
        data_url: encode_data_url(&image, quality)?,
        width: image.width(),
        height: image.height(),
    })
}
