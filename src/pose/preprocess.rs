use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;

/// MoveNet用の入力サイズ
pub const MOVENET_INPUT_SIZE: u32 = 192;

/// RGB 画像を MoveNet用の入力テンソルに変換
///
/// - 192x192 にリサイズ（アスペクト比は無視、出力は正規化座標なので元に戻せる）
/// - [1, 192, 192, 3] の f32 テンソルに変換 (0.0-255.0)
pub fn preprocess_for_movenet(image: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(image, MOVENET_INPUT_SIZE, MOVENET_INPUT_SIZE, FilterType::Triangle);

    let size = MOVENET_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32;
        }
    }

    tensor
}
