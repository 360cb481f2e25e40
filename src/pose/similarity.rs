use super::normalize::NormalizedVector;

/// 分母の下限
const EPSILON: f32 = 1e-6;

/// 2つの正規化ベクトルのコサイン類似度を [0, 1] に写したもの
///
/// 長さが違う場合は短い方の長さまでで比較する。
/// どちらかが空、または大きさ0なら 0。
pub fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..n {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let denom = (norm_a.sqrt() * norm_b.sqrt()).max(EPSILON);
    let cos = (dot / denom).clamp(-1.0, 1.0);
    if !cos.is_finite() {
        return 0.0;
    }
    (cos + 1.0) / 2.0
}

/// 正規化ベクトル同士のスコア。どちらか無ければ 0
pub fn similarity(a: Option<&NormalizedVector>, b: Option<&NormalizedVector>) -> f32 {
    match (a, b) {
        (Some(a), Some(b)) => cosine_score(a.as_slice(), b.as_slice()),
        _ => 0.0,
    }
}

/// スコアを整数パーセント (0〜100) に変換
pub fn to_percent(score: f32) -> u8 {
    if !score.is_finite() {
        return 0;
    }
    (score * 100.0).round().clamp(0.0, 100.0) as u8
}
