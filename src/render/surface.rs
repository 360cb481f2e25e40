use image::RgbImage;

/// ARGB 色 (0xAARRGGBB)。アルファ0は透明
pub type Color = u32;

pub const TRANSPARENT: Color = 0x0000_0000;

/// ソフトウェア描画面（オーバーレイ1枚分）
#[derive(Debug, Clone)]
pub struct Surface {
    width: usize,
    height: usize,
    pixels: Vec<Color>,
}

impl Surface {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![TRANSPARENT; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// サイズ変更。変わった場合のみ作り直す（内容は消える）
    pub fn resize(&mut self, width: usize, height: usize) -> bool {
        if width == self.width && height == self.height {
            return false;
        }
        self.width = width;
        self.height = height;
        self.pixels = vec![TRANSPARENT; width * height];
        true
    }

    /// 全面を透明に
    pub fn clear(&mut self) {
        self.pixels.fill(TRANSPARENT);
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<Color> {
        if x < self.width && y < self.height {
            Some(self.pixels[y * self.width + x])
        } else {
            None
        }
    }

    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    /// 不透明ピクセル数（テスト・デバッグ用）
    pub fn painted_pixels(&self) -> usize {
        self.pixels.iter().filter(|p| **p >> 24 != 0).count()
    }

    /// ピクセルをセット（境界チェック付き）
    pub fn set_pixel(&mut self, x: i32, y: i32, color: Color) {
        if x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32 {
            self.pixels[y as usize * self.width + x as usize] = color;
        }
    }

    /// 太さ付きの点
    fn stamp(&mut self, x: i32, y: i32, width: u32, color: Color) {
        let half = (width.max(1) as i32 - 1) / 2;
        let extra = (width.max(1) as i32 - 1) - half;
        for dy in -half..=extra {
            for dx in -half..=extra {
                self.set_pixel(x + dx, y + dy, color);
            }
        }
    }

    /// Bresenham で実線を描画
    pub fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, width: u32, color: Color) {
        self.draw_pattern_line(x0, y0, x1, y1, width, color, None);
    }

    /// 破線 (dash px 描いて gap px 空ける)
    pub fn draw_dashed_line(
        &mut self,
        (x0, y0): (i32, i32),
        (x1, y1): (i32, i32),
        width: u32,
        color: Color,
        dash: u32,
        gap: u32,
    ) {
        self.draw_pattern_line(x0, y0, x1, y1, width, color, Some((dash.max(1), gap)));
    }

    /// 線分を描く範囲（線幅ぶん外側まで）
    fn clip_bounds(&self, width: u32) -> ((f64, f64), (f64, f64)) {
        let margin = width.max(1) as f64;
        (
            (-margin, -margin),
            (self.width as f64 - 1.0 + margin, self.height as f64 - 1.0 + margin),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_pattern_line(
        &mut self,
        x0: i32,
        y0: i32,
        x1: i32,
        y1: i32,
        width: u32,
        color: Color,
        pattern: Option<(u32, u32)>,
    ) {
        // 画面外の部分は歩かない
        let (min, max) = self.clip_bounds(width);
        let (fx0, fy0) = (x0 as f64, y0 as f64);
        let (fdx, fdy) = (x1 as f64 - fx0, y1 as f64 - fy0);
        let Some((t0, t1)) = clip_segment((fx0, fy0), (fdx, fdy), min, max) else {
            return;
        };
        let x0 = (fx0 + t0 * fdx).round() as i32;
        let y0 = (fy0 + t0 * fdy).round() as i32;
        let x1 = (fx0 + t1 * fdx).round() as i32;
        let y1 = (fy0 + t1 * fdy).round() as i32;
        // 破線の位相は元の始点から数える
        let skipped = (t0 * fdx.abs().max(fdy.abs())).round() as u64;

        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        let mut x = x0;
        let mut y = y0;
        let mut step: u64 = skipped;

        loop {
            let on = match pattern {
                Some((dash, gap)) => step % ((dash + gap) as u64) < dash as u64,
                None => true,
            };
            if on {
                self.stamp(x, y, width, color);
            }

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
            step += 1;
        }
    }

    /// 円を描画（塗りつぶし）
    pub fn fill_circle(&mut self, cx: i32, cy: i32, radius: i32, color: Color) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.set_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// 輪（半径 radius、太さ width）。dash を指定すると円周に沿った破線
    pub fn stroke_circle(
        &mut self,
        cx: i32,
        cy: i32,
        radius: i32,
        width: u32,
        color: Color,
        dash: Option<(u32, u32)>,
    ) {
        let radius = radius.max(0) as f32;
        // 円周 1px ごとに打つ
        let steps = ((std::f32::consts::TAU * radius).ceil() as u32).max(1);
        for step in 0..steps {
            if let Some((dash, gap)) = dash {
                if step % (dash.max(1) + gap) >= dash.max(1) {
                    continue;
                }
            }
            let angle = step as f32 / steps as f32 * std::f32::consts::TAU;
            let x = cx as f32 + radius * angle.cos();
            let y = cy as f32 + radius * angle.sin();
            self.stamp(x.round() as i32, y.round() as i32, width, color);
        }
    }

    /// RGB画像の上にアルファ合成する（サイズが違う場合は重なる範囲のみ）
    pub fn composite_onto(&self, image: &mut RgbImage) {
        let w = self.width.min(image.width() as usize);
        let h = self.height.min(image.height() as usize);
        for y in 0..h {
            for x in 0..w {
                let color = self.pixels[y * self.width + x];
                let alpha = color >> 24;
                if alpha == 0 {
                    continue;
                }
                let px = image.get_pixel_mut(x as u32, y as u32);
                let src = [(color >> 16) & 0xFF, (color >> 8) & 0xFF, color & 0xFF];
                for c in 0..3 {
                    let dst = px[c] as u32;
                    px[c] = ((src[c] * alpha + dst * (255 - alpha)) / 255) as u8;
                }
            }
        }
    }

    /// 0RGB バッファ（ウィンドウ表示用）の上にアルファ合成する
    pub fn composite_onto_buffer(&self, buffer: &mut [u32], width: usize, height: usize) {
        let w = self.width.min(width);
        let h = self.height.min(height);
        for y in 0..h {
            for x in 0..w {
                let color = self.pixels[y * self.width + x];
                let alpha = color >> 24;
                if alpha == 0 {
                    continue;
                }
                let dst = buffer[y * width + x];
                let mut out = 0u32;
                for shift in [16u32, 8, 0] {
                    let s = (color >> shift) & 0xFF;
                    let d = (dst >> shift) & 0xFF;
                    out |= ((s * alpha + d * (255 - alpha)) / 255) << shift;
                }
                buffer[y * width + x] = out;
            }
        }
    }
}

/// Liang–Barsky。`start + t * delta` のうち矩形内に入る t の範囲
fn clip_segment(
    start: (f64, f64),
    delta: (f64, f64),
    min: (f64, f64),
    max: (f64, f64),
) -> Option<(f64, f64)> {
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    let edges = [
        (-delta.0, start.0 - min.0),
        (delta.0, max.0 - start.0),
        (-delta.1, start.1 - min.1),
        (delta.1, max.1 - start.1),
    ];
    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    Some((t0, t1))
}
