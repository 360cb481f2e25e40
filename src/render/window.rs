use anyhow::Result;
use image::RgbImage;
use minifb::{Key, Window, WindowOptions};

use super::overlay::{lock_overlay, AnchorBox, OverlayRegistry};

/// minifb でカメラ映像とオーバーレイを表示する
pub struct MinifbPresenter {
    window: Window,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl MinifbPresenter {
    /// ウィンドウを作成
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
        let window = Window::new(
            title,
            width,
            height,
            WindowOptions {
                resize: true,
                ..WindowOptions::default()
            },
        )?;

        Ok(Self {
            window,
            buffer: vec![0u32; width * height],
            width,
            height,
        })
    }

    /// ウィンドウが開いているか
    pub fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }

    /// 映像サイズ。オーバーレイの基準になる
    pub fn anchor(&self) -> AnchorBox {
        AnchorBox::new(self.width as u32, self.height as u32)
    }

    /// RGB フレームをバッファにコピー
    ///
    /// フレームサイズが変わったらバッファを作り直して true を返す。
    pub fn draw_frame(&mut self, frame: &RgbImage) -> bool {
        let (w, h) = (frame.width() as usize, frame.height() as usize);
        let resized = w != self.width || h != self.height;
        if resized {
            self.width = w;
            self.height = h;
            self.buffer = vec![0u32; w * h];
        }

        for (x, y, pixel) in frame.enumerate_pixels() {
            let r = pixel[0] as u32;
            let g = pixel[1] as u32;
            let b = pixel[2] as u32;
            self.buffer[y as usize * self.width + x as usize] = (r << 16) | (g << 8) | b;
        }

        resized
    }

    /// 表示中のオーバーレイを z 順に合成
    pub fn draw_overlays(&mut self, registry: &OverlayRegistry) {
        for overlay in registry.layers() {
            let overlay = lock_overlay(&overlay);
            if overlay.is_visible() {
                overlay
                    .surface()
                    .composite_onto_buffer(&mut self.buffer, self.width, self.height);
            }
        }
    }

    pub fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }

    /// バッファをウィンドウに表示
    pub fn update(&mut self) -> Result<()> {
        self.window
            .update_with_buffer(&self.buffer, self.width, self.height)?;
        Ok(())
    }
}
