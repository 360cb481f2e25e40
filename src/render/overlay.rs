use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::surface::Surface;

/// オーバーレイを合わせる基準要素（カメラ映像など）の表示サイズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorBox {
    pub width: u32,
    pub height: u32,
}

impl AnchorBox {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// 基準要素の上に重ねる描画面
#[derive(Debug)]
pub struct Overlay {
    id: String,
    z_index: i32,
    visible: bool,
    surface: Surface,
}

impl Overlay {
    fn new(id: &str, anchor: AnchorBox, z_index: i32) -> Self {
        Self {
            id: id.to_string(),
            z_index,
            visible: true,
            surface: Surface::new(anchor.width as usize, anchor.height as usize),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn z_index(&self) -> i32 {
        self.z_index
    }

    /// 基準要素のサイズに合わせる。変わったら true
    pub fn resize_to_anchor(&mut self, anchor: AnchorBox) -> bool {
        self.surface
            .resize(anchor.width as usize, anchor.height as usize)
    }

    pub fn show(&mut self) {
        self.visible = true;
    }

    pub fn hide(&mut self) {
        self.visible = false;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut Surface {
        &mut self.surface
    }
}

pub type SharedOverlay = Arc<Mutex<Overlay>>;

/// ロックを取る（poison は無視して中身を使う）
pub fn lock_overlay(overlay: &SharedOverlay) -> MutexGuard<'_, Overlay> {
    match overlay.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// ID ごとのオーバーレイ一覧と、現在の基準サイズ
#[derive(Clone, Default)]
pub struct OverlayRegistry {
    overlays: Arc<Mutex<HashMap<String, SharedOverlay>>>,
    anchor: Arc<Mutex<Option<AnchorBox>>>,
}

impl OverlayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 既存があればそれを基準サイズに合わせて返し、無ければ作る
    pub fn create_or_get(&self, id: &str, anchor: AnchorBox, z_index: i32) -> SharedOverlay {
        let mut overlays = match self.overlays.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let overlay = overlays
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Overlay::new(id, anchor, z_index))))
            .clone();
        lock_overlay(&overlay).resize_to_anchor(anchor);
        self.store_anchor(anchor);
        overlay
    }

    fn store_anchor(&self, anchor: AnchorBox) {
        match self.anchor.lock() {
            Ok(mut guard) => *guard = Some(anchor),
            Err(poisoned) => *poisoned.into_inner() = Some(anchor),
        }
    }

    /// 最後に知らされた基準サイズ
    pub fn anchor(&self) -> Option<AnchorBox> {
        match self.anchor.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn get(&self, id: &str) -> Option<SharedOverlay> {
        let overlays = match self.overlays.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        overlays.get(id).cloned()
    }

    /// 全オーバーレイを基準サイズに合わせる（ウィンドウリサイズ時）
    pub fn resize_all(&self, anchor: AnchorBox) {
        self.store_anchor(anchor);
        for overlay in self.layers() {
            lock_overlay(&overlay).resize_to_anchor(anchor);
        }
    }

    /// z順（小さい方が下）に並べた一覧
    pub fn layers(&self) -> Vec<SharedOverlay> {
        let overlays = match self.overlays.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut layers: Vec<SharedOverlay> = overlays.values().cloned().collect();
        layers.sort_by_key(|o| lock_overlay(o).z_index());
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_or_get_returns_same_overlay() {
        let registry = OverlayRegistry::new();
        let a = registry.create_or_get("guide", AnchorBox::new(64, 48), 10);
        let b = registry.create_or_get("guide", AnchorBox::new(64, 48), 99);
        assert!(Arc::ptr_eq(&a, &b));
        // z は最初の作成時のまま
        assert_eq!(lock_overlay(&b).z_index(), 10);
    }

    #[test]
    fn test_create_or_get_resyncs_size() {
        let registry = OverlayRegistry::new();
        let overlay = registry.create_or_get("skeleton", AnchorBox::new(64, 48), 0);
        registry.create_or_get("skeleton", AnchorBox::new(320, 240), 0);
        let guard = lock_overlay(&overlay);
        assert_eq!((guard.surface().width(), guard.surface().height()), (320, 240));
    }

    #[test]
    fn test_show_hide() {
        let registry = OverlayRegistry::new();
        let overlay = registry.create_or_get("guide", AnchorBox::new(8, 8), 0);
        assert!(lock_overlay(&overlay).is_visible());
        lock_overlay(&overlay).hide();
        assert!(!lock_overlay(&overlay).is_visible());
        lock_overlay(&overlay).show();
        assert!(lock_overlay(&overlay).is_visible());
    }

    #[test]
    fn test_layers_sorted_and_resize_all() {
        let registry = OverlayRegistry::new();
        registry.create_or_get("top", AnchorBox::new(8, 8), 9999);
        registry.create_or_get("bottom", AnchorBox::new(8, 8), 1);
        let ids: Vec<String> = registry
            .layers()
            .iter()
            .map(|o| lock_overlay(o).id().to_string())
            .collect();
        assert_eq!(ids, vec!["bottom", "top"]);

        registry.resize_all(AnchorBox::new(16, 4));
        assert_eq!(registry.anchor(), Some(AnchorBox::new(16, 4)));
        let top = registry.get("top").unwrap();
        assert_eq!(lock_overlay(&top).surface().width(), 16);
        assert!(registry.get("missing").is_none());
    }
}
