pub mod guide;
pub mod overlay;
pub mod render_loop;
pub mod skeleton;
pub mod surface;
#[cfg(feature = "desktop")]
pub mod window;

pub use guide::{GuideLayout, GuideOverlay};
pub use overlay::{lock_overlay, AnchorBox, Overlay, OverlayRegistry, SharedOverlay};
pub use render_loop::{FrameReport, RenderLoop};
pub use skeleton::{SkeletonStyle, GUIDE_CONNECTIONS, SKELETON_CONNECTIONS};
pub use surface::{Color, Surface};
#[cfg(feature = "desktop")]
pub use window::MinifbPresenter;
