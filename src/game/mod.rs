pub mod accuracy;
pub mod countdown;
pub mod runner;
pub mod session;
pub mod target;
pub mod ui;

pub use accuracy::{AccuracyState, SharedAccuracy};
pub use countdown::{seconds_left, Countdown};
pub use runner::{Game, GameDeps, GameDevices, GameOutcome, GameState};
pub use session::{RoundRecord, Session, SessionParams};
pub use target::{pool_size, target_path, TargetLibrary, TargetPicker};
pub use ui::{GameUi, LogUi, RoundBanner, UiSnapshot};
