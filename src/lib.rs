#[macro_use]
pub mod logging;

pub mod api;
pub mod camera;
pub mod config;
pub mod game;
pub mod pose;
pub mod protocol;
pub mod pump;
pub mod recorder;
pub mod render;
pub mod result;
