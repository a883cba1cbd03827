//! CLI command implementations.

pub mod common;
pub mod devices;
pub mod dump;
pub mod play;
pub mod render;
pub mod run;
