//! Host side of the live voice assistant: configuration, audio devices and
//! workspace persistence. The binary in `main.rs` wires these together.

pub mod capture;
pub mod config;
pub mod playback;
pub mod workspace;
