//! Test fixtures for slotpool integration tests.

#[allow(dead_code)]
pub mod recording_sink;
#[allow(dead_code)]
pub mod scripted_driver;

pub use recording_sink::RecordingSink;
pub use scripted_driver::{Script, ScriptedDriver};
