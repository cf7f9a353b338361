//! Playback engine contract.
//!
//! Decoding and audio rendering live behind this trait. The controller only
//! issues commands; the engine reports back asynchronously with
//! `EngineEvent`s on the bus (`Message::Engine`).

use std::path::Path;

/// Command surface of the audio backend.
pub trait PlaybackEngine: Send {
    /// Loads a new source, replacing any previous one. The engine stays
    /// paused at position zero until `play` is called.
    fn load(&mut self, path: &Path) -> Result<(), String>;
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, position_s: f64);
    fn set_volume(&mut self, volume: f32);
    fn set_rate(&mut self, rate: f32);
}

/// Engine that accepts every command and produces no sound. Used until a
/// real backend is wired in.
pub struct NullEngine;

impl PlaybackEngine for NullEngine {
    fn load(&mut self, _path: &Path) -> Result<(), String> {
        Ok(())
    }

    fn play(&mut self) {}
    fn pause(&mut self) {}
    fn seek(&mut self, _position_s: f64) {}
    fn set_volume(&mut self, _volume: f32) {}
    fn set_rate(&mut self, _rate: f32) {}
}
