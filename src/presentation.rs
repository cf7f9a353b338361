//! Toolkit-agnostic display model and user-gesture forwarding.
//!
//! A UI binds by rendering `DisplayState` snapshots and calling `Controls`
//! methods from its event handlers. The model is kept current by a
//! `PresentationManager` loop on the bus.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::protocol::{self, Artwork};

pub const NO_TRACK_TITLE: &str = "No track loaded";
pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// One rendered playlist row.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRow {
    /// File name shown in the list.
    pub label: String,
    /// Whether this row holds the activation cursor.
    pub active: bool,
}

/// Everything a UI needs to render the player.
#[derive(Debug, Clone)]
pub struct DisplayState {
    pub rows: Vec<TrackRow>,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub artwork: Option<Artwork>,
    pub elapsed_s: f64,
    pub duration_s: f64,
    pub volume: f32,
    pub rate: f32,
    pub is_playing: bool,
    pub stalled: bool,
}

impl DisplayState {
    pub fn new(volume: f32, rate: f32) -> Self {
        Self {
            rows: Vec::new(),
            title: NO_TRACK_TITLE.to_string(),
            artist: String::new(),
            album: None,
            artwork: None,
            elapsed_s: 0.0,
            duration_s: 0.0,
            volume,
            rate,
            is_playing: false,
            stalled: false,
        }
    }

    fn reset_now_playing(&mut self) {
        self.title = NO_TRACK_TITLE.to_string();
        self.artist = String::new();
        self.album = None;
        self.artwork = None;
        self.elapsed_s = 0.0;
        self.duration_s = 0.0;
        self.is_playing = false;
        self.stalled = false;
    }
}

/// Formats a position in seconds as `m:ss`.
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let total = seconds as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

fn row_label(path: &PathBuf) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

// Applies bus notifications to the shared display state
pub struct PresentationManager {
    display: Arc<Mutex<DisplayState>>,
    bus_consumer: Receiver<protocol::Message>,
}

impl PresentationManager {
    pub fn new(display: Arc<Mutex<DisplayState>>, bus_consumer: Receiver<protocol::Message>) -> Self {
        Self {
            display,
            bus_consumer,
        }
    }

    pub fn handle_message(&mut self, message: protocol::Message) {
        let mut display = match self.display.lock() {
            Ok(display) => display,
            Err(err) => {
                warn!("PresentationManager: Display lock poisoned: {}", err);
                return;
            }
        };

        match message {
            protocol::Message::Playlist(protocol::PlaylistMessage::PlaylistChanged {
                tracks,
                cursor,
            }) => {
                display.rows = tracks
                    .iter()
                    .enumerate()
                    .map(|(index, track)| TrackRow {
                        label: row_label(&track.path),
                        active: cursor == Some(index),
                    })
                    .collect();
            }
            protocol::Message::Playback(protocol::PlaybackMessage::Activate(activation)) => {
                // Placeholders until the resolver answers
                display.title = UNKNOWN_TITLE.to_string();
                display.artist = UNKNOWN_ARTIST.to_string();
                display.album = None;
                display.artwork = None;
                display.elapsed_s = activation.restore_position_s.unwrap_or(0.0);
                display.duration_s = 0.0;
                display.stalled = false;
            }
            protocol::Message::Playback(protocol::PlaybackMessage::NowPlayingChanged(record)) => {
                display.title = record.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string());
                display.artist = record.artist.unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
                display.album = record.album;
                display.artwork = record.artwork;
            }
            protocol::Message::Playback(protocol::PlaybackMessage::PositionChanged {
                elapsed_s,
                duration_s,
            }) => {
                display.elapsed_s = elapsed_s;
                display.duration_s = duration_s;
            }
            protocol::Message::Playback(protocol::PlaybackMessage::PlaybackStateChanged(
                is_playing,
            )) => {
                display.is_playing = is_playing;
            }
            protocol::Message::Playback(protocol::PlaybackMessage::PlaybackStalled) => {
                display.stalled = true;
            }
            protocol::Message::Playback(protocol::PlaybackMessage::VolumeChanged(volume)) => {
                display.volume = volume;
            }
            protocol::Message::Playback(protocol::PlaybackMessage::RateChanged(rate)) => {
                display.rate = rate;
            }
            protocol::Message::Playback(protocol::PlaybackMessage::DisplayCleared) => {
                display.reset_now_playing();
            }
            _ => {}
        }
    }

    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => self.handle_message(message),
                Err(RecvError::Lagged(count)) => {
                    warn!("PresentationManager: Bus lagged, skipped {} messages", count);
                }
                Err(RecvError::Closed) => {
                    debug!("PresentationManager: Bus closed, exiting");
                    break;
                }
            }
        }
    }
}

/// Gesture entry points for a UI layer. Each call publishes a bus message;
/// file acquisition (dialogs, drag and drop) happens outside and hands in
/// plain path lists.
#[derive(Clone)]
pub struct Controls {
    bus_producer: Sender<protocol::Message>,
}

impl Controls {
    pub fn new(bus_producer: Sender<protocol::Message>) -> Self {
        Self { bus_producer }
    }

    pub fn add_tracks(&self, paths: Vec<PathBuf>) {
        debug!("Controls: Adding {} paths", paths.len());
        let _ = self.bus_producer.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::AddTracks(paths),
        ));
    }

    pub fn remove_track(&self, index: usize) {
        let _ = self.bus_producer.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::RemoveTrack(index),
        ));
    }

    pub fn select_track(&self, index: usize) {
        let _ = self.bus_producer.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::SelectTrack(index),
        ));
    }

    pub fn play_pause(&self) {
        let _ = self.bus_producer.send(protocol::Message::Playback(
            protocol::PlaybackMessage::TogglePlayPause,
        ));
    }

    pub fn stop(&self) {
        let _ = self
            .bus_producer
            .send(protocol::Message::Playback(protocol::PlaybackMessage::Stop));
    }

    pub fn next(&self) {
        let _ = self
            .bus_producer
            .send(protocol::Message::Playlist(protocol::PlaylistMessage::Next));
    }

    pub fn previous(&self) {
        let _ = self.bus_producer.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::Previous,
        ));
    }

    pub fn seek(&self, position_s: f64) {
        let _ = self.bus_producer.send(protocol::Message::Playback(
            protocol::PlaybackMessage::Seek(position_s),
        ));
    }

    pub fn set_volume(&self, volume: f32) {
        let _ = self.bus_producer.send(protocol::Message::Playback(
            protocol::PlaybackMessage::SetVolume(volume),
        ));
    }

    pub fn cycle_rate(&self) {
        let _ = self.bus_producer.send(protocol::Message::Playback(
            protocol::PlaybackMessage::CycleRate,
        ));
    }

    pub fn window_moved_or_resized(&self, width: u32, height: u32, x: Option<i32>, y: Option<i32>) {
        let _ = self.bus_producer.send(protocol::Message::State(
            protocol::StateMessage::WindowGeometryChanged {
                width,
                height,
                x,
                y,
            },
        ));
    }
}
