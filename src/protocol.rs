//! Event-bus protocol shared by all runtime components.
//!
//! This module defines all message payloads exchanged between playlist logic,
//! the playback controller, metadata resolution, persistence, and the
//! presentation layer.

use std::path::PathBuf;

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Playlist(PlaylistMessage),
    Playback(PlaybackMessage),
    Engine(EngineEvent),
    Metadata(MetadataMessage),
    State(StateMessage),
}

/// One entry in the playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRef {
    /// Stable track id.
    pub id: String,
    /// File path on disk.
    pub path: PathBuf,
}

/// Activation request for a track at the cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivateTrack {
    pub track: TrackRef,
    /// Start playing once the source is loaded.
    pub autoplay: bool,
    /// Position to seek to once the duration is known. Applied at most once.
    pub restore_position_s: Option<f64>,
}

/// Playlist-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum PlaylistMessage {
    AddTracks(Vec<PathBuf>),
    RemoveTrack(usize),
    SelectTrack(usize),
    Next,
    Previous,
    TracksAdded {
        accepted: Vec<TrackRef>,
        rejected: usize,
    },
    /// Full playlist snapshot after any mutation or cursor move.
    PlaylistChanged {
        tracks: Vec<TrackRef>,
        cursor: Option<usize>,
    },
}

/// Playback-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum PlaybackMessage {
    Activate(ActivateTrack),
    TogglePlayPause,
    Stop,
    Seek(f64),
    SetVolume(f32),
    CycleRate,
    /// True while the engine is playing the active track.
    PlaybackStateChanged(bool),
    /// The active source could not be loaded. Playback stays paused.
    PlaybackStalled,
    PositionChanged {
        elapsed_s: f64,
        duration_s: f64,
    },
    VolumeChanged(f32),
    RateChanged(f32),
    /// Fresh metadata for the active track, already checked for staleness.
    NowPlayingChanged(MetadataRecord),
    /// Nothing is active anymore; the now-playing panel should reset.
    DisplayCleared,
}

/// Events reported by the playback engine for the loaded source.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Play,
    Pause,
    Ended,
    TimeUpdate { position_s: f64 },
    DurationKnown { duration_s: f64 },
}

/// Tag metadata resolved for one track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork: Option<Artwork>,
}

/// Embedded cover art attached to a metadata record.
#[derive(Debug, Clone, PartialEq)]
pub struct Artwork {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Metadata-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum MetadataMessage {
    ResolveTrack(TrackRef),
    TrackResolved {
        track_id: String,
        record: MetadataRecord,
    },
}

/// Persistence-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum StateMessage {
    /// Periodic flush trigger from the ticker thread.
    FlushTick,
    WindowGeometryChanged {
        width: u32,
        height: u32,
        x: Option<i32>,
        y: Option<i32>,
    },
    /// Final flush request. The state manager exits its loop after handling it.
    Shutdown,
}
