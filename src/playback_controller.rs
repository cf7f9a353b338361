use log::{debug, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::{
    engine::PlaybackEngine,
    protocol::{self, TrackRef},
};

/// Playback speed steps cycled by the rate button, in order.
pub const RATE_STEPS: [f32; 6] = [1.0, 1.25, 1.5, 1.75, 2.0, 0.75];

fn next_rate(current: f32) -> f32 {
    // Snap to the nearest step so a hand-edited persisted rate still cycles
    let mut nearest = 0;
    for (index, step) in RATE_STEPS.iter().enumerate() {
        if (current - step).abs() < (current - RATE_STEPS[nearest]).abs() {
            nearest = index;
        }
    }
    RATE_STEPS[(nearest + 1) % RATE_STEPS.len()]
}

// Drives the playback engine and owns the transport state
pub struct PlaybackController {
    engine: Box<dyn PlaybackEngine>,
    active_track: Option<TrackRef>,
    is_playing: bool,
    stalled: bool,
    volume: f32,
    rate: f32,
    position_s: f64,
    duration_s: f64,
    // Seek target applied on the first DurationKnown event, then cleared
    pending_restore_s: Option<f64>,
    bus_consumer: Receiver<protocol::Message>,
    bus_producer: Sender<protocol::Message>,
}

impl PlaybackController {
    pub fn new(
        engine: Box<dyn PlaybackEngine>,
        volume: f32,
        rate: f32,
        bus_consumer: Receiver<protocol::Message>,
        bus_producer: Sender<protocol::Message>,
    ) -> Self {
        Self {
            engine,
            active_track: None,
            is_playing: false,
            stalled: false,
            volume: volume.clamp(0.0, 1.0),
            rate,
            position_s: 0.0,
            duration_s: 0.0,
            pending_restore_s: None,
            bus_consumer,
            bus_producer,
        }
    }

    fn broadcast_position(&self) {
        let _ = self.bus_producer.send(protocol::Message::Playback(
            protocol::PlaybackMessage::PositionChanged {
                elapsed_s: self.position_s,
                duration_s: self.duration_s,
            },
        ));
    }

    fn activate(&mut self, activation: protocol::ActivateTrack) {
        let protocol::ActivateTrack {
            track,
            autoplay,
            restore_position_s,
        } = activation;

        self.pending_restore_s = restore_position_s;
        self.position_s = 0.0;
        self.duration_s = 0.0;
        self.is_playing = false;
        self.active_track = Some(track.clone());

        if let Err(err) = self.engine.load(&track.path) {
            warn!(
                "PlaybackController: Failed to load {:?}: {}",
                track.path, err
            );
            self.stalled = true;
            let _ = self.bus_producer.send(protocol::Message::Playback(
                protocol::PlaybackMessage::PlaybackStalled,
            ));
            let _ = self.bus_producer.send(protocol::Message::Playback(
                protocol::PlaybackMessage::PlaybackStateChanged(false),
            ));
            return;
        }

        self.stalled = false;
        self.engine.set_volume(self.volume);
        self.engine.set_rate(self.rate);
        let _ = self.bus_producer.send(protocol::Message::Metadata(
            protocol::MetadataMessage::ResolveTrack(track),
        ));
        self.broadcast_position();
        if autoplay {
            self.engine.play();
        }
    }

    pub fn handle_message(&mut self, message: protocol::Message) {
        match message {
            protocol::Message::Playback(protocol::PlaybackMessage::Activate(activation)) => {
                debug!(
                    "PlaybackController: Activating {:?} autoplay={}",
                    activation.track.path, activation.autoplay
                );
                self.activate(activation);
            }
            protocol::Message::Playback(protocol::PlaybackMessage::TogglePlayPause) => {
                if self.active_track.is_none() || self.stalled {
                    debug!("PlaybackController: Ignoring play/pause without a playable track");
                    return;
                }
                if self.is_playing {
                    self.engine.pause();
                } else {
                    self.engine.play();
                }
            }
            protocol::Message::Playback(protocol::PlaybackMessage::Stop) => {
                if self.active_track.is_none() {
                    return;
                }
                self.engine.pause();
                self.engine.seek(0.0);
                self.position_s = 0.0;
                self.broadcast_position();
            }
            protocol::Message::Playback(protocol::PlaybackMessage::Seek(position_s)) => {
                if self.active_track.is_none() || self.stalled {
                    return;
                }
                let position_s = if self.duration_s > 0.0 {
                    position_s.clamp(0.0, self.duration_s)
                } else {
                    position_s.max(0.0)
                };
                self.engine.seek(position_s);
                self.position_s = position_s;
                self.broadcast_position();
            }
            protocol::Message::Playback(protocol::PlaybackMessage::SetVolume(volume)) => {
                let volume = volume.clamp(0.0, 1.0);
                self.volume = volume;
                self.engine.set_volume(volume);
                let _ = self.bus_producer.send(protocol::Message::Playback(
                    protocol::PlaybackMessage::VolumeChanged(volume),
                ));
            }
            protocol::Message::Playback(protocol::PlaybackMessage::CycleRate) => {
                let rate = next_rate(self.rate);
                self.rate = rate;
                self.engine.set_rate(rate);
                let _ = self.bus_producer.send(protocol::Message::Playback(
                    protocol::PlaybackMessage::RateChanged(rate),
                ));
            }
            protocol::Message::Playback(protocol::PlaybackMessage::DisplayCleared) => {
                self.active_track = None;
                self.is_playing = false;
                self.stalled = false;
                self.position_s = 0.0;
                self.duration_s = 0.0;
                self.pending_restore_s = None;
            }
            protocol::Message::Engine(protocol::EngineEvent::Play) => {
                self.is_playing = true;
                let _ = self.bus_producer.send(protocol::Message::Playback(
                    protocol::PlaybackMessage::PlaybackStateChanged(true),
                ));
            }
            protocol::Message::Engine(protocol::EngineEvent::Pause) => {
                self.is_playing = false;
                let _ = self.bus_producer.send(protocol::Message::Playback(
                    protocol::PlaybackMessage::PlaybackStateChanged(false),
                ));
            }
            protocol::Message::Engine(protocol::EngineEvent::Ended) => {
                // Report the reset before the playlist advances so a snapshot
                // taken now resumes from the start of the track
                self.position_s = 0.0;
                self.broadcast_position();
            }
            protocol::Message::Engine(protocol::EngineEvent::TimeUpdate { position_s }) => {
                self.position_s = position_s;
                self.broadcast_position();
            }
            protocol::Message::Engine(protocol::EngineEvent::DurationKnown { duration_s }) => {
                self.duration_s = duration_s;
                if let Some(restore_s) = self.pending_restore_s.take() {
                    let restore_s = restore_s.clamp(0.0, duration_s);
                    debug!("PlaybackController: Restoring position {}", restore_s);
                    self.engine.seek(restore_s);
                    self.position_s = restore_s;
                }
                self.broadcast_position();
            }
            protocol::Message::Metadata(protocol::MetadataMessage::TrackResolved {
                track_id,
                record,
            }) => {
                // A resolve for a track we already moved away from is dropped
                let is_current = self
                    .active_track
                    .as_ref()
                    .is_some_and(|track| track.id == track_id);
                if is_current {
                    let _ = self.bus_producer.send(protocol::Message::Playback(
                        protocol::PlaybackMessage::NowPlayingChanged(record),
                    ));
                } else {
                    debug!(
                        "PlaybackController: Discarding stale metadata for track {}",
                        track_id
                    );
                }
            }
            _ => {}
        }
    }

    pub fn run(&mut self) {
        self.engine.set_volume(self.volume);
        self.engine.set_rate(self.rate);

        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => self.handle_message(message),
                Err(RecvError::Lagged(count)) => {
                    warn!("PlaybackController: Bus lagged, skipped {} messages", count);
                }
                Err(RecvError::Closed) => {
                    debug!("PlaybackController: Bus closed, exiting");
                    break;
                }
            }
        }
    }
}
