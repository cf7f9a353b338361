use log::{debug, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use crate::{
    protocol,
    state_store::{PlayerSnapshot, StateStore, WindowGeometry},
};

// Keeps the authoritative persisted snapshot current and flushes it
pub struct StateManager {
    store: StateStore,
    snapshot: PlayerSnapshot,
    bus_consumer: Receiver<protocol::Message>,
}

impl StateManager {
    pub fn new(
        store: StateStore,
        snapshot: PlayerSnapshot,
        bus_consumer: Receiver<protocol::Message>,
    ) -> Self {
        Self {
            store,
            snapshot,
            bus_consumer,
        }
    }

    fn flush(&self) {
        self.store.save_player(&self.snapshot);
    }

    /// Handles one bus message. Returns false once the final flush ran and
    /// the loop should exit.
    pub fn handle_message(&mut self, message: protocol::Message) -> bool {
        match message {
            protocol::Message::Playlist(protocol::PlaylistMessage::PlaylistChanged {
                tracks,
                cursor,
            }) => {
                self.snapshot.playlist = tracks.into_iter().map(|track| track.path).collect();
                if self.snapshot.cursor != cursor {
                    // A different track is active now; its position starts over
                    self.snapshot.playback_position = 0.0;
                }
                self.snapshot.cursor = cursor;
                self.flush();
            }
            protocol::Message::Playback(protocol::PlaybackMessage::PositionChanged {
                elapsed_s,
                duration_s,
            }) => {
                // A track that finished resumes from the start next run
                self.snapshot.playback_position = if duration_s > 0.0 && elapsed_s >= duration_s {
                    0.0
                } else {
                    elapsed_s
                };
            }
            protocol::Message::Playback(protocol::PlaybackMessage::VolumeChanged(volume)) => {
                self.snapshot.volume = volume;
                self.flush();
            }
            protocol::Message::Playback(protocol::PlaybackMessage::RateChanged(rate)) => {
                self.snapshot.playback_rate = rate;
                self.flush();
            }
            protocol::Message::State(protocol::StateMessage::FlushTick) => {
                self.flush();
            }
            protocol::Message::State(protocol::StateMessage::WindowGeometryChanged {
                width,
                height,
                x,
                y,
            }) => {
                self.store.save_window(&WindowGeometry {
                    width,
                    height,
                    x,
                    y,
                });
            }
            protocol::Message::State(protocol::StateMessage::Shutdown) => {
                debug!("StateManager: Shutdown requested, flushing");
                self.flush();
                return false;
            }
            _ => {}
        }
        true
    }

    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => {
                    if !self.handle_message(message) {
                        break;
                    }
                }
                Err(RecvError::Lagged(count)) => {
                    warn!("StateManager: Bus lagged, skipped {} messages", count);
                }
                Err(RecvError::Closed) => {
                    debug!("StateManager: Bus closed, exiting");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TrackRef;
    use std::path::PathBuf;
    use tokio::sync::broadcast;

    struct StateManagerFixture {
        manager: StateManager,
        path: PathBuf,
    }

    impl Drop for StateManagerFixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    impl StateManagerFixture {
        fn new() -> Self {
            let nonce = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock before epoch")
                .as_nanos();
            let path = std::env::temp_dir().join(format!("tunedeck_statemgr_{}.toml", nonce));
            let (bus_sender, _) = broadcast::channel(64);
            let manager = StateManager::new(
                StateStore::new(&path),
                PlayerSnapshot::default(),
                bus_sender.subscribe(),
            );
            Self { manager, path }
        }

        fn stored_player(&self) -> PlayerSnapshot {
            StateStore::new(&self.path).load_player()
        }
    }

    fn playlist_changed(paths: &[&str], cursor: Option<usize>) -> protocol::Message {
        protocol::Message::Playlist(protocol::PlaylistMessage::PlaylistChanged {
            tracks: paths
                .iter()
                .map(|path| TrackRef {
                    id: path.to_string(),
                    path: PathBuf::from(path),
                })
                .collect(),
            cursor,
        })
    }

    #[test]
    fn test_playlist_change_flushes_immediately() {
        let mut fixture = StateManagerFixture::new();
        fixture
            .manager
            .handle_message(playlist_changed(&["/a.mp3", "/b.mp3"], Some(1)));
        let stored = fixture.stored_player();
        assert_eq!(stored.playlist.len(), 2);
        assert_eq!(stored.cursor, Some(1));
    }

    #[test]
    fn test_volume_change_flushes_immediately() {
        let mut fixture = StateManagerFixture::new();
        fixture.manager.handle_message(protocol::Message::Playback(
            protocol::PlaybackMessage::VolumeChanged(0.25),
        ));
        assert_eq!(fixture.stored_player().volume, 0.25);
    }

    #[test]
    fn test_rate_change_flushes_immediately() {
        let mut fixture = StateManagerFixture::new();
        fixture.manager.handle_message(protocol::Message::Playback(
            protocol::PlaybackMessage::RateChanged(1.75),
        ));
        assert_eq!(fixture.stored_player().playback_rate, 1.75);
    }

    #[test]
    fn test_position_updates_flush_on_tick_only() {
        let mut fixture = StateManagerFixture::new();
        fixture.manager.handle_message(playlist_changed(&["/a.mp3"], Some(0)));
        fixture.manager.handle_message(protocol::Message::Playback(
            protocol::PlaybackMessage::PositionChanged {
                elapsed_s: 12.5,
                duration_s: 60.0,
            },
        ));
        assert_eq!(fixture.stored_player().playback_position, 0.0);

        fixture
            .manager
            .handle_message(protocol::Message::State(protocol::StateMessage::FlushTick));
        assert_eq!(fixture.stored_player().playback_position, 12.5);
    }

    #[test]
    fn test_finished_track_position_is_recorded_as_zero() {
        let mut fixture = StateManagerFixture::new();
        fixture.manager.handle_message(protocol::Message::Playback(
            protocol::PlaybackMessage::PositionChanged {
                elapsed_s: 60.0,
                duration_s: 60.0,
            },
        ));
        fixture
            .manager
            .handle_message(protocol::Message::State(protocol::StateMessage::FlushTick));
        assert_eq!(fixture.stored_player().playback_position, 0.0);
    }

    #[test]
    fn test_cursor_change_resets_position() {
        let mut fixture = StateManagerFixture::new();
        fixture
            .manager
            .handle_message(playlist_changed(&["/a.mp3", "/b.mp3"], Some(0)));
        fixture.manager.handle_message(protocol::Message::Playback(
            protocol::PlaybackMessage::PositionChanged {
                elapsed_s: 30.0,
                duration_s: 60.0,
            },
        ));
        fixture
            .manager
            .handle_message(playlist_changed(&["/a.mp3", "/b.mp3"], Some(1)));
        assert_eq!(fixture.stored_player().playback_position, 0.0);
    }

    #[test]
    fn test_shutdown_flushes_and_stops_the_loop() {
        let mut fixture = StateManagerFixture::new();
        fixture.manager.handle_message(protocol::Message::Playback(
            protocol::PlaybackMessage::PositionChanged {
                elapsed_s: 45.0,
                duration_s: 60.0,
            },
        ));
        let keep_running = fixture
            .manager
            .handle_message(protocol::Message::State(protocol::StateMessage::Shutdown));
        assert!(!keep_running);
        assert_eq!(fixture.stored_player().playback_position, 45.0);
    }

    #[test]
    fn test_window_geometry_is_saved_on_change() {
        let mut fixture = StateManagerFixture::new();
        fixture.manager.handle_message(protocol::Message::State(
            protocol::StateMessage::WindowGeometryChanged {
                width: 640,
                height: 480,
                x: Some(5),
                y: None,
            },
        ));
        let window = StateStore::new(&fixture.path).load_window();
        assert_eq!(window.width, 640);
        assert_eq!(window.height, 480);
        assert_eq!(window.x, Some(5));
    }
}
