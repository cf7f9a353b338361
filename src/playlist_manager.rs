use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::{
    playlist::{Playlist, RemoveOutcome},
    protocol::{self, TrackRef},
};

// Owns the playlist and decides which track is active
pub struct PlaylistManager {
    playlist: Playlist,
    // Seek target for the first activation after a restart
    restore_position_s: Option<f64>,
    is_playing: bool,
    bus_consumer: Receiver<protocol::Message>,
    bus_producer: Sender<protocol::Message>,
}

impl PlaylistManager {
    pub fn new(
        playlist: Playlist,
        restore_position_s: Option<f64>,
        bus_consumer: Receiver<protocol::Message>,
        bus_producer: Sender<protocol::Message>,
    ) -> Self {
        Self {
            playlist,
            restore_position_s,
            is_playing: false,
            bus_consumer,
            bus_producer,
        }
    }

    fn broadcast_playlist_changed(&self) {
        let _ = self.bus_producer.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::PlaylistChanged {
                tracks: self.playlist.tracks().to_vec(),
                cursor: self.playlist.cursor(),
            },
        ));
    }

    fn activate(&mut self, track: TrackRef, autoplay: bool) {
        let restore_position_s = self.restore_position_s.take();
        let _ = self.bus_producer.send(protocol::Message::Playback(
            protocol::PlaybackMessage::Activate(protocol::ActivateTrack {
                track,
                autoplay,
                restore_position_s,
            }),
        ));
    }

    fn advance(&mut self) {
        if let Some(track) = self.playlist.next().cloned() {
            self.activate(track, true);
            self.broadcast_playlist_changed();
        }
    }

    pub fn run(&mut self) {
        // Re-activate the persisted track, paused, before handling commands
        if let Some(track) = self.playlist.current().cloned() {
            info!(
                "Restoring playback of {:?} at cursor {:?}",
                track.path,
                self.playlist.cursor()
            );
            self.activate(track, false);
        } else {
            // Nothing to resume; discard the stored position
            self.restore_position_s = None;
        }
        self.broadcast_playlist_changed();

        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => match message {
                    protocol::Message::Playlist(protocol::PlaylistMessage::AddTracks(paths)) => {
                        debug!("PlaylistManager: Adding {} paths", paths.len());
                        let was_empty = self.playlist.num_tracks() == 0;
                        let (accepted, rejected) = self.playlist.add_paths(paths);
                        if rejected > 0 {
                            debug!("PlaylistManager: Rejected {} unsupported paths", rejected);
                        }
                        let _ = self.bus_producer.send(protocol::Message::Playlist(
                            protocol::PlaylistMessage::TracksAdded {
                                accepted: accepted.clone(),
                                rejected,
                            },
                        ));
                        if accepted.is_empty() {
                            continue;
                        }
                        if was_empty {
                            // First tracks of an empty playlist start playing
                            if let Some(track) = self.playlist.select_track(0).cloned() {
                                self.activate(track, true);
                            }
                        }
                        self.broadcast_playlist_changed();
                    }
                    protocol::Message::Playlist(protocol::PlaylistMessage::RemoveTrack(index)) => {
                        debug!("PlaylistManager: Removing track at {}", index);
                        match self.playlist.remove_track(index) {
                            RemoveOutcome::OutOfBounds => {
                                debug!("PlaylistManager: Remove index {} out of bounds", index);
                            }
                            RemoveOutcome::Removed => {
                                self.broadcast_playlist_changed();
                            }
                            RemoveOutcome::BecameEmpty => {
                                let _ = self.bus_producer.send(protocol::Message::Playback(
                                    protocol::PlaybackMessage::Stop,
                                ));
                                let _ = self.bus_producer.send(protocol::Message::Playback(
                                    protocol::PlaybackMessage::DisplayCleared,
                                ));
                                self.broadcast_playlist_changed();
                            }
                            RemoveOutcome::CursorMoved { index } => {
                                // Keep the play/pause intent of the removed track
                                let autoplay = self.is_playing;
                                if let Some(track) = self.playlist.select_track(index).cloned() {
                                    self.activate(track, autoplay);
                                }
                                self.broadcast_playlist_changed();
                            }
                        }
                    }
                    protocol::Message::Playlist(protocol::PlaylistMessage::SelectTrack(index)) => {
                        debug!("PlaylistManager: Selecting track {}", index);
                        if let Some(track) = self.playlist.select_track(index).cloned() {
                            self.activate(track, true);
                            self.broadcast_playlist_changed();
                        } else {
                            debug!("PlaylistManager: Select index {} out of bounds", index);
                        }
                    }
                    protocol::Message::Playlist(protocol::PlaylistMessage::Next) => {
                        debug!("PlaylistManager: Received next command");
                        self.advance();
                    }
                    protocol::Message::Playlist(protocol::PlaylistMessage::Previous) => {
                        debug!("PlaylistManager: Received previous command");
                        if let Some(track) = self.playlist.previous().cloned() {
                            self.activate(track, true);
                            self.broadcast_playlist_changed();
                        }
                    }
                    protocol::Message::Playback(protocol::PlaybackMessage::PlaybackStateChanged(
                        is_playing,
                    )) => {
                        self.is_playing = is_playing;
                    }
                    protocol::Message::Engine(protocol::EngineEvent::Ended) => {
                        debug!("PlaylistManager: Track ended, advancing");
                        self.advance();
                    }
                    _ => {}
                },
                Err(RecvError::Lagged(count)) => {
                    warn!("PlaylistManager: Bus lagged, skipped {} messages", count);
                }
                Err(RecvError::Closed) => {
                    debug!("PlaylistManager: Bus closed, exiting");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio::sync::broadcast::{self, error::TryRecvError, Receiver, Sender};

    struct PlaylistManagerHarness {
        bus_sender: Sender<protocol::Message>,
        receiver: Receiver<protocol::Message>,
    }

    impl PlaylistManagerHarness {
        fn new() -> Self {
            Self::with_restored(Vec::new(), None, None)
        }

        fn with_restored(
            paths: Vec<PathBuf>,
            cursor: Option<usize>,
            restore_position_s: Option<f64>,
        ) -> Self {
            let (bus_sender, _) = broadcast::channel(4096);
            let manager_bus_sender = bus_sender.clone();
            let manager_receiver = bus_sender.subscribe();
            let receiver = bus_sender.subscribe();
            let mut startup_receiver = bus_sender.subscribe();

            thread::spawn(move || {
                let mut manager = PlaylistManager::new(
                    Playlist::restore(paths, cursor),
                    restore_position_s,
                    manager_receiver,
                    manager_bus_sender,
                );
                manager.run();
            });

            // Sync on the initial snapshot without consuming from the main
            // receiver, which the tests inspect from the first message on
            let _ = wait_for_message(&mut startup_receiver, Duration::from_secs(1), |message| {
                matches!(
                    message,
                    protocol::Message::Playlist(protocol::PlaylistMessage::PlaylistChanged { .. })
                )
            });

            Self {
                bus_sender,
                receiver,
            }
        }

        fn send(&self, message: protocol::Message) {
            self.bus_sender
                .send(message)
                .expect("failed to send message to bus");
        }

        fn add_tracks(&mut self, names: &[&str]) -> Vec<TrackRef> {
            let paths: Vec<PathBuf> = names.iter().map(PathBuf::from).collect();
            self.send(protocol::Message::Playlist(
                protocol::PlaylistMessage::AddTracks(paths),
            ));
            let message = wait_for_message(&mut self.receiver, Duration::from_secs(1), |message| {
                matches!(
                    message,
                    protocol::Message::Playlist(protocol::PlaylistMessage::TracksAdded { .. })
                )
            });
            if let protocol::Message::Playlist(protocol::PlaylistMessage::TracksAdded {
                accepted,
                ..
            }) = message
            {
                accepted
            } else {
                panic!("expected TracksAdded message");
            }
        }

        fn wait_for_activation(&mut self) -> protocol::ActivateTrack {
            let message = wait_for_message(&mut self.receiver, Duration::from_secs(1), |message| {
                matches!(
                    message,
                    protocol::Message::Playback(protocol::PlaybackMessage::Activate(_))
                )
            });
            if let protocol::Message::Playback(protocol::PlaybackMessage::Activate(activation)) =
                message
            {
                activation
            } else {
                panic!("expected Activate message");
            }
        }

        fn wait_for_cursor(&mut self) -> Option<usize> {
            let message = wait_for_message(&mut self.receiver, Duration::from_secs(1), |message| {
                matches!(
                    message,
                    protocol::Message::Playlist(protocol::PlaylistMessage::PlaylistChanged { .. })
                )
            });
            if let protocol::Message::Playlist(protocol::PlaylistMessage::PlaylistChanged {
                cursor,
                ..
            }) = message
            {
                cursor
            } else {
                panic!("expected PlaylistChanged message");
            }
        }

        fn drain_messages(&mut self) {
            loop {
                match self.receiver.try_recv() {
                    Ok(_) => {}
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Closed) => break,
                }
            }
        }
    }

    fn wait_for_message<F>(
        receiver: &mut Receiver<protocol::Message>,
        timeout: Duration,
        mut predicate: F,
    ) -> protocol::Message
    where
        F: FnMut(&protocol::Message) -> bool,
    {
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                panic!("timed out waiting for expected message");
            }
            match receiver.try_recv() {
                Ok(message) => {
                    if predicate(&message) {
                        return message;
                    }
                }
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("bus closed while waiting for message"),
            }
        }
    }

    fn assert_no_message<F>(
        receiver: &mut Receiver<protocol::Message>,
        timeout: Duration,
        mut predicate: F,
    ) where
        F: FnMut(&protocol::Message) -> bool,
    {
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                return;
            }
            match receiver.try_recv() {
                Ok(message) => {
                    if predicate(&message) {
                        panic!("received unexpected message: {:?}", message);
                    }
                }
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => return,
            }
        }
    }

    fn is_activation(message: &protocol::Message) -> bool {
        matches!(
            message,
            protocol::Message::Playback(protocol::PlaybackMessage::Activate(_))
        )
    }

    #[test]
    fn test_first_add_activates_track_zero_with_autoplay() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_tracks(&["/tmp/a.mp3", "/tmp/b.mp3"]);
        let activation = harness.wait_for_activation();
        assert_eq!(activation.track.path, PathBuf::from("/tmp/a.mp3"));
        assert!(activation.autoplay);
        assert_eq!(activation.restore_position_s, None);
        assert_eq!(harness.wait_for_cursor(), Some(0));
    }

    #[test]
    fn test_add_to_non_empty_playlist_does_not_activate() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_tracks(&["/tmp/a.mp3"]);
        harness.wait_for_activation();
        harness.drain_messages();

        harness.add_tracks(&["/tmp/b.mp3"]);
        assert_no_message(
            &mut harness.receiver,
            Duration::from_millis(100),
            is_activation,
        );
    }

    #[test]
    fn test_unsupported_paths_are_rejected() {
        let mut harness = PlaylistManagerHarness::new();
        let accepted = harness.add_tracks(&["/tmp/a.mp3", "/tmp/readme.txt", "/tmp/b.ogg"]);
        assert_eq!(accepted.len(), 2);
    }

    #[test]
    fn test_add_of_only_unsupported_paths_does_not_activate() {
        let mut harness = PlaylistManagerHarness::new();
        let accepted = harness.add_tracks(&["/tmp/readme.txt"]);
        assert!(accepted.is_empty());
        assert_no_message(
            &mut harness.receiver,
            Duration::from_millis(100),
            is_activation,
        );
    }

    #[test]
    fn test_select_track_activates_with_autoplay() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_tracks(&["/tmp/a.mp3", "/tmp/b.mp3"]);
        harness.wait_for_activation();
        harness.drain_messages();

        harness.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::SelectTrack(1),
        ));
        let activation = harness.wait_for_activation();
        assert_eq!(activation.track.path, PathBuf::from("/tmp/b.mp3"));
        assert!(activation.autoplay);
    }

    #[test]
    fn test_next_wraps_to_first_track() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_tracks(&["/tmp/a.mp3", "/tmp/b.mp3"]);
        harness.wait_for_activation();
        harness.drain_messages();

        harness.send(protocol::Message::Playlist(protocol::PlaylistMessage::Next));
        assert_eq!(
            harness.wait_for_activation().track.path,
            PathBuf::from("/tmp/b.mp3")
        );
        harness.send(protocol::Message::Playlist(protocol::PlaylistMessage::Next));
        assert_eq!(
            harness.wait_for_activation().track.path,
            PathBuf::from("/tmp/a.mp3")
        );
    }

    #[test]
    fn test_previous_wraps_to_last_track() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_tracks(&["/tmp/a.mp3", "/tmp/b.mp3", "/tmp/c.mp3"]);
        harness.wait_for_activation();
        harness.drain_messages();

        harness.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::Previous,
        ));
        assert_eq!(
            harness.wait_for_activation().track.path,
            PathBuf::from("/tmp/c.mp3")
        );
    }

    #[test]
    fn test_remove_before_cursor_does_not_reactivate() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_tracks(&["/tmp/a.mp3", "/tmp/b.mp3", "/tmp/c.mp3"]);
        harness.wait_for_activation();
        harness.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::SelectTrack(2),
        ));
        harness.wait_for_activation();
        harness.drain_messages();

        harness.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::RemoveTrack(0),
        ));
        assert_eq!(harness.wait_for_cursor(), Some(1));
        assert_no_message(
            &mut harness.receiver,
            Duration::from_millis(100),
            is_activation,
        );
    }

    #[test]
    fn test_remove_active_track_activates_replacement_preserving_intent() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_tracks(&["/tmp/a.mp3", "/tmp/b.mp3"]);
        harness.wait_for_activation();
        // The engine reports that playback actually started
        harness.send(protocol::Message::Playback(
            protocol::PlaybackMessage::PlaybackStateChanged(true),
        ));
        harness.drain_messages();

        harness.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::RemoveTrack(0),
        ));
        let activation = harness.wait_for_activation();
        assert_eq!(activation.track.path, PathBuf::from("/tmp/b.mp3"));
        assert!(activation.autoplay);
    }

    #[test]
    fn test_remove_active_track_while_paused_activates_paused() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_tracks(&["/tmp/a.mp3", "/tmp/b.mp3"]);
        harness.wait_for_activation();
        harness.send(protocol::Message::Playback(
            protocol::PlaybackMessage::PlaybackStateChanged(false),
        ));
        harness.drain_messages();

        harness.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::RemoveTrack(0),
        ));
        let activation = harness.wait_for_activation();
        assert!(!activation.autoplay);
    }

    #[test]
    fn test_remove_last_active_track_wraps_cursor_to_zero() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_tracks(&["/tmp/a.mp3", "/tmp/b.mp3", "/tmp/c.mp3"]);
        harness.wait_for_activation();
        harness.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::SelectTrack(2),
        ));
        harness.wait_for_activation();
        harness.drain_messages();

        harness.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::RemoveTrack(2),
        ));
        let activation = harness.wait_for_activation();
        assert_eq!(activation.track.path, PathBuf::from("/tmp/a.mp3"));
    }

    #[test]
    fn test_removing_only_track_stops_and_clears_display() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_tracks(&["/tmp/a.mp3"]);
        harness.wait_for_activation();
        harness.drain_messages();

        harness.send(protocol::Message::Playlist(
            protocol::PlaylistMessage::RemoveTrack(0),
        ));
        wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                protocol::Message::Playback(protocol::PlaybackMessage::Stop)
            )
        });
        wait_for_message(&mut harness.receiver, Duration::from_secs(1), |message| {
            matches!(
                message,
                protocol::Message::Playback(protocol::PlaybackMessage::DisplayCleared)
            )
        });
        assert_eq!(harness.wait_for_cursor(), None);
    }

    #[test]
    fn test_ended_advances_and_wraps() {
        let mut harness = PlaylistManagerHarness::new();
        harness.add_tracks(&["/tmp/a.mp3", "/tmp/b.mp3"]);
        harness.wait_for_activation();
        harness.drain_messages();

        harness.send(protocol::Message::Engine(protocol::EngineEvent::Ended));
        assert_eq!(
            harness.wait_for_activation().track.path,
            PathBuf::from("/tmp/b.mp3")
        );
        harness.send(protocol::Message::Engine(protocol::EngineEvent::Ended));
        assert_eq!(
            harness.wait_for_activation().track.path,
            PathBuf::from("/tmp/a.mp3")
        );
    }

    #[test]
    fn test_restored_playlist_activates_paused_with_position() {
        let mut harness = PlaylistManagerHarness::with_restored(
            vec![PathBuf::from("/tmp/a.mp3"), PathBuf::from("/tmp/b.mp3")],
            Some(1),
            Some(42.5),
        );
        let activation = harness.wait_for_activation();
        assert_eq!(activation.track.path, PathBuf::from("/tmp/b.mp3"));
        assert!(!activation.autoplay);
        assert_eq!(activation.restore_position_s, Some(42.5));
    }

    #[test]
    fn test_first_add_after_restore_does_not_carry_stored_position() {
        let mut harness = PlaylistManagerHarness::with_restored(Vec::new(), None, Some(42.5));
        harness.add_tracks(&["/tmp/a.mp3"]);
        let activation = harness.wait_for_activation();
        assert_eq!(activation.restore_position_s, None);
    }
}
