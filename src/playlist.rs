use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::protocol::TrackRef;

/// Extensions accepted at ingestion, matched case-insensitively.
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["mp3", "wav", "ogg", "flac", "m4b"];

/// Cursor consequence of removing a track.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    /// Index was invalid; nothing changed.
    OutOfBounds,
    /// A track was removed without disturbing the active track.
    Removed,
    /// The active track was removed and the playlist is now empty.
    BecameEmpty,
    /// The active track was removed; the cursor now points at `index` and
    /// that track should be activated.
    CursorMoved { index: usize },
}

/// Ordered track list with a single activation cursor.
///
/// The cursor is `None` iff the playlist is empty or no track has ever been
/// activated; otherwise it is a valid index.
pub struct Playlist {
    tracks: Vec<TrackRef>,
    cursor: Option<usize>,
}

fn has_allowed_extension(path: &Path) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

impl Playlist {
    pub fn new() -> Playlist {
        Playlist {
            tracks: Vec::new(),
            cursor: None,
        }
    }

    /// Rebuilds a playlist from persisted paths without re-filtering.
    /// An out-of-range cursor is discarded.
    pub fn restore(paths: Vec<PathBuf>, cursor: Option<usize>) -> Playlist {
        let tracks: Vec<TrackRef> = paths
            .into_iter()
            .map(|path| TrackRef {
                id: Uuid::new_v4().to_string(),
                path,
            })
            .collect();
        let cursor = cursor.filter(|&index| index < tracks.len());
        Playlist { tracks, cursor }
    }

    /// Appends every path with an allowed extension, preserving input order.
    /// Returns the accepted tracks and the number of rejected paths.
    pub fn add_paths(&mut self, paths: Vec<PathBuf>) -> (Vec<TrackRef>, usize) {
        let mut accepted = Vec::new();
        let mut rejected = 0;
        for path in paths {
            if has_allowed_extension(&path) {
                let track = TrackRef {
                    id: Uuid::new_v4().to_string(),
                    path,
                };
                self.tracks.push(track.clone());
                accepted.push(track);
            } else {
                rejected += 1;
            }
        }
        (accepted, rejected)
    }

    pub fn remove_track(&mut self, index: usize) -> RemoveOutcome {
        if index >= self.tracks.len() {
            return RemoveOutcome::OutOfBounds;
        }
        self.tracks.remove(index);

        let Some(cursor) = self.cursor else {
            return RemoveOutcome::Removed;
        };

        if index < cursor {
            // The active track shifted down by one.
            self.cursor = Some(cursor - 1);
            return RemoveOutcome::Removed;
        }
        if index > cursor {
            return RemoveOutcome::Removed;
        }

        if self.tracks.is_empty() {
            self.cursor = None;
            return RemoveOutcome::BecameEmpty;
        }

        // Active track removed; wrap to 0 when the cursor fell off the end.
        let next = if cursor >= self.tracks.len() { 0 } else { cursor };
        self.cursor = Some(next);
        RemoveOutcome::CursorMoved { index: next }
    }

    pub fn select_track(&mut self, index: usize) -> Option<&TrackRef> {
        if index >= self.tracks.len() {
            return None;
        }
        self.cursor = Some(index);
        Some(&self.tracks[index])
    }

    pub fn next(&mut self) -> Option<&TrackRef> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }
        let next = match self.cursor {
            Some(cursor) => (cursor + 1) % len,
            None => 0,
        };
        self.cursor = Some(next);
        Some(&self.tracks[next])
    }

    pub fn previous(&mut self) -> Option<&TrackRef> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }
        let previous = match self.cursor {
            Some(cursor) => (cursor + len - 1) % len,
            None => 0,
        };
        self.cursor = Some(previous);
        Some(&self.tracks[previous])
    }

    pub fn current(&self) -> Option<&TrackRef> {
        self.cursor.map(|index| &self.tracks[index])
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn tracks(&self) -> &[TrackRef] {
        &self.tracks
    }
}
