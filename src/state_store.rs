//! Durable player state, stored as one TOML file with independent
//! `[player]` and `[window]` tables.
//!
//! Loads never fail: a missing, unreadable, or unparsable file yields the
//! defaults. Saves rewrite only the table they own so the sibling table and
//! any hand-written comments survive.

use std::path::{Path, PathBuf};

use log::warn;
use toml_edit::{value, Array, DocumentMut, Item, Table};

fn default_volume() -> f32 {
    0.5
}

fn default_rate() -> f32 {
    1.0
}

fn default_window_width() -> u32 {
    400
}

fn default_window_height() -> u32 {
    600
}

/// Complete persisted player state. Written as the `[player]` table.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlayerSnapshot {
    #[serde(default)]
    pub playlist: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<usize>,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub playback_position: f64,
    #[serde(default = "default_rate")]
    pub playback_rate: f32,
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            playlist: Vec::new(),
            cursor: None,
            volume: default_volume(),
            playback_position: 0.0,
            playback_rate: default_rate(),
        }
    }
}

/// Persisted window placement. Written as the `[window]` table.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct WindowGeometry {
    #[serde(default = "default_window_width")]
    pub width: u32,
    #[serde(default = "default_window_height")]
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
}

impl Default for WindowGeometry {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
            x: None,
            y: None,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
struct StateFile {
    #[serde(default)]
    player: PlayerSnapshot,
    #[serde(default)]
    window: WindowGeometry,
}

fn set_table_value_preserving_decor(table: &mut Table, key: &str, item: Item) {
    let existing_value_decor = table
        .get(key)
        .and_then(|current| current.as_value().map(|value| value.decor().clone()));
    table[key] = item;
    if let Some(existing_value_decor) = existing_value_decor {
        if let Some(next_value) = table[key].as_value_mut() {
            *next_value.decor_mut() = existing_value_decor;
        }
    }
}

fn ensure_section_table(document: &mut DocumentMut, key: &str) {
    let root = document.as_table_mut();
    let should_replace = !matches!(root.get(key), Some(item) if item.is_table());
    if should_replace {
        root.insert(key, Item::Table(Table::new()));
    }
}

fn write_player_to_document(document: &mut DocumentMut, snapshot: &PlayerSnapshot) {
    ensure_section_table(document, "player");
    let player = document["player"]
        .as_table_mut()
        .expect("player should be a table");

    let mut playlist = Array::new();
    for path in &snapshot.playlist {
        playlist.push(path.to_string_lossy().as_ref());
    }
    set_table_value_preserving_decor(player, "playlist", value(playlist));
    match snapshot.cursor {
        Some(cursor) => {
            set_table_value_preserving_decor(player, "cursor", value(cursor as i64));
        }
        None => {
            player.remove("cursor");
        }
    }
    set_table_value_preserving_decor(player, "volume", value(f64::from(snapshot.volume)));
    set_table_value_preserving_decor(
        player,
        "playback_position",
        value(snapshot.playback_position),
    );
    set_table_value_preserving_decor(
        player,
        "playback_rate",
        value(f64::from(snapshot.playback_rate)),
    );
}

fn write_window_to_document(document: &mut DocumentMut, geometry: &WindowGeometry) {
    ensure_section_table(document, "window");
    let window = document["window"]
        .as_table_mut()
        .expect("window should be a table");

    set_table_value_preserving_decor(window, "width", value(i64::from(geometry.width)));
    set_table_value_preserving_decor(window, "height", value(i64::from(geometry.height)));
    match geometry.x {
        Some(x) => set_table_value_preserving_decor(window, "x", value(i64::from(x))),
        None => {
            window.remove("x");
        }
    }
    match geometry.y {
        Some(y) => set_table_value_preserving_decor(window, "y", value(i64::from(y))),
        None => {
            window.remove("y");
        }
    }
}

/// File-backed store for the player snapshot and window geometry.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn load_file(&self) -> StateFile {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                warn!(
                    "Failed to read state file {}. Using defaults. error={}",
                    self.path.display(),
                    err
                );
                return StateFile::default();
            }
        };

        match toml::from_str::<StateFile>(&content) {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    "Failed to parse state file {}. Using defaults. error={}",
                    self.path.display(),
                    err
                );
                StateFile::default()
            }
        }
    }

    pub fn load_player(&self) -> PlayerSnapshot {
        self.load_file().player
    }

    pub fn load_window(&self) -> WindowGeometry {
        self.load_file().window
    }

    fn persist_with<F>(&self, update_document: F, fallback: StateFile)
    where
        F: FnOnce(&mut DocumentMut),
    {
        let existing_text = std::fs::read_to_string(&self.path).ok();
        let state_text = if let Some(existing_text) = existing_text {
            match existing_text.parse::<DocumentMut>() {
                Ok(mut document) => {
                    update_document(&mut document);
                    Some(document.to_string())
                }
                Err(err) => {
                    warn!(
                        "Failed to preserve state file contents for {} ({}). Falling back to plain serialization.",
                        self.path.display(),
                        err
                    );
                    toml::to_string(&fallback).ok()
                }
            }
        } else {
            let mut document = DocumentMut::new();
            update_document(&mut document);
            Some(document.to_string())
        };

        let Some(state_text) = state_text else {
            log::error!("Failed to serialize state for {}", self.path.display());
            return;
        };

        if let Err(err) = std::fs::write(&self.path, state_text) {
            log::error!(
                "Failed to persist state to {}: {}",
                self.path.display(),
                err
            );
        }
    }

    pub fn save_player(&self, snapshot: &PlayerSnapshot) {
        let fallback = StateFile {
            player: snapshot.clone(),
            window: self.load_window(),
        };
        self.persist_with(
            |document| write_player_to_document(document, snapshot),
            fallback,
        );
    }

    pub fn save_window(&self, geometry: &WindowGeometry) {
        let fallback = StateFile {
            player: self.load_player(),
            window: geometry.clone(),
        };
        self.persist_with(
            |document| write_window_to_document(document, geometry),
            fallback,
        );
    }
}
