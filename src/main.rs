mod engine;
mod metadata_manager;
mod playback_controller;
mod playlist;
mod playlist_manager;
mod presentation;
mod protocol;
mod state_manager;
mod state_store;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use engine::NullEngine;
use log::{debug, info};
use metadata_manager::MetadataManager;
use playback_controller::PlaybackController;
use playlist::Playlist;
use playlist_manager::PlaylistManager;
use presentation::{Controls, DisplayState, PresentationManager};
use state_manager::StateManager;
use state_store::StateStore;
use tokio::sync::broadcast;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Debug);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_dir = dirs::config_dir().ok_or("could not determine config directory")?;
    let state_dir = config_dir.join("tunedeck");
    std::fs::create_dir_all(&state_dir)?;
    let state_file = state_dir.join("state.toml");

    let store = StateStore::new(&state_file);
    let snapshot = store.load_player();
    info!(
        "Loaded state: {} tracks, cursor {:?}. path={}",
        snapshot.playlist.len(),
        snapshot.cursor,
        state_file.display()
    );

    // Bus for communication between components
    let (bus_sender, _) = broadcast::channel(1024);

    let playlist = Playlist::restore(snapshot.playlist.clone(), snapshot.cursor);
    let restore_position_s =
        (snapshot.playback_position > 0.0).then_some(snapshot.playback_position);

    let controller_receiver = bus_sender.subscribe();
    let controller_sender = bus_sender.clone();
    let volume = snapshot.volume;
    let rate = snapshot.playback_rate;
    thread::Builder::new()
        .name("playback_controller".to_string())
        .spawn(move || {
            let mut controller = PlaybackController::new(
                Box::new(NullEngine),
                volume,
                rate,
                controller_receiver,
                controller_sender,
            );
            controller.run();
        })?;

    let metadata_receiver = bus_sender.subscribe();
    let metadata_sender = bus_sender.clone();
    thread::Builder::new()
        .name("metadata_manager".to_string())
        .spawn(move || {
            let mut manager = MetadataManager::new(metadata_receiver, metadata_sender);
            manager.run();
        })?;

    let display = Arc::new(Mutex::new(DisplayState::new(
        snapshot.volume,
        snapshot.playback_rate,
    )));
    let presentation_display = display.clone();
    let presentation_receiver = bus_sender.subscribe();
    thread::Builder::new()
        .name("presentation_manager".to_string())
        .spawn(move || {
            let mut manager = PresentationManager::new(presentation_display, presentation_receiver);
            manager.run();
        })?;

    let state_receiver = bus_sender.subscribe();
    let state_manager_handle = thread::Builder::new()
        .name("state_manager".to_string())
        .spawn(move || {
            let mut manager = StateManager::new(store, snapshot, state_receiver);
            manager.run();
        })?;

    // Spawned after the other loops hold their subscriptions so none of
    // them miss the startup activation and snapshot
    let playlist_receiver = bus_sender.subscribe();
    let playlist_sender = bus_sender.clone();
    thread::Builder::new()
        .name("playlist_manager".to_string())
        .spawn(move || {
            let mut manager = PlaylistManager::new(
                playlist,
                restore_position_s,
                playlist_receiver,
                playlist_sender,
            );
            manager.run();
        })?;

    let ticker_sender = bus_sender.clone();
    thread::Builder::new()
        .name("state_flush_ticker".to_string())
        .spawn(move || loop {
            thread::sleep(FLUSH_INTERVAL);
            if ticker_sender
                .send(protocol::Message::State(protocol::StateMessage::FlushTick))
                .is_err()
            {
                break;
            }
        })?;

    let controls = Controls::new(bus_sender.clone());
    let startup_paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if !startup_paths.is_empty() {
        debug!("Queueing {} paths from the command line", startup_paths.len());
        controls.add_tracks(startup_paths);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(tokio::signal::ctrl_c())?;

    info!("Shutting down, flushing state");
    let _ = bus_sender.send(protocol::Message::State(protocol::StateMessage::Shutdown));
    if state_manager_handle.join().is_err() {
        log::error!("State manager thread panicked during shutdown");
    }

    Ok(())
}
