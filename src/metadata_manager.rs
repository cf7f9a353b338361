//! Tag metadata resolution backed by `lofty`.
//!
//! Resolution never fails the requester. Any file that cannot be opened or
//! parsed yields an empty record, which the display layer renders with
//! placeholder values.

use std::path::Path;

use log::{debug, warn};
use lofty::file::TaggedFileExt;
use lofty::prelude::Accessor;
use lofty::read_from_path;
use lofty::tag::Tag;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{Receiver, Sender};

use crate::protocol::{self, Artwork, MetadataRecord};

fn first_non_empty_value<F>(
    primary_tag: Option<&Tag>,
    tags: &[Tag],
    mut extractor: F,
) -> Option<String>
where
    F: FnMut(&Tag) -> Option<String>,
{
    if let Some(tag) = primary_tag {
        if let Some(value) = extractor(tag) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    for tag in tags {
        if let Some(value) = extractor(tag) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    None
}

fn first_embedded_picture(primary_tag: Option<&Tag>, tags: &[Tag]) -> Option<Artwork> {
    let picture = primary_tag
        .and_then(|tag| tag.pictures().first())
        .or_else(|| tags.iter().find_map(|tag| tag.pictures().first()))?;

    let mime_type = picture
        .mime_type()
        .map(|mime| mime.as_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Some(Artwork {
        mime_type,
        data: picture.data().to_vec(),
    })
}

/// Reads tag metadata for a media file. Returns the empty record when the
/// file has no readable tags.
pub fn resolve_metadata(path: &Path) -> MetadataRecord {
    let tagged_file = match read_from_path(path) {
        Ok(file) => file,
        Err(err) => {
            warn!("Failed to read tags from {:?}: {}", path, err);
            return MetadataRecord::default();
        }
    };

    let primary_tag = tagged_file.primary_tag();
    let tags = tagged_file.tags();

    MetadataRecord {
        title: first_non_empty_value(primary_tag, tags, |tag| {
            tag.title().map(|value| value.into_owned())
        }),
        artist: first_non_empty_value(primary_tag, tags, |tag| {
            tag.artist().map(|value| value.into_owned())
        }),
        album: first_non_empty_value(primary_tag, tags, |tag| {
            tag.album().map(|value| value.into_owned())
        }),
        artwork: first_embedded_picture(primary_tag, tags),
    }
}

// Answers ResolveTrack requests on the bus
pub struct MetadataManager {
    bus_consumer: Receiver<protocol::Message>,
    bus_producer: Sender<protocol::Message>,
}

impl MetadataManager {
    pub fn new(
        bus_consumer: Receiver<protocol::Message>,
        bus_producer: Sender<protocol::Message>,
    ) -> Self {
        Self {
            bus_consumer,
            bus_producer,
        }
    }

    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(protocol::Message::Metadata(protocol::MetadataMessage::ResolveTrack(
                    track,
                ))) => {
                    debug!("MetadataManager: Resolving {:?}", track.path);
                    let record = resolve_metadata(&track.path);
                    let _ = self.bus_producer.send(protocol::Message::Metadata(
                        protocol::MetadataMessage::TrackResolved {
                            track_id: track.id,
                            record,
                        },
                    ));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(count)) => {
                    warn!("MetadataManager: Bus lagged, skipped {} messages", count);
                }
                Err(RecvError::Closed) => {
                    debug!("MetadataManager: Bus closed, exiting");
                    break;
                }
            }
        }
    }
}
