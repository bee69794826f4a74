//! Tag extraction for uploaded files.

use std::fmt;
use std::path::Path;

use lofty::{Accessor, Probe, Tag, TaggedFileExt};

/// Artist and title read from an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    pub artist: String,
    pub title: String,
}

#[derive(Debug)]
pub enum ValidationError {
    /// The container could not be probed or parsed.
    Unreadable(String),
    /// The file parsed but carries no usable artist/title pair.
    MissingTags,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Unreadable(msg) => write!(f, "unreadable audio file: {msg}"),
            ValidationError::MissingTags => write!(f, "artist/title tags missing"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Read artist and title from `path`. Only reads; never touches the file.
///
/// The container type is guessed from content, so the client-chosen file name
/// does not matter.
pub fn read_track_tags(path: &Path) -> Result<TrackTags, ValidationError> {
    let tagged = Probe::open(path)
        .map_err(unreadable)?
        .guess_file_type()
        .map_err(unreadable)?
        .read()
        .map_err(unreadable)?;

    let primary = tagged.primary_tag().and_then(tags_from);
    primary
        .or_else(|| tagged.tags().iter().find_map(tags_from))
        .ok_or(ValidationError::MissingTags)
}

fn unreadable(e: impl fmt::Display) -> ValidationError {
    ValidationError::Unreadable(e.to_string())
}

fn tags_from(tag: &Tag) -> Option<TrackTags> {
    let artist = non_blank(tag.artist().map(|s| s.to_string()))?;
    let title = non_blank(tag.title().map(|s| title_leaf(&s).to_string()))?;
    Some(TrackTags { artist, title })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Drop any `/`-qualified prefix from a title, keeping the final component.
pub fn title_leaf(title: &str) -> &str {
    title.rsplit('/').next().unwrap_or(title)
}
