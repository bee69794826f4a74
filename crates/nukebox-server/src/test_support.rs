//! Fixtures shared by the unit tests.

use std::path::Path;

use lofty::{Accessor, Tag, TagExt, TagType};

// MPEG-1 Layer III, 128 kbps, 44.1 kHz, no padding: 417-byte frames.
const FRAME_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
const FRAME_LEN: usize = 417;

pub(crate) fn mp3_bytes() -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_LEN * 8);
    for _ in 0..8 {
        out.extend_from_slice(&FRAME_HEADER);
        out.resize(out.len() + FRAME_LEN - FRAME_HEADER.len(), 0);
    }
    out
}

pub(crate) fn write_mp3(path: &Path) {
    std::fs::write(path, mp3_bytes()).expect("write mp3 frames");
}

pub(crate) fn write_tagged_mp3(path: &Path, artist: Option<&str>, title: Option<&str>) {
    write_mp3(path);
    let mut tag = Tag::new(TagType::Id3v2);
    if let Some(artist) = artist {
        tag.set_artist(artist.to_string());
    }
    if let Some(title) = title {
        tag.set_title(title.to_string());
    }
    tag.save_to_path(path).expect("save id3v2 tag");
}

/// Raw bytes of a tagged mp3, for feeding through a transfer session.
pub(crate) fn tagged_mp3_bytes(artist: &str, title: &str) -> Vec<u8> {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fixture.mp3");
    write_tagged_mp3(&path, Some(artist), Some(title));
    std::fs::read(&path).expect("read fixture")
}
