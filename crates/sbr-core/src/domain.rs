use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a story on the source platform.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoryId(pub String);

impl StoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// Map a source media type label (`IMAGE`, `VIDEO`, ...) to a kind.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type.trim().to_ascii_uppercase().as_str() {
            "IMAGE" | "PHOTO" | "CAROUSEL_ALBUM" => Some(Self::Photo),
            "VIDEO" | "REELS" => Some(Self::Video),
            _ => None,
        }
    }

    /// Guess from the URL path extension; anything unknown is a photo.
    pub fn guess_from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let ext = path
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("mp4" | "mov" | "m4v" | "webm") => Self::Video,
            _ => Self::Photo,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Photo => "jpg",
            Self::Video => "mp4",
        }
    }
}

/// One piece of remote story content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoryRef {
    pub id: StoryId,
    pub source_url: String,
    pub kind: MediaKind,
}

impl StoryRef {
    /// Build a reference, guessing the media kind from the URL.
    pub fn new(id: impl Into<String>, source_url: impl Into<String>) -> Self {
        let source_url = source_url.into();
        let kind = MediaKind::guess_from_url(&source_url);
        Self {
            id: StoryId(id.into()),
            source_url,
            kind,
        }
    }

    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Destination confirmation for one uploaded story.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishReceipt {
    pub message_id: String,
}
