//! Track reference model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reference to a piece of music
///
/// Created on first import; read by all three stages; never mutated by
/// them (stages attach child records). Deleted only by explicit user
/// action, which cascades to jobs and derived artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub track_id: Uuid,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    /// Provider URL this track was imported from
    pub source_url: String,
    /// Provider-side identifier, when known
    pub provider_id: Option<String>,
    pub duration_seconds: Option<f64>,
    pub cover_url: Option<String>,
    pub isrc: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Track {
    /// Build a track row from fetched provider metadata
    pub fn from_metadata(source_url: String, meta: &TrackMetadata) -> Self {
        Self {
            track_id: Uuid::new_v4(),
            title: meta.name.clone(),
            artist: meta.artists.join(", "),
            album: meta.album_name.clone(),
            source_url,
            provider_id: meta.song_id.clone(),
            duration_seconds: meta.duration,
            cover_url: meta.cover_url.clone(),
            isrc: meta.isrc.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Provider metadata as emitted by the fetch helper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub album_name: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub song_id: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_from_metadata() {
        let meta = TrackMetadata {
            name: "Windowpane".to_string(),
            artists: vec!["Opeth".to_string()],
            album_name: Some("Damnation".to_string()),
            duration: Some(464.0),
            song_id: Some("3KnmRbp1".to_string()),
            cover_url: None,
            isrc: Some("SEWED0300101".to_string()),
        };
        let track = Track::from_metadata("https://example.com/track/3KnmRbp1".to_string(), &meta);
        assert_eq!(track.title, "Windowpane");
        assert_eq!(track.artist, "Opeth");
        assert_eq!(track.provider_id.as_deref(), Some("3KnmRbp1"));
    }
}
