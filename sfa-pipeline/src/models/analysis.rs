//! Analysis feature model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Feature the analyzer can extract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Tempo,
    Key,
    Energy,
    Spectral,
    Mfcc,
    Chroma,
    All,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Tempo => "tempo",
            Feature::Key => "key",
            Feature::Energy => "energy",
            Feature::Spectral => "spectral",
            Feature::Mfcc => "mfcc",
            Feature::Chroma => "chroma",
            Feature::All => "all",
        }
    }

    pub fn parse(s: &str) -> Option<Feature> {
        match s {
            "tempo" => Some(Feature::Tempo),
            "key" => Some(Feature::Key),
            "energy" => Some(Feature::Energy),
            "spectral" => Some(Feature::Spectral),
            "mfcc" => Some(Feature::Mfcc),
            "chroma" => Some(Feature::Chroma),
            "all" => Some(Feature::All),
            _ => None,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived feature payload produced by a completed analysis job
///
/// Tempo, key and energy are pulled out into columns for querying; the
/// full (possibly nested) feature map is kept as JSON alongside.
/// Re-analysis deletes prior results; at most one current set per track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub result_id: Uuid,
    pub track_id: Uuid,
    pub analysis_job_id: Uuid,
    pub tempo: Option<f64>,
    pub musical_key: Option<String>,
    pub energy: Option<f64>,
    /// Full feature map as returned by the analyzer
    pub features: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Build a result row from the analyzer's feature map
    pub fn from_features(
        track_id: Uuid,
        analysis_job_id: Uuid,
        features: serde_json::Value,
    ) -> Self {
        let tempo = features.get("tempo").and_then(|v| v.as_f64());
        let musical_key = features
            .get("key")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let energy = features.get("energy").and_then(|v| v.as_f64());
        Self {
            result_id: Uuid::new_v4(),
            track_id,
            analysis_job_id,
            tempo,
            musical_key,
            energy,
            features,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feature_parse_matches_analyzer_vocabulary() {
        for name in ["tempo", "key", "energy", "spectral", "mfcc", "chroma", "all"] {
            assert!(Feature::parse(name).is_some(), "{name} should parse");
        }
        assert!(Feature::parse("loudness").is_none());
    }

    #[test]
    fn test_result_extracts_scalar_columns() {
        let features = json!({
            "tempo": 121.5,
            "key": "C major",
            "energy": 0.42,
            "spectral_centroid": 1500.0,
            "mfcc": [1.0, 2.0, 3.0],
        });
        let result =
            AnalysisResult::from_features(Uuid::new_v4(), Uuid::new_v4(), features.clone());
        assert_eq!(result.tempo, Some(121.5));
        assert_eq!(result.musical_key.as_deref(), Some("C major"));
        assert_eq!(result.energy, Some(0.42));
        assert_eq!(result.features, features);
    }

    #[test]
    fn test_result_tolerates_missing_scalars() {
        let result = AnalysisResult::from_features(
            Uuid::new_v4(),
            Uuid::new_v4(),
            json!({"chroma_stft": [0.1, 0.2]}),
        );
        assert_eq!(result.tempo, None);
        assert_eq!(result.musical_key, None);
    }
}
