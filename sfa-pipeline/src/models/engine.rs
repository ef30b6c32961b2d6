//! Separation engine and mode selection
//!
//! A closed union of `(engine, mode)` pairs, each carrying its own typed
//! parameter set. Unknown pairs fail at deserialization and parameter
//! ranges are validated before any job row is created, so nothing falls
//! through silently into an executor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stem artifact type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StemType {
    Vocals,
    Drums,
    Bass,
    Other,
    Guitar,
    Piano,
}

impl StemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StemType::Vocals => "vocals",
            StemType::Drums => "drums",
            StemType::Bass => "bass",
            StemType::Other => "other",
            StemType::Guitar => "guitar",
            StemType::Piano => "piano",
        }
    }

    pub fn parse(s: &str) -> Option<StemType> {
        match s {
            "vocals" => Some(StemType::Vocals),
            "drums" => Some(StemType::Drums),
            "bass" => Some(StemType::Bass),
            "other" => Some(StemType::Other),
            "guitar" => Some(StemType::Guitar),
            "piano" => Some(StemType::Piano),
            _ => None,
        }
    }
}

impl fmt::Display for StemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local separation model
///
/// The 6-stem model additionally produces guitar and piano stems.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeparationModel {
    #[default]
    Htdemucs,
    HtdemucsFt,
    #[serde(rename = "htdemucs_6s")]
    Htdemucs6s,
    MdxExtra,
}

impl SeparationModel {
    /// Model name as passed to the separator tool
    pub fn as_str(&self) -> &'static str {
        match self {
            SeparationModel::Htdemucs => "htdemucs",
            SeparationModel::HtdemucsFt => "htdemucs_ft",
            SeparationModel::Htdemucs6s => "htdemucs_6s",
            SeparationModel::MdxExtra => "mdx_extra",
        }
    }

    pub fn parse(s: &str) -> Option<SeparationModel> {
        match s {
            "htdemucs" => Some(SeparationModel::Htdemucs),
            "htdemucs_ft" => Some(SeparationModel::HtdemucsFt),
            "htdemucs_6s" => Some(SeparationModel::Htdemucs6s),
            "mdx_extra" => Some(SeparationModel::MdxExtra),
            _ => None,
        }
    }

    /// Stem set this model produces
    pub fn stem_types(&self) -> &'static [StemType] {
        match self {
            SeparationModel::Htdemucs6s => &[
                StemType::Vocals,
                StemType::Drums,
                StemType::Bass,
                StemType::Guitar,
                StemType::Piano,
                StemType::Other,
            ],
            _ => &[
                StemType::Vocals,
                StemType::Drums,
                StemType::Bass,
                StemType::Other,
            ],
        }
    }
}

/// Cloud separation mode with its required parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CloudMode {
    /// Full stem split (no parameters)
    FullSplit,
    /// Selectable subset of stem types (must be non-empty)
    MultiStem { stems: Vec<StemType> },
    /// Voice denoise with a noise level parameter (0-100)
    VoiceClean { noise_level: u8 },
    /// Voice conversion with a voice pack and accent blend (0.0-1.0)
    VoiceChange {
        voice_pack_id: String,
        accent_blend: f64,
    },
    /// De-reverberation toggle
    DeReverb { de_reverb: bool },
}

impl CloudMode {
    /// Mode name as sent to the remote API
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudMode::FullSplit => "full_split",
            CloudMode::MultiStem { .. } => "multi_stem",
            CloudMode::VoiceClean { .. } => "voice_clean",
            CloudMode::VoiceChange { .. } => "voice_change",
            CloudMode::DeReverb { .. } => "de_reverb",
        }
    }
}

fn default_output_format() -> String {
    "mp3".to_string()
}

/// Validated `(engine, mode)` selection for one processing job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum SeparationRequest {
    /// On-box separation tool with a selectable model
    Local {
        #[serde(default)]
        model: SeparationModel,
        #[serde(default = "default_output_format")]
        output_format: String,
    },
    /// Remote cloud API with task polling and cancellation
    Cloud {
        #[serde(flatten)]
        mode: CloudMode,
        /// Cheap preview render instead of the full-quality one
        #[serde(default)]
        preview: bool,
    },
}

impl SeparationRequest {
    /// Default local request with the given model
    pub fn local(model: SeparationModel) -> Self {
        SeparationRequest::Local {
            model,
            output_format: default_output_format(),
        }
    }

    /// Engine name as stored on the job row
    pub fn engine(&self) -> &'static str {
        match self {
            SeparationRequest::Local { .. } => "local",
            SeparationRequest::Cloud { .. } => "cloud",
        }
    }

    /// Mode name as stored on the job row
    pub fn mode(&self) -> &'static str {
        match self {
            SeparationRequest::Local { .. } => "default",
            SeparationRequest::Cloud { mode, .. } => mode.as_str(),
        }
    }

    /// Validate parameter ranges before any job row is created
    pub fn validate(&self) -> Result<(), String> {
        match self {
            SeparationRequest::Local { output_format, .. } => {
                if output_format.is_empty() {
                    return Err("output_format must not be empty".to_string());
                }
                Ok(())
            }
            SeparationRequest::Cloud { mode, .. } => match mode {
                CloudMode::FullSplit | CloudMode::DeReverb { .. } => Ok(()),
                CloudMode::MultiStem { stems } => {
                    if stems.is_empty() {
                        Err("multi_stem requires a non-empty stem subset".to_string())
                    } else {
                        Ok(())
                    }
                }
                CloudMode::VoiceClean { noise_level } => {
                    if *noise_level > 100 {
                        Err(format!("noise_level must be 0-100, got {}", noise_level))
                    } else {
                        Ok(())
                    }
                }
                CloudMode::VoiceChange {
                    voice_pack_id,
                    accent_blend,
                } => {
                    if voice_pack_id.is_empty() {
                        return Err("voice_change requires a voice_pack_id".to_string());
                    }
                    if !(0.0..=1.0).contains(accent_blend) {
                        return Err(format!(
                            "accent_blend must be 0.0-1.0, got {}",
                            accent_blend
                        ));
                    }
                    Ok(())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_request_json_shape() {
        let json = r#"{"engine": "local", "model": "htdemucs_6s", "output_format": "wav"}"#;
        let request: SeparationRequest = serde_json::from_str(json).expect("parse");
        assert_eq!(request.engine(), "local");
        assert_eq!(request.mode(), "default");
        assert!(request.validate().is_ok());
        match request {
            SeparationRequest::Local { model, .. } => {
                assert_eq!(model, SeparationModel::Htdemucs6s);
                assert_eq!(model.stem_types().len(), 6);
            }
            _ => panic!("expected local request"),
        }
    }

    #[test]
    fn test_local_defaults() {
        let request: SeparationRequest =
            serde_json::from_str(r#"{"engine": "local"}"#).expect("parse");
        match request {
            SeparationRequest::Local {
                model,
                output_format,
            } => {
                assert_eq!(model, SeparationModel::Htdemucs);
                assert_eq!(output_format, "mp3");
            }
            _ => panic!("expected local request"),
        }
    }

    #[test]
    fn test_cloud_mode_json_shape() {
        let json = r#"{"engine": "cloud", "mode": "multi_stem", "stems": ["vocals", "drums"]}"#;
        let request: SeparationRequest = serde_json::from_str(json).expect("parse");
        assert_eq!(request.engine(), "cloud");
        assert_eq!(request.mode(), "multi_stem");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_unknown_mode_is_rejected_at_parse_time() {
        let json = r#"{"engine": "cloud", "mode": "karaoke"}"#;
        assert!(serde_json::from_str::<SeparationRequest>(json).is_err());
    }

    #[test]
    fn test_multi_stem_requires_nonempty_subset() {
        let request = SeparationRequest::Cloud {
            mode: CloudMode::MultiStem { stems: vec![] },
            preview: false,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_voice_change_parameter_ranges() {
        let missing_pack = SeparationRequest::Cloud {
            mode: CloudMode::VoiceChange {
                voice_pack_id: String::new(),
                accent_blend: 0.5,
            },
            preview: false,
        };
        assert!(missing_pack.validate().is_err());

        let out_of_range = SeparationRequest::Cloud {
            mode: CloudMode::VoiceChange {
                voice_pack_id: "alto-7".to_string(),
                accent_blend: 1.5,
            },
            preview: false,
        };
        assert!(out_of_range.validate().is_err());

        let ok = SeparationRequest::Cloud {
            mode: CloudMode::VoiceChange {
                voice_pack_id: "alto-7".to_string(),
                accent_blend: 1.0,
            },
            preview: true,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_voice_clean_noise_level_range() {
        let request = SeparationRequest::Cloud {
            mode: CloudMode::VoiceClean { noise_level: 101 },
            preview: false,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_request_roundtrip_through_job_options_payload() {
        let request = SeparationRequest::Cloud {
            mode: CloudMode::VoiceChange {
                voice_pack_id: "alto-7".to_string(),
                accent_blend: 0.25,
            },
            preview: true,
        };
        let json = serde_json::to_string(&request).expect("serialize");
        let back: SeparationRequest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, request);
    }
}
