//! Data models for the SFA pipeline service

pub mod analysis;
pub mod engine;
pub mod job;
pub mod options;
pub mod stem;
pub mod track;

pub use analysis::{AnalysisResult, Feature};
pub use engine::{CloudMode, SeparationModel, SeparationRequest, StemType};
pub use job::{AnalysisJob, DownloadJob, ProcessingJob};
pub use options::{
    AnalysisJobOptions, AnalysisStageOptions, DownloadJobOptions, DownloadStageOptions,
    PipelineOptions, ProcessingJobOptions,
};
pub use stem::{Stem, StemFile};
pub use track::{Track, TrackMetadata};
