//! # SFA Common Library
//!
//! Shared code for the SFA stem-separation pipeline:
//! - Event types (PipelineEvent enum) and the EventBus
//! - Consumer-side pipeline state projection
//! - Configuration loading and root folder resolution
//! - SSE utilities
//! - Common error types

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
