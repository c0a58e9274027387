//! EngageTrack: churn scoring for subscription customers
//!
//! This library loads customer records from CSV, prepares them for a
//! gradient-boosted tree classifier, scores individual customers and maps
//! the results to risk bands and engagement nudges.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod model;
pub mod nudge;
pub mod preprocess;
pub mod risk;
pub mod scoring;
pub mod session;
pub mod usage_log;

// Re-export public items for easier access
pub use cli::Args;
pub use config::Config;
pub use data::{assign_variants, DataLoader, Record, Table};
pub use error::{ErrorKind, PipelineError};
pub use model::{train, GradientBoostedClassifier};
pub use preprocess::{fit, transform, PipelineArtifacts, Prepared};
pub use risk::{churn_band, engagement_band, Band, BandOutcome, Thresholds};
pub use scoring::{score, CustomerSummary, TrainedPipeline};
pub use session::Session;

/// Common result type used by the binary and configuration glue
pub type Result<T> = anyhow::Result<T>;
