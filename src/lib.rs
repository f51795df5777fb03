pub mod adapters;
#[cfg(feature = "server")]
pub mod api;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::InsightConfig;

pub use adapters::http_sources;
pub use core::{Orchestrator, Sources};
pub use domain::model::{AnalysisRequest, RequestOptions, ResponseDocument};
pub use utils::error::{InsightError, Result};
