pub mod adapter;
pub mod assembler;
pub mod geometry;
pub mod hotspot;
pub mod orchestrator;
pub mod sensitivity;

pub use crate::domain::ports::{ConfigProvider, Source};
pub use crate::utils::error::Result;
pub use adapter::{SourceAdapter, SourceResult};
pub use assembler::{AssemblyInput, ResponseAssembler};
pub use geometry::PolygonValidator;
pub use hotspot::HotspotDetector;
pub use orchestrator::{Orchestrator, Sources};
