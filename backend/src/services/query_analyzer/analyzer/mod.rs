//! Query analyzer module
//!
//! Pattern detectors and the engine that ranks their findings.

pub mod detector_engine;
pub mod detectors;

pub use detector_engine::{DetectorEngine, DetectorEngineConfig};
pub use detectors::{DetectionContext, Detector, get_all_detectors};
