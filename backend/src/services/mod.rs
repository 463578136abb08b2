pub mod query_analyzer;

pub use query_analyzer::{DetectorEngine, analyze_query};
