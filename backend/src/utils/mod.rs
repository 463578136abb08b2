pub mod error;
pub mod format;
pub mod sql_text;

pub use error::{AnalyzerError, AnalyzerResult, ErrorReport};
pub use sql_text::SqlText;
