pub mod command;
pub mod config;
pub mod ids;
pub mod report;
pub mod scenario;

pub use command::*;
pub use config::*;
pub use ids::RunId;
pub use report::*;
pub use scenario::*;

/// Maximum length for user-supplied regex patterns.
pub const MAX_REGEX_PATTERN_LEN: usize = 1000;
