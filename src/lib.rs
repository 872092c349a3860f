pub mod archive;
pub mod config;
pub mod datasets;
pub mod download;
pub mod driver;
pub mod error;
pub mod images;
pub mod matfile;
pub mod progress;
pub mod records;

pub use config::Config;
pub use error::PrepError;

// Labels are stored as int64 features in the output records
pub type Label = i64;
