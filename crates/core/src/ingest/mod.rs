pub mod chart;
pub mod error;
pub mod provider;
pub mod strategy;
pub mod tabular;

pub use error::FetchError;
pub use provider::{RetryPolicy, SourceAdapter};
pub use strategy::{FetchStrategy, SourceSet};
