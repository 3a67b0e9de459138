#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod config;
pub mod data;
pub mod estimator;
pub mod features;
pub mod genetic;
pub mod guidelines;
pub mod inference;
pub mod metrics;
pub mod preprocess;
pub mod registry;
pub mod report;
pub mod service;
pub mod slot;
pub mod task;
pub mod therapy;
pub mod training;

#[cfg(test)]
mod test_fixtures;

pub use features::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector};
pub use registry::{ModelRegistry, RegistryError};
pub use report::ComprehensiveResult;
pub use service::ModelService;
pub use task::Task;
