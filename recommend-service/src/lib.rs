pub mod config;
pub mod embed;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use jobs::{JobPriority, JobStatus, VectorizationQueue};
pub use services::{MethodWeights, RecommendationEngine, RecommendationRequest};
