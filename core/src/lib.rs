pub mod auth;
pub mod config;
pub mod content;
pub mod emergency;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod load;
pub mod scorer;
pub mod store;
mod task;
pub mod trust;

pub use config::{AdaptiveRateLimitConfig, BaselineQuota, EngineSettings};
pub use content::ContentType;
pub use engine::{RateLimitEngine, SystemStatus};
pub use scorer::AdaptiveResult;
