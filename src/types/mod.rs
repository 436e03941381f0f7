//! Public request and accounting types.

pub mod request;
pub mod usage;

pub use request::{GenerationParams, ProjectContext, TextRequest};
pub use usage::{TokenUsage, UsageRecord};
