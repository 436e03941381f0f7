//! Gateway façade, builder, and usage accounting

mod builder;
mod core;
pub mod pricing;
pub mod usage;

pub use builder::{GatewayBuilder, Muse};
pub use core::Gateway;
pub use pricing::{ModelPrice, PricingTable};
pub use usage::{ProviderUsage, UsageLog, UsageSummary};
