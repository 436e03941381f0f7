//! Muse - request gateway for generative-text providers
//!
//! Every outbound provider call goes through one place: a two-tier response
//! cache (memory, then an optional SQLite store), a per-provider trailing
//! window rate limiter, and a retrying HTTP client, all fed by a single
//! background worker draining a FIFO queue.
//!
//! # Text generation
//!
//! ```rust,no_run
//! use muse::{Muse, TextRequest};
//!
//! #[tokio::main]
//! async fn main() -> muse::Result<()> {
//!     let gateway = Muse::builder()
//!         .api_key("openai", "sk-your-key")
//!         .build()
//!         .await?;
//!
//!     let haiku = gateway
//!         .generate_text(
//!             TextRequest::new("openai", "gpt-3.5-turbo", "Write a haiku")
//!                 .max_tokens(50)
//!                 .temperature(0.7),
//!         )
//!         .await?;
//!
//!     println!("{haiku}");
//!     gateway.shutdown(std::time::Duration::from_secs(5)).await
//! }
//! ```
//!
//! # Fire and forget
//!
//! ```rust,no_run
//! # async fn demo(gateway: muse::Gateway) {
//! use serde_json::json;
//!
//! let id = gateway.request_async(
//!     "openai",
//!     "embeddings",
//!     json!({ "model": "text-embedding-3-small", "input": "hello" }),
//!     |result| match result {
//!         Ok(body) => println!("{body}"),
//!         Err(e) => eprintln!("embedding failed: {e}"),
//!     },
//! );
//! println!("queued {id}");
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod providers;
pub mod queue;
pub mod telemetry;
pub mod traits;
pub mod types;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheStats, ResponseCache};
pub use config::{AuthScheme, GatewayConfig, ProviderConfig};
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayBuilder, ModelPrice, Muse, PricingTable, UsageSummary};
pub use providers::{AdapterRegistry, ProviderAdapter, RateLimiter, RetryConfig};
pub use queue::{RequestId, RequestState};
pub use traits::ProjectDirectory;
pub use types::{ProjectContext, TextRequest, TokenUsage, UsageRecord};
