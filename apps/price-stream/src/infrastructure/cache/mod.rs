//! Price Store Adapters
//!
//! - `InMemoryPriceStore`: process-local map with per-entry expiry
//! - `UpstashPriceStore`: shared Redis reached over Upstash's REST API

mod memory;
mod upstash;

pub use memory::InMemoryPriceStore;
pub use upstash::UpstashPriceStore;
