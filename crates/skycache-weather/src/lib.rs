//! Weather lookups for SkyCache
//!
//! Resolves location queries against a shared cache, falling back to the
//! Visual Crossing timeline API on a miss.

pub mod cache;
pub mod error;
pub mod provider;
pub mod resolver;
pub mod types;

pub use cache::{open_store, CacheStore, MemoryCache, RedisCache};
pub use error::{CacheError, FetchError, WeatherError};
pub use provider::{WeatherProvider, WeatherSource};
pub use resolver::WeatherResolver;
pub use types::*;
