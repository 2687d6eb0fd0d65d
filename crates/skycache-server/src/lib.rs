//! HTTP front end for SkyCache

pub mod server;

pub use server::{ErrorResponse, RateLimiter, ServerError, WeatherServer};
