//! Caching subsystem.
//!
//! Only first pages are cached: a [`response::ResponseCache`] maps
//! `namespace:identity` keys to the first page of a query plus its total
//! count. See the [`response`] module docs for expiry and sharing rules.

pub mod response;

pub use response::{CacheConfig, CacheEntry, CachedPage, ResponseCache};
