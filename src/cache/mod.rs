#![forbid(unsafe_code)]

//! Live-query result cache and change notification.

mod listener;
mod result_cache;

pub use listener::QueryListener;
pub use result_cache::{CachedQueryResult, QueryResultCache};
