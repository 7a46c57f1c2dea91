// File: ./src/client/mod.rs
pub mod core;
pub mod middleware;
pub mod transport;

pub use crate::client::core::{CalDavSource, CalendarEntry};

use crate::model::RawEvent;
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

/// Where the poll loop gets its raw events from.
pub trait CalendarSource: Send + Sync {
    /// Events with at least one instance overlapping the window. Recurring
    /// masters are returned unexpanded.
    fn fetch(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<RawEvent>>>;
}
