//! Event source adapters: CloudTrail lookup, request signing and bounded retry.

mod cloudtrail;
mod event;
mod retry;
pub mod sigv4;

pub use cloudtrail::{CloudTrailClient, LOOKUP_PAGE_LIMIT};
pub use event::RawEvent;
pub use retry::{RetryPolicy, RetryingSource};
pub use sigv4::Credentials;

use crate::error::Result;

/// Paginated audit-log lookup.
pub trait EventSource: Send + Sync {
    /// Up to `max_results` most recent events for `trail`, newest first.
    fn fetch(&self, trail: &str, max_results: usize) -> Result<Vec<RawEvent>>;
}

impl<T: EventSource + ?Sized> EventSource for Box<T> {
    fn fetch(&self, trail: &str, max_results: usize) -> Result<Vec<RawEvent>> {
        (**self).fetch(trail, max_results)
    }
}

impl<T: EventSource + ?Sized> EventSource for std::sync::Arc<T> {
    fn fetch(&self, trail: &str, max_results: usize) -> Result<Vec<RawEvent>> {
        (**self).fetch(trail, max_results)
    }
}
