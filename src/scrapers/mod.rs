pub mod browser;
pub mod clean;
pub mod detail;
pub mod fetch;
pub mod search;
pub mod traits;
pub mod types;

pub use browser::BrowserFetcher;
pub use detail::{DetailExtractor, DetailSettings};
pub use fetch::{HttpFetcher, RateLimiter, RetryPolicy};
pub use search::{PageCursor, PageLinks, PaginationSettings, SearchPaginator, StopReason};
pub use traits::PageFetcher;
pub use types::{DelayRange, UnitOfWork};
