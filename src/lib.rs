pub mod analysis;
pub mod api;
pub mod cleaner;
pub mod concurrent_fetcher;
pub mod models;
