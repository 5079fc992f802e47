//! Checklist Crawler
//!
//! Harvests the checklist of a remotely rendered, virtualized table through a
//! browser session and delivers it to the central datastore in verified,
//! strictly sequential batches. A second phase re-checks approved records
//! for their days 21-30 status.

pub mod application;
pub mod cli;
pub mod crawling;
pub mod domain;
pub mod infrastructure;

pub use application::CrawlerService;
