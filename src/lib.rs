pub mod cli;
pub mod config;
pub mod crawler;
pub mod events;
pub mod filter;
pub mod logging;
pub mod mapper;
pub mod models;
pub mod network;
pub mod parser;
pub mod postprocess;
pub mod rewrite;
pub mod site_index;
pub mod state;
pub mod strategy;
pub mod url_utils;

// Re-export main types for library usage
pub use crawler::{Job, JobError, DISCOVERY_PATHS};
pub use events::EventSink;
pub use filter::UrlFilter;
pub use models::{CrawlConfig, FileMetadata, JobStats, StatsSnapshot};
pub use network::{FetchError, Fetcher};
pub use parser::ContentParser;
pub use postprocess::{PostConfig, PostProcessor, PostReport};
pub use rewrite::{rewrite_link, ContentHandler};
pub use site_index::SiteIndex;
pub use state::JobState;
pub use strategy::SaveStrategy;
