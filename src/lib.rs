pub mod config;
pub mod dates;
pub mod export;
pub mod models;
pub mod pipeline;
pub mod scraper;
pub mod storage;
pub mod utils;
pub mod venues;
