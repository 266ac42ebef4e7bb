pub mod cache_items;
pub mod libraries;
pub mod movies;
pub mod transcode_jobs;
