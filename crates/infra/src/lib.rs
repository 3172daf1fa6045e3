pub mod config;
pub mod jobs;
pub mod logging;
pub mod media;
pub mod runtime;
pub mod store;
