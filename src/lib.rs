//! Page view counter and GitHub star cache behind a portfolio website.
//!
//! Views are counted per project slug in redis, optionally once per visitor per day. Star counts
//! are fetched from the GitHub API and cached for a configurable time.

pub mod app;
pub mod config;
pub mod helper;
pub mod http;
pub mod server;
pub mod stars;
pub mod store;
pub mod views;
