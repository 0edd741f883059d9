pub mod config;
pub mod wiki;
