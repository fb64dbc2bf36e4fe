pub mod bench;
pub mod config;
pub mod dataset;
pub mod errors;
