pub mod checks;
pub mod config;
pub mod data;
pub mod pipeline;
pub mod report;
pub mod types;
