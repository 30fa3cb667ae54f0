pub mod analytics;
pub mod sample;
