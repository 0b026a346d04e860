pub mod analytics;
pub mod optimize;
