pub mod fetch_config;
pub mod pipeline_config;

pub use fetch_config::FetchConfig;
pub use pipeline_config::*;
