pub mod config;
pub mod database;
pub mod engine;
pub mod merge;
pub mod models;
pub mod providers;
pub mod singleflight;
pub mod throttle;

pub use config::Config;
pub use engine::Engine;
pub use models::{FundamentalsError, FundamentalsRecord, FundamentalsResponse, Market};
