pub mod api;
pub mod bamboohr;
pub mod config;
pub mod identity;
pub mod progress;
pub mod store;
pub mod sync;
