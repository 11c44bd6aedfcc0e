pub mod config;
pub mod console;
pub mod mqtt;
pub mod store;
