pub mod config;
pub mod host;
pub mod logger;
pub mod module;
pub mod presenter;
