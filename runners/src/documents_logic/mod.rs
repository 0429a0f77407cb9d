pub mod config;
pub mod logger;
pub mod simulated;
pub mod source;
