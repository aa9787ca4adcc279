pub mod auth;
pub mod config;
pub mod dispatch;
pub mod endpoints;
pub mod error;
pub mod soap;
pub mod utils;
pub mod wsdl;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
