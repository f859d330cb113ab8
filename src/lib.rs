pub mod api;
pub mod app;
pub mod config;
pub mod errors;
pub mod security;
pub mod session;
pub mod transport;
pub mod utils;

pub use app::App;
pub use errors::GatewayError;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
