pub mod client;
pub mod config;
pub mod context;
pub mod guard;
pub mod initializer;
pub mod payload;
pub mod readiness;
pub mod sanitize;
pub mod server;
pub mod services;
pub mod site;

pub use config::Config;
pub use context::AppContext;
