pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod rate_limit;
pub mod server;

pub use config::AppConfig;
pub use error::ApiError;
pub use server::{AppState, MedcertServer, ServerBuilder, build_app, build_router};
