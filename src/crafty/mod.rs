pub mod auth;
pub mod client;
pub mod models;
pub mod task;

pub use auth::{AuthError, TokenProvider};
pub use client::{CraftyClient, ServerAction};
pub use models::{ApiResponse, LogLines, ServerStats};
