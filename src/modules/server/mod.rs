pub mod commands;
pub mod controller;
pub mod format;

pub use commands::{kill, restart, start, status, stop};
pub use controller::ServerController;
